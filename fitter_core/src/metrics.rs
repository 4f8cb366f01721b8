//! Fit metrics: residuals and pulls against truth, χ²/ndf, quality counts.

use crate::{
    track::FittedTrack,
    types::{BoundVector, REDUCED_SIZE},
};
use serde::{Deserialize, Serialize};

/// Accumulated metric statistics over many fits.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FitMetrics {
    /// Fits that returned a track
    pub n_fitted: u64,
    /// Fits that returned an error
    pub n_failed: u64,
    /// Tracks with a singular final normal matrix
    pub n_degraded: u64,
    /// Tracks whose final iteration hit the surface limit
    pub n_truncated: u64,
    /// Tracks entering the residual and pull sums
    pub n_evaluated: u64,
    /// Sum of squared residuals (fitted − truth) per solved parameter
    pub sum_sq_residual: [f64; REDUCED_SIZE],
    /// Sum of squared pulls per solved parameter
    pub sum_sq_pull: [f64; REDUCED_SIZE],
    /// Sum of χ²/ndf over tracks with ndf > 0
    pub sum_chi2_ndf: f64,
    pub n_chi2_ndf: u64,
}

impl FitMetrics {
    /// Accumulate one fitted track against its true parameters.
    ///
    /// Residuals and pulls only use tracks with a clean quality; flagged
    /// tracks are counted but carry no usable covariance.
    pub fn accumulate(&mut self, track: &FittedTrack, truth: &BoundVector) {
        self.n_fitted += 1;
        if track.quality.degraded_covariance {
            self.n_degraded += 1;
        }
        if track.quality.surface_limit_reached {
            self.n_truncated += 1;
        }
        if let Some(chi2_ndf) = track.chi2_per_ndf() {
            self.sum_chi2_ndf += chi2_ndf;
            self.n_chi2_ndf += 1;
        }
        if !track.is_valid() {
            return;
        }

        let cov = track.covariance();
        for i in 0..REDUCED_SIZE {
            let residual = track.parameters.parameters[i] - truth[i];
            self.sum_sq_residual[i] += residual * residual;
            let sigma2 = cov[(i, i)];
            if sigma2 > 0.0 {
                self.sum_sq_pull[i] += residual * residual / sigma2;
            }
        }
        self.n_evaluated += 1;
    }

    pub fn record_failure(&mut self) {
        self.n_failed += 1;
    }

    /// Root-mean-square residual of parameter `i`.
    pub fn rmse(&self, i: usize) -> f64 {
        if self.n_evaluated == 0 {
            return 0.0;
        }
        (self.sum_sq_residual[i] / self.n_evaluated as f64).sqrt()
    }

    /// RMS of the pull of parameter `i`; close to 1 for a consistent fit.
    pub fn pull_rms(&self, i: usize) -> f64 {
        if self.n_evaluated == 0 {
            return 0.0;
        }
        (self.sum_sq_pull[i] / self.n_evaluated as f64).sqrt()
    }

    pub fn mean_chi2_ndf(&self) -> f64 {
        if self.n_chi2_ndf == 0 {
            return 0.0;
        }
        self.sum_chi2_ndf / self.n_chi2_ndf as f64
    }

    /// Fraction of fits that returned a track.
    pub fn efficiency(&self) -> f64 {
        let total = (self.n_fitted + self.n_failed) as f64;
        if total == 0.0 { 1.0 } else { self.n_fitted as f64 / total }
    }

    /// Merge statistics gathered elsewhere (e.g. another worker).
    pub fn merge(&mut self, other: &FitMetrics) {
        self.n_fitted += other.n_fitted;
        self.n_failed += other.n_failed;
        self.n_degraded += other.n_degraded;
        self.n_truncated += other.n_truncated;
        self.n_evaluated += other.n_evaluated;
        for i in 0..REDUCED_SIZE {
            self.sum_sq_residual[i] += other.sum_sq_residual[i];
            self.sum_sq_pull[i] += other.sum_sq_pull[i];
        }
        self.sum_chi2_ndf += other.sum_chi2_ndf;
        self.n_chi2_ndf += other.n_chi2_ndf;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        track::FitQuality,
        types::{BoundMatrix, BoundParameters, GeometryId},
    };
    use approx::assert_abs_diff_eq;

    fn track(values: BoundVector, sigma: f64, quality: FitQuality) -> FittedTrack {
        FittedTrack {
            parameters: BoundParameters::new(GeometryId(0), values)
                .with_covariance(BoundMatrix::identity() * (sigma * sigma)),
            chi2: 4.0,
            ndf: 2,
            n_measurements: 3,
            n_outliers: 0,
            n_holes: 0,
            n_states: 3,
            quality,
            iterations: Vec::new(),
            states: Vec::new(),
        }
    }

    #[test]
    fn residuals_and_pulls() {
        let truth = BoundVector::zeros();
        let mut metrics = FitMetrics::default();
        metrics.accumulate(
            &track(BoundVector::new(0.2, 0.0, 0.0, 0.0, 0.0, 0.0), 0.1, FitQuality::default()),
            &truth,
        );
        metrics.accumulate(
            &track(BoundVector::new(-0.2, 0.0, 0.0, 0.0, 0.0, 0.0), 0.1, FitQuality::default()),
            &truth,
        );
        assert_abs_diff_eq!(metrics.rmse(0), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(metrics.pull_rms(0), 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(metrics.rmse(1), 0.0);
        assert_abs_diff_eq!(metrics.mean_chi2_ndf(), 2.0);
    }

    #[test]
    fn flagged_tracks_are_counted_not_evaluated() {
        let mut metrics = FitMetrics::default();
        let quality = FitQuality {
            degraded_covariance: true,
            surface_limit_reached: true,
        };
        metrics.accumulate(&track(BoundVector::repeat(1.0), 1.0, quality), &BoundVector::zeros());
        metrics.record_failure();

        assert_eq!(metrics.n_degraded, 1);
        assert_eq!(metrics.n_truncated, 1);
        assert_eq!(metrics.n_evaluated, 0);
        assert_eq!(metrics.rmse(0), 0.0);
        assert_abs_diff_eq!(metrics.efficiency(), 0.5);
    }

    #[test]
    fn merge_adds_counts() {
        let mut a = FitMetrics::default();
        a.accumulate(&track(BoundVector::zeros(), 1.0, FitQuality::default()), &BoundVector::zeros());
        let mut b = a.clone();
        b.record_failure();
        a.merge(&b);
        assert_eq!(a.n_fitted, 2);
        assert_eq!(a.n_failed, 1);
        assert_eq!(a.n_evaluated, 2);
    }
}
