//! Per-surface track state recorded by the actor during one iteration.

use crate::{
    error::FitError,
    types::{
        BoundMatrix, BoundVector, DMat, DVec, GeometryId, MeasMatrix, MeasVector, SourceLink,
        MEASUREMENT_DIM,
    },
};

/// Everything the fitter knows about one measurement surface in one iteration.
///
/// The calibrator fills `calibrated` / `calibrated_covariance`; the residual
/// and the 2×2 measurement covariance are derived from them afterwards.
#[derive(Clone, Debug)]
pub struct TrackState {
    /// Surface this state lives on
    pub surface: GeometryId,
    /// The uncalibrated measurement on this surface
    pub source_link: SourceLink,
    /// Predicted parameters from the transport
    pub predicted: BoundVector,
    /// Predicted covariance (only if the start parameters carried one)
    pub predicted_covariance: Option<BoundMatrix>,
    /// Filtered parameters, written by an updater
    pub filtered: Option<BoundVector>,
    pub filtered_covariance: Option<BoundMatrix>,
    /// Transport Jacobian of the last step (previous bound state → here)
    pub jacobian: BoundMatrix,
    /// Product of all step Jacobians from the start surface to here
    pub jacobian_from_start: BoundMatrix,
    /// Accumulated path length at this surface
    pub path_length: f64,
    /// Calibrated measurement
    pub calibrated: DVec,
    /// Calibrated measurement covariance
    pub calibrated_covariance: DMat,
    /// measured − predicted, in the measured local coordinates
    pub residual: MeasVector,
    /// Fixed-size copy of the calibrated covariance
    pub measurement_covariance: MeasMatrix,
    /// Excluded from the normal equations
    pub is_outlier: bool,
}

impl TrackState {
    pub fn new(
        surface: GeometryId,
        source_link: SourceLink,
        predicted: BoundVector,
        predicted_covariance: Option<BoundMatrix>,
        jacobian: BoundMatrix,
        jacobian_from_start: BoundMatrix,
        path_length: f64,
    ) -> Self {
        Self {
            surface,
            source_link,
            predicted,
            predicted_covariance,
            filtered: None,
            filtered_covariance: None,
            jacobian,
            jacobian_from_start,
            path_length,
            calibrated: DVec::zeros(0),
            calibrated_covariance: DMat::zeros(0, 0),
            residual: MeasVector::zeros(),
            measurement_covariance: MeasMatrix::zeros(),
            is_outlier: false,
        }
    }

    /// Dimension of the calibrated measurement.
    pub fn measurement_dim(&self) -> usize {
        self.calibrated.len()
    }

    /// Validate the calibrated measurement and derive residual + covariance.
    pub fn compute_residual(&mut self) -> Result<(), FitError> {
        let dim = self.measurement_dim();
        let cov_shape = self.calibrated_covariance.shape();
        if dim != MEASUREMENT_DIM || cov_shape != (MEASUREMENT_DIM, MEASUREMENT_DIM) {
            return Err(FitError::MeasurementDimension {
                surface: self.surface,
                dim,
            });
        }

        self.residual = MeasVector::from_fn(|i, _| self.calibrated[i] - self.predicted[i]);
        self.measurement_covariance = MeasMatrix::from_fn(|r, c| self.calibrated_covariance[(r, c)]);
        Ok(())
    }

    /// Residual chi-square of this state alone, rᵀ C⁻¹ r.
    pub fn chi2(&self) -> Option<f64> {
        let inv = self.measurement_covariance.try_inverse()?;
        Some((self.residual.transpose() * inv * self.residual)[(0, 0)])
    }
}
