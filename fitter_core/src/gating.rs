//! χ² gating of single measurements against the predicted track.
//!
//! # Gating criterion
//! d² = rᵀ S⁻¹ r  where r = m − H·x̂_pred,  S = H·P_pred·Hᵀ + C
//!
//! Without a predicted covariance S falls back to C alone. A state is an
//! outlier if d² exceeds the threshold.
//!
//! # Threshold table
//! dof=2: χ²(0.99, 2) ≈ 9.21

use crate::{
    extensions::OutlierFinder,
    normal_equations::projector,
    track_state::TrackState,
    types::{MeasMatrix, MEASUREMENT_DIM},
};
use serde::{Deserialize, Serialize};

/// Pre-computed χ² thresholds indexed by dimension [1..=6].
/// Value at index `d` is χ²(0.99, d).
pub const CHI2_99: [f64; 7] = [0.0, 6.63, 9.21, 11.34, 13.28, 15.09, 16.81];

/// Gate distance of one state.
///
/// Returns `f64::INFINITY` if S cannot be inverted.
pub fn measurement_chi2(state: &TrackState) -> f64 {
    let h = projector();
    let s: MeasMatrix = match state.predicted_covariance {
        Some(p) => h * p * h.transpose() + state.measurement_covariance,
        None => state.measurement_covariance,
    };
    match s.try_inverse() {
        Some(s_inv) => state.residual.dot(&(s_inv * state.residual)),
        None => f64::INFINITY,
    }
}

/// Flags measurements whose gate distance exceeds `max_chi2`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementChi2OutlierFinder {
    pub max_chi2: f64,
}

impl Default for MeasurementChi2OutlierFinder {
    fn default() -> Self {
        Self {
            max_chi2: CHI2_99[MEASUREMENT_DIM],
        }
    }
}

impl OutlierFinder for MeasurementChi2OutlierFinder {
    fn is_outlier(&self, state: &TrackState) -> bool {
        let d2 = measurement_chi2(state);
        d2.is_nan() || d2 > self.max_chi2
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
