//! Raw measurements and the calibrator resolving source links to them.

use fitter_core::{
    extensions::Calibrator,
    track_state::TrackState,
    types::{DMat, DVec, GeometryContext, SourceLink},
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A measurement in the local frame of its plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub source_link: SourceLink,
    /// Local coordinates (mm)
    pub local: Vec<f64>,
    /// Covariance of `local`, row-major (dim × dim)
    pub covariance: Vec<f64>,
}

impl Measurement {
    /// Uncorrelated 2-D hit.
    pub fn new_2d(source_link: SourceLink, local: [f64; 2], sigma: [f64; 2]) -> Self {
        Self {
            source_link,
            local: local.to_vec(),
            covariance: vec![sigma[0] * sigma[0], 0.0, 0.0, sigma[1] * sigma[1]],
        }
    }

    pub fn dim(&self) -> usize {
        self.local.len()
    }

    /// Covariance has dim² entries.
    pub fn is_consistent(&self) -> bool {
        self.covariance.len() == self.dim() * self.dim()
    }

    pub fn value(&self) -> DVec {
        DVec::from_column_slice(&self.local)
    }

    pub fn covariance_matrix(&self) -> DMat {
        DMat::from_row_slice(self.dim(), self.dim(), &self.covariance)
    }
}

/// Hands out stored measurements by source-link index, unchanged.
#[derive(Clone, Debug, Default)]
pub struct LocalHitCalibrator {
    measurements: Vec<Measurement>,
}

impl LocalHitCalibrator {
    pub fn new(measurements: Vec<Measurement>) -> Self {
        Self { measurements }
    }

    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }
}

impl Calibrator for LocalHitCalibrator {
    fn calibrate(&self, _gctx: &GeometryContext, source_link: &SourceLink, state: &mut TrackState) {
        let found = self
            .measurements
            .get(source_link.index)
            .filter(|m| m.source_link.geometry_id == source_link.geometry_id && m.is_consistent());
        match found {
            Some(m) => {
                state.calibrated = m.value();
                state.calibrated_covariance = m.covariance_matrix();
            }
            None => {
                // an empty measurement is rejected by the dimension check
                warn!(
                    surface = %source_link.geometry_id,
                    index = source_link.index,
                    "no usable measurement for source link"
                );
                state.calibrated = DVec::zeros(0);
                state.calibrated_covariance = DMat::zeros(0, 0);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
