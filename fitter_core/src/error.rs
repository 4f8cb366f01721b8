//! Error taxonomy of the fitter.
//!
//! Only hard failures live here. Numerical degeneracy and forced termination
//! are reported as quality flags on the fitted track instead.

use crate::types::GeometryId;
use thiserror::Error;

/// Failure reported by a propagation engine.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum PropagationError {
    #[error("surface {0} is not part of the geometry")]
    UnknownSurface(GeometryId),
    #[error("track is parallel to surface {0}")]
    ParallelToSurface(GeometryId),
    #[error("step limit of {0} steps reached")]
    StepLimitReached(usize),
    #[error("requested bound state on {requested} while on {current:?}")]
    NotOnSurface {
        requested: GeometryId,
        current: Option<GeometryId>,
    },
}

/// Failure of a complete fit call.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FitError {
    #[error("no calibrator configured in the fitter extensions")]
    CalibratorNotConfigured,
    #[error("more than one measurement on surface {0}")]
    DuplicateMeasurement(GeometryId),
    #[error("calibrated measurement on {surface} has dimension {dim}, expected 2")]
    MeasurementDimension { surface: GeometryId, dim: usize },
    #[error("measurement covariance on {0} is not invertible")]
    SingularMeasurementCovariance(GeometryId),
    #[error("propagation failed: {0}")]
    Propagation(#[from] PropagationError),
    /// Returned by [`Updater`](crate::extensions::Updater) implementations.
    #[error("update failed: {0}")]
    Update(String),
}
