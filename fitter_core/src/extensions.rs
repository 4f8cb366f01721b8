//! Pluggable fitter components: calibrator, updater, outlier finder.
//!
//! The bundle is bound at fit-call time and never mutated during a fit.
//! Components are shared behind `Arc` so one configuration can serve many
//! concurrent fits.
//!
//! # Defaults
//! - calibrator: **unconfigured**. A fit refuses to start without one
//!   ([`FitError::CalibratorNotConfigured`]).
//! - updater: [`VoidUpdater`], identity update (filtered = predicted).
//! - outlier finder: [`VoidOutlierFinder`], nothing is an outlier.

use crate::{
    error::FitError,
    track_state::TrackState,
    types::{Direction, GeometryContext, SourceLink},
};
use std::{fmt, sync::Arc};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Turns an uncalibrated measurement into a calibrated one, using the
/// predicted parameters already stored in `state` if needed.
pub trait Calibrator: Send + Sync {
    fn calibrate(&self, gctx: &GeometryContext, source_link: &SourceLink, state: &mut TrackState);
}

/// Incorporates the measurement of `state` into its filtered parameters.
///
/// Part of the shared fitter-component contract; the chi-square iteration
/// itself never calls it.
pub trait Updater: Send + Sync {
    fn update(
        &self,
        gctx: &GeometryContext,
        state: &mut TrackState,
        direction: Direction,
    ) -> Result<(), FitError>;
}

/// Decides whether the measurement of a state must be excluded from the fit.
pub trait OutlierFinder: Send + Sync {
    fn is_outlier(&self, state: &TrackState) -> bool;
}

// ---------------------------------------------------------------------------
// Default components
// ---------------------------------------------------------------------------

/// Identity update: copies predicted into filtered.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoidUpdater;

impl Updater for VoidUpdater {
    fn update(
        &self,
        _gctx: &GeometryContext,
        state: &mut TrackState,
        _direction: Direction,
    ) -> Result<(), FitError> {
        state.filtered = Some(state.predicted);
        state.filtered_covariance = state.predicted_covariance;
        Ok(())
    }
}

/// Never flags anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoidOutlierFinder;

impl OutlierFinder for VoidOutlierFinder {
    fn is_outlier(&self, _state: &TrackState) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// Components used by one fit.
#[derive(Clone)]
pub struct Extensions {
    /// `None` means unconfigured; the fit fails at entry.
    pub calibrator: Option<Arc<dyn Calibrator>>,
    pub updater: Arc<dyn Updater>,
    pub outlier_finder: Arc<dyn OutlierFinder>,
}

impl Default for Extensions {
    fn default() -> Self {
        Self {
            calibrator: None,
            updater: Arc::new(VoidUpdater),
            outlier_finder: Arc::new(VoidOutlierFinder),
        }
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("calibrator_configured", &self.calibrator.is_some())
            .finish_non_exhaustive()
    }
}

impl Extensions {
    /// Default components plus the given calibrator.
    pub fn with_calibrator(calibrator: impl Calibrator + 'static) -> Self {
        Self {
            calibrator: Some(Arc::new(calibrator)),
            ..Default::default()
        }
    }

    pub fn outlier_finder(mut self, finder: impl OutlierFinder + 'static) -> Self {
        self.outlier_finder = Arc::new(finder);
        self
    }

    pub fn updater(mut self, updater: impl Updater + 'static) -> Self {
        self.updater = Arc::new(updater);
        self
    }

    /// The configured calibrator, or the fail-fast error.
    pub fn calibrator(&self) -> Result<&dyn Calibrator, FitError> {
        self.calibrator
            .as_deref()
            .ok_or(FitError::CalibratorNotConfigured)
    }
}
