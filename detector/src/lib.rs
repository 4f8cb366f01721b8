//! `detector` — Telescope geometry, straight-line propagation, hit calibration.
//!
//! # Module layout
//! - [`geometry`]    — Planes, telescope layout and lookup
//! - [`propagator`]  — Free state, transport Jacobian, the propagation engine
//! - [`calibration`] — Raw measurements and the local-hit calibrator

pub mod calibration;
pub mod geometry;
pub mod propagator;

pub use calibration::{LocalHitCalibrator, Measurement};
pub use geometry::{GeometryError, Plane, TelescopeConfig, TelescopeGeometry};
pub use propagator::{FreeState, NavigationMode, StraightLinePropagator, SPEED_OF_LIGHT};

// ---------------------------------------------------------------------------
// Tests: the fitter on the telescope
// ---------------------------------------------------------------------------
