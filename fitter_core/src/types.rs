//! Fundamental types used across the entire workspace.

use nalgebra::{DMatrix, DVector, Matrix2, Matrix4, Matrix6, SMatrix, Vector2, Vector4, Vector6};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Bound parameter layout
//
// Units: mm, ns, GeV. Angles in radians, q/p in e/GeV.
// ---------------------------------------------------------------------------

/// Number of bound track parameters: [loc0, loc1, phi, theta, q/p, t]
pub const BOUND_SIZE: usize = 6;

/// Leading block of the bound parameters solved by the fitter
/// (loc0, loc1, phi, theta: everything but curvature and time).
pub const REDUCED_SIZE: usize = 4;

/// Dimension of a calibrated local-position measurement.
pub const MEASUREMENT_DIM: usize = 2;

pub const LOC0: usize = 0;
pub const LOC1: usize = 1;
pub const PHI: usize = 2;
pub const THETA: usize = 3;
pub const QOP: usize = 4;
pub const TIME: usize = 5;

/// Short parameter names, indexed like the bound vector.
pub const PARAMETER_NAMES: [&str; BOUND_SIZE] = ["loc0", "loc1", "phi", "theta", "qop", "time"];

/// 6-DOF bound parameter vector
pub type BoundVector = Vector6<f64>;

/// 6×6 bound parameter covariance / transport Jacobian
pub type BoundMatrix = Matrix6<f64>;

/// Parameters of the solved block
pub type ReducedVector = Vector4<f64>;

/// Normal-equation block actually solved
pub type ReducedMatrix = Matrix4<f64>;

/// 2D measurement / residual vector
pub type MeasVector = Vector2<f64>;

/// 2×2 measurement covariance
pub type MeasMatrix = Matrix2<f64>;

/// Projection from bound parameters onto the measured local coordinates
pub type Projector = SMatrix<f64, MEASUREMENT_DIM, BOUND_SIZE>;

/// Generic dynamic-size vector (calibrated measurement as handed out by a calibrator)
pub type DVec = DVector<f64>;

/// Generic dynamic-size matrix (calibrated measurement covariance)
pub type DMat = DMatrix<f64>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of a detector surface.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GeometryId(pub u64);

/// Index of a fitted track inside a track container.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TrackId(pub u64);

impl fmt::Display for GeometryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Source link
// ---------------------------------------------------------------------------

/// Handle to an uncalibrated measurement owned by the caller.
///
/// The fitter only reads the geometry identifier; `index` points into
/// whatever measurement container the configured calibrator resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLink {
    pub geometry_id: GeometryId,
    pub index: usize,
}

impl SourceLink {
    pub fn new(geometry_id: GeometryId, index: usize) -> Self {
        Self { geometry_id, index }
    }
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Opaque geometry conditions tag (alignment epoch) forwarded to collaborators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeometryContext(pub u64);

/// Opaque magnetic field conditions tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MagneticFieldContext(pub u64);

/// Opaque calibration conditions tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalibrationContext(pub u64);

/// All conditions a fit is evaluated under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitContext {
    pub geometry: GeometryContext,
    pub magnetic_field: MagneticFieldContext,
    pub calibration: CalibrationContext,
}

/// Propagation direction along the trajectory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

// ---------------------------------------------------------------------------
// Bound parameters
// ---------------------------------------------------------------------------

/// Track parameters expressed in the local frame of a surface.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundParameters {
    /// Surface the parameters are bound to
    pub surface: GeometryId,
    /// [loc0, loc1, phi, theta, q/p, t]
    pub parameters: BoundVector,
    /// Optional parameter covariance
    pub covariance: Option<BoundMatrix>,
}

impl BoundParameters {
    pub fn new(surface: GeometryId, parameters: BoundVector) -> Self {
        Self {
            surface,
            parameters,
            covariance: None,
        }
    }

    pub fn with_covariance(mut self, covariance: BoundMatrix) -> Self {
        self.covariance = Some(covariance);
        self
    }

    /// Build from a plain array (as stored in serialized logs).
    pub fn from_array(surface: GeometryId, values: [f64; BOUND_SIZE]) -> Self {
        Self::new(surface, BoundVector::from_row_slice(&values))
    }

    pub fn to_array(&self) -> [f64; BOUND_SIZE] {
        let mut out = [0.0; BOUND_SIZE];
        out.copy_from_slice(self.parameters.as_slice());
        out
    }

    pub fn phi(&self) -> f64 {
        self.parameters[PHI]
    }

    pub fn theta(&self) -> f64 {
        self.parameters[THETA]
    }

    /// Absolute momentum in GeV (infinite for q/p = 0).
    pub fn momentum(&self) -> f64 {
        1.0 / self.parameters[QOP].abs()
    }
}
