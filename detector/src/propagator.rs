//! Straight-line propagation through the telescope.
//!
//! # Model
//! Field-free, no material: the direction never changes and the particle
//! moves at the speed of light. The free state (position, unit direction,
//! q/p, time) is advanced plane to plane along `pos + s·dir`.
//!
//! # Transport Jacobian between planes at distance dx
//! With bound parameters (loc0, loc1, φ, θ, q/p, t), J = 1 plus
//!
//! ```text
//! ∂loc0/∂φ = dx / cos²φ
//! ∂loc1/∂φ = dx · cotθ · sinφ / cos²φ
//! ∂loc1/∂θ = −dx / (sin²θ · cosφ)
//! ∂t/∂φ    = dx · sinφ / (cos²φ · sinθ · c)
//! ∂t/∂θ    = −dx · cosθ / (cosφ · sin²θ · c)
//! ```
//!
//! # Navigation
//! - [`NavigationMode::Geometry`]: every plane ahead whose bounds contain the
//!   intersection, plus registered planes regardless of bounds.
//! - [`NavigationMode::External`]: registered planes only.

use crate::geometry::{Plane, TelescopeGeometry};
use fitter_core::{
    error::PropagationError,
    propagation::{
        Aborter, Actor, BoundState, PropagationOutcome, Propagator, PropagatorOptions,
        StepContext, Surface,
    },
    types::{
        BoundMatrix, BoundParameters, BoundVector, GeometryContext, GeometryId, LOC0, LOC1, PHI,
        QOP, THETA, TIME,
    },
};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, trace};

/// Speed of light in mm/ns.
pub const SPEED_OF_LIGHT: f64 = 299.792_458;

/// Directions with |dir_x| below this never reach another plane.
const PARALLEL_TOLERANCE: f64 = 1e-12;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavigationMode {
    #[default]
    Geometry,
    External,
}

// ---------------------------------------------------------------------------
// Free state
// ---------------------------------------------------------------------------

/// Global-frame track state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FreeState {
    /// Position (mm)
    pub position: Vector3<f64>,
    /// Unit direction
    pub direction: Vector3<f64>,
    pub qop: f64,
    /// Time (ns)
    pub time: f64,
}

impl FreeState {
    /// Bound parameters on `plane` to the global frame.
    pub fn from_bound(plane: &Plane, params: &BoundVector) -> Self {
        let (sin_phi, cos_phi) = params[PHI].sin_cos();
        let (sin_theta, cos_theta) = params[THETA].sin_cos();
        Self {
            position: Vector3::new(plane.x, params[LOC0], params[LOC1]),
            direction: Vector3::new(cos_phi * sin_theta, sin_phi * sin_theta, cos_theta),
            qop: params[QOP],
            time: params[TIME],
        }
    }

    /// Bound parameters in the local frame of any x-normal plane the state sits on.
    pub fn to_bound(&self) -> BoundVector {
        BoundVector::new(
            self.position.y,
            self.position.z,
            self.direction.y.atan2(self.direction.x),
            self.direction.z.clamp(-1.0, 1.0).acos(),
            self.qop,
            self.time,
        )
    }

    /// Signed path length to `plane`, `None` if moving parallel to it.
    pub fn path_to(&self, plane: &Plane) -> Option<f64> {
        if self.direction.x.abs() < PARALLEL_TOLERANCE {
            return None;
        }
        Some((plane.x - self.position.x) / self.direction.x)
    }

    pub fn advance(&mut self, path: f64) {
        self.position += self.direction * path;
        self.time += path / SPEED_OF_LIGHT;
    }
}

/// Bound-to-bound Jacobian between two x-normal planes `dx` apart.
pub fn transport_jacobian(params: &BoundVector, dx: f64) -> BoundMatrix {
    let (sin_phi, cos_phi) = params[PHI].sin_cos();
    let (sin_theta, cos_theta) = params[THETA].sin_cos();
    let cos2_phi = cos_phi * cos_phi;
    let sin2_theta = sin_theta * sin_theta;

    let mut j = BoundMatrix::identity();
    j[(LOC0, PHI)] = dx / cos2_phi;
    j[(LOC1, PHI)] = dx * (cos_theta / sin_theta) * sin_phi / cos2_phi;
    j[(LOC1, THETA)] = -dx / (sin2_theta * cos_phi);
    j[(TIME, PHI)] = dx * sin_phi / (cos2_phi * sin_theta * SPEED_OF_LIGHT);
    j[(TIME, THETA)] = -dx * cos_theta / (cos_phi * sin2_theta * SPEED_OF_LIGHT);
    j
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Straight-line propagation engine over a telescope.
#[derive(Clone, Debug)]
pub struct StraightLinePropagator {
    geometry: Arc<TelescopeGeometry>,
    navigation: NavigationMode,
}

impl StraightLinePropagator {
    pub fn new(geometry: Arc<TelescopeGeometry>, navigation: NavigationMode) -> Self {
        Self {
            geometry,
            navigation,
        }
    }

    pub fn geometry(&self) -> &TelescopeGeometry {
        &self.geometry
    }

    pub fn navigation(&self) -> NavigationMode {
        self.navigation
    }
}

/// Engine state exposed to the actor.
struct TelescopeStep<'a> {
    geometry: &'a TelescopeGeometry,
    navigation: NavigationMode,
    registered: BTreeSet<GeometryId>,
    current: Option<&'a Plane>,
    state: FreeState,
    covariance: Option<BoundMatrix>,
    /// Transport since the last bound state was handed out
    jacobian: BoundMatrix,
    path_length: f64,
    gctx: GeometryContext,
}

impl<'a> TelescopeStep<'a> {
    /// Closest reachable plane ahead and the path to it.
    fn next_target(&self, tolerance: f64) -> Option<(&'a Plane, f64)> {
        let geometry = self.geometry;
        let mut best: Option<(&'a Plane, f64)> = None;
        for plane in geometry.planes() {
            let registered = self.registered.contains(&plane.id);
            if self.navigation == NavigationMode::External && !registered {
                continue;
            }
            let Some(path) = self.state.path_to(plane) else {
                continue;
            };
            if path <= tolerance {
                continue;
            }
            if !registered {
                let hit = self.state.position + self.state.direction * path;
                if !plane.contains(hit.y, hit.z) {
                    continue;
                }
            }
            if best.map_or(true, |(_, closest)| path < closest) {
                best = Some((plane, path));
            }
        }
        best
    }

    fn advance(&mut self, plane: &'a Plane, path: f64) {
        let dx = plane.x - self.state.position.x;
        let j = transport_jacobian(&self.state.to_bound(), dx);
        self.state.advance(path);
        self.state.position.x = plane.x;
        self.covariance = self.covariance.map(|c| j * c * j.transpose());
        self.jacobian = j * self.jacobian;
        self.path_length += path;
        self.current = Some(plane);
    }
}

impl StepContext for TelescopeStep<'_> {
    fn current_surface(&self) -> Option<Surface> {
        self.current.map(|p| Surface {
            id: p.id,
            sensitive: p.sensitive,
        })
    }

    fn bound_state(&mut self, surface: GeometryId) -> Result<BoundState, PropagationError> {
        if self.geometry.plane(surface).is_none() {
            return Err(PropagationError::UnknownSurface(surface));
        }
        let plane = self
            .current
            .filter(|p| p.id == surface)
            .ok_or(PropagationError::NotOnSurface {
                requested: surface,
                current: self.current.map(|p| p.id),
            })?;
        let mut parameters = BoundParameters::new(plane.id, self.state.to_bound());
        parameters.covariance = self.covariance;
        Ok(BoundState {
            parameters,
            jacobian: std::mem::replace(&mut self.jacobian, BoundMatrix::identity()),
            path_length: self.path_length,
        })
    }

    fn insert_external_surface(&mut self, surface: GeometryId) {
        self.registered.insert(surface);
    }

    fn geometry_context(&self) -> &GeometryContext {
        &self.gctx
    }
}

impl Propagator for StraightLinePropagator {
    fn supports_external_surfaces(&self) -> bool {
        true
    }

    fn propagate<A, B>(
        &self,
        start: &BoundParameters,
        options: &PropagatorOptions,
        actor: &A,
        aborter: &B,
        mut result: A::Result,
    ) -> Result<PropagationOutcome<A::Result>, PropagationError>
    where
        A: Actor,
        B: Aborter<A::Result>,
    {
        let start_plane = self
            .geometry
            .plane(start.surface)
            .ok_or(PropagationError::UnknownSurface(start.surface))?;
        let state = FreeState::from_bound(start_plane, &start.parameters);
        if state.direction.x.abs() < PARALLEL_TOLERANCE {
            return Err(PropagationError::ParallelToSurface(start.surface));
        }

        let mut step = TelescopeStep {
            geometry: &self.geometry,
            navigation: self.navigation,
            registered: BTreeSet::new(),
            current: Some(start_plane),
            state,
            covariance: start.covariance,
            jacobian: BoundMatrix::identity(),
            path_length: 0.0,
            gctx: options.context.geometry,
        };

        let plain = &options.plain;
        let mut steps = 0;
        actor.act(&mut step, &mut result);
        while !aborter.should_abort(&result) {
            let Some((plane, path)) = step.next_target(plain.target_tolerance) else {
                break;
            };
            if step.path_length + path > plain.path_limit {
                debug!(path_limit = plain.path_limit, "path limit reached");
                break;
            }
            if steps == plain.max_steps {
                return Err(PropagationError::StepLimitReached(plain.max_steps));
            }
            step.advance(plane, path);
            steps += 1;
            trace!(surface = %plane.id, path_length = step.path_length, "reached surface");
            actor.act(&mut step, &mut result);
        }

        Ok(PropagationOutcome {
            steps,
            path_length: step.path_length,
            result,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
