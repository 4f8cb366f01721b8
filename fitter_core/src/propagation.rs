//! Contract between the fitter and a propagation engine.
//!
//! # Design choices
//! - The engine is a trait ([`Propagator`]) so the fitter can be composed with
//!   any stepper/navigator; `propagate` is generic over the actor and aborter
//!   so the per-surface callback stays monomorphic on the hot path.
//! - The actor's accumulator is handed to the engine by value and returned in
//!   the [`PropagationOutcome`]. Nothing is shared across propagation calls.
//! - At every step the engine exposes itself to the actor through
//!   [`StepContext`]: the current surface, the transport to the bound frame of
//!   that surface, and external surface registration.

use crate::{
    error::PropagationError,
    types::{BoundMatrix, BoundParameters, FitContext, GeometryContext, GeometryId},
};
use serde::{Deserialize, Serialize};

/// What the engine reports about the surface it currently sits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Surface {
    pub id: GeometryId,
    /// Surface belongs to an active detector element (a missing hit there is a hole)
    pub sensitive: bool,
}

/// Result of transporting the state into the bound frame of a surface.
#[derive(Clone, Debug)]
pub struct BoundState {
    /// Parameters (and transported covariance) on the surface
    pub parameters: BoundParameters,
    /// Jacobian from the previous bound state (or the start) to this one
    pub jacobian: BoundMatrix,
    /// Accumulated path length from the start
    pub path_length: f64,
}

/// View of the engine state handed to actors at every step.
pub trait StepContext {
    /// Surface the navigation currently sits on, `None` between surfaces.
    fn current_surface(&self) -> Option<Surface>;

    /// Transport parameters and covariance to the bound frame of `surface`.
    fn bound_state(&mut self, surface: GeometryId) -> Result<BoundState, PropagationError>;

    /// Make `surface` a navigation target, ignoring its boundaries.
    fn insert_external_surface(&mut self, surface: GeometryId);

    fn geometry_context(&self) -> &GeometryContext;
}

/// Per-step callback.
pub trait Actor {
    /// Accumulator threaded through one propagation call.
    type Result;

    fn act(&self, step: &mut dyn StepContext, result: &mut Self::Result);
}

/// Predicate evaluated after every actor invocation.
pub trait Aborter<R> {
    fn should_abort(&self, result: &R) -> bool;
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Engine tuning, independent of the conditions of a particular fit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropagatorPlainOptions {
    /// Hard cap on navigation steps; exceeding it is an engine failure
    pub max_steps: usize,
    /// Propagation stops cleanly once this path length would be exceeded (mm)
    pub path_limit: f64,
    /// Minimal distance for a surface to count as "ahead" (mm)
    pub target_tolerance: f64,
}

impl Default for PropagatorPlainOptions {
    fn default() -> Self {
        Self {
            max_steps: 1000,
            path_limit: f64::MAX,
            target_tolerance: 1e-4,
        }
    }
}

/// Options of a single propagation call.
#[derive(Clone, Debug)]
pub struct PropagatorOptions {
    pub context: FitContext,
    pub plain: PropagatorPlainOptions,
}

impl PropagatorOptions {
    pub fn new(context: FitContext, plain: PropagatorPlainOptions) -> Self {
        Self { context, plain }
    }
}

/// What a successful propagation call hands back.
#[derive(Clone, Debug)]
pub struct PropagationOutcome<R> {
    /// Navigation steps taken
    pub steps: usize,
    /// Path length travelled (mm)
    pub path_length: f64,
    /// The actor's accumulator
    pub result: R,
}

/// A propagation engine.
pub trait Propagator {
    /// True if the engine honours surfaces registered through
    /// [`StepContext::insert_external_surface`]. Registered surfaces are
    /// visited even when navigation alone would skip them.
    fn supports_external_surfaces(&self) -> bool;

    fn propagate<A, B>(
        &self,
        start: &BoundParameters,
        options: &PropagatorOptions,
        actor: &A,
        aborter: &B,
        result: A::Result,
    ) -> Result<PropagationOutcome<A::Result>, PropagationError>
    where
        A: Actor,
        B: Aborter<A::Result>;
}
