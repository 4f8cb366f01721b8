//! Test doubles for the propagation and calibration contracts.

use crate::{
    error::PropagationError,
    extensions::Calibrator,
    propagation::{
        Aborter, Actor, BoundState, PropagationOutcome, Propagator, PropagatorOptions, StepContext,
        Surface,
    },
    track_state::TrackState,
    types::{
        BoundMatrix, BoundParameters, BoundVector, DMat, DVec, GeometryContext, GeometryId,
        SourceLink, LOC0, LOC1, PHI, THETA,
    },
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

// ---------------------------------------------------------------------------
// Single scripted step
// ---------------------------------------------------------------------------

/// A step context frozen on one surface.
pub struct ScriptedStep {
    pub surface: Option<GeometryId>,
    pub sensitive: bool,
    pub jacobian: BoundMatrix,
    pub parameters: BoundVector,
    pub fail_transport: bool,
    pub registered: Vec<GeometryId>,
    gctx: GeometryContext,
}

impl ScriptedStep {
    pub fn on(surface: GeometryId, jacobian: BoundMatrix) -> Self {
        Self {
            surface: Some(surface),
            sensitive: false,
            jacobian,
            parameters: BoundVector::zeros(),
            fail_transport: false,
            registered: Vec::new(),
            gctx: GeometryContext::default(),
        }
    }

    pub fn between() -> Self {
        Self {
            surface: None,
            ..Self::on(GeometryId(0), BoundMatrix::identity())
        }
    }
}

impl StepContext for ScriptedStep {
    fn current_surface(&self) -> Option<Surface> {
        self.surface.map(|id| Surface {
            id,
            sensitive: self.sensitive,
        })
    }

    fn bound_state(&mut self, surface: GeometryId) -> Result<BoundState, PropagationError> {
        if self.fail_transport {
            return Err(PropagationError::ParallelToSurface(surface));
        }
        Ok(BoundState {
            parameters: BoundParameters::new(surface, self.parameters),
            jacobian: self.jacobian,
            path_length: 0.0,
        })
    }

    fn insert_external_surface(&mut self, surface: GeometryId) {
        self.registered.push(surface);
    }

    fn geometry_context(&self) -> &GeometryContext {
        &self.gctx
    }
}

// ---------------------------------------------------------------------------
// Calibrators
// ---------------------------------------------------------------------------

/// Hands out the same measurement for every source link.
pub struct FixedCalibrator {
    pub value: DVec,
    pub covariance: DMat,
}

impl FixedCalibrator {
    pub fn new(value: DVec, covariance: DMat) -> Self {
        Self { value, covariance }
    }

    pub fn zero() -> Self {
        Self::new(DVec::zeros(2), DMat::identity(2, 2))
    }
}

impl Calibrator for FixedCalibrator {
    fn calibrate(&self, _gctx: &GeometryContext, _link: &SourceLink, state: &mut TrackState) {
        state.calibrated = self.value.clone();
        state.calibrated_covariance = self.covariance.clone();
    }
}

/// Looks measurements up by source-link index.
pub struct TableCalibrator {
    pub hits: Vec<[f64; 2]>,
    pub sigma: f64,
}

impl Calibrator for TableCalibrator {
    fn calibrate(&self, _gctx: &GeometryContext, link: &SourceLink, state: &mut TrackState) {
        let hit = self.hits[link.index];
        state.calibrated = DVec::from_vec(hit.to_vec());
        state.calibrated_covariance = DMat::identity(2, 2) * (self.sigma * self.sigma);
    }
}

// ---------------------------------------------------------------------------
// Linear engine
// ---------------------------------------------------------------------------

/// Parallel surfaces at fixed positions; `loc0 += dx·phi`, `loc1 += dx·theta`.
///
/// Surface `i` has id `GeometryId(i)`; surface 0 is the (insensitive) start.
pub struct LinearPropagator {
    pub positions: Vec<f64>,
    pub calls: AtomicUsize,
    /// Surfaces registered by the actor, over all calls
    pub registered: Mutex<Vec<GeometryId>>,
}

impl LinearPropagator {
    pub fn new(positions: &[f64]) -> Self {
        Self {
            positions: positions.to_vec(),
            calls: AtomicUsize::new(0),
            registered: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn registered(&self) -> Vec<GeometryId> {
        self.registered.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn transport(dx: f64) -> BoundMatrix {
        let mut j = BoundMatrix::identity();
        j[(LOC0, PHI)] = dx;
        j[(LOC1, THETA)] = dx;
        j
    }

    /// Noise-free hit of `truth` on surface `index`.
    pub fn hit(&self, truth: &BoundVector, index: usize) -> [f64; 2] {
        let p = Self::transport(self.positions[index] - self.positions[0]) * truth;
        [p[LOC0], p[LOC1]]
    }

    /// Noise-free hits and source links on every surface but the start.
    pub fn hits(&self, truth: &BoundVector) -> (Vec<[f64; 2]>, Vec<SourceLink>) {
        (1..self.positions.len())
            .map(|i| (self.hit(truth, i), SourceLink::new(GeometryId(i as u64), i - 1)))
            .unzip()
    }
}

struct LinearStep<'a> {
    positions: &'a [f64],
    current: Option<usize>,
    anchor_x: f64,
    anchor: BoundVector,
    registered: Vec<GeometryId>,
    gctx: GeometryContext,
}

impl StepContext for LinearStep<'_> {
    fn current_surface(&self) -> Option<Surface> {
        self.current.map(|i| Surface {
            id: GeometryId(i as u64),
            sensitive: i > 0,
        })
    }

    fn bound_state(&mut self, surface: GeometryId) -> Result<BoundState, PropagationError> {
        let index = self
            .current
            .filter(|&i| i as u64 == surface.0)
            .ok_or(PropagationError::NotOnSurface {
                requested: surface,
                current: self.current.map(|i| GeometryId(i as u64)),
            })?;
        let x = self.positions[index];
        let jacobian = LinearPropagator::transport(x - self.anchor_x);
        self.anchor = jacobian * self.anchor;
        self.anchor_x = x;
        Ok(BoundState {
            parameters: BoundParameters::new(surface, self.anchor),
            jacobian,
            path_length: x - self.positions[0],
        })
    }

    fn insert_external_surface(&mut self, surface: GeometryId) {
        self.registered.push(surface);
    }

    fn geometry_context(&self) -> &GeometryContext {
        &self.gctx
    }
}

impl Propagator for LinearPropagator {
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
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut step = LinearStep {
            positions: &self.positions,
            current: Some(0),
            anchor_x: self.positions[0],
            anchor: start.parameters,
            registered: Vec::new(),
            gctx: options.context.geometry,
        };
        let mut steps = 0;
        actor.act(&mut step, &mut result);
        for i in 1..self.positions.len() {
            if aborter.should_abort(&result) {
                break;
            }
            step.current = Some(i);
            steps += 1;
            actor.act(&mut step, &mut result);
        }
        if let Ok(mut registered) = self.registered.lock() {
            registered.extend(step.registered);
        }
        Ok(PropagationOutcome {
            steps,
            path_length: self.positions[steps] - self.positions[0],
            result,
        })
    }
}

// ---------------------------------------------------------------------------
// Pathological engines
// ---------------------------------------------------------------------------

/// Always reports a fresh insensitive surface and never reaches any target.
pub struct EndlessPropagator;

impl Propagator for EndlessPropagator {
    fn supports_external_surfaces(&self) -> bool {
        false
    }

    fn propagate<A, B>(
        &self,
        start: &BoundParameters,
        _options: &PropagatorOptions,
        actor: &A,
        aborter: &B,
        mut result: A::Result,
    ) -> Result<PropagationOutcome<A::Result>, PropagationError>
    where
        A: Actor,
        B: Aborter<A::Result>,
    {
        const HARD_CAP: usize = 10_000;
        let mut step = ScriptedStep::on(start.surface, BoundMatrix::identity());
        for n in 0..HARD_CAP {
            step.surface = Some(GeometryId(1_000 + n as u64));
            actor.act(&mut step, &mut result);
            if aborter.should_abort(&result) {
                return Ok(PropagationOutcome {
                    steps: n + 1,
                    path_length: 0.0,
                    result,
                });
            }
        }
        Err(PropagationError::StepLimitReached(HARD_CAP))
    }
}

/// Fails before taking a single step.
pub struct BrokenPropagator;

impl Propagator for BrokenPropagator {
    fn supports_external_surfaces(&self) -> bool {
        true
    }

    fn propagate<A, B>(
        &self,
        start: &BoundParameters,
        _options: &PropagatorOptions,
        _actor: &A,
        _aborter: &B,
        _result: A::Result,
    ) -> Result<PropagationOutcome<A::Result>, PropagationError>
    where
        A: Actor,
        B: Aborter<A::Result>,
    {
        Err(PropagationError::UnknownSurface(start.surface))
    }
}
