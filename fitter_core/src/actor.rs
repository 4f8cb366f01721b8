//! Per-surface actor and termination policy of the chi-square fitter.
//!
//! # Per invocation
//! 1. Skip if the iteration already finished or failed.
//! 2. Register all measurement surfaces once per propagation, if the engine
//!    accepts registered surfaces.
//! 3. Between surfaces: nothing to do.
//! 4. On a measurement surface: transport to the bound frame, accumulate the
//!    Jacobian from the start, calibrate, compute the residual, record.
//! 5. On a sensitive surface without measurement: missed surface / hole.
//! 6. Stop at the target surface, or force a stop once the surface count
//!    exceeds the configured ceiling.

use crate::{
    error::FitError,
    extensions::{Calibrator, OutlierFinder},
    propagation::{Aborter, Actor, StepContext},
    track_state::TrackState,
    types::{BoundMatrix, GeometryId, SourceLink},
};
use std::collections::BTreeMap;
use tracing::{info, trace, warn};

/// Surface count above which an iteration is forcibly finished.
pub const DEFAULT_SURFACE_LIMIT: usize = 11;

/// Why an iteration's propagation stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// The engine ran out of surfaces or hit its path limit
    PropagationEnded,
    /// The configured target surface was reached
    TargetReached,
    /// Forced stop: more surfaces visited than allowed
    SurfaceLimit,
    /// The actor recorded a failure
    Failure,
}

impl StopReason {
    /// Clean stops produce a complete result.
    pub fn is_clean(self) -> bool {
        matches!(self, StopReason::PropagationEnded | StopReason::TargetReached)
    }
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Everything the actor collects during one propagation call.
#[derive(Clone, Debug)]
pub struct IterationResult {
    /// Recorded states, in visitation order
    pub states: Vec<TrackState>,
    /// Product of step Jacobians up to the last recorded state
    pub jacobian_from_start: BoundMatrix,
    /// Surfaces visited
    pub surface_count: usize,
    /// States recorded (measurements and outliers)
    pub processed_states: usize,
    /// States contributing to the fit
    pub measurement_states: usize,
    pub outliers: usize,
    /// Sensitive surfaces without measurement between first and last measurement
    pub holes: usize,
    /// Every sensitive surface crossed without a measurement
    pub missed_active_surfaces: Vec<GeometryId>,
    pub surfaces_registered: bool,
    pub finished: bool,
    pub stop_reason: Option<StopReason>,
    pub failure: Option<FitError>,
    pending_holes: usize,
}

impl Default for IterationResult {
    fn default() -> Self {
        Self {
            states: Vec::new(),
            jacobian_from_start: BoundMatrix::identity(),
            surface_count: 0,
            processed_states: 0,
            measurement_states: 0,
            outliers: 0,
            holes: 0,
            missed_active_surfaces: Vec::new(),
            surfaces_registered: false,
            finished: false,
            stop_reason: None,
            failure: None,
            pending_holes: 0,
        }
    }
}

impl IterationResult {
    /// Stop reason; a result nobody finished ended with the propagation.
    pub fn stop_reason(&self) -> StopReason {
        self.stop_reason.unwrap_or(StopReason::PropagationEnded)
    }

    /// States that enter the normal equations.
    pub fn measurements(&self) -> impl Iterator<Item = &TrackState> {
        self.states.iter().filter(|s| !s.is_outlier)
    }

    fn finish(&mut self, reason: StopReason) {
        self.finished = true;
        self.stop_reason = Some(reason);
    }

    fn fail(&mut self, error: FitError) {
        self.failure = Some(error);
        self.stop_reason = Some(StopReason::Failure);
    }

    fn push(&mut self, state: TrackState) {
        if state.is_outlier {
            self.outliers += 1;
        } else {
            self.measurement_states += 1;
        }
        self.processed_states += 1;
        self.holes += self.pending_holes;
        self.pending_holes = 0;
        self.states.push(state);
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// The GX2F per-surface actor. Built fresh for every iteration.
pub struct Gx2fActor<'a> {
    /// Surface at which the iteration finishes cleanly
    pub target_surface: Option<GeometryId>,
    /// Measurements of this fit, keyed by surface
    pub input_measurements: &'a BTreeMap<GeometryId, SourceLink>,
    pub calibrator: &'a dyn Calibrator,
    pub outlier_finder: &'a dyn OutlierFinder,
    /// Register measurement surfaces with the engine on the first call
    pub register_surfaces: bool,
    pub surface_limit: usize,
}

impl<'a> Gx2fActor<'a> {
    fn handle_measurement(
        &self,
        step: &mut dyn StepContext,
        surface: GeometryId,
        source_link: &SourceLink,
        result: &mut IterationResult,
    ) {
        let bound = match step.bound_state(surface) {
            Ok(bound) => bound,
            Err(err) => {
                warn!(%surface, error = %err, "transport to measurement surface failed");
                result.fail(err.into());
                return;
            }
        };

        result.jacobian_from_start = bound.jacobian * result.jacobian_from_start;

        let mut state = TrackState::new(
            surface,
            *source_link,
            bound.parameters.parameters,
            bound.parameters.covariance,
            bound.jacobian,
            result.jacobian_from_start,
            bound.path_length,
        );

        self.calibrator
            .calibrate(step.geometry_context(), source_link, &mut state);
        if let Err(err) = state.compute_residual() {
            warn!(%surface, error = %err, "calibrated measurement rejected");
            result.fail(err);
            return;
        }
        state.is_outlier = self.outlier_finder.is_outlier(&state);

        trace!(
            %surface,
            residual0 = state.residual[0],
            residual1 = state.residual[1],
            outlier = state.is_outlier,
            "measurement recorded"
        );
        result.push(state);
    }
}

impl<'a> Actor for Gx2fActor<'a> {
    type Result = IterationResult;

    fn act(&self, step: &mut dyn StepContext, result: &mut IterationResult) {
        if result.finished || result.failure.is_some() {
            return;
        }

        if self.register_surfaces && !result.surfaces_registered {
            for &id in self.input_measurements.keys() {
                step.insert_external_surface(id);
            }
            result.surfaces_registered = true;
        }

        let Some(surface) = step.current_surface() else {
            return;
        };
        result.surface_count += 1;
        trace!(surface = %surface.id, count = result.surface_count, "surface reached");

        if let Some(source_link) = self.input_measurements.get(&surface.id) {
            self.handle_measurement(step, surface.id, source_link, result);
            if result.failure.is_some() {
                return;
            }
        } else if surface.sensitive {
            result.missed_active_surfaces.push(surface.id);
            if result.processed_states > 0 {
                result.pending_holes += 1;
            }
        }

        if self.target_surface == Some(surface.id) {
            result.finish(StopReason::TargetReached);
        } else if result.surface_count > self.surface_limit {
            info!(
                limit = self.surface_limit,
                "finished due to surface limit, result might be garbage"
            );
            result.finish(StopReason::SurfaceLimit);
        }
    }
}

// ---------------------------------------------------------------------------
// Aborter
// ---------------------------------------------------------------------------

/// Stops propagation once the actor failed or finished.
#[derive(Clone, Copy, Debug, Default)]
pub struct Gx2fAborter;

impl Aborter<IterationResult> for Gx2fAborter {
    fn should_abort(&self, result: &IterationResult) -> bool {
        result.failure.is_some() || result.finished
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::PropagationError,
        extensions::VoidOutlierFinder,
        propagation::{Propagator, PropagatorOptions},
        testing::{EndlessPropagator, FixedCalibrator, LinearPropagator, ScriptedStep},
        types::{BoundParameters, BoundVector, DMat, DVec},
    };
    use approx::assert_abs_diff_eq;

    struct FlagEverything;

    impl OutlierFinder for FlagEverything {
        fn is_outlier(&self, _state: &TrackState) -> bool {
            true
        }
    }

    fn measurement_map(ids: &[u64]) -> BTreeMap<GeometryId, SourceLink> {
        ids.iter()
            .enumerate()
            .map(|(i, &id)| (GeometryId(id), SourceLink::new(GeometryId(id), i)))
            .collect()
    }

    fn actor<'a>(
        map: &'a BTreeMap<GeometryId, SourceLink>,
        calibrator: &'a dyn Calibrator,
    ) -> Gx2fActor<'a> {
        Gx2fActor {
            target_surface: None,
            input_measurements: map,
            calibrator,
            outlier_finder: &VoidOutlierFinder,
            register_surfaces: false,
            surface_limit: DEFAULT_SURFACE_LIMIT,
        }
    }

    #[test]
    fn jacobian_from_start_composes_left_to_right() {
        let map = measurement_map(&[1, 2]);
        let calibrator = FixedCalibrator::zero();
        let actor = actor(&map, &calibrator);

        let mut j1 = BoundMatrix::identity();
        j1[(0, 2)] = 10.0;
        let mut j2 = BoundMatrix::identity();
        j2[(2, 3)] = 0.5;

        let mut result = IterationResult::default();
        let mut step = ScriptedStep::on(GeometryId(1), j1);
        actor.act(&mut step, &mut result);
        let mut step = ScriptedStep::on(GeometryId(2), j2);
        actor.act(&mut step, &mut result);

        assert_eq!(result.states.len(), 2);
        assert_eq!(result.states[0].jacobian_from_start, j1);
        assert_eq!(result.states[1].jacobian_from_start, j2 * j1);
        // j1 * j2 would put 10 * 0.5 here
        assert_abs_diff_eq!(result.states[1].jacobian_from_start[(0, 3)], 0.0);
    }

    #[test]
    fn residual_uses_calibrated_measurement() {
        let map = measurement_map(&[1]);
        let calibrator = FixedCalibrator::new(DVec::from_vec(vec![1.0, -1.0]), DMat::identity(2, 2));
        let actor = actor(&map, &calibrator);

        let mut step = ScriptedStep::on(GeometryId(1), BoundMatrix::identity());
        step.parameters = BoundVector::new(0.25, 0.5, 0.0, 1.0, 0.0, 0.0);
        let mut result = IterationResult::default();
        actor.act(&mut step, &mut result);

        let state = &result.states[0];
        assert_abs_diff_eq!(state.residual[0], 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(state.residual[1], -1.5, epsilon = 1e-12);
        assert_eq!(result.measurement_states, 1);
        assert_eq!(result.surface_count, 1);
    }

    #[test]
    fn non_measurement_surfaces_count_holes_between_hits() {
        let map = measurement_map(&[2, 5]);
        let calibrator = FixedCalibrator::zero();
        let actor = actor(&map, &calibrator);
        let mut result = IterationResult::default();

        for id in 1..=6 {
            let mut step = ScriptedStep::on(GeometryId(id), BoundMatrix::identity());
            step.sensitive = true;
            actor.act(&mut step, &mut result);
        }

        // 1 is before the first hit, 3 and 4 are holes, 6 trails the last hit
        assert_eq!(result.holes, 2);
        assert_eq!(
            result.missed_active_surfaces,
            vec![GeometryId(1), GeometryId(3), GeometryId(4), GeometryId(6)]
        );
    }

    #[test]
    fn between_surfaces_is_a_no_op() {
        let map = measurement_map(&[1]);
        let calibrator = FixedCalibrator::zero();
        let actor = actor(&map, &calibrator);
        let mut step = ScriptedStep::between();
        let mut result = IterationResult::default();
        actor.act(&mut step, &mut result);
        assert_eq!(result.surface_count, 0);
        assert!(result.states.is_empty());
    }

    #[test]
    fn registers_measurement_surfaces_once() {
        let map = measurement_map(&[3, 1, 2]);
        let calibrator = FixedCalibrator::zero();
        let mut actor = actor(&map, &calibrator);
        actor.register_surfaces = true;
        let mut step = ScriptedStep::between();
        let mut result = IterationResult::default();
        actor.act(&mut step, &mut result);
        actor.act(&mut step, &mut result);
        assert_eq!(
            step.registered,
            vec![GeometryId(1), GeometryId(2), GeometryId(3)]
        );
    }

    #[test]
    fn transport_failure_is_recorded_not_thrown() {
        let map = measurement_map(&[1]);
        let calibrator = FixedCalibrator::zero();
        let actor = actor(&map, &calibrator);
        let mut step = ScriptedStep::on(GeometryId(1), BoundMatrix::identity());
        step.fail_transport = true;
        let mut result = IterationResult::default();
        actor.act(&mut step, &mut result);

        assert!(result.states.is_empty());
        assert_eq!(result.stop_reason(), StopReason::Failure);
        assert!(matches!(
            result.failure,
            Some(FitError::Propagation(PropagationError::ParallelToSurface(_)))
        ));
        assert!(Gx2fAborter.should_abort(&result));
    }

    #[test]
    fn outliers_are_kept_but_flagged() {
        let map = measurement_map(&[1]);
        let calibrator = FixedCalibrator::zero();
        let mut actor = actor(&map, &calibrator);
        actor.outlier_finder = &FlagEverything;
        let mut step = ScriptedStep::on(GeometryId(1), BoundMatrix::identity());
        let mut result = IterationResult::default();
        actor.act(&mut step, &mut result);

        assert_eq!(result.outliers, 1);
        assert_eq!(result.measurement_states, 0);
        assert_eq!(result.measurements().count(), 0);
    }

    #[test]
    fn target_surface_is_a_clean_stop() {
        let map = measurement_map(&[1, 2, 3]);
        let calibrator = FixedCalibrator::zero();
        let mut actor = actor(&map, &calibrator);
        actor.target_surface = Some(GeometryId(2));

        let propagator = LinearPropagator::new(&[0.0, 100.0, 200.0, 300.0]);
        let start = BoundParameters::new(GeometryId(0), BoundVector::zeros());
        let outcome = propagator
            .propagate(
                &start,
                &PropagatorOptions::new(Default::default(), Default::default()),
                &actor,
                &Gx2fAborter,
                IterationResult::default(),
            )
            .unwrap();

        assert_eq!(outcome.result.stop_reason(), StopReason::TargetReached);
        assert!(outcome.result.stop_reason().is_clean());
        assert_eq!(outcome.result.states.len(), 2);
    }

    #[test]
    fn endless_engine_stops_at_surface_limit() {
        let map = measurement_map(&[]);
        let calibrator = FixedCalibrator::zero();
        for limit in [0, 3, DEFAULT_SURFACE_LIMIT] {
            let mut actor = actor(&map, &calibrator);
            actor.surface_limit = limit;
            let outcome = EndlessPropagator
                .propagate(
                    &BoundParameters::new(GeometryId(0), BoundVector::zeros()),
                    &PropagatorOptions::new(Default::default(), Default::default()),
                    &actor,
                    &Gx2fAborter,
                    IterationResult::default(),
                )
                .unwrap();

            let result = outcome.result;
            assert!(result.finished);
            assert_eq!(result.stop_reason(), StopReason::SurfaceLimit);
            assert!(!result.stop_reason().is_clean());
            assert_eq!(result.surface_count, limit + 1);
        }
    }

    #[test]
    fn finished_result_is_left_alone() {
        let map = measurement_map(&[1]);
        let calibrator = FixedCalibrator::zero();
        let actor = actor(&map, &calibrator);
        let mut result = IterationResult::default();
        result.finish(StopReason::TargetReached);
        let mut step = ScriptedStep::on(GeometryId(1), BoundMatrix::identity());
        actor.act(&mut step, &mut result);
        assert_eq!(result.surface_count, 0);
    }
}
