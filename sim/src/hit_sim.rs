//! Hit simulator.
//!
//! Propagates the true parameters through the telescope and, on every
//! sensitive plane crossed within bounds:
//! - drops the hit with probability (1 − efficiency)
//! - smears both local coordinates with Gaussian noise
//! - stores the measurement and hands back its source link

use detector::{Measurement, NavigationMode, StraightLinePropagator, TelescopeGeometry};
use fitter_core::{
    error::PropagationError,
    propagation::{Aborter, Actor, Propagator, PropagatorOptions, StepContext},
    types::{BoundParameters, GeometryId, SourceLink, LOC0, LOC1},
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HitSimulatorConfig {
    /// Resolution of (loc0, loc1) (mm)
    pub sigma: [f64; 2],
    /// Probability that a crossed sensitive plane records a hit
    pub efficiency: f64,
}

impl Default for HitSimulatorConfig {
    fn default() -> Self {
        Self {
            sigma: [0.01, 0.01],
            efficiency: 1.0,
        }
    }
}

/// True intersection of a track with a sensitive plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TruthHit {
    pub surface: GeometryId,
    pub local: [f64; 2],
}

/// Records the true local position on every sensitive plane.
struct TruthRecorder;

impl Actor for TruthRecorder {
    type Result = Result<Vec<TruthHit>, PropagationError>;

    fn act(&self, step: &mut dyn StepContext, result: &mut Self::Result) {
        let Ok(hits) = result else {
            return;
        };
        let Some(surface) = step.current_surface().filter(|s| s.sensitive) else {
            return;
        };
        match step.bound_state(surface.id) {
            Ok(state) => {
                let p = state.parameters.parameters;
                hits.push(TruthHit {
                    surface: surface.id,
                    local: [p[LOC0], p[LOC1]],
                });
            }
            Err(err) => *result = Err(err),
        }
    }
}

struct StopOnError;

impl<T> Aborter<Result<T, PropagationError>> for StopOnError {
    fn should_abort(&self, result: &Result<T, PropagationError>) -> bool {
        result.is_err()
    }
}

pub struct HitSimulator {
    propagator: StraightLinePropagator,
    config: HitSimulatorConfig,
    noise: [Normal<f64>; 2],
    rng: ChaCha8Rng,
}

impl HitSimulator {
    pub fn new(
        geometry: Arc<TelescopeGeometry>,
        config: HitSimulatorConfig,
        seed: u64,
    ) -> anyhow::Result<Self> {
        let noise = [
            Normal::new(0.0, config.sigma[0])?,
            Normal::new(0.0, config.sigma[1])?,
        ];
        Ok(Self {
            propagator: StraightLinePropagator::new(geometry, NavigationMode::Geometry),
            config,
            noise,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// True crossings of `truth` with the sensitive planes, in path order.
    pub fn truth_hits(&self, truth: &BoundParameters) -> Result<Vec<TruthHit>, PropagationError> {
        let options = PropagatorOptions::new(Default::default(), Default::default());
        self.propagator
            .propagate(truth, &options, &TruthRecorder, &StopOnError, Ok(Vec::new()))?
            .result
    }

    /// Simulate the measurements of one particle, appending them to
    /// `measurements`. Returns the source links of the new measurements.
    pub fn simulate(
        &mut self,
        truth: &BoundParameters,
        measurements: &mut Vec<Measurement>,
    ) -> Result<Vec<SourceLink>, PropagationError> {
        let mut links = Vec::new();
        for hit in self.truth_hits(truth)? {
            if self.rng.gen::<f64>() >= self.config.efficiency {
                trace!(surface = %hit.surface, "hit lost to inefficiency");
                continue;
            }
            let local = [
                hit.local[0] + self.noise[0].sample(&mut self.rng),
                hit.local[1] + self.noise[1].sample(&mut self.rng),
            ];
            let link = SourceLink::new(hit.surface, measurements.len());
            measurements.push(Measurement::new_2d(link, local, self.config.sigma));
            links.push(link);
        }
        Ok(links)
    }
}
