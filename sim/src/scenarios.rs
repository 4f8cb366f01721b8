//! Scenario definitions.
//!
//! Each scenario is a named configuration of telescope, particle gun and hit
//! simulation. All scenarios are deterministic given the same seed.

use crate::{
    hit_sim::{HitSimulator, HitSimulatorConfig},
    particle_gun::ParticleGun,
};
use detector::{LocalHitCalibrator, Measurement, TelescopeConfig, TelescopeGeometry};
use fitter_core::{
    fitter::FitInput,
    types::{BoundParameters, GeometryId, SourceLink, BOUND_SIZE, REDUCED_SIZE},
};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// 100 tracks through a 6-layer telescope, full efficiency
    Telescope,
    /// 8 layers at 85% efficiency with passive supports: holes and short tracks
    Inefficient,
    /// 10 000 tracks, 10 layers: throughput test for batch fitting
    Stress,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub n_tracks: usize,
    pub telescope: TelescopeConfig,
    pub gun: ParticleGun,
    pub hits: HitSimulatorConfig,
    /// Gaussian smearing of the start estimate (loc0, loc1, phi, theta)
    pub start_smearing: [f64; REDUCED_SIZE],
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::Telescope => Self::telescope(seed),
            ScenarioKind::Inefficient => Self::inefficient(seed),
            ScenarioKind::Stress => Self::stress(seed),
        }
    }

    pub fn with_tracks(mut self, n_tracks: usize) -> Self {
        self.n_tracks = n_tracks;
        self
    }

    // -----------------------------------------------------------------------
    // Scenario 1: Telescope
    // -----------------------------------------------------------------------
    fn telescope(seed: u64) -> Self {
        Scenario {
            name: "telescope".into(),
            seed,
            n_tracks: 100,
            telescope: TelescopeConfig::default(),
            gun: ParticleGun::default(),
            hits: HitSimulatorConfig::default(),
            start_smearing: [0.1, 0.1, 0.002, 0.002],
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 2: Inefficient
    // -----------------------------------------------------------------------
    fn inefficient(seed: u64) -> Self {
        Scenario {
            name: "inefficient".into(),
            seed,
            n_tracks: 200,
            telescope: TelescopeConfig {
                n_layers: 8,
                spacing: 40.0,
                passive_positions: vec![110.0, 230.0],
                ..Default::default()
            },
            gun: ParticleGun {
                phi_range: (-0.2, 0.2),
                ..Default::default()
            },
            hits: HitSimulatorConfig {
                sigma: [0.02, 0.05],
                efficiency: 0.85,
            },
            start_smearing: [0.2, 0.2, 0.005, 0.005],
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 3: Stress
    // -----------------------------------------------------------------------
    fn stress(seed: u64) -> Self {
        Scenario {
            name: "stress".into(),
            seed,
            n_tracks: 10_000,
            telescope: TelescopeConfig {
                n_layers: 10,
                spacing: 30.0,
                ..Default::default()
            },
            gun: ParticleGun::default(),
            hits: HitSimulatorConfig {
                efficiency: 0.98,
                ..Default::default()
            },
            start_smearing: [0.1, 0.1, 0.002, 0.002],
        }
    }

    pub fn geometry(&self) -> anyhow::Result<Arc<TelescopeGeometry>> {
        Ok(Arc::new(TelescopeGeometry::from_config(&self.telescope)?))
    }

    /// Simulate every track of the scenario.
    pub fn generate(&self) -> anyhow::Result<ScenarioEvent> {
        let mut sim = HitSimulator::new(self.geometry()?, self.hits.clone(), self.seed)?;
        let smearing = self
            .start_smearing
            .iter()
            .map(|&sigma| Normal::new(0.0, sigma))
            .collect::<Result<Vec<_>, _>>()?;

        let mut measurements = Vec::new();
        let mut tracks = Vec::with_capacity(self.n_tracks);
        for _ in 0..self.n_tracks {
            let truth = self.gun.shoot(sim.rng());
            let source_links = sim.simulate(&truth, &mut measurements)?;
            let mut start = truth.clone();
            for (i, normal) in smearing.iter().enumerate() {
                start.parameters[i] += normal.sample(sim.rng());
            }
            tracks.push(SimulatedTrack {
                surface: truth.surface,
                truth: truth.to_array(),
                start: start.to_array(),
                source_links,
            });
        }

        info!(
            scenario = %self.name,
            tracks = tracks.len(),
            measurements = measurements.len(),
            "scenario generated"
        );
        debug!(seed = self.seed, "generation done");
        Ok(ScenarioEvent {
            measurements,
            tracks,
        })
    }
}

/// One simulated particle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulatedTrack {
    /// Reference surface of `truth` and `start`
    pub surface: GeometryId,
    pub truth: [f64; BOUND_SIZE],
    /// Smeared truth used as the fit's start estimate
    pub start: [f64; BOUND_SIZE],
    pub source_links: Vec<SourceLink>,
}

impl SimulatedTrack {
    pub fn truth(&self) -> BoundParameters {
        BoundParameters::from_array(self.surface, self.truth)
    }

    pub fn start(&self) -> BoundParameters {
        BoundParameters::from_array(self.surface, self.start)
    }
}

/// Measurements and particles of one generated scenario.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScenarioEvent {
    /// All measurements; source links index into this container
    pub measurements: Vec<Measurement>,
    pub tracks: Vec<SimulatedTrack>,
}

impl ScenarioEvent {
    pub fn fit_inputs(&self) -> Vec<FitInput> {
        self.tracks
            .iter()
            .map(|t| FitInput {
                source_links: t.source_links.clone(),
                start: t.start(),
            })
            .collect()
    }

    pub fn calibrator(&self) -> LocalHitCalibrator {
        LocalHitCalibrator::new(self.measurements.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
