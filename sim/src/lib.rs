//! `sim` — Event simulator: particle gun, hit simulation, scenarios, replay.

pub mod hit_sim;
pub mod particle_gun;
pub mod replay;
pub mod scenarios;

pub use hit_sim::{HitSimulator, HitSimulatorConfig, TruthHit};
pub use particle_gun::ParticleGun;
pub use replay::{load_replay, save_replay, ReplayLog};
pub use scenarios::{Scenario, ScenarioEvent, ScenarioKind, SimulatedTrack};

// ---------------------------------------------------------------------------
// Tests: fitting simulated events
// ---------------------------------------------------------------------------
