//! Particle gun: samples true start parameters on the reference plane.
//!
//! Every quantity is drawn uniformly within its range; the charge is ±1 with
//! equal probability.

use fitter_core::types::{BoundParameters, BoundVector, GeometryId};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticleGun {
    /// Surface the parameters are bound to
    pub reference: GeometryId,
    /// Half width of the local position range, both coordinates (mm)
    pub loc_half_width: f64,
    /// Azimuth range (rad)
    pub phi_range: (f64, f64),
    /// Polar angle range (rad)
    pub theta_range: (f64, f64),
    /// Momentum range (GeV)
    pub momentum_range: (f64, f64),
    /// Half width of the start time range (ns)
    pub time_half_width: f64,
}

impl Default for ParticleGun {
    fn default() -> Self {
        Self {
            reference: GeometryId(0),
            loc_half_width: 10.0,
            phi_range: (-0.05, 0.05),
            theta_range: (FRAC_PI_2 - 0.05, FRAC_PI_2 + 0.05),
            momentum_range: (1.0, 10.0),
            time_half_width: 1.0,
        }
    }
}

impl ParticleGun {
    pub fn shoot<R: Rng>(&self, rng: &mut R) -> BoundParameters {
        let charge = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        let momentum = rng.gen_range(self.momentum_range.0..=self.momentum_range.1);
        let params = BoundVector::new(
            rng.gen_range(-self.loc_half_width..=self.loc_half_width),
            rng.gen_range(-self.loc_half_width..=self.loc_half_width),
            rng.gen_range(self.phi_range.0..=self.phi_range.1),
            rng.gen_range(self.theta_range.0..=self.theta_range.1),
            charge / momentum,
            rng.gen_range(-self.time_half_width..=self.time_half_width),
        );
        BoundParameters::new(self.reference, params)
    }
}
