//! Telescope geometry: planes perpendicular to the global x axis.
//!
//! # Local frame
//! A plane at `x = X` measures `loc0 = y` and `loc1 = z`. Bounds are square,
//! `|loc0|, |loc1| <= half_length`.
//!
//! # Identifiers
//! `TelescopeGeometry::from_config` numbers planes as follows:
//! - reference (start) plane: id 0, insensitive
//! - detector layers: ids 1..=n_layers, sensitive
//! - passive planes: ids 1000 + i, insensitive

use fitter_core::types::GeometryId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First id handed to passive planes.
pub const PASSIVE_ID_OFFSET: u64 = 1000;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("surface {0} defined twice")]
    DuplicateSurface(GeometryId),
    #[error("surface {0} has a non-finite position")]
    NonFinitePosition(GeometryId),
    #[error("geometry has no planes")]
    Empty,
}

/// One plane of the telescope.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub id: GeometryId,
    /// Position along the global x axis (mm)
    pub x: f64,
    /// Half side length of the square bounds (mm)
    pub half_length: f64,
    /// Active detector element
    pub sensitive: bool,
}

impl Plane {
    pub fn new(id: GeometryId, x: f64, half_length: f64, sensitive: bool) -> Self {
        Self {
            id,
            x,
            half_length,
            sensitive,
        }
    }

    /// True if the local point lies within the bounds.
    pub fn contains(&self, loc0: f64, loc1: f64) -> bool {
        loc0.abs() <= self.half_length && loc1.abs() <= self.half_length
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Layout of a regular telescope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelescopeConfig {
    /// Position of the reference plane the fits start on (mm)
    pub reference_x: f64,
    /// Position of the first sensitive layer (mm)
    pub first_layer_x: f64,
    /// Distance between consecutive sensitive layers (mm)
    pub spacing: f64,
    pub n_layers: usize,
    /// Half side length of every plane (mm)
    pub half_length: f64,
    /// Insensitive planes (support structures) inserted between layers
    pub passive_positions: Vec<f64>,
}

impl Default for TelescopeConfig {
    fn default() -> Self {
        Self {
            reference_x: 0.0,
            first_layer_x: 50.0,
            spacing: 50.0,
            n_layers: 6,
            half_length: 100.0,
            passive_positions: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// Planes ordered by position.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TelescopeGeometry {
    planes: Vec<Plane>,
}

impl TelescopeGeometry {
    pub fn new(mut planes: Vec<Plane>) -> Result<Self, GeometryError> {
        if planes.is_empty() {
            return Err(GeometryError::Empty);
        }
        if let Some(p) = planes.iter().find(|p| !p.x.is_finite()) {
            return Err(GeometryError::NonFinitePosition(p.id));
        }
        planes.sort_by(|a, b| a.x.total_cmp(&b.x));
        let mut ids: Vec<GeometryId> = planes.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        if let Some(w) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(GeometryError::DuplicateSurface(w[0]));
        }
        Ok(Self { planes })
    }

    pub fn from_config(config: &TelescopeConfig) -> Result<Self, GeometryError> {
        let mut planes = Vec::with_capacity(1 + config.n_layers + config.passive_positions.len());
        planes.push(Plane::new(
            GeometryId(0),
            config.reference_x,
            config.half_length,
            false,
        ));
        for i in 0..config.n_layers {
            planes.push(Plane::new(
                GeometryId(i as u64 + 1),
                config.first_layer_x + i as f64 * config.spacing,
                config.half_length,
                true,
            ));
        }
        for (i, &x) in config.passive_positions.iter().enumerate() {
            planes.push(Plane::new(
                GeometryId(PASSIVE_ID_OFFSET + i as u64),
                x,
                config.half_length,
                false,
            ));
        }
        Self::new(planes)
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn plane(&self, id: GeometryId) -> Option<&Plane> {
        self.planes.iter().find(|p| p.id == id)
    }

    pub fn sensitive(&self) -> impl Iterator<Item = &Plane> {
        self.planes.iter().filter(|p| p.sensitive)
    }

    pub fn len(&self) -> usize {
        self.planes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.planes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
