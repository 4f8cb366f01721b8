//! Fitted track: parameters, covariance, quality counters and flags.

use crate::{
    fitter::IterationSummary,
    track_state::TrackState,
    types::{BoundMatrix, BoundParameters, TrackId},
};
use serde::{Deserialize, Serialize};

/// Conditions under which the fit result should not be trusted blindly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitQuality {
    /// The final normal matrix was singular; the covariance is the identity
    pub degraded_covariance: bool,
    /// The final iteration was cut by the surface limit
    pub surface_limit_reached: bool,
}

impl FitQuality {
    /// True if no quality flag is raised.
    pub fn is_clean(&self) -> bool {
        !self.degraded_covariance && !self.surface_limit_reached
    }
}

/// The output of one fit call.
#[derive(Clone, Debug)]
pub struct FittedTrack {
    /// Fitted parameters on the start surface, covariance always set
    pub parameters: BoundParameters,
    /// χ² of the final iteration
    pub chi2: f64,
    /// Degrees of freedom: 2·measurements − solved parameters (saturating)
    pub ndf: usize,
    /// States contributing to the fit
    pub n_measurements: usize,
    pub n_outliers: usize,
    pub n_holes: usize,
    /// States recorded in the final iteration
    pub n_states: usize,
    pub quality: FitQuality,
    /// One entry per iteration run
    pub iterations: Vec<IterationSummary>,
    /// Track states of the final iteration
    pub states: Vec<TrackState>,
}

impl FittedTrack {
    /// Full covariance (identity outside the solved block).
    pub fn covariance(&self) -> BoundMatrix {
        self.parameters
            .covariance
            .unwrap_or_else(BoundMatrix::identity)
    }

    /// χ²/ndf, `None` without degrees of freedom.
    pub fn chi2_per_ndf(&self) -> Option<f64> {
        (self.ndf > 0).then(|| self.chi2 / self.ndf as f64)
    }

    pub fn is_valid(&self) -> bool {
        self.quality.is_clean()
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Append-only destination for fitted tracks.
pub trait TrackSink {
    fn add_track(&mut self, track: FittedTrack) -> TrackId;
}

/// Plain in-memory track storage.
#[derive(Clone, Debug, Default)]
pub struct TrackContainer {
    tracks: Vec<FittedTrack>,
}

impl TrackContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: TrackId) -> Option<&FittedTrack> {
        self.tracks.get(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TrackId, &FittedTrack)> {
        self.tracks
            .iter()
            .enumerate()
            .map(|(i, t)| (TrackId(i as u64), t))
    }
}

impl TrackSink for TrackContainer {
    fn add_track(&mut self, track: FittedTrack) -> TrackId {
        let id = TrackId(self.tracks.len() as u64);
        self.tracks.push(track);
        id
    }
}
