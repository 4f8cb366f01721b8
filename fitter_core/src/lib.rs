//! `fitter_core` — Global chi-square (GX2F) track fitting.
//!
//! # Module layout
//! - [`types`]           — Parameter layout, IDs, contexts, bound parameters
//! - [`error`]           — Fit and propagation errors
//! - [`track_state`]     — Per-surface record written during an iteration
//! - [`extensions`]      — Calibrator / updater / outlier finder seams
//! - [`propagation`]     — Contract between the fitter and a propagation engine
//! - [`actor`]           — Per-surface callback and its iteration accumulator
//! - [`normal_equations`]— χ², normal matrix and the reduced solve
//! - [`fitter`]          — Gauss-Newton iteration, single and batch fits
//! - [`track`]           — Fitted track, quality flags, track storage
//! - [`gating`]          — χ² outlier finder
//! - [`metrics`]         — Residual / pull / χ² statistics over many fits

pub mod actor;
pub mod error;
pub mod extensions;
pub mod fitter;
pub mod gating;
pub mod metrics;
pub mod normal_equations;
pub mod propagation;
pub mod track;
pub mod track_state;
pub mod types;

#[cfg(test)]
mod testing;

pub use actor::{Gx2fAborter, Gx2fActor, IterationResult, StopReason, DEFAULT_SURFACE_LIMIT};
pub use error::{FitError, PropagationError};
pub use extensions::{Calibrator, Extensions, OutlierFinder, Updater};
pub use fitter::{FitInput, Gx2Fitter, Gx2FitterOptions, IterationSummary};
pub use propagation::{
    Aborter, Actor, BoundState, PropagationOutcome, Propagator, PropagatorOptions,
    PropagatorPlainOptions, StepContext, Surface,
};
pub use track::{FitQuality, FittedTrack, TrackContainer, TrackSink};
pub use track_state::TrackState;
pub use types::{
    BoundMatrix, BoundParameters, BoundVector, FitContext, GeometryContext, GeometryId,
    SourceLink, TrackId,
};
