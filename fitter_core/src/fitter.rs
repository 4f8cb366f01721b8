//! Global chi-square fitter: the outer Gauss-Newton iteration.
//!
//! # Processing steps per fit
//! 1. Check the extensions (a calibrator must be configured)
//! 2. Copy the source links into a map keyed by surface (duplicates fail)
//! 3. For every iteration:
//!    a. apply the previous parameter update to the start parameters
//!    b. propagate once with a fresh actor and accumulator
//!    c. build the normal equations from the recorded states
//!    d. solve the reduced system for the next update
//! 4. Invert the final reduced normal matrix for the covariance
//! 5. Assemble the fitted track and its quality counters
//!
//! The parameters reported are those the final normal equations were
//! evaluated at; the update solved in the last iteration is not applied.
//!
//! # Convergence
//! By default every fit runs the full iteration budget. Setting
//! [`Gx2FitterOptions::delta_tolerance`] stops as soon as the norm of the
//! solved update falls below it.

use crate::{
    actor::{Gx2fAborter, Gx2fActor, IterationResult, StopReason, DEFAULT_SURFACE_LIMIT},
    error::FitError,
    extensions::Extensions,
    normal_equations::NormalEquations,
    propagation::{Propagator, PropagatorOptions, PropagatorPlainOptions},
    track::{FitQuality, FittedTrack, TrackSink},
    types::{
        BoundMatrix, BoundParameters, BoundVector, FitContext, GeometryId, SourceLink, TrackId,
        MEASUREMENT_DIM, REDUCED_SIZE,
    },
};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Options steering one fit.
#[derive(Clone, Debug)]
pub struct Gx2FitterOptions {
    /// Geometry, field and calibration conditions
    pub context: FitContext,
    /// Calibrator, updater and outlier finder
    pub extensions: Extensions,
    /// Engine tuning forwarded to every propagation call
    pub propagator_options: PropagatorPlainOptions,
    /// Surface at which each iteration's propagation stops cleanly
    pub target_surface: Option<GeometryId>,
    /// Not yet used by the fitter
    pub multiple_scattering: bool,
    /// Not yet used by the fitter
    pub energy_loss: bool,
    /// Number of Gauss-Newton iterations
    pub max_iterations: usize,
    /// Surfaces an iteration may visit before it is forcibly finished
    pub surface_limit: usize,
    /// Stop early once the update norm falls below this value
    pub delta_tolerance: Option<f64>,
}

impl Default for Gx2FitterOptions {
    fn default() -> Self {
        Self {
            context: FitContext::default(),
            extensions: Extensions::default(),
            propagator_options: PropagatorPlainOptions::default(),
            target_surface: None,
            multiple_scattering: false,
            energy_loss: false,
            max_iterations: 5,
            surface_limit: DEFAULT_SURFACE_LIMIT,
            delta_tolerance: None,
        }
    }
}

impl Gx2FitterOptions {
    pub fn new(extensions: Extensions) -> Self {
        Self {
            extensions,
            ..Default::default()
        }
    }
}

/// Diagnostics of one iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct IterationSummary {
    /// χ² at the parameters this iteration started from
    pub chi2: f64,
    /// Norm of the update solved in this iteration
    pub delta_norm: f64,
    pub n_measurements: usize,
    /// Numerical rank of the reduced normal matrix
    pub rank: usize,
    pub stop_reason: StopReason,
}

/// Input of one fit in a batch.
#[derive(Clone, Debug)]
pub struct FitInput {
    pub source_links: Vec<SourceLink>,
    pub start: BoundParameters,
}

// ---------------------------------------------------------------------------
// Fitter
// ---------------------------------------------------------------------------

/// Global chi-square fitter over a propagation engine.
pub struct Gx2Fitter<P> {
    propagator: P,
}

impl<P: Propagator> Gx2Fitter<P> {
    pub fn new(propagator: P) -> Self {
        Self { propagator }
    }

    pub fn propagator(&self) -> &P {
        &self.propagator
    }

    /// Fit one track.
    pub fn fit<I>(
        &self,
        source_links: I,
        start: &BoundParameters,
        options: &Gx2FitterOptions,
    ) -> Result<FittedTrack, FitError>
    where
        I: IntoIterator<Item = SourceLink>,
    {
        let calibrator = options.extensions.calibrator()?;
        let input_measurements = measurement_map(source_links)?;
        debug!(
            n_measurements = input_measurements.len(),
            "preparing input measurements"
        );

        let mut params = start.clone();
        let mut delta = BoundVector::zeros();
        let mut iterations = Vec::with_capacity(options.max_iterations);
        let mut last: Option<(NormalEquations, IterationResult)> = None;

        for n_update in 0..options.max_iterations {
            params.parameters += delta;
            trace!(
                iteration = n_update + 1,
                of = options.max_iterations,
                parameters = ?params.parameters.as_slice(),
                "updated parameters"
            );

            let propagator_options =
                PropagatorOptions::new(options.context, options.propagator_options.clone());
            let actor = Gx2fActor {
                target_surface: options.target_surface,
                input_measurements: &input_measurements,
                calibrator,
                outlier_finder: options.extensions.outlier_finder.as_ref(),
                register_surfaces: self.propagator.supports_external_surfaces(),
                surface_limit: options.surface_limit,
            };

            let outcome = self.propagator.propagate(
                &params,
                &propagator_options,
                &actor,
                &Gx2fAborter,
                IterationResult::default(),
            )?;
            let mut result = outcome.result;
            if let Some(err) = result.failure.take() {
                return Err(err);
            }

            let equations = NormalEquations::accumulate(&result.states)?;
            let solution = equations.solve_reduced();
            delta = solution.delta;

            let summary = IterationSummary {
                chi2: equations.chi2,
                delta_norm: solution.norm(),
                n_measurements: equations.n_measurements,
                rank: solution.rank,
                stop_reason: result.stop_reason(),
            };
            debug!(
                iteration = n_update + 1,
                chi2 = summary.chi2,
                delta_norm = summary.delta_norm,
                n_measurements = summary.n_measurements,
                steps = outcome.steps,
                "iteration done"
            );
            iterations.push(summary);
            last = Some((equations, result));

            if options
                .delta_tolerance
                .is_some_and(|tolerance| solution.norm() < tolerance)
            {
                debug!(iteration = n_update + 1, "update below tolerance, stopping early");
                break;
            }
        }

        let (equations, result) = last.unwrap_or_default();

        let covariance = equations.covariance();
        let quality = FitQuality {
            degraded_covariance: covariance.is_none() && options.max_iterations > 0,
            surface_limit_reached: result.stop_reason() == StopReason::SurfaceLimit,
        };
        if quality.degraded_covariance {
            warn!(
                rank = equations.rank(),
                n_measurements = equations.n_measurements,
                "reduced normal matrix is singular, covariance not computed"
            );
        }
        if quality.surface_limit_reached {
            warn!(
                surfaces = result.surface_count,
                "final iteration stopped at the surface limit"
            );
        }

        params.covariance = Some(covariance.unwrap_or_else(BoundMatrix::identity));

        Ok(FittedTrack {
            parameters: params,
            chi2: equations.chi2,
            ndf: (MEASUREMENT_DIM * equations.n_measurements).saturating_sub(REDUCED_SIZE),
            n_measurements: result.measurement_states,
            n_outliers: result.outliers,
            n_holes: result.holes,
            n_states: result.processed_states,
            quality,
            iterations,
            states: result.states,
        })
    }

    /// Fit one track and append it to `sink`.
    pub fn fit_into<I, S>(
        &self,
        source_links: I,
        start: &BoundParameters,
        options: &Gx2FitterOptions,
        sink: &mut S,
    ) -> Result<TrackId, FitError>
    where
        I: IntoIterator<Item = SourceLink>,
        S: TrackSink,
    {
        let track = self.fit(source_links, start, options)?;
        Ok(sink.add_track(track))
    }
}

impl<P: Propagator + Sync> Gx2Fitter<P> {
    /// Fit independent tracks in parallel, one task per track.
    pub fn fit_batch(
        &self,
        inputs: &[FitInput],
        options: &Gx2FitterOptions,
    ) -> Vec<Result<FittedTrack, FitError>> {
        inputs
            .par_iter()
            .map(|input| self.fit(input.source_links.iter().copied(), &input.start, options))
            .collect()
    }
}

/// Key the source links by surface; two links on one surface are an error.
fn measurement_map<I>(source_links: I) -> Result<BTreeMap<GeometryId, SourceLink>, FitError>
where
    I: IntoIterator<Item = SourceLink>,
{
    let mut map = BTreeMap::new();
    for link in source_links {
        if map.insert(link.geometry_id, link).is_some() {
            return Err(FitError::DuplicateMeasurement(link.geometry_id));
        }
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
