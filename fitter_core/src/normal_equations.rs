//! Normal-equation assembly and solve for the Gauss-Newton step.
//!
//! # Linearised problem
//! For every measurement with residual r, covariance C and Jacobian from the
//! start J, with H the 2×6 projector onto the measured local coordinates:
//!
//! ```text
//! χ² += rᵀ C⁻¹ r
//! A  += (H·J)ᵀ C⁻¹ (H·J)
//! b  += (H·J)ᵀ C⁻¹ r
//! ```
//!
//! A and b are accumulated at full bound size, but only the leading
//! `REDUCED_SIZE` block is solved: `A_red · δ = b_red`.
//!
//! # Numerics
//! - Full-rank systems are solved with a column-pivoted QR.
//! - Rank is decided from the singular values of `A_red` relative to the
//!   largest one. Rank-deficient systems get the minimum-norm SVD solution
//!   and are flagged singular; their covariance is not computed.

use crate::{
    error::FitError,
    track_state::TrackState,
    types::{
        BoundMatrix, BoundVector, MeasMatrix, MeasVector, Projector, ReducedMatrix, ReducedVector,
        REDUCED_SIZE,
    },
};

/// Singular values below `SINGULAR_TOLERANCE · σ_max` count as zero.
pub const SINGULAR_TOLERANCE: f64 = 1e-12;

/// The constant projector: ones at (0,0) and (1,1).
pub fn projector() -> Projector {
    let mut proj = Projector::zeros();
    proj[(0, 0)] = 1.0;
    proj[(1, 1)] = 1.0;
    proj
}

/// Solution of the reduced system, zero padded to full bound size.
#[derive(Clone, Debug, PartialEq)]
pub struct ReducedSolution {
    pub delta: BoundVector,
    /// Numerical rank of the reduced matrix
    pub rank: usize,
    pub singular: bool,
}

impl ReducedSolution {
    /// Euclidean norm of the solved block.
    pub fn norm(&self) -> f64 {
        self.delta.fixed_rows::<REDUCED_SIZE>(0).norm()
    }
}

/// One iteration's normal equations.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalEquations {
    pub a: BoundMatrix,
    pub b: BoundVector,
    pub chi2: f64,
    pub n_measurements: usize,
}

impl Default for NormalEquations {
    fn default() -> Self {
        Self {
            a: BoundMatrix::zeros(),
            b: BoundVector::zeros(),
            chi2: 0.0,
            n_measurements: 0,
        }
    }
}

impl NormalEquations {
    /// Build the system from the non-outlier states of an iteration.
    pub fn accumulate<'a, I>(states: I) -> Result<Self, FitError>
    where
        I: IntoIterator<Item = &'a TrackState>,
    {
        let mut equations = Self::default();
        for state in states.into_iter().filter(|s| !s.is_outlier) {
            equations
                .add_measurement(
                    &state.residual,
                    &state.measurement_covariance,
                    &state.jacobian_from_start,
                )
                .ok_or(FitError::SingularMeasurementCovariance(state.surface))?;
        }
        Ok(equations)
    }

    /// Add one measurement. `None` if its covariance cannot be inverted.
    pub fn add_measurement(
        &mut self,
        residual: &MeasVector,
        covariance: &MeasMatrix,
        jacobian_from_start: &BoundMatrix,
    ) -> Option<()> {
        let weight = covariance.try_inverse()?;
        let projected = projector() * jacobian_from_start;
        let projected_t = projected.transpose();

        self.chi2 += residual.dot(&(weight * residual));
        self.a += projected_t * weight * projected;
        self.b += projected_t * (weight * residual);
        self.n_measurements += 1;
        Some(())
    }

    pub fn reduced_matrix(&self) -> ReducedMatrix {
        self.a
            .fixed_view::<REDUCED_SIZE, REDUCED_SIZE>(0, 0)
            .into_owned()
    }

    pub fn reduced_vector(&self) -> ReducedVector {
        self.b.fixed_rows::<REDUCED_SIZE>(0).into_owned()
    }

    /// Numerical rank of the reduced matrix.
    pub fn rank(&self) -> usize {
        let singular_values = self.reduced_matrix().singular_values();
        let max = singular_values.max();
        if max <= 0.0 || !max.is_finite() {
            return 0;
        }
        singular_values
            .iter()
            .filter(|&&s| s > SINGULAR_TOLERANCE * max)
            .count()
    }

    pub fn is_singular(&self) -> bool {
        self.rank() < REDUCED_SIZE
    }

    /// Solve the reduced system for the parameter update.
    pub fn solve_reduced(&self) -> ReducedSolution {
        let a = self.reduced_matrix();
        let b = self.reduced_vector();
        let rank = self.rank();

        let full_rank = if rank == REDUCED_SIZE {
            a.col_piv_qr().solve(&b)
        } else {
            None
        };

        let (reduced, singular) = match full_rank {
            Some(delta) => (delta, false),
            None => {
                let svd = a.svd(true, true);
                let eps = SINGULAR_TOLERANCE * svd.singular_values.max();
                let delta = svd.solve(&b, eps).unwrap_or_else(|_| ReducedVector::zeros());
                (delta, true)
            }
        };

        let mut delta = BoundVector::zeros();
        delta.fixed_rows_mut::<REDUCED_SIZE>(0).copy_from(&reduced);
        ReducedSolution {
            delta,
            rank,
            singular,
        }
    }

    /// Full-size covariance: inverse of the reduced block, identity elsewhere.
    /// `None` if the reduced block is singular.
    pub fn covariance(&self) -> Option<BoundMatrix> {
        if self.is_singular() {
            return None;
        }
        let inverse = self.reduced_matrix().try_inverse()?;
        let mut covariance = BoundMatrix::identity();
        covariance
            .fixed_view_mut::<REDUCED_SIZE, REDUCED_SIZE>(0, 0)
            .copy_from(&inverse);
        Some(covariance)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        testing::LinearPropagator,
        types::{GeometryId, SourceLink, BOUND_SIZE},
    };
    use approx::assert_abs_diff_eq;

    fn state(residual: [f64; 2], sigma: f64, dx: f64) -> TrackState {
        let jacobian = LinearPropagator::transport(dx);
        let mut s = TrackState::new(
            GeometryId(1),
            SourceLink::new(GeometryId(1), 0),
            BoundVector::zeros(),
            None,
            jacobian,
            jacobian,
            dx,
        );
        s.residual = MeasVector::new(residual[0], residual[1]);
        s.measurement_covariance = MeasMatrix::identity() * (sigma * sigma);
        s
    }

    #[test]
    fn projector_selects_local_coordinates() {
        let proj = projector();
        assert_eq!(proj.shape(), (2, BOUND_SIZE));
        assert_eq!(proj.sum(), 2.0);
        assert_eq!(proj[(0, 0)], 1.0);
        assert_eq!(proj[(1, 1)], 1.0);
    }

    #[test]
    fn two_surfaces_at_truth_give_zero_step() {
        let states = [state([0.0, 0.0], 1.0, 100.0), state([0.0, 0.0], 1.0, 200.0)];
        let eq = NormalEquations::accumulate(&states).unwrap();
        assert_eq!(eq.n_measurements, 2);
        assert_abs_diff_eq!(eq.chi2, 0.0);

        let solution = eq.solve_reduced();
        assert!(!solution.singular);
        assert_eq!(solution.rank, REDUCED_SIZE);
        assert_abs_diff_eq!(solution.delta.norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn single_step_solves_linear_problem() {
        // loc0 offset 1 and slope 0.01 seen at dx = 100, 200, 300
        let states: Vec<TrackState> = [100.0, 200.0, 300.0]
            .iter()
            .map(|&dx| state([1.0 + 0.01 * dx, -0.5], 0.1, dx))
            .collect();
        let eq = NormalEquations::accumulate(&states).unwrap();
        let solution = eq.solve_reduced();
        assert_abs_diff_eq!(solution.delta[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(solution.delta[1], -0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(solution.delta[2], 0.01, epsilon = 1e-12);
        assert_abs_diff_eq!(solution.delta[3], 0.0, epsilon = 1e-12);
        assert_eq!(solution.delta[4], 0.0);
        assert_eq!(solution.delta[5], 0.0);
    }

    #[test]
    fn normal_matrix_is_symmetric() {
        let mut j = LinearPropagator::transport(150.0);
        j[(0, 3)] = 3.7;
        j[(1, 2)] = -0.4;
        j[(5, 2)] = 2.0;
        let mut eq = NormalEquations::default();
        let cov = MeasMatrix::new(0.04, 0.01, 0.01, 0.09);
        eq.add_measurement(&MeasVector::new(0.3, -0.2), &cov, &j).unwrap();
        eq.add_measurement(&MeasVector::new(-0.1, 0.5), &cov, &(j * j)).unwrap();

        let asym = (eq.a - eq.a.transpose()).abs().max();
        assert!(asym <= 1e-12 * eq.a.abs().max());
    }

    #[test]
    fn one_measurement_is_singular() {
        let eq = NormalEquations::accumulate(&[state([0.2, 0.1], 1.0, 100.0)]).unwrap();
        assert_eq!(eq.rank(), 2);
        assert!(eq.is_singular());
        assert!(eq.covariance().is_none());

        let solution = eq.solve_reduced();
        assert!(solution.singular);
        assert!(solution.delta.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn empty_system_is_singular() {
        let eq = NormalEquations::default();
        assert_eq!(eq.rank(), 0);
        let solution = eq.solve_reduced();
        assert!(solution.singular);
        assert_eq!(solution.delta, BoundVector::zeros());
    }

    #[test]
    fn covariance_is_identity_outside_block() {
        let states: Vec<TrackState> = [50.0, 120.0, 260.0]
            .iter()
            .map(|&dx| state([0.0, 0.0], 0.05, dx))
            .collect();
        let eq = NormalEquations::accumulate(&states).unwrap();
        let cov = eq.covariance().unwrap();
        for r in 0..BOUND_SIZE {
            for c in 0..BOUND_SIZE {
                if r >= REDUCED_SIZE || c >= REDUCED_SIZE {
                    let expected = if r == c { 1.0 } else { 0.0 };
                    assert_eq!(cov[(r, c)], expected);
                }
            }
        }
        let product = eq.reduced_matrix() * cov.fixed_view::<REDUCED_SIZE, REDUCED_SIZE>(0, 0);
        assert_abs_diff_eq!((product - ReducedMatrix::identity()).abs().max(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn singular_measurement_covariance_fails_loudly() {
        let mut s = state([0.0, 0.0], 1.0, 10.0);
        s.measurement_covariance = MeasMatrix::zeros();
        let err = NormalEquations::accumulate(&[s]).unwrap_err();
        assert_eq!(err, FitError::SingularMeasurementCovariance(GeometryId(1)));
    }

    #[test]
    fn outliers_do_not_contribute() {
        let mut outlier = state([5.0, 5.0], 1.0, 100.0);
        outlier.is_outlier = true;
        let eq = NormalEquations::accumulate(&[outlier, state([0.0, 0.0], 1.0, 200.0)]).unwrap();
        assert_eq!(eq.n_measurements, 1);
        assert_abs_diff_eq!(eq.chi2, 0.0);
    }
}
