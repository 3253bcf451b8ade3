use super::{dsbus_dv::dSbus_dV, error::PowerFlowError, solver::Solve, sparse::slice::*};
use crate::basic::sparse::{
    conj::RealImage,
    stack::{csc_hstack, csc_vstack},
};
use tracing::{debug, warn};

use nalgebra::*;
use nalgebra_sparse::*;
use num_complex::Complex64;

/// Voltage solution of an iterative solver, in the bus order it was given.
#[derive(Debug, Clone)]
pub struct IterativeSolution {
    pub v: DVector<Complex64>,
    pub iterations: usize,
    /// Infinity norm of the final mismatch vector.
    pub mismatch: f64,
}

/// Polar voltage state shared by the Jacobian based solvers.
///
/// All vectors are in `[pv, pq, slack]` order.
#[derive(Debug, Clone)]
pub(crate) struct PolarState {
    pub v: DVector<Complex64>,
    pub v_m: DVector<f64>,
    pub v_a: DVector<f64>,
}

impl PolarState {
    pub fn new(v: &DVector<Complex64>) -> Self {
        Self {
            v: v.clone(),
            v_m: v.map(|e| e.norm()),
            v_a: v.map(|e| e.arg()),
        }
    }

    /// Applies `θ_pqpv -= dx[..n_bus]` and `|V|_pq -= dx[n_bus..]`.
    ///
    /// Slack voltages and PV magnitudes are left untouched.
    pub fn update(&mut self, dx: &DVector<f64>, npv: usize, npq: usize) {
        let n_bus = npv + npq;
        self.v_a
            .rows_range_mut(0..n_bus)
            .zip_apply(&dx.rows_range(0..n_bus), |a, b| *a -= b);
        self.v_m
            .rows_range_mut(npv..n_bus)
            .zip_apply(&dx.rows_range(n_bus..n_bus + npq), |a, b| *a -= b);
        for i in 0..n_bus {
            self.v[i] = Complex64::from_polar(self.v_m[i], self.v_a[i]);
        }
    }

    pub fn is_finite(&self) -> bool {
        self.v.iter().all(|e| e.re.is_finite() && e.im.is_finite())
    }
}

/// Power mismatch `V ⊙ conj(Y·V) − S`.
#[inline(always)]
pub(crate) fn power_mismatch(
    y_bus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
    s_bus: &DVector<Complex64>,
) -> DVector<Complex64> {
    v.component_mul(&(y_bus * v).conjugate()) - s_bus
}

/// Stacks `[Re(mis_pv); Re(mis_pq); Im(mis_pq)]` into `f`.
#[inline(always)]
pub(crate) fn assemble_f(f: &mut DVector<f64>, mis: &DVector<Complex64>, npv: usize, npq: usize) {
    let n_bus = npv + npq;
    f.rows_range_mut(0..n_bus)
        .zip_apply(&mis.rows_range(0..n_bus), |a, b| *a = b.re);
    f.rows_range_mut(n_bus..n_bus + npq)
        .zip_apply(&mis.rows_range(npv..n_bus), |a, b| *a = b.im);
}

/// Maps a failed linear solve at `iteration`.
///
/// At the first iteration the Jacobian of the initial point is singular, which
/// is a structural problem. Later failures mean the iterates left the region
/// where the problem is solvable; the last finite iterate is kept.
pub(crate) fn step_failure(
    method: &str,
    iteration: usize,
    reason: &str,
    v: &DVector<Complex64>,
) -> PowerFlowError {
    if iteration <= 1 {
        return PowerFlowError::singular(format!("solving the {method} step {iteration}: {reason}"));
    }
    warn!(method, iteration, reason, "linear solve failed, stopping with the last iterate");
    nonconvergence(iteration - 1, f64::NAN, v)
}

pub(crate) fn nonconvergence(iterations: usize, mismatch: f64, v: &DVector<Complex64>) -> PowerFlowError {
    PowerFlowError::NonConvergence {
        iterations,
        mismatch,
        last: Box::new(v.clone()),
    }
}

/// Newton-Raphson power flow in polar coordinates.
///
/// # Arguments
///
/// * `y_bus` - Admittance matrix in `[pv, pq, slack]` order.
/// * `s_bus` - Specified injections in the same order.
/// * `v_init` - Initial voltages; slack voltages and PV magnitudes are kept fixed.
/// * `npv`, `npq` - Sizes of the PV and PQ blocks.
/// * `tolerance` - Convergence threshold on the infinity norm of the mismatch.
/// * `max_iter` - Iteration budget.
/// * `solver` - Sparse linear solver used for every Newton step.
///
/// # Errors
///
/// `SingularMatrix` when the Jacobian of the initial point cannot be
/// factorized. `NonConvergence` when the budget is exhausted, a later Newton
/// step cannot be solved or an iterate becomes non-finite; it carries the last
/// finite iterate, and its mismatch is NaN in the last two cases.
pub fn newton_pf<Solver: Solve>(
    y_bus: &CscMatrix<Complex64>,
    s_bus: &DVector<Complex64>,
    v_init: &DVector<Complex64>,
    npv: usize,
    npq: usize,
    tolerance: Option<f64>,
    max_iter: Option<usize>,
    solver: &mut Solver,
) -> Result<IterativeSolution, PowerFlowError> {
    let max_iter = max_iter.unwrap_or(100);
    let tol = tolerance.unwrap_or(1e-6);

    let n_ext = v_init.len() - npv - npq;
    let num_state = npv + 2 * npq;

    let mut state = PolarState::new(v_init);
    let mut mis = power_mismatch(y_bus, &state.v, s_bus);
    let mut f = DVector::zeros(num_state);
    assemble_f(&mut f, &mis, npv, npq);
    let mut norm = f.amax();
    if !norm.is_finite() {
        warn!("newton-raphson started from a non-finite mismatch");
        return Err(nonconvergence(0, f64::NAN, &state.v));
    }
    if norm < tol {
        return Ok(IterativeSolution {
            v: state.v,
            iterations: 0,
            mismatch: norm,
        });
    }

    for iteration in 1..=max_iter {
        let (dS_dVm, dS_dVa) = dSbus_dV(y_bus, &state.v);
        let jacobian = build_jacobian(&dS_dVm, &dS_dVa, npv, n_ext);
        let n = jacobian.nrows();

        let (mut ap, mut ai, mut ax) = jacobian.disassemble();
        if let Err(e) = solver.solve(&mut ap, &mut ai, &mut ax, f.as_mut_slice(), n) {
            return Err(step_failure("newton-raphson", iteration, e, &state.v));
        }

        let previous = state.v.clone();
        state.update(&f, npv, npq);
        mis = power_mismatch(y_bus, &state.v, s_bus);
        assemble_f(&mut f, &mis, npv, npq);
        norm = f.amax();
        debug!(iteration, mismatch = norm, "newton-raphson");

        if !norm.is_finite() || !state.is_finite() {
            warn!(iteration, "newton-raphson produced a non-finite iterate");
            return Err(nonconvergence(iteration, f64::NAN, &previous));
        }
        if norm < tol {
            return Ok(IterativeSolution {
                v: state.v,
                iterations: iteration,
                mismatch: norm,
            });
        }
    }
    Err(nonconvergence(max_iter, norm, &state.v))
}

pub(crate) trait Slice {
    type Mat;
    fn block(&self, start_pos: (usize, usize), shape: (usize, usize)) -> Self::Mat;
    fn columns(&self, start_col: usize, end_col: usize) -> Self::Mat;
}

impl<T: Scalar> Slice for CscMatrix<T>
where
    for<'a> CscMatrix<T>: From<&'a CooMatrix<T>>,
{
    type Mat = CscMatrix<T>;
    #[inline(always)]
    fn block(&self, start_pos: (usize, usize), shape: (usize, usize)) -> Self::Mat {
        slice_csc_matrix_block(self, start_pos, shape)
    }
    #[inline(always)]
    fn columns(&self, start_col: usize, end_col: usize) -> Self::Mat {
        slice_csc_matrix(self, start_col, end_col)
    }
}

/// Assembles the real Jacobian
///
/// ```text
/// | Re dS/dVa[pvpq, pvpq]   Re dS/dVm[pvpq, pq] |
/// | Im dS/dVa[pq, pvpq]     Im dS/dVm[pq, pq]   |
/// ```
///
/// from derivatives given in `[pv, pq, slack]` order.
#[allow(non_snake_case)]
#[inline(always)]
pub(crate) fn build_jacobian(
    ds_dvm: &CscMatrix<Complex64>,
    ds_dva: &CscMatrix<Complex64>,
    npv: usize,
    n_ext: usize,
) -> CscMatrix<f64> {
    let (real, imag) = ds_dva
        .block((0, 0), (ds_dva.nrows() - n_ext, ds_dva.ncols() - n_ext))
        .real_imag();
    let (real2, imag2) = ds_dvm
        .block((0, 0), (ds_dvm.nrows() - n_ext, ds_dvm.ncols() - n_ext))
        .real_imag();
    let J11 = real;
    let J12 = real2.columns(npv, real2.ncols());
    let J21 = imag.block((npv, 0), (imag.nrows() - npv, imag.ncols()));
    let J22 = imag2.block((npv, npv), (imag2.nrows() - npv, imag2.ncols() - npv));

    csc_vstack(&[&csc_hstack(&[&J11, &J12]), &csc_hstack(&[&J21, &J22])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{basic::solver::DefaultSolver, testcases};

    fn ordered(case: &testcases::NetworkCase) -> (crate::basic::system::CompiledNetwork, usize, usize) {
        let net = case.compile().unwrap();
        let (npv, npq) = (net.partition().pv().len(), net.partition().pq().len());
        (net, npv, npq)
    }

    #[test]
    fn test_two_bus_converges_quickly() {
        let (net, npv, npq) = ordered(&testcases::two_bus());
        let sol = newton_pf(
            net.y_ordered(),
            &net.to_solver_order(net.s_bus()),
            &net.to_solver_order(net.v0()),
            npv,
            npq,
            Some(1e-8),
            Some(10),
            &mut DefaultSolver::default(),
        )
        .unwrap();
        assert!(sol.iterations < 10, "took {} iterations", sol.iterations);
        assert!(sol.mismatch < 1e-8);
        let v = net.from_solver_order(&sol.v);
        assert_eq!(v[0], Complex64::new(1.0, 0.0), "slack voltage must not move");
        let mis = power_mismatch(&net.admittance().y_bus, &v, net.s_bus());
        assert!(mis[1].norm() < 1e-8, "residual at the load bus: {}", mis[1]);
    }

    #[test]
    fn test_pv_magnitude_is_held() {
        let (net, npv, npq) = ordered(&testcases::five_bus());
        let sol = newton_pf(
            net.y_ordered(),
            &net.to_solver_order(net.s_bus()),
            &net.to_solver_order(net.v0()),
            npv,
            npq,
            None,
            None,
            &mut DefaultSolver::default(),
        )
        .unwrap();
        let v = net.from_solver_order(&sol.v);
        let pv = net.partition().pv()[0];
        assert!((v[pv].norm() - net.v0()[pv].norm()).abs() < 1e-12);
        assert!(v.iter().all(|e| e.norm() > 0.8 && e.norm() < 1.2));
    }

    #[test]
    fn test_budget_exhausted_keeps_last_iterate() {
        let (net, npv, npq) = ordered(&testcases::five_bus());
        let err = newton_pf(
            net.y_ordered(),
            &net.to_solver_order(net.s_bus()),
            &net.to_solver_order(net.v0()),
            npv,
            npq,
            Some(1e-12),
            Some(1),
            &mut DefaultSolver::default(),
        )
        .unwrap_err();
        match err {
            PowerFlowError::NonConvergence { iterations, mismatch, last } => {
                assert_eq!(iterations, 1);
                assert!(mismatch.is_finite() && mismatch > 1e-12);
                assert_eq!(last.len(), net.n_bus());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    /// Delegates to the default back-end for `ok_calls` solves, then fails.
    struct FailingSolver {
        inner: DefaultSolver,
        ok_calls: usize,
    }

    impl Solve for FailingSolver {
        fn solve(
            &mut self,
            ap: &mut [usize],
            ai: &mut [usize],
            ax: &mut [f64],
            b: &mut [f64],
            n: usize,
        ) -> Result<(), &'static str> {
            if self.ok_calls == 0 {
                return Err("LU factorization failed");
            }
            self.ok_calls -= 1;
            self.inner.solve(ap, ai, ax, b, n)
        }
    }

    fn solve_with(
        net: &crate::basic::system::CompiledNetwork,
        solver: &mut FailingSolver,
    ) -> Result<IterativeSolution, PowerFlowError> {
        let (npv, npq) = (net.partition().pv().len(), net.partition().pq().len());
        newton_pf(
            net.y_ordered(),
            &net.to_solver_order(net.s_bus()),
            &net.to_solver_order(net.v0()),
            npv,
            npq,
            Some(1e-12),
            None,
            solver,
        )
    }

    #[test]
    fn test_failed_step_keeps_last_iterate() {
        let (net, _, _) = ordered(&testcases::five_bus());
        let mut solver = FailingSolver { inner: DefaultSolver::default(), ok_calls: 2 };
        match solve_with(&net, &mut solver).unwrap_err() {
            PowerFlowError::NonConvergence { iterations, mismatch, last } => {
                assert_eq!(iterations, 2);
                assert!(mismatch.is_nan(), "a failed step is reported as divergence");
                assert!(last.iter().all(|e| e.re.is_finite() && e.im.is_finite()));
                assert_ne!(*last, net.to_solver_order(net.v0()), "the accepted steps are kept");
            }
            other => panic!("unexpected error {other:?}"),
        }

        let mut solver = FailingSolver { inner: DefaultSolver::default(), ok_calls: 0 };
        let err = solve_with(&net, &mut solver).unwrap_err();
        assert!(matches!(err, PowerFlowError::SingularMatrix { .. }), "got {err:?}");
    }

    #[test]
    fn test_non_finite_injection_is_divergence() {
        let (net, _, _) = ordered(&testcases::two_bus());
        let mut s = net.s_bus().clone();
        s[1] = Complex64::new(f64::NAN, 0.0);
        let net = net.with_injections(s).unwrap();
        let mut solver = FailingSolver { inner: DefaultSolver::default(), ok_calls: usize::MAX };
        match solve_with(&net, &mut solver).unwrap_err() {
            PowerFlowError::NonConvergence { iterations, mismatch, last } => {
                assert_eq!(iterations, 0);
                assert!(mismatch.is_nan());
                assert_eq!(*last, net.to_solver_order(net.v0()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
