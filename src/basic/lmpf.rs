use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;
use tracing::{debug, warn};

use super::{
    dsbus_dv::dSbus_dV,
    error::PowerFlowError,
    newtonpf::{
        IterativeSolution, PolarState, assemble_f, build_jacobian, nonconvergence, power_mismatch,
        step_failure,
    },
    solver::Solve,
};

/// Damping state of one Levenberg-Marquardt solve.
///
/// Owned by the solve, never shared, so concurrent solves stay independent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmState {
    /// Damping factor; zero until [`LmState::initialize`] runs.
    pub lambda: f64,
    pub nu: f64,
    /// Whether the next iteration must rebuild the Jacobian.
    pub update_jacobian: bool,
}

impl Default for LmState {
    fn default() -> Self {
        Self {
            lambda: 0.0,
            nu: 2.0,
            update_jacobian: true,
        }
    }
}

impl LmState {
    /// Sets `λ = 1e-3 · max(diag(HᵀH))`.
    pub fn initialize(&mut self, max_diag: f64) {
        self.lambda = 1e-3 * max_diag;
    }

    pub fn is_initialized(&self) -> bool {
        self.lambda > 0.0
    }

    /// Applies the damping rule for gain ratio `rho` and reports whether the
    /// step is accepted.
    pub fn step(&mut self, rho: f64) -> bool {
        if rho > 0.0 {
            self.lambda *= (1.0f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3));
            self.nu = 2.0;
            self.update_jacobian = true;
            true
        } else {
            self.lambda *= self.nu;
            self.nu *= 2.0;
            self.update_jacobian = false;
            false
        }
    }
}

/// Ratio of actual to predicted decrease of `0.5·‖F‖²` for a step `dx`
/// solving `(HᵀH + λI)·dx = HᵀF`.
pub(crate) fn gain_ratio(f: f64, f_new: f64, dx: &DVector<f64>, lambda: f64, rhs: &DVector<f64>) -> f64 {
    let predicted = 0.5 * dx.dot(&(dx * lambda + rhs));
    if predicted > 0.0 {
        (f - f_new) / predicted
    } else {
        -1.0
    }
}

fn max_diagonal(mat: &CscMatrix<f64>) -> f64 {
    mat.triplet_iter()
        .filter(|(r, c, _)| r == c)
        .fold(0.0f64, |acc, (_, _, v)| acc.max(*v))
}

/// Levenberg-Marquardt power flow.
///
/// Same arguments and bus order as [`super::newtonpf::newton_pf`]. Each
/// iteration solves the damped normal equations `(HᵀH + λI)·dx = HᵀF` and
/// accepts the step only when the gain ratio is positive. A rejected step
/// keeps the voltages and the Jacobian and only rescales `λ`.
///
/// The iteration stops when an accepted step satisfies `‖dx‖∞ < tol` or the
/// mismatch drops below `tol`; the solve is reported converged only if the
/// final mismatch is below `tol`.
pub fn levenberg_marquardt_pf<Solver: Solve>(
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

    let mut x = PolarState::new(v_init);
    let mut f = DVector::zeros(num_state);
    assemble_f(&mut f, &power_mismatch(y_bus, &x.v, s_bus), npv, npq);
    let mut obj = 0.5 * f.dot(&f);
    if !f.amax().is_finite() {
        warn!("levenberg-marquardt started from a non-finite mismatch");
        return Err(nonconvergence(0, f64::NAN, &x.v));
    }
    if f.amax() < tol {
        return Ok(IterativeSolution {
            v: x.v,
            iterations: 0,
            mismatch: f.amax(),
        });
    }

    let mut lm = LmState::default();
    let mut h_t = CscMatrix::zeros(num_state, num_state);
    let mut hth = CscMatrix::zeros(num_state, num_state);
    let mut f_new = DVector::zeros(num_state);

    for iteration in 1..=max_iter {
        if lm.update_jacobian {
            let (dS_dVm, dS_dVa) = dSbus_dV(y_bus, &x.v);
            let h = build_jacobian(&dS_dVm, &dS_dVa, npv, n_ext);
            h_t = h.transpose();
            hth = &h_t * &h;
            if !lm.is_initialized() {
                lm.initialize(max_diagonal(&hth));
            }
        }
        let rhs = &h_t * &f;
        let mut damping = CscMatrix::identity(num_state);
        damping.values_mut().fill(lm.lambda);
        let system = &hth + &damping;

        let mut dx = rhs.clone();
        let (mut ap, mut ai, mut ax) = system.disassemble();
        if let Err(e) = solver.solve(&mut ap, &mut ai, &mut ax, dx.as_mut_slice(), num_state) {
            return Err(step_failure("levenberg-marquardt", iteration, e, &x.v));
        }

        let mut candidate = x.clone();
        candidate.update(&dx, npv, npq);
        assemble_f(&mut f_new, &power_mismatch(y_bus, &candidate.v, s_bus), npv, npq);
        if !candidate.is_finite() || !f_new.amax().is_finite() {
            warn!(iteration, "levenberg-marquardt produced a non-finite iterate");
            return Err(nonconvergence(iteration, f64::NAN, &x.v));
        }
        let obj_new = 0.5 * f_new.dot(&f_new);
        let rho = gain_ratio(obj, obj_new, &dx, lm.lambda, &rhs);
        let accepted = lm.step(rho);
        debug!(
            iteration,
            lambda = lm.lambda,
            rho,
            accepted,
            mismatch = f_new.amax(),
            "levenberg-marquardt"
        );

        if accepted {
            x = candidate;
            std::mem::swap(&mut f, &mut f_new);
            obj = obj_new;
            if f.amax() < tol || dx.amax() < tol {
                let mismatch = f.amax();
                if mismatch < tol {
                    return Ok(IterativeSolution {
                        v: x.v,
                        iterations: iteration,
                        mismatch,
                    });
                }
                return Err(nonconvergence(iteration, mismatch, &x.v));
            }
        }
    }
    Err(nonconvergence(max_iter, f.amax(), &x.v))
}
