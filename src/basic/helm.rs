//! Holomorphic embedding load flow.
//!
//! The voltages of the non-slack buses are expanded as power series `V(s)` of
//! an embedding parameter, with `s = 0` the no-load state and `s = 1` the
//! loaded network. The slack voltage is embedded as `1 + s (V_slack - 1)`, bus
//! shunts as `s·Y_sh` and injections as `s·S`. Every order after the first
//! solves the same real system with a new right-hand side, so the system
//! matrix is factorized once per [`HelmSystem`].

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;
use num_traits::Zero;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    config::PowerFlowConfig,
    error::PowerFlowError,
    solver::{DefaultFactor, DefaultSolver, Factorization, Factorize},
    sparse::{
        conj::RealImage,
        stack::{csc_hstack, csc_vstack},
    },
    system::CompiledNetwork,
};

/// Partial sums above this magnitude (p.u.) stop the series growth.
pub const DIVERGENCE_GUARD: f64 = 10.0;

/// Series coefficient tables of one HELM solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmCoefficients {
    /// Voltage coefficients, orders × `pqpv` buses.
    pub u: DMatrix<Complex64>,
    /// Coefficients of `1 / conj(V)`, orders × `pqpv` buses.
    pub w: DMatrix<Complex64>,
    /// Reactive power coefficients, orders × PV buses.
    pub q: DMatrix<f64>,
    /// Bus index of each column of `u` and `w`.
    pub pqpv: Vec<usize>,
    /// Bus index of each column of `q`.
    pub pv: Vec<usize>,
}

impl HelmCoefficients {
    pub fn orders(&self) -> usize {
        self.u.nrows()
    }
}

/// Outcome of growing the series for one injection vector.
#[derive(Debug, Clone)]
pub struct HelmSeries {
    pub coefficients: HelmCoefficients,
    /// Direct summation of the series over all buses, slack included.
    pub v: DVector<Complex64>,
    /// Infinity norm of the mismatch of `v`.
    pub mismatch: f64,
    pub converged: bool,
    /// Set when the partial sums exceeded [`DIVERGENCE_GUARD`].
    pub guard_tripped: bool,
}

/// Factorized HELM system of a compiled network.
///
/// Holds the no-load solution and the factorization of the per-order system
/// matrix. Read-only after [`HelmSystem::prepare`], so injection scenarios can
/// share it across threads; the factorization is released when the system is
/// dropped.
pub struct HelmSystem<'a, F: Factorization = DefaultFactor> {
    net: &'a CompiledNetwork,
    factor: F,
    pq_r: Vec<usize>,
    pv_r: Vec<usize>,
    /// `-Y_series[pqpv, slack]`.
    y_slack: CscMatrix<Complex64>,
    slack_rowsum: DVector<Complex64>,
    u0: DVector<Complex64>,
    x0: DVector<Complex64>,
}

fn to_real(v: &DVector<Complex64>) -> Vec<f64> {
    v.iter().map(|e| e.re).chain(v.iter().map(|e| e.im)).collect()
}

fn singular(context: String, e: &str) -> PowerFlowError {
    PowerFlowError::singular(format!("{context}: {e}"))
}

impl<'a> HelmSystem<'a> {
    /// Prepares the system with the default sparse back-end.
    pub fn prepare(net: &'a CompiledNetwork) -> Result<Self, PowerFlowError> {
        Self::prepare_with(net, &mut DefaultSolver::default())
    }
}

impl<'a, F: Factorization> HelmSystem<'a, F> {
    /// Solves the no-load problem and factorizes the system matrix
    ///
    /// ```text
    /// | G     -B    -Im W0[pv] |
    /// | B      G     Re W0[pv] |
    /// | 2Re U0[pv]  2Im U0[pv]  0 |
    /// ```
    ///
    /// where `G + jB` is `Y_series` restricted to `pqpv`.
    pub fn prepare_with<S: Factorize<Factor = F>>(
        net: &'a CompiledNetwork,
        solver: &mut S,
    ) -> Result<Self, PowerFlowError> {
        let partition = net.partition();
        let pqpv = partition.pqpv();
        let n = pqpv.len();
        let npv = partition.pv().len();
        let mut position = vec![usize::MAX; net.n_bus()];
        pqpv.iter().enumerate().for_each(|(i, &bus)| position[bus] = i);
        let pq_r: Vec<usize> = partition.pq().iter().map(|&b| position[b]).collect();
        let pv_r: Vec<usize> = partition.pv().iter().map(|&b| position[b]).collect();

        let reduced = net.reduced();
        let y_slack = reduced.y_slack_series.clone() * Complex64::new(-1.0, 0.0);
        let ones = DVector::from_element(partition.slack().len(), Complex64::new(1.0, 0.0));
        let slack_rowsum = &y_slack * &ones;

        let (g, b) = reduced.y_red_series.real_imag();
        let neg_b = b.clone() * -1.0;

        // order 0: Y_red U0 = -Y_series[pqpv, slack]·1
        let y_real = csc_vstack(&[&csc_hstack(&[&g, &neg_b]), &csc_hstack(&[&b, &g])]);
        let y_factor = solver
            .factorize(&y_real)
            .map_err(|e| singular("factorizing the reduced series admittance".into(), e))?;
        let mut rhs = to_real(&slack_rowsum);
        y_factor
            .solve_in_place(&mut rhs)
            .map_err(|e| singular("solving the no-load voltages".into(), e))?;
        let u0 = DVector::from_fn(n, |i, _| Complex64::new(rhs[i], rhs[n + i]));
        let x0 = u0.map(|e| e.conj().inv());

        let mut xim = CooMatrix::new(n, npv);
        let mut xre = CooMatrix::new(n, npv);
        let mut vre = CooMatrix::new(npv, n);
        let mut vim = CooMatrix::new(npv, n);
        for (k, &i) in pv_r.iter().enumerate() {
            xim.push(i, k, -x0[i].im);
            xre.push(i, k, x0[i].re);
            vre.push(k, i, 2.0 * u0[i].re);
            vim.push(k, i, 2.0 * u0[i].im);
        }
        let (xim, xre) = (CscMatrix::from(&xim), CscMatrix::from(&xre));
        let (vre, vim) = (CscMatrix::from(&vre), CscMatrix::from(&vim));
        let empty = CscMatrix::zeros(npv, npv);
        let mat = csc_vstack(&[
            &csc_hstack(&[&g, &neg_b, &xim]),
            &csc_hstack(&[&b, &g, &xre]),
            &csc_hstack(&[&vre, &vim, &empty]),
        ]);
        let factor = solver
            .factorize(&mat)
            .map_err(|e| singular("factorizing the HELM system matrix".into(), e))?;
        debug!(dim = mat.nrows(), nnz = mat.nnz(), "factorized HELM system");

        Ok(Self {
            net,
            factor,
            pq_r,
            pv_r,
            y_slack,
            slack_rowsum,
            u0,
            x0,
        })
    }

    /// No-load voltages `U[0]` in `pqpv` order.
    pub fn order_zero(&self) -> &DVector<Complex64> {
        &self.u0
    }

    /// Grows the series for the injections `s_bus` (full bus vector).
    ///
    /// Stops once the direct summation meets the tolerance, when the
    /// coefficient budget is spent, or when the partial sums leave the
    /// [`DIVERGENCE_GUARD`].
    pub fn solve(
        &self,
        s_bus: &DVector<Complex64>,
        config: &PowerFlowConfig,
    ) -> Result<HelmSeries, PowerFlowError> {
        let net = self.net;
        if s_bus.len() != net.n_bus() {
            return Err(PowerFlowError::DimensionMismatch {
                what: "injection vector",
                expected: net.n_bus(),
                found: s_bus.len(),
            });
        }
        let tol = config.tolerance();
        let ncoeff = config.coefficients();
        let partition = net.partition();
        let pqpv = partition.pqpv();
        let (n, npv) = (pqpv.len(), self.pv_r.len());

        let s_red = net.reduce_vector(s_bus);
        let vm2: Vec<f64> = partition.pv().iter().map(|&i| net.v0()[i].norm_sqr()).collect();
        let ysh = &net.reduced().y_shunt_red;
        let (u0, x0) = (&self.u0, &self.x0);

        let mut u = vec![u0.clone()];
        let mut x = vec![x0.clone()];
        let mut q: Vec<DVector<f64>> = Vec::with_capacity(ncoeff);

        let mut v = net.v0().clone();
        let mut partial = u0.clone();
        pqpv.iter().zip(partial.iter()).for_each(|(&bus, e)| v[bus] = *e);
        let mut mismatch = net.mismatch_norm(&v, s_bus);
        let mut converged = mismatch <= tol;
        let mut guard_tripped = false;

        let mut c = 1;
        while c < ncoeff && !converged {
            let mut valor = DVector::from_element(n, Complex64::zero());
            let mut w_rhs = vec![0.0; npv];
            if c == 1 {
                let i_inj = &self.y_slack * &net.slack_voltage();
                for &i in &self.pq_r {
                    valor[i] = i_inj[i] - self.slack_rowsum[i] + s_red[i].conj() * x0[i]
                        - u0[i] * ysh[i];
                }
                for (k, &i) in self.pv_r.iter().enumerate() {
                    valor[i] = i_inj[i] - self.slack_rowsum[i] + x0[i] * s_red[i].re - u0[i] * ysh[i];
                    w_rhs[k] = vm2[k] - u0[i].norm_sqr();
                }
            } else {
                for &i in &self.pq_r {
                    valor[i] = s_red[i].conj() * x[c - 1][i] - u[c - 1][i] * ysh[i];
                }
                for (k, &i) in self.pv_r.iter().enumerate() {
                    let xq: Complex64 = (1..c).map(|m| x[m][i] * q[c - 1 - m][k]).sum();
                    valor[i] = -Complex64::i() * xq - u[c - 1][i] * ysh[i] + x[c - 1][i] * s_red[i].re;
                    w_rhs[k] = -(1..c).map(|m| (u[m][i] * u[c - m][i].conj()).re).sum::<f64>();
                }
            }

            let mut rhs = to_real(&valor);
            rhs.extend_from_slice(&w_rhs);
            self.factor
                .solve_in_place(&mut rhs)
                .map_err(|e| singular(format!("solving HELM order {c}"), e))?;
            u.push(DVector::from_fn(n, |i, _| Complex64::new(rhs[i], rhs[n + i])));
            q.push(DVector::from_column_slice(&rhs[2 * n..]));
            let x_c = DVector::from_fn(n, |i, _| {
                let conv: Complex64 = (1..=c).map(|m| u[m][i].conj() * x[c - m][i]).sum();
                -conv / u0[i].conj()
            });
            x.push(x_c);

            partial += &u[c];
            pqpv.iter().zip(partial.iter()).for_each(|(&bus, e)| v[bus] = *e);
            if v.iter().any(|e| !(e.norm() < DIVERGENCE_GUARD)) {
                warn!(order = c, "HELM partial sums left the divergence guard");
                guard_tripped = true;
                mismatch = f64::INFINITY;
                break;
            }
            mismatch = net.mismatch_norm(&v, s_bus);
            converged = mismatch <= tol;
            debug!(order = c, mismatch, "helm");
            c += 1;
        }

        let orders = u.len();
        let coefficients = HelmCoefficients {
            u: DMatrix::from_fn(orders, n, |r, col| u[r][col]),
            w: DMatrix::from_fn(orders, n, |r, col| x[r][col]),
            q: DMatrix::from_fn(q.len(), npv, |r, col| q[r][col]),
            pqpv: pqpv.to_vec(),
            pv: partition.pv().to_vec(),
        };
        Ok(HelmSeries {
            coefficients,
            v,
            mismatch,
            converged,
            guard_tripped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcases;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_helm_system_is_shareable() {
        assert_send_sync::<HelmSystem<'static>>();
    }

    #[test]
    fn test_order_zero_is_no_load_solution() {
        for case in [testcases::three_bus_pv(), testcases::five_bus()] {
            let net = case.compile().unwrap();
            let helm = HelmSystem::prepare(&net).unwrap();
            let y = DMatrix::from(&net.reduced().y_red_series);
            let y_sl = DMatrix::from(&net.reduced().y_slack_series);
            let ones = DVector::from_element(y_sl.ncols(), Complex64::new(1.0, 0.0));
            let residual = &y * helm.order_zero() + &y_sl * ones;
            let worst = residual.iter().map(|e| e.norm()).fold(0.0, f64::max);
            assert!(worst < 1e-12, "no-load residual {worst}");
        }
    }

    #[test]
    fn test_two_bus_series_converges() {
        let net = testcases::two_bus().compile().unwrap();
        let helm = HelmSystem::prepare(&net).unwrap();
        let cfg = PowerFlowConfig::default().with_ncoeff(20).with_tol(1e-8);
        let series = helm.solve(net.s_bus(), &cfg).unwrap();
        assert!(series.converged, "mismatch {}", series.mismatch);
        assert!(series.coefficients.orders() <= 20);
        assert_eq!(series.v[0], Complex64::new(1.0, 0.0));
        let u = &series.coefficients.u;
        let w = &series.coefficients.w;
        // W is the series of 1/conj(U): their Cauchy product is 1 + 0 s + ...
        for c in 1..u.nrows() {
            let prod: Complex64 = (0..=c).map(|k| u[(k, 0)].conj() * w[(c - k, 0)]).sum();
            assert!(prod.norm() < 1e-10, "order {c}: {prod}");
        }
    }

    #[test]
    fn test_pv_magnitude_series() {
        let net = testcases::three_bus_pv().compile().unwrap();
        let helm = HelmSystem::prepare(&net).unwrap();
        let cfg = PowerFlowConfig::default().with_ncoeff(40).with_tol(1e-9);
        let series = helm.solve(net.s_bus(), &cfg).unwrap();
        assert!(series.converged);
        let pv = net.partition().pv()[0];
        assert!((series.v[pv].norm() - 1.01).abs() < 1e-7, "|V_pv| = {}", series.v[pv].norm());
        assert_eq!(series.coefficients.q.ncols(), 1);
        assert_eq!(series.coefficients.q.nrows(), series.coefficients.orders() - 1);
    }

    #[test]
    fn test_overload_is_not_converged() {
        let net = testcases::two_bus().compile().unwrap();
        let heavy = DVector::from_vec(vec![Complex64::zero(), Complex64::new(-8.0, -6.0)]);
        let helm = HelmSystem::prepare(&net).unwrap();
        let series = helm.solve(&heavy, &PowerFlowConfig::default()).unwrap();
        assert!(!series.converged);
    }

    #[test]
    fn test_divergence_guard() {
        let net = testcases::two_bus().compile().unwrap();
        let heavy = DVector::from_vec(vec![Complex64::zero(), Complex64::new(-20.0, -10.0)]);
        let helm = HelmSystem::prepare(&net).unwrap();
        let cfg = PowerFlowConfig::default().with_ncoeff(60);
        let series = helm.solve(&heavy, &cfg).unwrap();
        assert!(series.guard_tripped);
        assert!(!series.converged);
        assert_eq!(series.mismatch, f64::INFINITY);
        assert!(series.coefficients.orders() < 60, "growth must stop at the guard");
    }
}
