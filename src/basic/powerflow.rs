use derive_more::Display;
use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    acceleration::sum_columns,
    config::{Acceleration, PowerFlowConfig, SolverMethod},
    error::PowerFlowError,
    flows::{BranchFlows, branch_flows},
    helm::{HelmCoefficients, HelmSystem},
    lmpf::levenberg_marquardt_pf,
    newtonpf::newton_pf,
    solver::{DefaultSolver, Factorization},
    system::{CompiledNetwork, LimitViolation, check_reactive_limits, switch_to_pq},
};

/// Final state of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum SolveStatus {
    #[display("converged")]
    Converged,
    /// Iteration budget spent (or the step stalled) above the tolerance.
    #[display("max iterations")]
    MaxIterations,
    /// An iterate became NaN/Inf or a later step could not be solved; the
    /// last finite iterate is returned.
    #[display("diverged")]
    Diverged,
    /// HELM series did not reach the tolerance within its coefficient budget.
    #[display("low confidence")]
    LowConfidence,
}

/// Result of a power flow solve, in natural bus order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerFlowResult {
    pub v: DVector<Complex64>, // Final voltage vector (best estimate if not converged)
    pub converged: bool,
    pub status: SolveStatus,
    pub iterations: usize, // Iterations, or HELM series orders
    pub mismatch: f64,     // Infinity norm of the final mismatch
    pub method: SolverMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coefficients_used: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coefficients: Option<HelmCoefficients>,
    /// Buses whose accelerator failed and which were summed directly.
    #[serde(default)]
    pub acceleration_fallback: Vec<usize>,
    /// Set when the accelerated voltages had a larger mismatch than the
    /// direct summation, which was kept instead.
    #[serde(default)]
    pub summation_kept: bool,
    /// Methods run, in order, when retries are enabled.
    #[serde(default)]
    pub methods_tried: Vec<SolverMethod>,
    /// PV buses switched to PQ by reactive limit control.
    #[serde(default)]
    pub switched_to_pq: Vec<LimitViolation>,
}

impl PowerFlowResult {
    fn trivial(net: &CompiledNetwork, method: SolverMethod) -> Self {
        Self {
            v: net.v0().clone(),
            converged: true,
            status: SolveStatus::Converged,
            iterations: 0,
            mismatch: 0.0,
            method,
            coefficients_used: None,
            coefficients: None,
            acceleration_fallback: Vec::new(),
            summation_kept: false,
            methods_tried: vec![method],
            switched_to_pq: Vec::new(),
        }
    }

    /// Turns a non-converged result into a `NonConvergence` error carrying
    /// the best voltage estimate.
    pub fn into_converged(self) -> Result<Self, PowerFlowError> {
        if self.converged {
            Ok(self)
        } else {
            Err(PowerFlowError::NonConvergence {
                iterations: self.iterations,
                mismatch: self.mismatch,
                last: Box::new(self.v),
            })
        }
    }

    /// Branch flows of this solution.
    pub fn branch_flows(&self, net: &CompiledNetwork) -> Result<BranchFlows, PowerFlowError> {
        branch_flows(net, &self.v)
    }

    /// Whether `self` is a better answer than `other`: converged first, then
    /// the smaller mismatch, NaN ranking last.
    fn improves_on(&self, other: &Self) -> bool {
        let rank = |m: f64| if m.is_nan() { f64::INFINITY } else { m };
        if self.converged != other.converged {
            return self.converged;
        }
        rank(self.mismatch) < rank(other.mismatch)
    }
}

/// Runs the Newton-Raphson or Levenberg-Marquardt solver for the injections
/// `s_bus`, converting budget exhaustion into a non-converged result.
fn solve_iterative(
    net: &CompiledNetwork,
    s_bus: &DVector<Complex64>,
    config: &PowerFlowConfig,
) -> Result<PowerFlowResult, PowerFlowError> {
    let partition = net.partition();
    let (npv, npq) = (partition.pv().len(), partition.pq().len());
    let s = net.to_solver_order(s_bus);
    let v0 = net.to_solver_order(net.v0());
    let (tol, max_it) = (Some(config.tolerance()), Some(config.max_iterations()));
    let mut solver = DefaultSolver::default();
    let outcome = match config.method {
        SolverMethod::LevenbergMarquardt => {
            levenberg_marquardt_pf(net.y_ordered(), &s, &v0, npv, npq, tol, max_it, &mut solver)
        }
        _ => newton_pf(net.y_ordered(), &s, &v0, npv, npq, tol, max_it, &mut solver),
    };

    let mut result = PowerFlowResult::trivial(net, config.method);
    match outcome {
        Ok(sol) => {
            result.v = net.from_solver_order(&sol.v);
            result.iterations = sol.iterations;
            result.mismatch = sol.mismatch;
        }
        Err(PowerFlowError::NonConvergence {
            iterations,
            mismatch,
            last,
        }) => {
            result.v = net.from_solver_order(&last);
            result.iterations = iterations;
            result.converged = false;
            if mismatch.is_finite() {
                result.status = SolveStatus::MaxIterations;
                result.mismatch = mismatch;
            } else {
                result.status = SolveStatus::Diverged;
                result.mismatch = net.mismatch_norm(&result.v, s_bus);
            }
            warn!(method = %config.method, iterations, status = %result.status, "power flow did not converge");
        }
        Err(e) => return Err(e),
    }
    Ok(result)
}

/// Grows the HELM series and recovers the voltages with the configured
/// accelerator.
///
/// The accelerated voltages are kept only if their mismatch is not worse
/// than the direct summation.
fn solve_helm<F: Factorization>(
    helm: &HelmSystem<'_, F>,
    net: &CompiledNetwork,
    s_bus: &DVector<Complex64>,
    config: &PowerFlowConfig,
) -> Result<PowerFlowResult, PowerFlowError> {
    let series = helm.solve(s_bus, config)?;
    let pqpv = &series.coefficients.pqpv;
    let mut v = series.v;
    let mut mismatch = series.mismatch;
    let mut fallback = Vec::new();
    let mut summation_kept = false;

    if config.acceleration != Acceleration::None {
        let (values, failed) = sum_columns(&series.coefficients.u, config.acceleration);
        fallback = failed.into_iter().map(|j| pqpv[j]).collect();
        let mut v_acc = v.clone();
        pqpv.iter().zip(values.iter()).for_each(|(&bus, e)| v_acc[bus] = *e);
        let mismatch_acc = net.mismatch_norm(&v_acc, s_bus);
        if mismatch_acc <= mismatch || mismatch.is_nan() {
            v = v_acc;
            mismatch = mismatch_acc;
        } else {
            warn!(
                acceleration = %config.acceleration,
                accelerated = mismatch_acc,
                summed = mismatch,
                "accelerated voltages are worse than direct summation"
            );
            summation_kept = true;
        }
    }

    let orders = series.coefficients.orders();
    let converged = mismatch <= config.tolerance();
    if !converged {
        warn!(
            orders,
            mismatch,
            guard_tripped = series.guard_tripped,
            "HELM result has low confidence"
        );
    }
    Ok(PowerFlowResult {
        v,
        converged,
        status: if converged {
            SolveStatus::Converged
        } else {
            SolveStatus::LowConfidence
        },
        iterations: orders,
        mismatch,
        method: SolverMethod::Helm,
        coefficients_used: Some(orders),
        coefficients: config.keep_coefficients.then_some(series.coefficients),
        acceleration_fallback: fallback,
        summation_kept,
        methods_tried: vec![SolverMethod::Helm],
        switched_to_pq: Vec::new(),
    })
}

fn solve_with(net: &CompiledNetwork, config: &PowerFlowConfig) -> Result<PowerFlowResult, PowerFlowError> {
    match config.method {
        SolverMethod::Helm => {
            let helm = HelmSystem::prepare(net)?;
            solve_helm(&helm, net, net.s_bus(), config)
        }
        _ => solve_iterative(net, net.s_bus(), config),
    }
}

/// Runs the methods of [`PowerFlowConfig::method_chain`] until one converges
/// and keeps the best result.
///
/// While retrying, a singular matrix only ends the attempt of that method; it
/// is returned if no method produced a result.
fn solve_with_retries(
    net: &CompiledNetwork,
    config: &PowerFlowConfig,
) -> Result<PowerFlowResult, PowerFlowError> {
    let retry = config.retry_with_other_methods;
    let mut best: Option<PowerFlowResult> = None;
    let mut first_error = None;
    let mut tried = Vec::new();
    for method in config.method_chain() {
        tried.push(method);
        let attempt = PowerFlowConfig {
            method,
            ..config.clone()
        };
        match solve_with(net, &attempt) {
            Ok(res) if best.as_ref().is_none_or(|b| res.improves_on(b)) => best = Some(res),
            Ok(res) => {
                info!(method = %method, mismatch = res.mismatch, "retry did not improve the solution")
            }
            Err(e @ PowerFlowError::SingularMatrix { .. }) if retry => {
                warn!(method = %method, error = %e, "method failed, trying the next one");
                first_error.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
        if best.as_ref().is_some_and(|b| b.converged) {
            break;
        }
    }
    let Some(mut best) = best else {
        return Err(first_error
            .unwrap_or_else(|| PowerFlowError::singular("running the power flow: no method succeeded")));
    };
    if retry && !best.converged {
        warn!(mismatch = best.mismatch, "did not converge, even after retrying other methods");
    }
    best.methods_tried = tried;
    Ok(best)
}

/// Outer reactive limit loop.
///
/// After each converged solve, PV buses whose generation left its range are
/// switched to PQ at the crossed bound and the network is solved again from
/// the last voltages. Every round removes at least one PV bus, so the loop
/// ends after at most `|pv|` rounds.
fn control_reactive_limits(
    net: &CompiledNetwork,
    config: &PowerFlowConfig,
    mut result: PowerFlowResult,
) -> Result<PowerFlowResult, PowerFlowError> {
    let mut current = net.clone();
    let mut switched = Vec::new();
    while result.converged {
        let violations = check_reactive_limits(&current, &result.v);
        if violations.is_empty() {
            break;
        }
        current = switch_to_pq(&current, &violations, &result.v)?;
        switched.extend(violations);
        result = solve_with_retries(&current, config)?;
    }
    result.switched_to_pq = switched;
    Ok(result)
}

/// Solves the power flow of a compiled network with the configured method.
///
/// Non-convergence is reported through [`PowerFlowResult::status`]; only
/// structural failures (singular matrices, dimension errors) are returned as
/// `Err`. With `retry_with_other_methods` the other methods are tried in turn,
/// and with `control_q` generator reactive limits are enforced.
pub fn run_power_flow(
    net: &CompiledNetwork,
    config: &PowerFlowConfig,
) -> Result<PowerFlowResult, PowerFlowError> {
    let partition = net.partition();
    info!(
        method = %config.method,
        n_bus = net.n_bus(),
        npv = partition.pv().len(),
        npq = partition.pq().len(),
        "running power flow"
    );
    if partition.pqpv().is_empty() {
        return Ok(PowerFlowResult::trivial(net, config.method));
    }
    let mut result = solve_with_retries(net, config)?;
    if config.control_q && !net.reactive_limits().is_empty() {
        result = control_reactive_limits(net, config, result)?;
    }
    info!(
        method = %result.method,
        status = %result.status,
        iterations = result.iterations,
        mismatch = result.mismatch,
        switched = result.switched_to_pq.len(),
        "power flow finished"
    );
    Ok(result)
}

fn map_scenarios<F>(scenarios: &[DVector<Complex64>], f: F) -> Result<Vec<PowerFlowResult>, PowerFlowError>
where
    F: Fn(&DVector<Complex64>) -> Result<PowerFlowResult, PowerFlowError> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        scenarios.par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        scenarios.iter().map(f).collect()
    }
}

/// Solves independent injection scenarios on the same network.
///
/// Each scenario owns its solver state. With the HELM method the no-load
/// solution and the system factorization are computed once and shared. With
/// retries or reactive limit control every scenario runs the full
/// [`run_power_flow`] on a variant sharing the network matrices.
pub fn solve_batch(
    net: &CompiledNetwork,
    scenarios: &[DVector<Complex64>],
    config: &PowerFlowConfig,
) -> Result<Vec<PowerFlowResult>, PowerFlowError> {
    info!(scenarios = scenarios.len(), method = %config.method, "running batch power flow");
    if net.partition().pqpv().is_empty() {
        return Ok(scenarios
            .iter()
            .map(|_| PowerFlowResult::trivial(net, config.method))
            .collect());
    }
    if config.retry_with_other_methods || config.control_q {
        return map_scenarios(scenarios, |s| {
            run_power_flow(&net.with_injections(s.clone())?, config)
        });
    }
    match config.method {
        SolverMethod::Helm => {
            let helm = HelmSystem::prepare(net)?;
            map_scenarios(scenarios, |s| solve_helm(&helm, net, s, config))
        }
        _ => map_scenarios(scenarios, |s| {
            if s.len() != net.n_bus() {
                return Err(PowerFlowError::DimensionMismatch {
                    what: "injection vector",
                    expected: net.n_bus(),
                    found: s.len(),
                });
            }
            solve_iterative(net, s, config)
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::{flows::bus_powers, system::ReactiveLimit};
    use crate::testcases;

    fn max_diff(a: &DVector<Complex64>, b: &DVector<Complex64>) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y).norm()).fold(0.0, f64::max)
    }

    #[test]
    fn test_two_bus_scenario() {
        let net = testcases::two_bus().compile().unwrap();
        let nr = run_power_flow(&net, &PowerFlowConfig::new(SolverMethod::NewtonRaphson)).unwrap();
        assert!(nr.converged && nr.iterations < 10, "NR: {:?}", nr.status);
        let helm_cfg = PowerFlowConfig::new(SolverMethod::Helm).with_ncoeff(20);
        let helm = run_power_flow(&net, &helm_cfg).unwrap();
        assert!(helm.converged, "HELM mismatch {}", helm.mismatch);
        assert!(helm.coefficients_used.unwrap() <= 20);
        assert!(max_diff(&nr.v, &helm.v) < 1e-6, "NR and HELM disagree");
    }

    #[test]
    fn test_helm_matches_newton() {
        for case in [testcases::three_bus_pv(), testcases::five_bus()] {
            let net = case.compile().unwrap();
            let cfg = PowerFlowConfig::default().with_tol(1e-9);
            let nr = run_power_flow(&net, &cfg).unwrap();
            for acceleration in [Acceleration::None, Acceleration::Pade, Acceleration::Wynn] {
                let helm_cfg = PowerFlowConfig::new(SolverMethod::Helm)
                    .with_tol(1e-9)
                    .with_ncoeff(60)
                    .with_acceleration(acceleration);
                let helm = run_power_flow(&net, &helm_cfg).unwrap();
                assert_eq!(helm.status, SolveStatus::Converged, "{acceleration}");
                let diff = max_diff(&nr.v, &helm.v);
                assert!(diff < 1e-6, "{acceleration}: NR and HELM differ by {diff}");
            }
        }
    }

    #[test]
    fn test_levenberg_marquardt_converges() {
        let net = testcases::three_bus_pv().compile().unwrap();
        let lm = run_power_flow(&net, &PowerFlowConfig::new(SolverMethod::LevenbergMarquardt)).unwrap();
        assert!(lm.converged, "LM status {}", lm.status);
        let nr = run_power_flow(&net, &PowerFlowConfig::default()).unwrap();
        assert!(max_diff(&nr.v, &lm.v) < 1e-5);
    }

    #[test]
    fn test_non_convergence_is_a_status() {
        let net = testcases::five_bus().compile().unwrap();
        let cfg = PowerFlowConfig::default().with_max_it(1).with_tol(1e-14);
        let res = run_power_flow(&net, &cfg).unwrap();
        assert!(!res.converged);
        assert_eq!(res.status, SolveStatus::MaxIterations);
        assert!(res.v.iter().all(|e| e.re.is_finite()));
        let err = res.into_converged().unwrap_err();
        assert!(matches!(err, PowerFlowError::NonConvergence { iterations: 1, .. }));
    }

    #[test]
    fn test_helm_low_confidence() {
        let net = testcases::two_bus()
            .compile()
            .unwrap()
            .with_injections(DVector::from_vec(vec![
                Complex64::new(0.0, 0.0),
                Complex64::new(-8.0, -6.0),
            ]))
            .unwrap();
        let cfg = PowerFlowConfig::new(SolverMethod::Helm).with_acceleration(Acceleration::None);
        let res = run_power_flow(&net, &cfg).unwrap();
        assert_eq!(res.status, SolveStatus::LowConfidence);
        assert!(!res.converged);
    }

    #[test]
    fn test_keep_coefficients() {
        let net = testcases::three_bus_pv().compile().unwrap();
        let mut cfg = PowerFlowConfig::new(SolverMethod::Helm);
        let res = run_power_flow(&net, &cfg).unwrap();
        assert!(res.coefficients.is_none());
        cfg.keep_coefficients = true;
        let res = run_power_flow(&net, &cfg).unwrap();
        let coeffs = res.coefficients.unwrap();
        assert_eq!(coeffs.u.nrows(), res.coefficients_used.unwrap());
        assert_eq!(coeffs.pqpv, vec![1, 2]);
    }

    #[test]
    fn test_isolated_bus_fails_hard() {
        let err = testcases::isolated_bus().compile().unwrap_err();
        assert!(matches!(err, PowerFlowError::SingularMatrix { .. }));
    }

    #[test]
    fn test_batch_matches_single_solves() {
        let net = testcases::five_bus().compile().unwrap();
        let scenarios: Vec<_> = [0.6, 0.8, 1.0, 1.2]
            .iter()
            .map(|k| net.s_bus().map(|s| s * *k))
            .collect();
        for method in [SolverMethod::NewtonRaphson, SolverMethod::Helm] {
            let cfg = PowerFlowConfig::new(method).with_tol(1e-9).with_ncoeff(60);
            let batch = solve_batch(&net, &scenarios, &cfg).unwrap();
            assert_eq!(batch.len(), scenarios.len());
            for (s, res) in scenarios.iter().zip(&batch) {
                let single = run_power_flow(&net.with_injections(s.clone()).unwrap(), &cfg).unwrap();
                assert!(res.converged, "{method}");
                assert!(max_diff(&single.v, &res.v) < 1e-12, "{method}");
            }
        }
        let bad: Vec<DVector<Complex64>> = vec![DVector::zeros(2)];
        assert!(solve_batch(&net, &bad, &PowerFlowConfig::default()).is_err());
    }

    #[test]
    fn test_accelerated_choice_is_reported_apart_from_fallback() {
        let net = testcases::three_bus_pv().compile().unwrap();
        let mut cfg = PowerFlowConfig::new(SolverMethod::Helm)
            .with_ncoeff(5)
            .with_tol(1e-12)
            .with_acceleration(Acceleration::Pade);
        cfg.keep_coefficients = true;
        let res = run_power_flow(&net, &cfg).unwrap();
        let coeffs = res.coefficients.as_ref().unwrap();
        let (accelerated, failed) = sum_columns(&coeffs.u, Acceleration::Pade);
        let failed: Vec<usize> = failed.into_iter().map(|j| coeffs.pqpv[j]).collect();
        assert_eq!(res.acceleration_fallback, failed);
        for (j, &bus) in coeffs.pqpv.iter().enumerate() {
            let expected = if res.summation_kept {
                coeffs.u.column(j).iter().sum::<Complex64>()
            } else {
                accelerated[j]
            };
            assert!((res.v[bus] - expected).norm() < 1e-12, "bus {bus}");
        }
    }

    #[test]
    fn test_retry_with_other_methods() {
        let net = testcases::two_bus().compile().unwrap();
        let cfg = PowerFlowConfig::default().with_max_it(1).with_tol(1e-8).with_ncoeff(40);
        let single = run_power_flow(&net, &cfg).unwrap();
        assert!(!single.converged);
        assert_eq!(single.methods_tried, vec![SolverMethod::NewtonRaphson]);

        let res = run_power_flow(&net, &cfg.clone().with_retry(true)).unwrap();
        assert!(res.converged, "retry status {}", res.status);
        assert_eq!(res.method, SolverMethod::Helm);
        assert_eq!(res.methods_tried, vec![SolverMethod::NewtonRaphson, SolverMethod::Helm]);
    }

    #[test]
    fn test_non_finite_injection_is_diverged() {
        let net = testcases::two_bus().compile().unwrap();
        let bad = net
            .with_injections(DVector::from_vec(vec![
                Complex64::new(0.0, 0.0),
                Complex64::new(f64::NAN, -0.5),
            ]))
            .unwrap();
        for method in [SolverMethod::NewtonRaphson, SolverMethod::LevenbergMarquardt] {
            let res = run_power_flow(&bad, &PowerFlowConfig::new(method)).unwrap();
            assert_eq!(res.status, SolveStatus::Diverged, "{method}");
            assert!(!res.converged);
            assert_eq!(res.iterations, 0);
            assert_eq!(&res.v, net.v0());
        }
    }

    #[test]
    fn test_infeasible_load_is_not_an_error() {
        let net = testcases::two_bus()
            .compile()
            .unwrap()
            .with_injections(DVector::from_vec(vec![
                Complex64::new(0.0, 0.0),
                Complex64::new(-8.0, -6.0),
            ]))
            .unwrap();
        let res = run_power_flow(&net, &PowerFlowConfig::default()).unwrap();
        assert!(!res.converged);
        assert!(
            matches!(res.status, SolveStatus::Diverged | SolveStatus::MaxIterations),
            "status {}",
            res.status
        );
    }

    #[test]
    fn test_two_slack_helm_matches_newton() {
        let net = testcases::two_slack().compile().unwrap();
        let nr = run_power_flow(&net, &PowerFlowConfig::default().with_tol(1e-10)).unwrap();
        assert!(nr.converged);
        let helm_cfg = PowerFlowConfig::new(SolverMethod::Helm).with_tol(1e-9).with_ncoeff(40);
        let helm = run_power_flow(&net, &helm_cfg).unwrap();
        assert!(helm.converged, "HELM mismatch {}", helm.mismatch);
        assert!(max_diff(&nr.v, &helm.v) < 1e-6);
        for &bus in net.partition().slack() {
            assert_eq!(helm.v[bus], net.v0()[bus]);
            assert_eq!(nr.v[bus], net.v0()[bus]);
        }
    }

    #[test]
    fn test_generator_only_network() {
        let net = testcases::pv_only().compile().unwrap();
        for method in [SolverMethod::NewtonRaphson, SolverMethod::LevenbergMarquardt, SolverMethod::Helm] {
            let res = run_power_flow(&net, &PowerFlowConfig::new(method).with_tol(1e-9)).unwrap();
            assert!(res.converged, "{method}: {}", res.status);
            assert!((res.v[1].norm() - 1.02).abs() < 1e-6, "{method}: |V| = {}", res.v[1].norm());
            assert!(res.v[1].arg() > 0.0, "{method}: exporting bus must lead the slack");
        }
    }

    #[test]
    fn test_reactive_limit_switches_pv_to_pq() {
        let net = testcases::three_bus_pv().compile().unwrap();
        let cfg = PowerFlowConfig::default().with_tol(1e-10);
        let free = run_power_flow(&net, &cfg).unwrap();
        let q0 = bus_powers(&net, &free.v).unwrap()[1].im * net.s_base();

        let limited = net
            .with_reactive_limits(vec![ReactiveLimit::new(1, -999.0, q0 - 5.0)])
            .unwrap();
        // limits are ignored unless reactive control is enabled
        let ignored = run_power_flow(&limited, &cfg).unwrap();
        assert!(ignored.switched_to_pq.is_empty());
        assert!((ignored.v[1].norm() - 1.01).abs() < 1e-12);

        let cfg = cfg.with_q_control(true);
        let res = run_power_flow(&limited, &cfg).unwrap();
        assert!(res.converged);
        assert_eq!(res.switched_to_pq.len(), 1);
        assert_eq!(res.switched_to_pq[0].bus, 1);
        assert_eq!(res.switched_to_pq[0].q_limit, q0 - 5.0);
        let q = bus_powers(&net, &res.v).unwrap()[1].im * net.s_base();
        assert!((q - (q0 - 5.0)).abs() < 1e-6, "generation {q} not at its limit");
        assert!((res.v[1].norm() - 1.01).abs() > 1e-4, "voltage must leave the set point");

        let batch = solve_batch(&limited, &[limited.s_bus().clone()], &cfg).unwrap();
        assert_eq!(batch[0].switched_to_pq, res.switched_to_pq);
        assert!(max_diff(&batch[0].v, &res.v) < 1e-12);

        let wide = net
            .with_reactive_limits(vec![ReactiveLimit::new(1, q0 - 50.0, q0 + 50.0)])
            .unwrap();
        let res = run_power_flow(&wide, &cfg).unwrap();
        assert!(res.switched_to_pq.is_empty());
        assert!(max_diff(&res.v, &free.v) < 1e-12);
    }
}
