use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Default convergence tolerance on the power mismatch (p.u.).
pub const DEFAULT_TOL: f64 = 1e-6;
/// Default iteration budget for the Jacobian based methods.
pub const DEFAULT_MAX_IT: usize = 100;
/// Default number of HELM series coefficients.
pub const DEFAULT_NCOEFF: usize = 30;

/// Numerical method used to solve the power flow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverMethod {
    #[default]
    #[display("newton-raphson")]
    NewtonRaphson,
    #[display("levenberg-marquardt")]
    LevenbergMarquardt,
    #[display("helm")]
    Helm,
}

/// Summation strategy used to recover voltages from the HELM series.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acceleration {
    #[display("none")]
    None,
    #[default]
    #[display("pade")]
    Pade,
    #[display("wynn")]
    Wynn,
}

/// Solver configuration: method, iteration budget, tolerance and HELM options.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerFlowConfig {
    #[serde(default)]
    pub method: SolverMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_it: Option<usize>, // Maximum number of iterations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tol: Option<f64>, // Tolerance for convergence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ncoeff: Option<usize>, // Maximum number of HELM coefficients
    #[serde(default)]
    pub acceleration: Acceleration,
    /// Keep the HELM coefficient tables in the result.
    #[serde(default)]
    pub keep_coefficients: bool,
    /// Try the other methods when the configured one does not converge.
    #[serde(default)]
    pub retry_with_other_methods: bool,
    /// Enforce generator reactive limits by switching PV buses to PQ.
    #[serde(default)]
    pub control_q: bool,
}

impl PowerFlowConfig {
    pub fn new(method: SolverMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = Some(tol);
        self
    }

    pub fn with_max_it(mut self, max_it: usize) -> Self {
        self.max_it = Some(max_it);
        self
    }

    pub fn with_ncoeff(mut self, ncoeff: usize) -> Self {
        self.ncoeff = Some(ncoeff);
        self
    }

    pub fn with_acceleration(mut self, acceleration: Acceleration) -> Self {
        self.acceleration = acceleration;
        self
    }

    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry_with_other_methods = retry;
        self
    }

    pub fn with_q_control(mut self, control_q: bool) -> Self {
        self.control_q = control_q;
        self
    }

    /// Methods in the order they are tried.
    ///
    /// The configured method comes first. With retries enabled the others
    /// follow, Levenberg-Marquardt before HELM when reactive limits are
    /// controlled.
    pub fn method_chain(&self) -> Vec<SolverMethod> {
        use SolverMethod::*;
        let mut chain = vec![self.method];
        if self.retry_with_other_methods {
            let others = if self.control_q {
                [NewtonRaphson, LevenbergMarquardt, Helm]
            } else {
                [NewtonRaphson, Helm, LevenbergMarquardt]
            };
            chain.extend(others.into_iter().filter(|m| *m != self.method));
        }
        chain
    }

    pub fn tolerance(&self) -> f64 {
        self.tol.unwrap_or(DEFAULT_TOL)
    }

    pub fn max_iterations(&self) -> usize {
        self.max_it.unwrap_or(DEFAULT_MAX_IT)
    }

    pub fn coefficients(&self) -> usize {
        self.ncoeff.unwrap_or(DEFAULT_NCOEFF).max(2)
    }

    /// Parses a configuration from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}
