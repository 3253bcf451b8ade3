//! Generator reactive power limits and PV to PQ switching.

use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{compiled::CompiledNetwork, partition::BusType};
use crate::basic::error::PowerFlowError;

/// Reactive capability (MVAr) of the generation connected to a PV bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReactiveLimit {
    pub bus: usize,
    pub q_min: f64,
    pub q_max: f64,
}

impl ReactiveLimit {
    pub fn new(bus: usize, q_min: f64, q_max: f64) -> Self {
        Self { bus, q_min, q_max }
    }

    pub(crate) fn validate(&self, n_bus: usize) -> Result<(), PowerFlowError> {
        let invalid = |reason| PowerFlowError::InvalidLimit {
            bus: self.bus,
            reason,
        };
        if self.bus >= n_bus {
            return Err(invalid("bus index out of range"));
        }
        if self.q_min.is_nan() || self.q_max.is_nan() || self.q_min > self.q_max {
            return Err(invalid("q_min must not exceed q_max"));
        }
        Ok(())
    }

    /// The bound crossed by a generation of `q_mvar`, if any.
    pub fn violated(&self, q_mvar: f64) -> Option<f64> {
        if q_mvar < self.q_min {
            Some(self.q_min)
        } else if q_mvar > self.q_max {
            Some(self.q_max)
        } else {
            None
        }
    }
}

/// A PV bus whose generator left its reactive range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LimitViolation {
    pub bus: usize,
    /// Reactive generation at the solution (MVAr).
    pub q_mvar: f64,
    /// Bound the generation is clamped to (MVAr).
    pub q_limit: f64,
}

/// Reactive generation of every limited PV bus at voltages `v`, checked
/// against its limits.
///
/// The generation is the computed injection minus the specified reactive
/// part of `s_bus` at that bus, which holds the local load.
pub fn check_reactive_limits(net: &CompiledNetwork, v: &DVector<Complex64>) -> Vec<LimitViolation> {
    let partition = net.partition();
    let s_calc = v.component_mul(&(&net.admittance().y_bus * v).conjugate());
    net.reactive_limits()
        .iter()
        .filter(|lim| partition.bus_type(lim.bus) == Some(BusType::PV))
        .filter_map(|lim| {
            let q_mvar = (s_calc[lim.bus].im - net.s_bus()[lim.bus].im) * net.s_base();
            lim.violated(q_mvar).map(|q_limit| LimitViolation {
                bus: lim.bus,
                q_mvar,
                q_limit,
            })
        })
        .collect()
}

/// Turns the violating PV buses into PQ buses with their generation fixed at
/// the crossed bound. The next solve starts from `v`.
pub fn switch_to_pq(
    net: &CompiledNetwork,
    violations: &[LimitViolation],
    v: &DVector<Complex64>,
) -> Result<CompiledNetwork, PowerFlowError> {
    let mut s_bus = net.s_bus().clone();
    for viol in violations {
        info!(
            bus = viol.bus,
            q_mvar = viol.q_mvar,
            q_limit = viol.q_limit,
            "PV bus exceeds its reactive limit, switching to PQ"
        );
        s_bus[viol.bus].im += viol.q_limit / net.s_base();
    }
    let buses: Vec<usize> = violations.iter().map(|viol| viol.bus).collect();
    let partition = net.partition().demote_to_pq(&buses)?;
    net.with_partition(partition, s_bus, v.clone())
}
