use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::basic::error::PowerFlowError;

/// Electrical role of a bus in the power flow problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum BusType {
    /// Voltage magnitude and angle fixed.
    #[display("Slack")]
    Slack,
    /// Active power and voltage magnitude fixed.
    #[display("PV")]
    PV,
    /// Active and reactive power fixed.
    #[display("PQ")]
    PQ,
}

/// Disjoint classification of all buses into slack, PV and PQ sets.
///
/// Each list is kept in ascending bus order. `pqpv` is `pq ∪ pv`, also sorted,
/// and is the row/column order of every reduced matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusPartition {
    n_bus: usize,
    slack: Vec<usize>,
    pv: Vec<usize>,
    pq: Vec<usize>,
    pqpv: Vec<usize>,
}

impl BusPartition {
    /// Validates and builds a partition.
    ///
    /// Fails when the sets overlap, do not cover `0..n_bus`, reference a bus
    /// out of range, or when there is no slack bus.
    pub fn new(
        n_bus: usize,
        mut slack: Vec<usize>,
        mut pv: Vec<usize>,
        mut pq: Vec<usize>,
    ) -> Result<Self, PowerFlowError> {
        if slack.is_empty() {
            return Err(PowerFlowError::MalformedPartition(
                "at least one slack bus is required".into(),
            ));
        }
        let mut seen = vec![None; n_bus];
        for (set, name) in [(&slack, BusType::Slack), (&pv, BusType::PV), (&pq, BusType::PQ)] {
            for &bus in set.iter() {
                let slot = seen.get_mut(bus).ok_or_else(|| {
                    PowerFlowError::MalformedPartition(format!(
                        "{name} bus {bus} is out of range (n_bus = {n_bus})"
                    ))
                })?;
                if let Some(prev) = slot.replace(name) {
                    return Err(PowerFlowError::MalformedPartition(format!(
                        "bus {bus} is listed as both {prev} and {name}"
                    )));
                }
            }
        }
        if let Some(missing) = seen.iter().position(|s| s.is_none()) {
            return Err(PowerFlowError::MalformedPartition(format!(
                "bus {missing} is not assigned to any set"
            )));
        }
        slack.sort_unstable();
        pv.sort_unstable();
        pq.sort_unstable();
        let mut pqpv: Vec<usize> = pq.iter().chain(pv.iter()).copied().collect();
        pqpv.sort_unstable();
        Ok(Self {
            n_bus,
            slack,
            pv,
            pq,
            pqpv,
        })
    }

    /// Builds a partition from a per-bus type list.
    pub fn from_types(types: &[BusType]) -> Result<Self, PowerFlowError> {
        let pick = |t: BusType| {
            types
                .iter()
                .enumerate()
                .filter_map(move |(i, &ty)| (ty == t).then_some(i))
                .collect::<Vec<_>>()
        };
        Self::new(
            types.len(),
            pick(BusType::Slack),
            pick(BusType::PV),
            pick(BusType::PQ),
        )
    }

    pub fn n_bus(&self) -> usize {
        self.n_bus
    }

    pub fn slack(&self) -> &[usize] {
        &self.slack
    }

    pub fn pv(&self) -> &[usize] {
        &self.pv
    }

    pub fn pq(&self) -> &[usize] {
        &self.pq
    }

    pub fn pqpv(&self) -> &[usize] {
        &self.pqpv
    }

    pub fn bus_type(&self, bus: usize) -> Option<BusType> {
        if self.slack.binary_search(&bus).is_ok() {
            Some(BusType::Slack)
        } else if self.pv.binary_search(&bus).is_ok() {
            Some(BusType::PV)
        } else if self.pq.binary_search(&bus).is_ok() {
            Some(BusType::PQ)
        } else {
            None
        }
    }

    /// Same partition with the given PV buses turned into PQ buses.
    pub fn demote_to_pq(&self, buses: &[usize]) -> Result<Self, PowerFlowError> {
        if let Some(bus) = buses.iter().find(|&b| self.pv.binary_search(b).is_err()) {
            return Err(PowerFlowError::MalformedPartition(format!(
                "bus {bus} is not a PV bus"
            )));
        }
        let pv = self.pv.iter().filter(|&b| !buses.contains(b)).copied().collect();
        let pq = self.pq.iter().chain(buses.iter()).copied().collect();
        Self::new(self.n_bus, self.slack.clone(), pv, pq)
    }

    /// Bus order `[pv, pq, slack]` used by the Jacobian based solvers.
    pub fn solver_order(&self) -> Vec<usize> {
        self.pv
            .iter()
            .chain(self.pq.iter())
            .chain(self.slack.iter())
            .copied()
            .collect()
    }
}
