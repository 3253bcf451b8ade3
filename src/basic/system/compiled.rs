use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;
use tracing::debug;

use super::{
    admittance::{AdmittanceMatrices, BranchData, ReducedAdmittance, build_admittance},
    partition::BusPartition,
    qlim::ReactiveLimit,
};
use crate::basic::{error::PowerFlowError, newtonpf::power_mismatch, sparse::slice::select_csc};

/// Immutable numerical snapshot of a network, ready to be solved.
///
/// Built once from branch data, bus shunts and a bus partition. Solvers only
/// read from it, so it can be shared across threads for independent solves.
/// The matrices sit behind `Arc`s: scenario variants built with
/// [`CompiledNetwork::with_injections`] and friends share them.
#[derive(Debug, Clone)]
pub struct CompiledNetwork {
    s_base: f64,
    partition: BusPartition,
    branches: Arc<Vec<BranchData>>,
    admittance: Arc<AdmittanceMatrices>,
    reduced: Arc<ReducedAdmittance>,
    s_bus: DVector<Complex64>,
    v0: DVector<Complex64>,
    order: Vec<usize>,
    y_ordered: Arc<CscMatrix<Complex64>>,
    q_limits: Arc<Vec<ReactiveLimit>>,
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), PowerFlowError> {
    if expected == found {
        Ok(())
    } else {
        Err(PowerFlowError::DimensionMismatch {
            what,
            expected,
            found,
        })
    }
}

impl CompiledNetwork {
    /// Compiles a network.
    ///
    /// # Arguments
    ///
    /// * `n_bus` - Number of buses.
    /// * `branches` - Branch parameters in per unit.
    /// * `bus_shunts` - Shunt admittances attached to buses, in per unit.
    /// * `partition` - Bus type partition over `0..n_bus`.
    /// * `s_bus` - Specified complex power injections (generation positive), per unit.
    /// * `v0` - Initial voltages; slack entries are the fixed slack voltages and
    ///   the magnitude of PV entries is the voltage set point.
    /// * `s_base` - Base power (MVA) used to convert flows and losses.
    pub fn compile(
        n_bus: usize,
        branches: Vec<BranchData>,
        bus_shunts: &[(usize, Complex64)],
        partition: BusPartition,
        s_bus: DVector<Complex64>,
        v0: DVector<Complex64>,
        s_base: f64,
    ) -> Result<Self, PowerFlowError> {
        check_len("partition size", n_bus, partition.n_bus())?;
        check_len("injection vector", n_bus, s_bus.len())?;
        check_len("initial voltage vector", n_bus, v0.len())?;
        let admittance = build_admittance(n_bus, &branches, bus_shunts)?;
        debug!(
            n_bus,
            n_branch = branches.len(),
            nnz = admittance.y_bus.nnz(),
            "compiled network"
        );
        Self::assemble(
            s_base,
            partition,
            Arc::new(branches),
            Arc::new(admittance),
            s_bus,
            v0,
            Arc::default(),
        )
    }

    /// Reduction and solver ordering for `partition` on top of shared branch
    /// data and admittance matrices.
    fn assemble(
        s_base: f64,
        partition: BusPartition,
        branches: Arc<Vec<BranchData>>,
        admittance: Arc<AdmittanceMatrices>,
        s_bus: DVector<Complex64>,
        v0: DVector<Complex64>,
        q_limits: Arc<Vec<ReactiveLimit>>,
    ) -> Result<Self, PowerFlowError> {
        let reduced = ReducedAdmittance::reduce(&admittance, &partition)?;
        let order = partition.solver_order();
        let y_ordered = select_csc(&admittance.y_bus, &order, &order);
        Ok(Self {
            s_base,
            partition,
            branches,
            admittance,
            reduced: Arc::new(reduced),
            s_bus,
            v0,
            order,
            y_ordered: Arc::new(y_ordered),
            q_limits,
        })
    }

    /// Same network with a different injection vector. The matrices are
    /// shared with `self`.
    pub fn with_injections(&self, s_bus: DVector<Complex64>) -> Result<Self, PowerFlowError> {
        check_len("injection vector", self.n_bus(), s_bus.len())?;
        Ok(Self {
            s_bus,
            ..self.clone()
        })
    }

    /// Same network with a different initial voltage vector. The matrices are
    /// shared with `self`.
    pub fn with_initial_voltage(&self, v0: DVector<Complex64>) -> Result<Self, PowerFlowError> {
        check_len("initial voltage vector", self.n_bus(), v0.len())?;
        Ok(Self { v0, ..self.clone() })
    }

    /// Same network with generator reactive limits attached to PV buses.
    pub fn with_reactive_limits(&self, limits: Vec<ReactiveLimit>) -> Result<Self, PowerFlowError> {
        for lim in &limits {
            lim.validate(self.n_bus())?;
        }
        Ok(Self {
            q_limits: Arc::new(limits),
            ..self.clone()
        })
    }

    /// Re-partitions the buses, keeping the admittance matrices.
    ///
    /// Only the reduced matrices and the solver ordering are rebuilt.
    pub fn with_partition(
        &self,
        partition: BusPartition,
        s_bus: DVector<Complex64>,
        v0: DVector<Complex64>,
    ) -> Result<Self, PowerFlowError> {
        check_len("partition size", self.n_bus(), partition.n_bus())?;
        check_len("injection vector", self.n_bus(), s_bus.len())?;
        check_len("initial voltage vector", self.n_bus(), v0.len())?;
        Self::assemble(
            self.s_base,
            partition,
            Arc::clone(&self.branches),
            Arc::clone(&self.admittance),
            s_bus,
            v0,
            Arc::clone(&self.q_limits),
        )
    }

    pub fn n_bus(&self) -> usize {
        self.partition.n_bus()
    }

    pub fn n_branch(&self) -> usize {
        self.branches.len()
    }

    pub fn s_base(&self) -> f64 {
        self.s_base
    }

    pub fn partition(&self) -> &BusPartition {
        &self.partition
    }

    pub fn branches(&self) -> &[BranchData] {
        &self.branches
    }

    pub fn admittance(&self) -> &AdmittanceMatrices {
        &self.admittance
    }

    pub fn reduced(&self) -> &ReducedAdmittance {
        &self.reduced
    }

    pub fn s_bus(&self) -> &DVector<Complex64> {
        &self.s_bus
    }

    pub fn v0(&self) -> &DVector<Complex64> {
        &self.v0
    }

    pub fn reactive_limits(&self) -> &[ReactiveLimit] {
        &self.q_limits
    }

    /// `Y` permuted to `[pv, pq, slack]` order.
    pub fn y_ordered(&self) -> &CscMatrix<Complex64> {
        &self.y_ordered
    }

    /// Permutes a bus vector into `[pv, pq, slack]` order.
    pub fn to_solver_order(&self, x: &DVector<Complex64>) -> DVector<Complex64> {
        DVector::from_iterator(x.len(), self.order.iter().map(|&i| x[i]))
    }

    /// Inverse of [`CompiledNetwork::to_solver_order`].
    pub fn from_solver_order(&self, x: &DVector<Complex64>) -> DVector<Complex64> {
        let mut out = x.clone();
        for (pos, &bus) in self.order.iter().enumerate() {
            out[bus] = x[pos];
        }
        out
    }

    /// Restriction of a bus vector to the `pqpv` buses.
    pub fn reduce_vector(&self, x: &DVector<Complex64>) -> DVector<Complex64> {
        let pqpv = self.partition.pqpv();
        DVector::from_iterator(pqpv.len(), pqpv.iter().map(|&i| x[i]))
    }

    /// Infinity norm of the mismatch `[Re ΔS[pqpv]; Im ΔS[pq]]` of the full
    /// voltage vector `v` against the injections `s_bus`.
    pub fn mismatch_norm(&self, v: &DVector<Complex64>, s_bus: &DVector<Complex64>) -> f64 {
        let mis = power_mismatch(&self.admittance.y_bus, v, s_bus);
        let p = self.partition.pqpv().iter().map(|&i| mis[i].re.abs());
        let q = self.partition.pq().iter().map(|&i| mis[i].im.abs());
        p.chain(q).fold(0.0, |acc: f64, e| {
            if acc.is_nan() || e.is_nan() {
                f64::NAN
            } else {
                acc.max(e)
            }
        })
    }

    /// Fixed slack voltages taken from `v0`.
    pub fn slack_voltage(&self) -> DVector<Complex64> {
        let slack = self.partition.slack();
        DVector::from_iterator(slack.len(), slack.iter().map(|&i| self.v0[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testcases;

    #[test]
    fn test_ordering_roundtrip() {
        let net = testcases::three_bus_pv().compile().unwrap();
        let x = DVector::from_fn(net.n_bus(), |i, _| Complex64::new(i as f64, -(i as f64)));
        let back = net.from_solver_order(&net.to_solver_order(&x));
        assert_eq!(back, x);
        let y = nalgebra::DMatrix::from(&net.admittance().y_bus);
        let yo = nalgebra::DMatrix::from(net.y_ordered());
        let order = net.partition().solver_order();
        assert_eq!(yo[(0, 1)], y[(order[0], order[1])]);
    }

    #[test]
    fn test_dimension_checks() {
        let case = testcases::two_bus();
        let net = case.compile().unwrap();
        let err = net.with_injections(DVector::zeros(3)).unwrap_err();
        assert!(matches!(
            err,
            PowerFlowError::DimensionMismatch { expected: 2, found: 3, .. }
        ));
        let other = net
            .with_injections(DVector::from_element(2, Complex64::new(0.1, 0.0)))
            .unwrap();
        assert_eq!(other.s_bus()[1], Complex64::new(0.1, 0.0));
        assert_eq!(other.admittance().y_bus, net.admittance().y_bus);
    }

    #[test]
    fn test_variants_share_matrices() {
        let net = testcases::five_bus().compile().unwrap();
        let loaded = net.with_injections(net.s_bus() * Complex64::new(1.2, 0.0)).unwrap();
        let warm = net.with_initial_voltage(DVector::from_element(5, Complex64::new(1.0, 0.0))).unwrap();
        for other in [&loaded, &warm] {
            assert!(Arc::ptr_eq(&net.admittance, &other.admittance));
            assert!(Arc::ptr_eq(&net.reduced, &other.reduced));
            assert!(Arc::ptr_eq(&net.y_ordered, &other.y_ordered));
        }

        // bus 3 turned into a PQ bus: only the reduction and ordering change
        let partition = BusPartition::new(5, vec![0], vec![], vec![1, 2, 3, 4]).unwrap();
        let repart = net
            .with_partition(partition, net.s_bus().clone(), net.v0().clone())
            .unwrap();
        assert!(Arc::ptr_eq(&net.admittance, &repart.admittance));
        assert!(!Arc::ptr_eq(&net.y_ordered, &repart.y_ordered));
        assert_eq!(repart.partition().pq(), &[1, 2, 3, 4]);
        assert_eq!(repart.to_solver_order(net.v0())[4], net.v0()[0]);
    }

    #[test]
    fn test_isolated_bus_is_singular() {
        let err = testcases::isolated_bus().compile().unwrap_err();
        assert!(
            matches!(err, PowerFlowError::SingularMatrix { .. }),
            "expected a singular matrix error, got {err:?}"
        );
    }
}
