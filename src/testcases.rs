//! Small hand-built networks used by the tests and demos.

use nalgebra::DVector;
use num_complex::Complex64;

use crate::basic::{
    error::PowerFlowError,
    system::{BranchData, BusPartition, CompiledNetwork},
};

/// Raw data of a test network, compiled on demand.
#[derive(Debug, Clone)]
pub struct NetworkCase {
    pub n_bus: usize,
    pub branches: Vec<BranchData>,
    pub bus_shunts: Vec<(usize, Complex64)>,
    pub partition: BusPartition,
    pub s_bus: DVector<Complex64>,
    pub v0: DVector<Complex64>,
    pub s_base: f64,
}

impl NetworkCase {
    pub fn compile(&self) -> Result<CompiledNetwork, PowerFlowError> {
        CompiledNetwork::compile(
            self.n_bus,
            self.branches.clone(),
            &self.bus_shunts,
            self.partition.clone(),
            self.s_bus.clone(),
            self.v0.clone(),
            self.s_base,
        )
    }
}

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn partition(n: usize, slack: &[usize], pv: &[usize], pq: &[usize]) -> BusPartition {
    match BusPartition::new(n, slack.to_vec(), pv.to_vec(), pq.to_vec()) {
        Ok(p) => p,
        Err(e) => panic!("invalid test partition: {e}"),
    }
}

/// Slack at `1.0∠0` feeding a PQ load of `1 + 0.5j` p.u. through `0.01 + 0.1j`.
pub fn two_bus() -> NetworkCase {
    NetworkCase {
        n_bus: 2,
        branches: vec![BranchData::line(0, 1, 0.01, 0.1, 0.0).with_rate(150.0)],
        bus_shunts: vec![],
        partition: partition(2, &[0], &[], &[1]),
        s_bus: DVector::from_vec(vec![c(0.0, 0.0), c(-1.0, -0.5)]),
        v0: DVector::from_element(2, c(1.0, 0.0)),
        s_base: 100.0,
    }
}

/// Meshed three bus network with one generator bus held at `1.01` p.u.
pub fn three_bus_pv() -> NetworkCase {
    NetworkCase {
        n_bus: 3,
        branches: vec![
            BranchData::line(0, 1, 0.02, 0.1, 0.02).with_rate(100.0),
            BranchData::line(1, 2, 0.01, 0.08, 0.01).with_rate(100.0),
            BranchData::line(0, 2, 0.015, 0.09, 0.0),
        ],
        bus_shunts: vec![],
        partition: partition(3, &[0], &[1], &[2]),
        s_bus: DVector::from_vec(vec![c(0.0, 0.0), c(0.5, 0.0), c(-0.8, -0.3)]),
        v0: DVector::from_vec(vec![c(1.02, 0.0), c(1.01, 0.0), c(1.0, 0.0)]),
        s_base: 100.0,
    }
}

/// Five bus meshed network with a phase shifting transformer (2-3), charging
/// susceptance on the lines and a capacitor bank at bus 4.
pub fn five_bus() -> NetworkCase {
    NetworkCase {
        n_bus: 5,
        branches: vec![
            BranchData::line(0, 1, 0.02, 0.06, 0.06).with_rate(120.0),
            BranchData::line(0, 2, 0.08, 0.24, 0.05).with_rate(80.0),
            BranchData::line(1, 2, 0.06, 0.18, 0.04).with_rate(80.0),
            BranchData::line(1, 4, 0.04, 0.12, 0.03).with_rate(100.0),
            BranchData::line(2, 3, 0.005, 0.08, 0.0)
                .with_tap(0.975, 0.05)
                .with_rate(100.0),
            BranchData::line(3, 4, 0.08, 0.24, 0.05),
        ],
        bus_shunts: vec![(4, c(0.0, 0.05))],
        partition: partition(5, &[0], &[3], &[1, 2, 4]),
        s_bus: DVector::from_vec(vec![
            c(0.0, 0.0),
            c(-0.2, -0.1),
            c(-0.45, -0.15),
            c(0.4, 0.0),
            c(-0.6, -0.1),
        ]),
        v0: DVector::from_vec(vec![c(1.06, 0.0), c(1.0, 0.0), c(1.0, 0.0), c(1.02, 0.0), c(1.0, 0.0)]),
        s_base: 100.0,
    }
}

/// Two buses joined by a purely reactive branch.
pub fn lossless_pair() -> NetworkCase {
    NetworkCase {
        n_bus: 2,
        branches: vec![BranchData::line(0, 1, 0.0, 0.2, 0.0)],
        bus_shunts: vec![],
        partition: partition(2, &[0], &[], &[1]),
        s_bus: DVector::from_vec(vec![c(0.0, 0.0), c(-0.5, -0.2)]),
        v0: DVector::from_element(2, c(1.0, 0.0)),
        s_base: 100.0,
    }
}

/// Three buses where bus 2 only has a shunt and no branch.
pub fn isolated_bus() -> NetworkCase {
    NetworkCase {
        n_bus: 3,
        branches: vec![BranchData::line(0, 1, 0.01, 0.1, 0.0)],
        bus_shunts: vec![(2, c(0.0, 0.1))],
        partition: partition(3, &[0], &[], &[1, 2]),
        s_bus: DVector::from_vec(vec![c(0.0, 0.0), c(-0.5, -0.1), c(-0.1, 0.0)]),
        v0: DVector::from_element(3, c(1.0, 0.0)),
        s_base: 100.0,
    }
}

/// Slack plus a single generator bus at `1.02` p.u. exporting `0.5` p.u.
pub fn pv_only() -> NetworkCase {
    NetworkCase {
        n_bus: 2,
        branches: vec![BranchData::line(0, 1, 0.01, 0.1, 0.02)],
        bus_shunts: vec![],
        partition: partition(2, &[0], &[1], &[]),
        s_bus: DVector::from_vec(vec![c(0.0, 0.0), c(0.5, 0.0)]),
        v0: DVector::from_vec(vec![c(1.0, 0.0), c(1.02, 0.0)]),
        s_base: 100.0,
    }
}

/// Feeder supplied from both ends by slack buses at different voltages.
pub fn two_slack() -> NetworkCase {
    NetworkCase {
        n_bus: 4,
        branches: vec![
            BranchData::line(0, 1, 0.02, 0.08, 0.02),
            BranchData::line(1, 2, 0.03, 0.1, 0.02),
            BranchData::line(2, 3, 0.02, 0.08, 0.02),
        ],
        bus_shunts: vec![],
        partition: partition(4, &[0, 3], &[], &[1, 2]),
        s_bus: DVector::from_vec(vec![c(0.0, 0.0), c(-0.4, -0.15), c(-0.3, -0.1), c(0.0, 0.0)]),
        v0: DVector::from_vec(vec![c(1.0, 0.0), c(1.0, 0.0), c(1.0, 0.0), c(1.01, -0.01)]),
        s_base: 100.0,
    }
}
