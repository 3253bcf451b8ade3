pub mod admittance;
pub mod compiled;
pub mod partition;
pub mod qlim;

pub use admittance::{
    AdmittanceMatrices, BranchData, BranchPrimitive, ReducedAdmittance, build_admittance,
};
pub use compiled::CompiledNetwork;
pub use partition::{BusPartition, BusType};
pub use qlim::{LimitViolation, ReactiveLimit, check_reactive_limits, switch_to_pq};
