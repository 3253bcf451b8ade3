mod basic;
pub mod testcases;
pub mod prelude {
    use crate::basic;
    pub use basic::*;

    pub use basic::powerflow::{PowerFlowResult, SolveStatus, run_power_flow, solve_batch};
    pub use basic::system::{BranchData, BusPartition, BusType, CompiledNetwork, ReactiveLimit};
}
