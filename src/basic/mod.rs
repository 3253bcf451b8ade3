pub(crate) mod dsbus_dv;
pub(crate) mod newtonpf;
pub(crate) mod lmpf;

pub mod acceleration;
pub mod config;
pub mod error;
pub mod flows;
pub mod helm;
pub mod powerflow;
pub mod solver;
pub(crate) mod sparse;
pub mod system;
pub use lmpf::{LmState, levenberg_marquardt_pf};
pub use newtonpf::{IterativeSolution, newton_pf};
