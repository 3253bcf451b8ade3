use std::fmt;
use tabled::Tabled;

/// A float printed with a fixed number of decimals in result tables.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    pub(crate) value: f64,
    pub(crate) precision: usize,
}

impl FloatWrapper {
    pub fn new(value: f64, precision: usize) -> Self {
        FloatWrapper { value, precision }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_nan() {
            write!(f, "-")
        } else {
            write!(f, "{:.1$}", self.value, self.precision)
        }
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Table row for bus results.
#[derive(Debug, Tabled)]
pub(crate) struct BusResTable {
    pub(crate) bus: usize,
    #[tabled(rename = "type")]
    pub(crate) kind: String,
    pub(crate) vm_pu: FloatWrapper,
    pub(crate) va_degree: FloatWrapper,
    pub(crate) p_mw: FloatWrapper,
    pub(crate) q_mvar: FloatWrapper,
}

/// Table row for branch results.
#[derive(Debug, Tabled)]
pub(crate) struct BranchResTable {
    pub(crate) branch: usize,
    pub(crate) from: usize,
    pub(crate) to: usize,
    pub(crate) p_from_mw: FloatWrapper,
    pub(crate) q_from_mvar: FloatWrapper,
    pub(crate) p_to_mw: FloatWrapper,
    pub(crate) q_to_mvar: FloatWrapper,
    pub(crate) pl_mw: FloatWrapper,
    pub(crate) ql_mvar: FloatWrapper,
    pub(crate) i_from_pu: FloatWrapper,
    pub(crate) i_to_pu: FloatWrapper,
    pub(crate) loading_percent: FloatWrapper,
}
