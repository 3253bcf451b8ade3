use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use num_complex::Complex64;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use super::partition::BusPartition;
use crate::basic::{error::PowerFlowError, sparse::slice::select_csc};

/// Per-unit parameters of a pi-model branch (line or transformer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchData {
    /// Index of the "from" bus.
    pub from: usize,
    /// Index of the "to" bus.
    pub to: usize,
    /// Series resistance (p.u.).
    pub r: f64,
    /// Series reactance (p.u.).
    pub x: f64,
    /// Total shunt conductance (p.u.), split half per side.
    #[serde(default)]
    pub g: f64,
    /// Total shunt susceptance (p.u.), split half per side.
    #[serde(default)]
    pub b: f64,
    /// Off-nominal tap ratio magnitude.
    #[serde(default = "one")]
    pub tap_module: f64,
    /// Phase shift of the tap (rad).
    #[serde(default)]
    pub tap_angle: f64,
    /// Thermal rating (MVA); `0` means unrated.
    #[serde(default)]
    pub rate: f64,
    #[serde(default = "active")]
    pub active: bool,
}

fn one() -> f64 {
    1.0
}

fn active() -> bool {
    true
}

impl BranchData {
    /// A plain line between two buses.
    pub fn line(from: usize, to: usize, r: f64, x: f64, b: f64) -> Self {
        Self {
            from,
            to,
            r,
            x,
            g: 0.0,
            b,
            tap_module: 1.0,
            tap_angle: 0.0,
            rate: 0.0,
            active: true,
        }
    }

    pub fn with_tap(mut self, module: f64, angle: f64) -> Self {
        self.tap_module = module;
        self.tap_angle = angle;
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Series admittance `1 / (r + jx)`.
    pub fn series_admittance(&self) -> Complex64 {
        Complex64::new(self.r, self.x).inv()
    }

    /// Shunt admittance of one side of the pi model.
    pub fn shunt_admittance(&self) -> Complex64 {
        Complex64::new(self.g, self.b) * 0.5
    }

    /// Complex tap `m·e^{jθ}`.
    pub fn tap(&self) -> Complex64 {
        Complex64::from_polar(self.tap_module, self.tap_angle)
    }
}

/// The 2x2 admittance block of a single branch.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BranchPrimitive {
    pub yff: Complex64,
    pub yft: Complex64,
    pub ytf: Complex64,
    pub ytt: Complex64,
}

impl BranchPrimitive {
    /// Builds the pi-model block from series admittance, per-side shunt and tap.
    pub fn new(ys: Complex64, ysh: Complex64, tap: Complex64) -> Self {
        Self {
            yff: (ys + ysh) / (tap * tap.conj()),
            yft: -ys / tap.conj(),
            ytf: -ys / tap,
            ytt: ys + ysh,
        }
    }

    /// The series-only block (shunt legs removed).
    pub fn series(ys: Complex64, tap: Complex64) -> Self {
        Self::new(ys, Complex64::zero(), tap)
    }
}

/// Full and split admittance matrices of a network.
///
/// `y_bus == y_series + y_shunt` holds exactly since `y_bus` is assembled as
/// that sum. `yf`/`yt` and `cf`/`ct` are branch-indexed: row `i` is branch `i`.
#[derive(Debug, Clone)]
pub struct AdmittanceMatrices {
    pub y_bus: CscMatrix<Complex64>,
    pub y_series: CscMatrix<Complex64>,
    pub y_shunt: CscMatrix<Complex64>,
    /// Diagonal of `y_shunt`: bus shunts plus the branch shunt legs.
    pub y_shunt_bus: DVector<Complex64>,
    pub yf: CscMatrix<Complex64>,
    pub yt: CscMatrix<Complex64>,
    pub cf: CscMatrix<Complex64>,
    pub ct: CscMatrix<Complex64>,
    pub primitives: Vec<BranchPrimitive>,
}

fn diagonal(values: &DVector<Complex64>) -> CscMatrix<Complex64> {
    let mut diag = CscMatrix::identity(values.len());
    diag.values_mut().copy_from_slice(values.as_slice());
    diag
}

fn validate_branch(idx: usize, br: &BranchData, n_bus: usize) -> Result<(), PowerFlowError> {
    let invalid = |reason: &str| PowerFlowError::InvalidBranch {
        index: idx,
        reason: reason.to_string(),
    };
    if br.from >= n_bus || br.to >= n_bus {
        return Err(invalid("bus index out of range"));
    }
    if br.from == br.to {
        return Err(invalid("from and to bus are the same"));
    }
    if Complex64::new(br.r, br.x).norm() < 1e-12 {
        return Err(invalid("zero impedance"));
    }
    if !(br.tap_module > 0.0) || !br.tap_angle.is_finite() {
        return Err(invalid("tap module must be positive"));
    }
    Ok(())
}

/// Assembles `Y`, `Y_series`, `Y_shunt`, `Y_f` and `Y_t` from branch data.
///
/// # Arguments
///
/// * `n_bus` - Number of buses.
/// * `branches` - Branch parameters in per unit; inactive branches keep their
///   row in `Y_f`/`Y_t` but contribute nothing.
/// * `bus_shunts` - Extra shunt admittances `(bus, y)` in per unit.
pub fn build_admittance(
    n_bus: usize,
    branches: &[BranchData],
    bus_shunts: &[(usize, Complex64)],
) -> Result<AdmittanceMatrices, PowerFlowError> {
    let nbr = branches.len();
    let mut cf = CooMatrix::new(nbr, n_bus);
    let mut ct = CooMatrix::new(nbr, n_bus);
    let mut yf = CooMatrix::new(nbr, n_bus);
    let mut yt = CooMatrix::new(nbr, n_bus);
    let mut yf_series = CooMatrix::new(nbr, n_bus);
    let mut yt_series = CooMatrix::new(nbr, n_bus);
    let mut y_shunt_bus = DVector::from_element(n_bus, Complex64::zero());
    let mut primitives = Vec::with_capacity(nbr);

    for (idx, br) in branches.iter().enumerate() {
        validate_branch(idx, br, n_bus)?;
        let (ys, ysh, tap) = (br.series_admittance(), br.shunt_admittance(), br.tap());
        let prim = BranchPrimitive::new(ys, ysh, tap);
        primitives.push(prim);
        if !br.active {
            continue;
        }
        let series = BranchPrimitive::series(ys, tap);
        let (f, t) = (br.from, br.to);

        cf.push(idx, f, Complex64::one());
        ct.push(idx, t, Complex64::one());
        yf.push(idx, f, prim.yff);
        yf.push(idx, t, prim.yft);
        yt.push(idx, f, prim.ytf);
        yt.push(idx, t, prim.ytt);
        yf_series.push(idx, f, series.yff);
        yf_series.push(idx, t, series.yft);
        yt_series.push(idx, f, series.ytf);
        yt_series.push(idx, t, series.ytt);

        y_shunt_bus[f] += ysh / (tap * tap.conj());
        y_shunt_bus[t] += ysh;
    }
    for &(bus, y) in bus_shunts {
        if bus >= n_bus {
            return Err(PowerFlowError::DimensionMismatch {
                what: "bus shunt index",
                expected: n_bus,
                found: bus,
            });
        }
        y_shunt_bus[bus] += y;
    }

    let cf = CscMatrix::from(&cf);
    let ct = CscMatrix::from(&ct);
    // Y_series = Cf^T * Yf_series + Ct^T * Yt_series
    let y_series = &cf.transpose() * &CscMatrix::from(&yf_series)
        + &ct.transpose() * &CscMatrix::from(&yt_series);
    let y_shunt = diagonal(&y_shunt_bus);
    let y_bus = &y_series + &y_shunt;

    Ok(AdmittanceMatrices {
        y_bus,
        y_series,
        y_shunt,
        y_shunt_bus,
        yf: CscMatrix::from(&yf),
        yt: CscMatrix::from(&yt),
        cf,
        ct,
        primitives,
    })
}

/// Admittance matrices restricted to the non-slack buses (`pqpv` order).
#[derive(Debug, Clone)]
pub struct ReducedAdmittance {
    pub y_red: CscMatrix<Complex64>,
    pub y_red_series: CscMatrix<Complex64>,
    pub y_red_shunt: CscMatrix<Complex64>,
    /// Diagonal of `y_red_shunt`.
    pub y_shunt_red: DVector<Complex64>,
    /// `Y[pqpv, slack]`.
    pub y_slack: CscMatrix<Complex64>,
    /// `Y_series[pqpv, slack]`.
    pub y_slack_series: CscMatrix<Complex64>,
}

impl ReducedAdmittance {
    /// Removes the slack rows and columns.
    ///
    /// A non-slack bus without any series connection makes `Y_red` singular and
    /// is reported instead of being carried into the solvers.
    pub fn reduce(
        adm: &AdmittanceMatrices,
        partition: &BusPartition,
    ) -> Result<Self, PowerFlowError> {
        let pqpv = partition.pqpv();
        let slack = partition.slack();
        for &bus in pqpv {
            let col = adm.y_series.col(bus);
            let degree = col
                .row_indices()
                .iter()
                .zip(col.values())
                .filter(|(r, v)| **r != bus && !v.is_zero())
                .count();
            if degree == 0 {
                return Err(PowerFlowError::singular(format!(
                    "reducing the admittance matrix: bus {bus} is isolated"
                )));
            }
        }
        let y_shunt_red = DVector::from_iterator(
            pqpv.len(),
            pqpv.iter().map(|&i| adm.y_shunt_bus[i]),
        );
        Ok(Self {
            y_red: select_csc(&adm.y_bus, pqpv, pqpv),
            y_red_series: select_csc(&adm.y_series, pqpv, pqpv),
            y_red_shunt: diagonal(&y_shunt_red),
            y_shunt_red,
            y_slack: select_csc(&adm.y_bus, pqpv, slack),
            y_slack_series: select_csc(&adm.y_series, pqpv, slack),
        })
    }

    /// Current injected into the non-slack buses by the slack voltages:
    /// `I_slack = Y[pqpv, slack] * V[slack]`.
    pub fn slack_current(&self, v_slack: &DVector<Complex64>) -> DVector<Complex64> {
        &self.y_slack * v_slack
    }
}
