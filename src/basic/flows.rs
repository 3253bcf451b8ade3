use nalgebra::DVector;
use num_complex::Complex64;
use tabled::{Table, settings::Style};

use super::{
    error::PowerFlowError,
    system::{BusType, CompiledNetwork},
};

mod res_display;
use res_display::{BranchResTable, BusResTable, FloatWrapper};

/// Branch quantities derived from a bus voltage solution.
///
/// Currents and powers are in per unit, losses in MVA. All vectors are
/// branch-indexed; inactive branches carry zeros.
#[derive(Debug, Clone)]
pub struct BranchFlows {
    pub i_f: DVector<Complex64>,
    pub i_t: DVector<Complex64>,
    pub s_f: DVector<Complex64>,
    pub s_t: DVector<Complex64>,
    /// Voltage across each branch, `V_f - V_t`.
    pub v_branch: DVector<Complex64>,
    /// `(S_f + S_t)·S_base`.
    pub losses: DVector<Complex64>,
    /// `max(|S_f|, |S_t|)·S_base / rate`; NaN for unrated branches.
    pub loading: DVector<f64>,
}

fn check_voltage(net: &CompiledNetwork, v: &DVector<Complex64>) -> Result<(), PowerFlowError> {
    if v.len() != net.n_bus() {
        return Err(PowerFlowError::DimensionMismatch {
            what: "voltage vector",
            expected: net.n_bus(),
            found: v.len(),
        });
    }
    Ok(())
}

/// Computes branch currents, powers, losses and loading for voltages `v`.
pub fn branch_flows(net: &CompiledNetwork, v: &DVector<Complex64>) -> Result<BranchFlows, PowerFlowError> {
    check_voltage(net, v)?;
    let adm = net.admittance();
    let s_base = net.s_base();

    let i_f = &adm.yf * v;
    let i_t = &adm.yt * v;
    let v_f = &adm.cf * v;
    let v_t = &adm.ct * v;
    let s_f = v_f.component_mul(&i_f.conjugate());
    let s_t = v_t.component_mul(&i_t.conjugate());
    let losses = (&s_f + &s_t) * Complex64::new(s_base, 0.0);
    let loading = DVector::from_fn(net.n_branch(), |k, _| {
        let rate = net.branches()[k].rate;
        if rate > 0.0 {
            s_f[k].norm().max(s_t[k].norm()) * s_base / rate
        } else {
            f64::NAN
        }
    });

    Ok(BranchFlows {
        i_f,
        i_t,
        s_f,
        s_t,
        v_branch: v_f - v_t,
        losses,
        loading,
    })
}

/// Bus powers after the solve, in per unit.
///
/// PQ buses keep their specified injection, PV buses get the computed reactive
/// power and slack buses the full computed injection.
pub fn bus_powers(net: &CompiledNetwork, v: &DVector<Complex64>) -> Result<DVector<Complex64>, PowerFlowError> {
    check_voltage(net, v)?;
    let s_calc = v.component_mul(&(&net.admittance().y_bus * v).conjugate());
    let mut s = net.s_bus().clone();
    for &i in net.partition().slack() {
        s[i] = s_calc[i];
    }
    for &i in net.partition().pv() {
        s[i] = Complex64::new(s[i].re, s_calc[i].im);
    }
    Ok(s)
}

/// Renders bus voltages and powers as a markdown table.
pub fn bus_table(net: &CompiledNetwork, v: &DVector<Complex64>) -> Result<String, PowerFlowError> {
    let s = bus_powers(net, v)? * Complex64::new(net.s_base(), 0.0);
    let rows = (0..net.n_bus()).map(|i| BusResTable {
        bus: i,
        kind: net
            .partition()
            .bus_type(i)
            .map_or_else(String::new, |t: BusType| t.to_string()),
        vm_pu: FloatWrapper::new(v[i].norm(), 5),
        va_degree: FloatWrapper::new(v[i].arg().to_degrees(), 5),
        p_mw: FloatWrapper::new(s[i].re, 3),
        q_mvar: FloatWrapper::new(s[i].im, 3),
    });
    Ok(Table::new(rows).with(Style::markdown()).to_string())
}

/// Renders branch flows as a markdown table.
pub fn branch_table(net: &CompiledNetwork, flows: &BranchFlows) -> String {
    let s_base = net.s_base();
    let rows = net.branches().iter().enumerate().map(|(k, br)| BranchResTable {
        branch: k,
        from: br.from,
        to: br.to,
        p_from_mw: FloatWrapper::new(flows.s_f[k].re * s_base, 3),
        q_from_mvar: FloatWrapper::new(flows.s_f[k].im * s_base, 3),
        p_to_mw: FloatWrapper::new(flows.s_t[k].re * s_base, 3),
        q_to_mvar: FloatWrapper::new(flows.s_t[k].im * s_base, 3),
        pl_mw: FloatWrapper::new(flows.losses[k].re, 4),
        ql_mvar: FloatWrapper::new(flows.losses[k].im, 4),
        i_from_pu: FloatWrapper::new(flows.i_f[k].norm(), 4),
        i_to_pu: FloatWrapper::new(flows.i_t[k].norm(), 4),
        loading_percent: FloatWrapper::new(flows.loading[k] * 100.0, 1),
    });
    Table::new(rows).with(Style::markdown()).to_string()
}
