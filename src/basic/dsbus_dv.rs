use crate::basic::sparse::conj::Conjugate;
use nalgebra::*;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;

/// Partial derivatives of the bus power injections `S = V ⊙ conj(Y·V)` with
/// respect to voltage magnitudes and angles.
///
/// Returns `(dS_dVm, dS_dVa)`, both `n × n` and in the bus order of `y_bus`:
///
/// ```text
/// dS/dVm = diag(V) conj(Y diag(V/|V|)) + conj(diag(I)) diag(V/|V|)
/// dS/dVa = j diag(V) conj(diag(I) - Y diag(V))
/// ```
///
/// These are the complex matrix formulas of R. D. Zimmerman, "AC Power Flows,
/// Generalized OPF Costs and their Derivatives using Complex Matrix Notation",
/// MATPOWER Technical Note 2, 2010.
#[allow(non_snake_case)]
pub fn dSbus_dV(
    y_bus: &CscMatrix<Complex64>,
    v: &DVector<Complex64>,
) -> (CscMatrix<Complex64>, CscMatrix<Complex64>) {
    let v_norm = v.map(|e| if e.norm() > 0.0 { e / e.norm() } else { e });
    let ibus = y_bus * v;

    let diag = |values: &DVector<Complex64>| {
        let mut d = CscMatrix::identity(values.len());
        d.values_mut().copy_from_slice(values.as_slice());
        d
    };
    let diag_v = diag(v);
    let diag_vnorm = diag(&v_norm);
    let diag_i = diag(&ibus);

    let dS_dVm = &diag_v * (y_bus * &diag_vnorm).conjugate() + diag_i.conjugate() * &diag_vnorm;
    let dS_dVa = &diag_v * (diag_i - y_bus * &diag_v).conjugate() * Complex64::i();
    (dS_dVm, dS_dVa)
}
