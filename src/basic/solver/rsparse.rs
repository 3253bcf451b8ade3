use nalgebra_sparse::CscMatrix;
use rsparse::{
    self,
    data::{self, Numeric, Symb},
    lsolve, lu, sqr, usolve,
};

use super::{Factorization, Factorize, Solve, check_finite};

#[derive(Default)]
pub struct RSparseSolver {
    x: Option<Vec<f64>>,
    symbolic: Option<Symb>,
}

/// LU factors `P A Q = L U` produced by [`RSparseSolver::factorize`].
pub struct RSparseFactor {
    l: data::Sprs<f64>,
    u: data::Sprs<f64>,
    pinv: Option<Vec<isize>>,
    q: Option<Vec<isize>>,
    n: usize,
}

fn to_sprs(ap: &[usize], ai: &[usize], ax: &[f64], n: usize) -> data::Sprs<f64> {
    data::Sprs {
        m: n,
        n,
        i: ai.to_vec(),
        p: ap.iter().map(|&v| v as isize).collect(),
        x: ax.to_vec(),
        nzmax: ax.len(),
    }
}

/// Ordering passed to `sqr`: AMD for LU (`1`), or natural (`-1`) for systems
/// too small for AMD, which computes `n - 2`.
fn ordering(n: usize) -> i8 {
    if n < 3 { -1 } else { 1 }
}

/// Rejects matrices with an empty column or row before handing them to `lu`.
fn check_structure(ap: &[usize], ai: &[usize], n: usize) -> Result<(), &'static str> {
    let mut row_seen = vec![false; n];
    for j in 0..n {
        if ap[j + 1] == ap[j] {
            return Err("structurally singular matrix (empty column)");
        }
        ai[ap[j]..ap[j + 1]].iter().for_each(|&r| row_seen[r] = true);
    }
    if row_seen.iter().all(|&s| s) {
        Ok(())
    } else {
        Err("structurally singular matrix (empty row)")
    }
}

#[allow(non_snake_case)]
impl Solve for RSparseSolver {
    /// Solves the sparse linear system using the RSparse solver.
    ///
    /// The symbolic analysis is cached between calls; only the numeric LU is
    /// recomputed, which is what Newton-type iterations need.
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        _n: usize,
    ) -> Result<(), &'static str> {
        let n = Ap.len() - 1;
        check_structure(Ap, Ai, n)?;
        let a = to_sprs(Ap, Ai, Ax, n);
        if self.symbolic.is_none() || self.x.as_ref().map(|x| x.len()) != Some(n) {
            self.symbolic = Some(sqr(&a, ordering(n), false));
            self.x = Some(vec![0.0; n]);
        }
        let (Some(x), Some(s)) = (self.x.as_mut(), self.symbolic.as_mut()) else {
            return Err("solver state not initialized");
        };
        let num = lu(&a, s, 1e-6).map_err(|_| "LU factorization failed")?; // numeric LU factorization
        ipvec(&num.pinv, b, &mut x[..]); // x = P*b
        lsolve(&num.l, &mut *x); // x = L\x
        usolve(&num.u, &mut *x); // x = U\x
        ipvec(&s.q, &x[..], b); // b = Q*x
        check_finite(b)
    }
}

impl Factorize for RSparseSolver {
    type Factor = RSparseFactor;

    fn factorize(&mut self, mat: &CscMatrix<f64>) -> Result<RSparseFactor, &'static str> {
        if mat.nrows() != mat.ncols() {
            return Err("matrix is not square");
        }
        let n = mat.nrows();
        check_structure(mat.col_offsets(), mat.row_indices(), n)?;
        let a = to_sprs(mat.col_offsets(), mat.row_indices(), mat.values(), n);
        let mut symbolic = sqr(&a, ordering(n), false);
        let num = lu(&a, &mut symbolic, 1e-6).map_err(|_| "LU factorization failed")?;
        Ok(RSparseFactor {
            l: num.l,
            u: num.u,
            pinv: num.pinv,
            q: symbolic.q,
            n,
        })
    }
}

impl Factorization for RSparseFactor {
    fn dim(&self) -> usize {
        self.n
    }

    fn solve_in_place(&self, b: &mut [f64]) -> Result<(), &'static str> {
        if b.len() != self.n {
            return Err("right-hand side has the wrong length");
        }
        let mut x = vec![0.0; self.n];
        ipvec(&self.pinv, b, &mut x[..]);
        lsolve(&self.l, &mut x);
        usolve(&self.u, &mut x);
        ipvec(&self.q, &x[..], b);
        check_finite(b)
    }
}

fn ipvec_identity<T: Numeric<T>>(b: &[T], x: &mut [T]) {
    x.copy_from_slice(b);
}

fn ipvec_perm<T: Numeric<T>>(p: &[isize], b: &[T], x: &mut [T]) {
    for k in 0..b.len() {
        x[p[k] as usize] = b[k];
    }
}

fn ipvec<T: Numeric<T>>(p: &Option<Vec<isize>>, b: &[T], x: &mut [T]) {
    match p {
        Some(pvec) => ipvec_perm(pvec, b, x),
        None => ipvec_identity(b, x),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};
    use nalgebra_sparse::CooMatrix;

    fn tridiag(n: usize) -> CscMatrix<f64> {
        let mut a = CooMatrix::new(n, n);
        for i in 0..n {
            a.push(i, i, 4.0);
            if i + 1 < n {
                a.push(i, i + 1, -1.0);
                a.push(i + 1, i, -1.0);
            }
        }
        CscMatrix::from(&a)
    }

    #[test]
    fn test_factor_reuse() {
        let a = tridiag(5);
        let factor = RSparseSolver::default().factorize(&a).unwrap();
        for k in 0..3 {
            let x_true: Vec<f64> = (0..5).map(|i| (i + k) as f64).collect();
            let b = DMatrix::from(&a) * DVector::from_vec(x_true.clone());
            let mut b: Vec<f64> = b.iter().copied().collect();
            factor.solve_in_place(&mut b).unwrap();
            for i in 0..5 {
                assert!((b[i] - x_true[i]).abs() < 1e-12, "rhs {k}: {} vs {}", b[i], x_true[i]);
            }
        }
    }

    #[test]
    fn test_small_systems() {
        for n in 1..=2 {
            let a = tridiag(n);
            let dense = DMatrix::from(&a);
            let x_true: Vec<f64> = (0..n).map(|i| 1.0 + i as f64).collect();
            let rhs = &dense * DVector::from_vec(x_true.clone());

            let mut b: Vec<f64> = rhs.iter().copied().collect();
            RSparseSolver::default().factorize(&a).unwrap().solve_in_place(&mut b).unwrap();
            let (mut ap, mut ai, mut ax) = a.clone().disassemble();
            let mut c: Vec<f64> = rhs.iter().copied().collect();
            RSparseSolver::default()
                .solve(&mut ap, &mut ai, &mut ax, &mut c, n)
                .unwrap();
            for i in 0..n {
                assert!((b[i] - x_true[i]).abs() < 1e-12, "n = {n}: factorize gave {}", b[i]);
                assert!((c[i] - x_true[i]).abs() < 1e-12, "n = {n}: solve gave {}", c[i]);
            }
        }
    }

    #[test]
    fn test_singular_detected() {
        let mut a = CooMatrix::new(3, 3);
        a.push(0, 0, 1.0);
        a.push(1, 1, 1.0);
        let a = CscMatrix::from(&a);
        assert!(RSparseSolver::default().factorize(&a).is_err());
    }
}
