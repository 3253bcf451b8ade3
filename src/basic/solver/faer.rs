use faer::{
    MatMut,
    linalg::solvers::Solve,
    sparse::{
        SparseColMatRef, SymbolicSparseColMatRef,
        linalg::solvers::{Lu, SymbolicLu},
    },
};
use nalgebra_sparse::CscMatrix;

use super::{Factorization, Factorize, Solve as PoSolve, check_finite};

#[derive(Default)]
pub struct FaerSolver {
    lu: Option<Lu<usize, f64>>,
    symbolic: Option<SymbolicLu<usize>>,
}

/// Sparse LU factors computed by faer.
pub struct FaerFactor {
    lu: Lu<usize, f64>,
    n: usize,
}

#[allow(non_snake_case)]
impl PoSolve for FaerSolver {
    /// Solves the sparse linear system using the Faer solver.
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), &'static str> {
        let s = SymbolicSparseColMatRef::new_checked(n, n, Ap, None, Ai);
        let mat = SparseColMatRef::new(s, Ax);
        let symbolic = match self.symbolic.take() {
            Some(symbolic) => symbolic,
            None => SymbolicLu::try_new(s).map_err(|_| "Faer symbolic error")?,
        };
        let lu = Lu::try_new_with_symbolic(symbolic.clone(), mat)
            .map_err(|_| "Faer numerical error")?;
        self.symbolic = Some(symbolic);
        let lu = self.lu.insert(lu);
        let mat_ref = MatMut::from_column_major_slice_mut(b, n, 1);
        lu.solve_in_place(mat_ref);
        check_finite(b)
    }
}

impl Factorize for FaerSolver {
    type Factor = FaerFactor;

    fn factorize(&mut self, mat: &CscMatrix<f64>) -> Result<FaerFactor, &'static str> {
        if mat.nrows() != mat.ncols() {
            return Err("matrix is not square");
        }
        let n = mat.nrows();
        let s = SymbolicSparseColMatRef::new_checked(n, n, mat.col_offsets(), None, mat.row_indices());
        let a = SparseColMatRef::new(s, mat.values());
        let symbolic = SymbolicLu::try_new(s).map_err(|_| "Faer symbolic error")?;
        let lu = Lu::try_new_with_symbolic(symbolic, a).map_err(|_| "Faer numerical error")?;
        Ok(FaerFactor { lu, n })
    }
}

impl Factorization for FaerFactor {
    fn dim(&self) -> usize {
        self.n
    }

    fn solve_in_place(&self, b: &mut [f64]) -> Result<(), &'static str> {
        if b.len() != self.n {
            return Err("right-hand side has the wrong length");
        }
        let mat_ref = MatMut::from_column_major_slice_mut(b, self.n, 1);
        self.lu.solve_in_place(mat_ref);
        check_finite(b)
    }
}
