use nalgebra_sparse::CscMatrix;

#[cfg(feature = "faer")]
mod faer;
#[cfg(feature = "faer")]
pub use faer::*;

#[cfg(feature = "rsparse")]
mod rsparse;
#[cfg(feature = "rsparse")]
pub use rsparse::*;

#[cfg(feature = "faer")]
pub type DefaultSolver = FaerSolver;

#[cfg(all(not(feature = "faer"), feature = "rsparse"))]
pub type DefaultSolver = RSparseSolver;

/// Factorization produced by [`DefaultSolver`].
pub type DefaultFactor = <DefaultSolver as Factorize>::Factor;

#[allow(non_snake_case)]
/// A trait for solving sparse linear systems.
pub trait Solve {
    /// Solves the sparse linear system in place.
    ///
    /// # Parameters
    ///
    /// * `Ap` - Column pointers of the matrix.
    /// * `Ai` - Row indices of the matrix.
    /// * `Ax` - Non-zero values of the matrix.
    /// * `b` - Right-hand side vector, overwritten with the solution.
    /// * `n` - Dimension of the system.
    ///
    /// # Returns
    ///
    /// A result indicating success or failure.
    fn solve(
        &mut self,
        Ap: &mut [usize],
        Ai: &mut [usize],
        Ax: &mut [f64],
        b: &mut [f64],
        n: usize,
    ) -> Result<(), &'static str>;
}

/// A numeric LU factorization that can be applied to many right-hand sides.
///
/// Factorizations are read-only after construction, so they can be shared
/// between independent solves running on different threads.
pub trait Factorization: Send + Sync {
    /// Dimension of the factorized system.
    fn dim(&self) -> usize;

    /// Overwrites `b` with the solution of `A x = b`.
    fn solve_in_place(&self, b: &mut [f64]) -> Result<(), &'static str>;
}

/// A sparse back-end able to produce a reusable factorization.
pub trait Factorize {
    type Factor: Factorization;

    /// Factorizes a square CSC matrix.
    fn factorize(&mut self, mat: &CscMatrix<f64>) -> Result<Self::Factor, &'static str>;
}

/// Rejects solutions containing `NaN`/`Inf`, which back-ends may produce on
/// numerically singular systems instead of failing.
#[inline]
pub(crate) fn check_finite(x: &[f64]) -> Result<(), &'static str> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err("non-finite solution")
    }
}
