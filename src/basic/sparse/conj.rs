use nalgebra::*;
use nalgebra_sparse::CscMatrix;

/// Trait for computing the conjugate of a matrix.
pub(crate) trait Conjugate {
    type Mat;

    /// Returns the conjugate of the matrix.
    fn conjugate(&self) -> Self::Mat;
}

impl<T: RealField + Copy> Conjugate for CscMatrix<Complex<T>> {
    type Mat = CscMatrix<Complex<T>>;

    fn conjugate(&self) -> Self::Mat {
        let values = self.values().iter().map(|v| v.conj()).collect();
        // the pattern is reused as-is, so the value count always matches
        unsafe {
            CscMatrix::try_from_pattern_and_values(self.pattern().clone(), values)
                .unwrap_unchecked()
        }
    }
}

/// Trait for extracting the real and imaginary parts of a matrix.
pub(crate) trait RealImage {
    type Mat;

    /// Returns the real and imaginary parts of the matrix.
    fn real_imag(&self) -> (Self::Mat, Self::Mat);

    /// Returns the real part of the matrix.
    fn real(&self) -> Self::Mat;

    /// Returns the imaginary part of the matrix.
    fn imag(&self) -> Self::Mat;
}

impl<T: RealField + Copy> RealImage for CscMatrix<Complex<T>> {
    type Mat = CscMatrix<T>;

    fn real(&self) -> Self::Mat {
        let v = self.values().iter().map(|e| e.re).collect();
        unsafe {
            CscMatrix::try_from_pattern_and_values(self.pattern().clone(), v).unwrap_unchecked()
        }
    }

    fn imag(&self) -> Self::Mat {
        let v = self.values().iter().map(|e| e.im).collect();
        unsafe {
            CscMatrix::try_from_pattern_and_values(self.pattern().clone(), v).unwrap_unchecked()
        }
    }

    fn real_imag(&self) -> (Self::Mat, Self::Mat) {
        (self.real(), self.imag())
    }
}
