//! Summation of truncated power series by Padé approximants and Wynn's
//! epsilon algorithm.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use num_traits::Zero;
use tracing::warn;

use super::{config::Acceleration, error::AccelerationError};

/// Evaluates the Padé approximant of the series `Σ c_k s^k` at `s`.
///
/// With `K` coefficients the `[L/M]` approximant is used, where
/// `L = ceil((K-1)/2)` and `M = floor((K-1)/2)`, so every coefficient takes
/// part. For `K = 2` this is `c_0 + c_1 s`.
///
/// The denominator `1 + b_1 s + ... + b_M s^M` solves the Hankel system
/// `Σ_j b_j c_{L+i-j} = -c_{L+i}` for `i = 1..M`; the numerator follows from
/// the Cauchy product `a_k = Σ_j b_j c_{k-j}`.
pub fn pade_approximant(coeffs: &[Complex64], s: Complex64) -> Result<Complex64, AccelerationError> {
    let k = coeffs.len();
    if k == 0 {
        return Err(AccelerationError::TooFewCoefficients);
    }
    let m = (k - 1) / 2;
    let l = k - 1 - m;
    let c = |idx: isize| {
        if idx < 0 {
            Complex64::zero()
        } else {
            coeffs[idx as usize]
        }
    };

    let mut b = vec![Complex64::zero(); m + 1];
    b[0] = Complex64::new(1.0, 0.0);
    if m > 0 {
        let hankel = DMatrix::from_fn(m, m, |i, j| c(l as isize + i as isize - j as isize));
        let rhs = DVector::from_fn(m, |i, _| -coeffs[l + i + 1]);
        let x = hankel.lu().solve(&rhs).ok_or(AccelerationError::IllConditioned {
            reason: "singular Hankel system",
        })?;
        b[1..].copy_from_slice(x.as_slice());
    }

    let a: Vec<Complex64> = (0..=l)
        .map(|i| (0..=i.min(m)).map(|j| b[j] * coeffs[i - j]).sum::<Complex64>())
        .collect();

    let horner = |poly: &[Complex64]| poly.iter().rev().fold(Complex64::zero(), |acc, p| acc * s + p);
    let (p, q) = (horner(&a), horner(&b));
    if q.norm() <= f64::EPSILON * b.iter().map(|e| e.norm()).sum::<f64>() {
        return Err(AccelerationError::IllConditioned {
            reason: "pole at the evaluation point",
        });
    }
    let value = if m == 0 { p } else { p / q };
    if value.re.is_finite() && value.im.is_finite() {
        Ok(value)
    } else {
        Err(AccelerationError::IllConditioned {
            reason: "non-finite approximant",
        })
    }
}

/// Wynn's epsilon algorithm over the partial sums of `coeffs`.
///
/// The table is swept backwards once per added term. Even orders read the
/// estimate from the first column, odd orders from the second, so one and two
/// coefficients return the plain partial sum.
pub fn wynn_epsilon(coeffs: &[Complex64]) -> Result<Complex64, AccelerationError> {
    if coeffs.is_empty() {
        return Err(AccelerationError::TooFewCoefficients);
    }
    let tiny = f64::MIN_POSITIVE;
    let huge = Complex64::new(f64::MAX, 0.0);

    let mut table = vec![Complex64::zero(); coeffs.len()];
    let mut partial = Complex64::zero();
    let mut estimate = Complex64::zero();
    for (n, coeff) in coeffs.iter().enumerate() {
        partial += coeff;
        table[n] = partial;
        if n == 0 {
            estimate = partial;
            continue;
        }
        let mut aux2 = Complex64::zero();
        for j in (1..=n).rev() {
            let aux1 = aux2;
            aux2 = table[j - 1];
            let diff = table[j] - aux2;
            table[j - 1] = if diff.norm() <= tiny {
                huge
            } else {
                aux1 + diff.inv()
            };
        }
        estimate = if n % 2 == 0 { table[0] } else { table[1] };
    }

    if !(estimate.re.is_finite() && estimate.im.is_finite()) || estimate.norm() > 1e100 {
        return Err(AccelerationError::IllConditioned {
            reason: "epsilon table overflow",
        });
    }
    Ok(estimate)
}

/// Recovers one value per column of `coeffs` (orders × buses) at `s = 1`.
///
/// Columns whose accelerator fails fall back to the plain sum; their indices
/// are returned alongside the values.
pub fn sum_columns(coeffs: &DMatrix<Complex64>, method: Acceleration) -> (DVector<Complex64>, Vec<usize>) {
    let one = Complex64::new(1.0, 0.0);
    let mut fallback = Vec::new();
    let values = DVector::from_fn(coeffs.ncols(), |j, _| {
        let column: Vec<Complex64> = coeffs.column(j).iter().copied().collect();
        let plain: Complex64 = column.iter().sum();
        let accelerated = match method {
            Acceleration::None => return plain,
            Acceleration::Pade => pade_approximant(&column, one),
            Acceleration::Wynn => wynn_epsilon(&column),
        };
        accelerated.unwrap_or_else(|err| {
            warn!(column = j, %err, "falling back to direct summation");
            fallback.push(j);
            plain
        })
    });
    (values, fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    #[test]
    fn test_pade_two_terms_is_plain_sum() {
        let coeffs = [c(0.98, -0.02), c(-0.013, -0.07)];
        let v = pade_approximant(&coeffs, c(1.0, 0.0)).unwrap();
        assert_eq!(v, coeffs[0] + coeffs[1]);
    }

    #[test]
    fn test_pade_reproduces_rational_function() {
        // (1 + s) / (1 - 0.3 s)
        let coeffs = [c(1.0, 0.0), c(1.3, 0.0), c(0.39, 0.0)];
        let v = pade_approximant(&coeffs, c(0.5, 0.0)).unwrap();
        assert!((v - c(1.5 / 0.85, 0.0)).norm() < 1e-12, "got {v}");
        let geometric = [c(1.0, 0.0), c(0.5, 0.0), c(0.25, 0.0)];
        let v = pade_approximant(&geometric, c(1.0, 0.0)).unwrap();
        assert!((v - c(2.0, 0.0)).norm() < 1e-12, "got {v}");
    }

    #[test]
    fn test_pade_reports_singular_hankel() {
        // a geometric series is [0/1] exactly, so its [2/2] Hankel matrix is singular
        let geometric: Vec<_> = (0..5).map(|k| c(0.5f64.powi(k), 0.0)).collect();
        let err = pade_approximant(&geometric, c(1.0, 0.0)).unwrap_err();
        assert!(matches!(err, AccelerationError::IllConditioned { .. }));
        assert_eq!(
            pade_approximant(&[], c(1.0, 0.0)),
            Err(AccelerationError::TooFewCoefficients)
        );
    }

    #[test]
    fn test_wynn_geometric_limit() {
        let a = c(1.0, 0.5);
        let r = c(0.3, 0.4);
        let coeffs: Vec<_> = (0..3).map(|k| a * r.powi(k)).collect();
        let limit = a / (c(1.0, 0.0) - r);
        let v = wynn_epsilon(&coeffs).unwrap();
        assert!((v - limit).norm() < 1e-12, "got {v}, expected {limit}");
    }

    #[test]
    fn test_wynn_degenerate_lengths() {
        let coeffs = [c(1.0, -0.1), c(0.2, 0.05)];
        assert_eq!(wynn_epsilon(&coeffs[..1]).unwrap(), coeffs[0]);
        assert_eq!(wynn_epsilon(&coeffs).unwrap(), coeffs[0] + coeffs[1]);
        assert_eq!(wynn_epsilon(&[]), Err(AccelerationError::TooFewCoefficients));
    }

    #[test]
    fn test_wynn_is_reproducible() {
        let coeffs: Vec<_> = (0..12)
            .map(|k| c(0.7f64.powi(k) / (k + 1) as f64, -0.2f64.powi(k)))
            .collect();
        let a = wynn_epsilon(&coeffs).unwrap();
        let b = wynn_epsilon(&coeffs).unwrap();
        assert_eq!(a.re.to_bits(), b.re.to_bits());
        assert_eq!(a.im.to_bits(), b.im.to_bits());
    }

    #[test]
    fn test_sum_columns_fallback() {
        let mut coeffs = DMatrix::from_element(5, 2, c(0.0, 0.0));
        for k in 0..5 {
            coeffs[(k, 0)] = c(0.5f64.powi(k as i32), 0.0);
            coeffs[(k, 1)] = c(0.1 * k as f64, 0.0);
        }
        let (values, fallback) = sum_columns(&coeffs, Acceleration::Pade);
        assert_eq!(fallback, vec![0]);
        assert_eq!(values[0], coeffs.column(0).iter().sum::<Complex64>());
        let (plain, none) = sum_columns(&coeffs, Acceleration::None);
        assert!(none.is_empty());
        assert!((plain[1] - c(1.0, 0.0)).norm() < 1e-12);
    }
}
