use nalgebra::*;
use nalgebra_sparse::{CooMatrix, CscMatrix, pattern::SparsityPattern};

/// Slices the column range `start_col..end_col` out of a CSC matrix.
#[inline(always)]
pub fn slice_csc_matrix<T: Clone>(
    mat: &CscMatrix<T>,
    start_col: usize,
    end_col: usize,
) -> CscMatrix<T> {
    assert!(start_col <= end_col, "illegal indices");
    let col_start_idx = mat.col_offsets()[start_col];
    let col_end_idx = mat.col_offsets()[end_col];

    let new_values = mat.values()[col_start_idx..col_end_idx].to_vec();
    let new_row_indices = mat.row_indices()[col_start_idx..col_end_idx].to_vec();
    let new_col_offsets = mat.col_offsets()[start_col..=end_col]
        .iter()
        .map(|&x| x - col_start_idx)
        .collect::<Vec<_>>();

    // offsets and indices are taken verbatim from a valid pattern
    unsafe {
        let pattern = SparsityPattern::from_offset_and_indices_unchecked(
            end_col - start_col,
            mat.nrows(),
            new_col_offsets,
            new_row_indices,
        );
        CscMatrix::try_from_pattern_and_values(pattern, new_values).unwrap_unchecked()
    }
}

/// Extracts the contiguous block starting at `star_pos` with the given shape.
#[inline(always)]
pub fn slice_csc_matrix_block<T: Scalar>(
    mat: &CscMatrix<T>,
    star_pos: (usize, usize),
    shape: (usize, usize),
) -> CscMatrix<T>
where
    for<'a> CscMatrix<T>: From<&'a CooMatrix<T>>,
{
    let (start_row, start_col) = star_pos;
    let (end_row, end_col) = (shape.0 + start_row, shape.1 + start_col);

    let mut coo = CooMatrix::new(shape.0, shape.1);
    for (r, c, v) in mat.triplet_iter() {
        if r >= start_row && r < end_row && c >= start_col && c < end_col {
            coo.push(r - start_row, c - start_col, v.clone());
        }
    }
    CscMatrix::from(&coo)
}

/// Selects the sub-matrix `mat[rows, cols]` given arbitrary index lists.
///
/// The output keeps the order of `rows` and `cols`, so it can also be used to
/// permute a matrix.
pub fn select_csc<T: Scalar>(mat: &CscMatrix<T>, rows: &[usize], cols: &[usize]) -> CscMatrix<T>
where
    for<'a> CscMatrix<T>: From<&'a CooMatrix<T>>,
{
    let mut row_map = vec![None; mat.nrows()];
    for (new, &old) in rows.iter().enumerate() {
        row_map[old] = Some(new);
    }
    let mut coo = CooMatrix::new(rows.len(), cols.len());
    for (new_col, &old_col) in cols.iter().enumerate() {
        let col = mat.col(old_col);
        for (&r, v) in col.row_indices().iter().zip(col.values()) {
            if let Some(new_row) = row_map[r] {
                coo.push(new_row, new_col, v.clone());
            }
        }
    }
    CscMatrix::from(&coo)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CscMatrix<f64> {
        let mut a = CooMatrix::new(3, 3);
        a.push(0, 0, 1.0);
        a.push(1, 0, 2.0);
        a.push(1, 1, 3.0);
        a.push(2, 2, 4.0);
        a.push(0, 2, 5.0);
        CscMatrix::from(&a)
    }

    #[test]
    fn test_select_permutes() {
        let a = sample();
        let p = select_csc(&a, &[2, 0, 1], &[2, 0, 1]);
        let dense = DMatrix::from(&p);
        let orig = DMatrix::from(&a);
        let idx = [2, 0, 1];
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(dense[(i, j)], orig[(idx[i], idx[j])], "mismatch at ({i},{j})");
            }
        }
    }

    #[test]
    fn test_block_and_columns() {
        let a = sample();
        let b = slice_csc_matrix_block(&a, (1, 0), (2, 2));
        assert_eq!(DMatrix::from(&b), DMatrix::from_row_slice(2, 2, &[2.0, 3.0, 0.0, 0.0]));
        let c = slice_csc_matrix(&a, 1, 3);
        assert_eq!(c.ncols(), 2);
        assert_eq!(DMatrix::from(&c)[(0, 1)], 5.0);
    }
}
