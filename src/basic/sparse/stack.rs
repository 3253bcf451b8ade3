use nalgebra_sparse::{CscMatrix, pattern::SparsityPattern};

/// Concatenates CSC matrices with equal row counts side by side.
///
/// Columns are the major dimension of CSC, so this is a plain append of the
/// compressed arrays with shifted offsets.
pub fn csc_hstack<T: Clone>(matrices: &[&CscMatrix<T>]) -> CscMatrix<T> {
    let nrows = matrices[0].nrows();
    let mut ncols = 0;
    let mut nnz = 0;
    for mat in matrices {
        assert_eq!(
            mat.nrows(),
            nrows,
            "All matrices must have the same number of rows"
        );
        ncols += mat.ncols();
        nnz += mat.nnz();
    }

    let mut data: Vec<T> = Vec::with_capacity(nnz);
    let mut indices: Vec<usize> = Vec::with_capacity(nnz);
    let mut indptr: Vec<usize> = Vec::with_capacity(ncols + 1);
    for mat in matrices {
        let offset = data.len();
        indptr.extend(mat.col_offsets()[..mat.ncols()].iter().map(|x| x + offset));
        indices.extend_from_slice(mat.row_indices());
        data.extend_from_slice(mat.values());
    }
    indptr.push(nnz);

    // every block is a valid CSC matrix, so the stacked arrays are valid too
    unsafe {
        let pattern = SparsityPattern::from_offset_and_indices_unchecked(ncols, nrows, indptr, indices);
        CscMatrix::try_from_pattern_and_values(pattern, data).unwrap_unchecked()
    }
}

/// Stacks CSC matrices with equal column counts on top of each other.
pub fn csc_vstack<T: Clone>(matrices: &[&CscMatrix<T>]) -> CscMatrix<T> {
    let ncols = matrices[0].ncols();
    let mut nrows = 0;
    let mut nnz = 0;
    for mat in matrices {
        assert_eq!(
            mat.ncols(),
            ncols,
            "All matrices must have the same number of cols"
        );
        nrows += mat.nrows();
        nnz += mat.nnz();
    }

    let mut data: Vec<T> = Vec::with_capacity(nnz);
    let mut indices: Vec<usize> = Vec::with_capacity(nnz);
    let mut indptr: Vec<usize> = vec![0; ncols + 1];

    for j in 0..ncols {
        let mut row_offset = 0;
        for mat in matrices {
            let col = mat.col(j);
            data.extend_from_slice(col.values());
            indices.extend(col.row_indices().iter().map(|r| r + row_offset));
            row_offset += mat.nrows();
        }
        indptr[j + 1] = data.len();
    }

    unsafe {
        let pattern = SparsityPattern::from_offset_and_indices_unchecked(ncols, nrows, indptr, indices);
        CscMatrix::try_from_pattern_and_values(pattern, data).unwrap_unchecked()
    }
}
