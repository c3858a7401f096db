/// A matrix type a gradient can be exported into.
///
/// Rows follow the function order of the problem, columns the parameter order.
///
/// # Examples
///
/// ```rust
/// use evalexpr_analytic::prelude::GradientMatrix;
/// use nalgebra::DMatrix;
///
/// let mut mat: DMatrix<f64> = GradientMatrix::zeros(2, 3);
/// GradientMatrix::set(&mut mat, 1, 2, 4.0);
/// assert_eq!(GradientMatrix::dims(&mat), (2, 3));
/// assert_eq!(mat[(1, 2)], 4.0);
/// ```
pub trait GradientMatrix {
    /// Creates a matrix of the given dimensions filled with zeros.
    fn zeros(rows: usize, cols: usize) -> Self;

    /// Writes `value` at (`row`, `col`).
    ///
    /// # Panics
    /// Panics if the position is out of bounds.
    fn set(&mut self, row: usize, col: usize, value: f64);

    /// Returns the dimensions as (rows, columns).
    fn dims(&self) -> (usize, usize);
}

/// Row vectors, one per function.
impl GradientMatrix for Vec<Vec<f64>> {
    fn zeros(rows: usize, cols: usize) -> Self {
        vec![vec![0.0; cols]; rows]
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        self[row][col] = value;
    }

    fn dims(&self) -> (usize, usize) {
        (self.len(), self.first().map_or(0, Vec::len))
    }
}

impl GradientMatrix for nalgebra::DMatrix<f64> {
    fn zeros(rows: usize, cols: usize) -> Self {
        nalgebra::DMatrix::zeros(rows, cols)
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        self[(row, col)] = value;
    }

    fn dims(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }
}

/// Available with the `ndarray` feature.
///
/// # Examples
///
/// ```rust
/// use evalexpr_analytic::prelude::GradientMatrix;
/// use ndarray::Array2;
///
/// let mut mat: Array2<f64> = GradientMatrix::zeros(2, 2);
/// GradientMatrix::set(&mut mat, 0, 1, 1.5);
/// assert_eq!(mat[[0, 1]], 1.5);
/// ```
#[cfg(feature = "ndarray")]
impl GradientMatrix for ndarray::Array2<f64> {
    fn zeros(rows: usize, cols: usize) -> Self {
        ndarray::Array2::zeros((rows, cols))
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        self[[row, col]] = value;
    }

    fn dims(&self) -> (usize, usize) {
        (self.nrows(), self.ncols())
    }
}

/// Copies `source` into a new matrix of type `M`.
pub fn export<M: GradientMatrix>(source: &nalgebra::DMatrix<f64>) -> M {
    let mut target = M::zeros(source.nrows(), source.ncols());
    for row in 0..source.nrows() {
        for col in 0..source.ncols() {
            target.set(row, col, source[(row, col)]);
        }
    }
    target
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DMatrix;

    #[test]
    fn test_export_keeps_layout() {
        let source = DMatrix::from_row_slice(2, 3, &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        let rows: Vec<Vec<f64>> = export(&source);
        assert_eq!(rows, vec![vec![0.0, 1.0, 2.0], vec![3.0, 4.0, 5.0]]);
        assert_eq!(rows.dims(), (2, 3));

        let copy: DMatrix<f64> = export(&source);
        assert_eq!(copy, source);
    }

    #[test]
    fn test_empty_rows() {
        let rows: Vec<Vec<f64>> = GradientMatrix::zeros(0, 4);
        assert_eq!(rows.dims(), (0, 0));
    }

    #[cfg(feature = "ndarray")]
    #[test]
    fn test_ndarray_export() {
        let source = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let array: ndarray::Array2<f64> = export(&source);
        assert_eq!(array, ndarray::arr2(&[[1.0, 2.0], [3.0, 4.0]]));
    }
}
