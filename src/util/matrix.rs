//! Square `f64` matrix buffer used for covariances and kernels.
//!
//! Quarter covariance matrices, tiled kernels, and solver grids are all
//! small square arrays; `Matrix` keeps them in one contiguous row-major
//! buffer with `(row, col)` indexing.

use std::ops::{Index, IndexMut};

use crate::util::{BfkError, BfkResult};

/// Owned square matrix of `f64` values in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    side: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Creates a matrix of the given side length filled with zeros.
    pub fn zeros(side: usize) -> Self {
        Self {
            side,
            data: vec![0.0; side * side],
        }
    }

    /// Creates a matrix of the given side length filled with `value`.
    pub fn filled(side: usize, value: f64) -> Self {
        Self {
            side,
            data: vec![value; side * side],
        }
    }

    /// Wraps a row-major buffer; the length must be a perfect square.
    pub fn from_vec(data: Vec<f64>) -> BfkResult<Self> {
        let side = (data.len() as f64).sqrt() as usize;
        if side * side != data.len() {
            return Err(BfkError::NotSquare {
                len: data.len(),
                side,
            });
        }
        Ok(Self { side, data })
    }

    /// Returns the side length.
    pub fn side(&self) -> usize {
        self.side
    }

    /// Returns the index of the central row/column; meaningful for odd sides.
    pub fn center(&self) -> usize {
        (self.side - 1) / 2
    }

    /// Returns the backing row-major slice.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Sum of all entries.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Sum of absolute values of all entries.
    pub fn abs_sum(&self) -> f64 {
        self.data.iter().map(|v| v.abs()).sum()
    }

    /// Multiplies every entry by `factor` in place.
    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.data {
            *v *= factor;
        }
    }

    /// Returns a copy padded with `border` zero rows/columns on every side.
    pub fn padded(&self, border: usize) -> Matrix {
        let side = self.side + 2 * border;
        let mut out = Matrix::zeros(side);
        for i in 0..self.side {
            for j in 0..self.side {
                out[(i + border, j + border)] = self[(i, j)];
            }
        }
        out
    }

    /// Returns the interior obtained by dropping `border` rows/columns on
    /// every side.
    pub fn interior(&self, border: usize) -> Matrix {
        debug_assert!(self.side > 2 * border);
        let side = self.side - 2 * border;
        let mut out = Matrix::zeros(side);
        for i in 0..side {
            for j in 0..side {
                out[(i, j)] = self[(i + border, j + border)];
            }
        }
        out
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f64;

    fn index(&self, (row, col): (usize, usize)) -> &f64 {
        &self.data[row * self.side + col]
    }
}

impl IndexMut<(usize, usize)> for Matrix {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut f64 {
        &mut self.data[row * self.side + col]
    }
}
