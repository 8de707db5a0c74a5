//! Dense integer tensors stored as flat row-major buffers.

use std::fmt;

use crate::error::{GoldenError, Result};

/// Activation map indexed `[channel][row][col]`.
#[derive(Clone, PartialEq, Eq)]
pub struct Tensor3<T> {
    channels: usize,
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

/// Quantized feature map as produced and consumed by the layers.
pub type FeatureMap = Tensor3<i8>;

impl<T: Copy + Default> Tensor3<T> {
    pub fn zeros(channels: usize, rows: usize, cols: usize) -> Self {
        Self::filled(channels, rows, cols, T::default())
    }

    pub fn filled(channels: usize, rows: usize, cols: usize, value: T) -> Self {
        Tensor3 {
            channels,
            rows,
            cols,
            data: vec![value; channels * rows * cols],
        }
    }

    pub fn from_vec(channels: usize, rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        let expected = channels * rows * cols;
        if data.len() != expected {
            return Err(GoldenError::shape(
                "tensor3",
                "element count",
                &[expected],
                &[data.len()],
            ));
        }
        Ok(Tensor3 {
            channels,
            rows,
            cols,
            data,
        })
    }

    #[inline]
    pub fn get(&self, c: usize, y: usize, x: usize) -> T {
        self.data[self.offset(c, y, x)]
    }

    #[inline]
    pub fn set(&mut self, c: usize, y: usize, x: usize, value: T) {
        let idx = self.offset(c, y, x);
        self.data[idx] = value;
    }

    /// One row of one channel, `cols` elements long.
    pub fn row(&self, c: usize, y: usize) -> &[T] {
        let start = self.offset(c, y, 0);
        &self.data[start..start + self.cols]
    }
}

impl<T> Tensor3<T> {
    #[inline]
    fn offset(&self, c: usize, y: usize, x: usize) -> usize {
        debug_assert!(c < self.channels && y < self.rows && x < self.cols);
        (c * self.rows + y) * self.cols + x
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.rows, self.cols]
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }
}

impl<T> fmt::Debug for Tensor3<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor3({}x{}x{})", self.channels, self.rows, self.cols)
    }
}

/// Convolution kernel indexed `[out_channel][in_channel][kernel_row][kernel_col]`.
#[derive(Clone, PartialEq, Eq)]
pub struct Tensor4<T> {
    dims: [usize; 4],
    data: Vec<T>,
}

impl<T: Copy + Default> Tensor4<T> {
    pub fn zeros(dims: [usize; 4]) -> Self {
        Tensor4 {
            dims,
            data: vec![T::default(); dims.iter().product()],
        }
    }

    pub fn from_vec(dims: [usize; 4], data: Vec<T>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if data.len() != expected {
            return Err(GoldenError::shape(
                "tensor4",
                "element count",
                &[expected],
                &[data.len()],
            ));
        }
        Ok(Tensor4 { dims, data })
    }

    #[inline]
    pub fn get(&self, o: usize, i: usize, ky: usize, kx: usize) -> T {
        let [_, ich, kh, kw] = self.dims;
        self.data[((o * ich + i) * kh + ky) * kw + kx]
    }

    pub fn set(&mut self, o: usize, i: usize, ky: usize, kx: usize, value: T) {
        let [_, ich, kh, kw] = self.dims;
        self.data[((o * ich + i) * kh + ky) * kw + kx] = value;
    }
}

impl<T> Tensor4<T> {
    pub fn dims(&self) -> [usize; 4] {
        self.dims
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T> fmt::Debug for Tensor4<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [o, i, kh, kw] = self.dims;
        write!(f, "Tensor4({o}x{i}x{kh}x{kw})")
    }
}

/// Fully-connected weight matrix indexed `[out_feature][in_feature]`.
#[derive(Clone, PartialEq, Eq)]
pub struct Matrix<T> {
    rows: usize,
    cols: usize,
    data: Vec<T>,
}

impl<T: Copy + Default> Matrix<T> {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Matrix {
            rows,
            cols,
            data: vec![T::default(); rows * cols],
        }
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(GoldenError::shape(
                "matrix",
                "element count",
                &[rows * cols],
                &[data.len()],
            ));
        }
        Ok(Matrix { rows, cols, data })
    }

    pub fn row(&self, r: usize) -> &[T] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }
}

impl<T> Matrix<T> {
    pub fn dims(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T> fmt::Debug for Matrix<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matrix({}x{})", self.rows, self.cols)
    }
}
