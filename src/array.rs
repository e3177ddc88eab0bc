//! Band-major pixel arrays

use std::ops::{Index, IndexMut};
use crate::error::{Error, Result};
use crate::types::Sample;
use crate::window::Window;

/// Shape `(bands, rows, cols)`
pub type Shape = (usize, usize, usize);

/// A `[band][row][col]` array of samples
#[derive(Debug, Clone, PartialEq)]
pub struct RasterArray<T> {
    shape: Shape,
    data: Vec<T>,
}

impl<T: Sample> RasterArray<T> {
    /// Wraps `data`, which must hold exactly `bands * rows * cols` samples
    pub fn from_vec(shape: Shape, data: Vec<T>) -> Result<Self> {
        if data.len() != shape.0 * shape.1 * shape.2 {
            return Err(Error::BufferShape { expected: shape, actual: (1, 1, data.len()) });
        }
        Ok(Self { shape, data })
    }

    pub fn filled(shape: Shape, value: T) -> Self {
        Self { shape, data: vec![value; shape.0 * shape.1 * shape.2] }
    }

    pub fn zeros(shape: Shape) -> Self {
        Self::filled(shape, T::zeroed())
    }

    /// Reinterprets native-endian bytes; `bytes` need not be aligned
    pub fn from_bytes(shape: Shape, bytes: &[u8]) -> Result<Self> {
        let expected = shape.0 * shape.1 * shape.2 * std::mem::size_of::<T>();
        if bytes.len() != expected {
            return Err(Error::Codec(format!(
                "Expected {} bytes of {} samples, got {}",
                expected,
                T::DTYPE,
                bytes.len()
            )));
        }
        Ok(Self { shape, data: bytemuck::pod_collect_to_vec(bytes) })
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn bands(&self) -> usize {
        self.shape.0
    }

    pub fn rows(&self) -> usize {
        self.shape.1
    }

    pub fn cols(&self) -> usize {
        self.shape.2
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn offset(&self, band: usize, row: usize, col: usize) -> Option<usize> {
        let (bands, rows, cols) = self.shape;
        (band < bands && row < rows && col < cols).then(|| (band * rows + row) * cols + col)
    }

    pub fn get(&self, band: usize, row: usize, col: usize) -> Option<T> {
        self.offset(band, row, col).map(|i| self.data[i])
    }

    /// Stores `value`; returns false if the position is outside the array
    pub fn set(&mut self, band: usize, row: usize, col: usize, value: T) -> bool {
        match self.offset(band, row, col) {
            Some(i) => {
                self.data[i] = value;
                true
            }
            None => false,
        }
    }

    /// One band as a row-major slice
    pub fn band(&self, band: usize) -> Option<&[T]> {
        let plane = self.shape.1 * self.shape.2;
        (band < self.shape.0).then(|| &self.data[band * plane..(band + 1) * plane])
    }

    pub fn band_mut(&mut self, band: usize) -> Option<&mut [T]> {
        let plane = self.shape.1 * self.shape.2;
        (band < self.shape.0).then(|| &mut self.data[band * plane..(band + 1) * plane])
    }

    /// Copy of the rows and columns `window` selects, across all bands
    pub fn slice(&self, window: &Window) -> Result<Self> {
        let (rows, cols) = window
            .to_ranges()
            .filter(|(r, c)| r.end <= self.shape.1 && c.end <= self.shape.2)
            .ok_or_else(|| Error::WindowOutOfBounds(format!("{} in a {}x{} array", window, self.shape.1, self.shape.2)))?;

        let mut data = Vec::with_capacity(self.shape.0 * rows.len() * cols.len());
        for band in 0..self.shape.0 {
            for row in rows.clone() {
                let start = (band * self.shape.1 + row) * self.shape.2;
                data.extend_from_slice(&self.data[start + cols.start..start + cols.end]);
            }
        }
        Ok(Self { shape: (self.shape.0, rows.len(), cols.len()), data })
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Native-endian bytes of the samples
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.data.iter()
    }
}

impl<T: Sample> Index<(usize, usize, usize)> for RasterArray<T> {
    type Output = T;

    fn index(&self, (band, row, col): (usize, usize, usize)) -> &T {
        match self.offset(band, row, col) {
            Some(i) => &self.data[i],
            None => panic!("index ({}, {}, {}) out of bounds for shape {:?}", band, row, col, self.shape),
        }
    }
}

impl<T: Sample> IndexMut<(usize, usize, usize)> for RasterArray<T> {
    fn index_mut(&mut self, (band, row, col): (usize, usize, usize)) -> &mut T {
        match self.offset(band, row, col) {
            Some(i) => &mut self.data[i],
            None => panic!("index ({}, {}, {}) out of bounds for shape {:?}", band, row, col, self.shape),
        }
    }
}
