//! Masked arrays
//!
//! A [`MaskedArray`] pairs pixel data with a concrete boolean mask in which
//! `true` marks an invalid cell. Callers describe validity with a
//! [`Validity`]; it is resolved once, when the array is built.

use crate::array::{RasterArray, Shape};
use crate::error::{Error, Result};
use crate::types::Sample;
use crate::window::Window;

/// How the validity of each cell is determined
#[derive(Debug, Clone, PartialEq)]
pub enum Validity {
    /// One flag per cell, `true` = invalid
    Explicit(Vec<bool>),
    /// Cells equal to their band's sentinel are invalid
    FromNodata(Vec<Option<f64>>),
}

/// Pixel data with a resolved validity mask
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedArray<T> {
    data: RasterArray<T>,
    mask: Vec<bool>,
    nodata: Vec<Option<f64>>,
}

impl<T: Sample> MaskedArray<T> {
    /// Resolves `validity` against `data`
    pub fn new(data: RasterArray<T>, validity: Validity) -> Result<Self> {
        let (bands, rows, cols) = data.shape();
        match validity {
            Validity::Explicit(mask) => {
                if mask.len() != data.len() {
                    return Err(Error::BufferShape { expected: data.shape(), actual: (1, 1, mask.len()) });
                }
                Ok(Self { nodata: vec![None; bands], data, mask })
            }
            Validity::FromNodata(nodata) => {
                if nodata.len() != bands {
                    return Err(Error::BufferShape {
                        expected: (bands, 1, 1),
                        actual: (nodata.len(), 1, 1),
                    });
                }
                let plane = rows * cols;
                let mask = data
                    .iter()
                    .enumerate()
                    .map(|(i, &v)| match nodata[i / plane.max(1)] {
                        Some(sentinel) => v.matches_sentinel(sentinel),
                        None => false,
                    })
                    .collect();
                Ok(Self { data, mask, nodata })
            }
        }
    }

    /// Attaches an explicit mask and records the band sentinels
    pub(crate) fn with_nodata(data: RasterArray<T>, mask: Vec<bool>, nodata: Vec<Option<f64>>) -> Result<Self> {
        let mut array = Self::new(data, Validity::Explicit(mask))?;
        array.nodata = nodata;
        Ok(array)
    }

    pub fn data(&self) -> &RasterArray<T> {
        &self.data
    }

    /// `true` where a cell is invalid
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    pub fn nodata(&self) -> &[Option<f64>] {
        &self.nodata
    }

    pub fn shape(&self) -> Shape {
        self.data.shape()
    }

    pub fn is_masked(&self, band: usize, row: usize, col: usize) -> Option<bool> {
        let (_, rows, cols) = self.data.shape();
        self.data.get(band, row, col).map(|_| self.mask[(band * rows + row) * cols + col])
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&m| !m).count()
    }

    /// The valid values, band-major
    pub fn compressed(&self) -> Vec<T> {
        self.data
            .iter()
            .zip(&self.mask)
            .filter(|(_, &m)| !m)
            .map(|(&v, _)| v)
            .collect()
    }

    /// The data with every invalid cell replaced by `value`
    pub fn filled(&self, value: T) -> RasterArray<T> {
        let mut out = self.data.clone();
        for (v, &m) in out.as_mut_slice().iter_mut().zip(&self.mask) {
            if m {
                *v = value;
            }
        }
        out
    }

    pub fn into_parts(self) -> (RasterArray<T>, Vec<bool>) {
        (self.data, self.mask)
    }
}

/// Smallest window holding every valid cell of any band
///
/// Arrays without valid cells give an empty window at the origin.
pub fn get_data_window<T: Sample>(array: &MaskedArray<T>) -> Window {
    let (bands, rows, cols) = array.shape();
    let mut row_hits = vec![false; rows];
    let mut col_hits = vec![false; cols];
    for band in 0..bands {
        for row in 0..rows {
            for col in 0..cols {
                if !array.mask[(band * rows + row) * cols + col] {
                    row_hits[row] = true;
                    col_hits[col] = true;
                }
            }
        }
    }

    let span = |hits: &[bool]| {
        let first = hits.iter().position(|&h| h)?;
        let last = hits.iter().rposition(|&h| h)?;
        Some((first, last + 1))
    };
    match (span(&row_hits), span(&col_hits)) {
        (Some((r0, r1)), Some((c0, c1))) => {
            Window::new(r0 as f64, r1 as f64, c0 as f64, c1 as f64).unwrap_or_else(|_| Window::full(0, 0))
        }
        _ => Window::full(0, 0),
    }
}
