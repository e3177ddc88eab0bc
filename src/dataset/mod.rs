//! Georeferenced raster datasets
//!
//! A [`Dataset`] is an open handle on a raster source, obtained through
//! [`Dataset::open`] or [`OpenOptions`]. Band indexes are 1-based.
//! Windowed reads live in `read.rs` and writes in `write.rs`.

mod options;
mod read;
mod write;

#[cfg(test)]
mod tests;

pub use options::OpenOptions;
pub use read::ReadOptions;

use std::fmt;
use std::str::FromStr;
use tracing::{debug, error};
use crate::driver::{PixelRect, RasterHandle, RasterMeta};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::profile::Profile;
use crate::transform::{Affine, PixelOffset};
use crate::types::{DType, Sample};
use crate::window::{Bounds, Window};

/// Pixel coordinates closer than this to the next whole pixel snap to it
/// before `index` floors them.
const INDEX_PRECISION: f64 = 1e-9;

/// How a dataset was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// `"r"`
    Read,
    /// `"r+"`: existing dataset, modified in place
    Update,
    /// `"w"`: new dataset
    Write,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Read => "r",
            Mode::Update => "r+",
            Mode::Write => "w",
        }
    }

    pub fn is_writable(&self) -> bool {
        !matches!(self, Mode::Read)
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "r" => Ok(Mode::Read),
            "r+" => Ok(Mode::Update),
            "w" => Ok(Mode::Write),
            other => Err(Error::Unsupported(format!("open mode '{}'", other))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open raster
pub struct Dataset {
    name: String,
    driver: &'static str,
    mode: Mode,
    /// Last metadata reported by the handle; kept readable after close
    meta: RasterMeta,
    handle: Option<Box<dyn RasterHandle>>,
    env: &'static Environment,
}

impl Dataset {
    /// Opens an existing dataset read-only
    pub fn open(path: &str) -> Result<Dataset> {
        OpenOptions::new().open(path)
    }

    /// Opens an existing dataset for in-place modification
    pub fn open_update(path: &str) -> Result<Dataset> {
        OpenOptions::new().mode(Mode::Update).open(path)
    }

    pub(crate) fn from_handle(
        name: String,
        driver: &'static str,
        mode: Mode,
        handle: Box<dyn RasterHandle>,
        env: &'static Environment,
    ) -> Self {
        Self { name, driver, mode, meta: handle.meta().clone(), handle: Some(handle), env }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn driver(&self) -> &'static str {
        self.driver
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn closed(&self) -> bool {
        self.handle.is_none()
    }

    pub fn width(&self) -> usize {
        self.meta.width
    }

    pub fn height(&self) -> usize {
        self.meta.height
    }

    /// Number of bands
    pub fn count(&self) -> usize {
        self.meta.count
    }

    /// 1-based band indexes
    pub fn indexes(&self) -> Vec<usize> {
        (1..=self.meta.count).collect()
    }

    pub fn dtypes(&self) -> &[DType] {
        &self.meta.dtypes
    }

    pub fn nodatavals(&self) -> &[Option<f64>] {
        &self.meta.nodata
    }

    /// Nodata of the first band
    pub fn nodata(&self) -> Option<f64> {
        self.meta.nodata.first().copied().flatten()
    }

    pub fn crs(&self) -> Option<&str> {
        self.meta.crs.as_deref()
    }

    pub fn transform(&self) -> Affine {
        self.meta.transform
    }

    /// Whether the source stores a per-pixel validity mask
    pub fn has_mask(&self) -> bool {
        self.meta.has_mask
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.meta.height, self.meta.width)
    }

    /// World extent of the full grid
    pub fn bounds(&self) -> Bounds {
        Window::full(self.meta.height, self.meta.width).bounds(&self.meta.transform)
    }

    /// Pixel size `(x, y)`
    pub fn res(&self) -> (f64, f64) {
        self.meta.transform.resolution()
    }

    /// World coordinates of the upper left corner of pixel `(row, col)`
    pub fn xy(&self, row: f64, col: f64) -> (f64, f64) {
        self.xy_offset(row, col, PixelOffset::UpperLeft)
    }

    pub fn xy_offset(&self, row: f64, col: f64, offset: PixelOffset) -> (f64, f64) {
        self.meta.transform.xy_offset(row, col, offset)
    }

    /// Pixel `(row, col)` containing world `(x, y)`
    ///
    /// Fractional pixel coordinates are floored, so points outside the
    /// grid give negative or too-large indexes rather than an error.
    pub fn index(&self, x: f64, y: f64) -> Result<(i64, i64)> {
        let (col, row) = self.meta.transform.invert()?.apply(x, y);
        Ok((snap_floor(row), snap_floor(col)))
    }

    /// Window covering the full grid
    pub fn window_full(&self) -> Window {
        Window::full(self.meta.height, self.meta.width)
    }

    /// Window of world `bounds`, unrounded
    pub fn window(&self, bounds: &Bounds) -> Result<Window> {
        Window::from_bounds(bounds, &self.meta.transform)
    }

    /// Transform of the sub-grid `window` selects
    pub fn window_transform(&self, window: &Window) -> Affine {
        window.transform(&self.meta.transform)
    }

    /// Natural block size `(rows, cols)` of the codec
    pub fn block_shape(&self) -> (usize, usize) {
        self.meta.block_shape
    }

    /// The codec's blocks as `((block_row, block_col), window)`, edge blocks
    /// cropped to the grid
    pub fn block_windows(&self) -> Vec<((usize, usize), Window)> {
        let (block_rows, block_cols) = self.meta.block_shape;
        let (height, width) = (self.meta.height, self.meta.width);
        if block_rows == 0 || block_cols == 0 {
            return Vec::new();
        }
        let mut windows = Vec::new();
        for (j, row) in (0..height).step_by(block_rows).enumerate() {
            for (i, col) in (0..width).step_by(block_cols).enumerate() {
                let rows = block_rows.min(height - row);
                let cols = block_cols.min(width - col);
                if let Ok(window) = Window::from_offsets(col as f64, row as f64, cols as f64, rows as f64) {
                    windows.push(((j, i), window));
                }
            }
        }
        windows
    }

    /// Creation profile of this dataset
    pub fn profile(&self) -> Profile {
        let dtype = self.meta.dtypes.first().copied().unwrap_or(DType::U8);
        let (block_rows, block_cols) = self.meta.block_shape;
        Profile {
            driver: self.driver.to_string(),
            width: self.meta.width,
            height: self.meta.height,
            count: self.meta.count,
            dtype,
            transform: self.meta.transform,
            crs: self.meta.crs.clone(),
            nodata: self.nodata(),
            blockxsize: self.meta.tiled.then_some(block_cols),
            blockysize: Some(block_rows),
            tiled: self.meta.tiled,
            compress: self.meta.compression.clone(),
        }
    }

    /// Sets (or clears) the nodata sentinel of every band
    pub fn set_nodata(&mut self, nodata: Option<f64>) -> Result<()> {
        if let Some(value) = nodata {
            for dtype in &self.meta.dtypes {
                if !dtype.can_hold(value) {
                    return Err(Error::InvalidNodata { value, dtype: dtype.name() });
                }
            }
        }
        let mut meta = self.meta.clone();
        meta.nodata = vec![nodata; meta.count];
        self.update_meta(meta)
    }

    pub fn set_crs(&mut self, crs: Option<&str>) -> Result<()> {
        let mut meta = self.meta.clone();
        meta.crs = crs.map(str::to_string);
        self.update_meta(meta)
    }

    /// Replaces the transform; singular transforms are rejected
    pub fn set_transform(&mut self, transform: Affine) -> Result<()> {
        transform.invert()?;
        let mut meta = self.meta.clone();
        meta.transform = transform;
        self.update_meta(meta)
    }

    fn update_meta(&mut self, meta: RasterMeta) -> Result<()> {
        self.check_writable()?;
        let env = self.env;
        let _scope = env.ensure()?;
        let handle = self.handle_mut()?;
        handle.set_meta(meta)?;
        self.meta = self.handle()?.meta().clone();
        Ok(())
    }

    /// Flushes pending writes and releases the handle
    ///
    /// Closing twice is a no-op. If the flush fails the error is returned
    /// and the dataset is closed anyway.
    pub fn close(&mut self) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };
        let _scope = self.env.ensure()?;
        let result = if self.mode.is_writable() { handle.flush() } else { Ok(()) };
        debug!(name = %self.name, mode = %self.mode, ok = result.is_ok(), "closed dataset");
        result
    }

    fn handle(&self) -> Result<&dyn RasterHandle> {
        self.handle
            .as_deref()
            .ok_or_else(|| Error::ClosedResource(self.name.clone()))
    }

    fn handle_mut(&mut self) -> Result<&mut Box<dyn RasterHandle>> {
        match self.handle.as_mut() {
            Some(handle) => Ok(handle),
            None => Err(Error::ClosedResource(self.name.clone())),
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(Error::Mode(self.mode.as_str()))
        }
    }

    /// Validates 1-based band indexes; empty means every band
    fn resolve_bands(&self, bands: &[usize]) -> Result<Vec<usize>> {
        if bands.is_empty() {
            return Ok(self.indexes());
        }
        for &index in bands {
            if index == 0 || index > self.meta.count {
                return Err(Error::InvalidBandIndex { index, count: self.meta.count });
            }
        }
        Ok(bands.to_vec())
    }

    fn check_dtype<T: Sample>(&self, bands: &[usize]) -> Result<()> {
        for &band in bands {
            let dtype = self.meta.dtypes[band - 1];
            if dtype != T::DTYPE {
                return Err(Error::DTypeMismatch { expected: dtype.name(), actual: T::DTYPE.name() });
            }
        }
        Ok(())
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(name = %self.name, error = %e, "failed to close dataset");
        }
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("name", &self.name)
            .field("driver", &self.driver)
            .field("mode", &self.mode)
            .field("shape", &(self.meta.count, self.meta.height, self.meta.width))
            .field("closed", &self.closed())
            .finish()
    }
}

fn snap_floor(value: f64) -> i64 {
    let nearest = value.round();
    if (value - nearest).abs() < INDEX_PRECISION {
        nearest as i64
    } else {
        value.floor() as i64
    }
}

/// Integer rectangle of a rounded, in-bounds window
pub(crate) fn pixel_rect(window: &Window) -> Result<PixelRect> {
    let (rows, cols) = window
        .to_ranges()
        .ok_or_else(|| Error::InvalidWindow(format!("{} is not on whole pixels", window)))?;
    Ok(PixelRect::new(cols.start, rows.start, cols.len(), rows.len()))
}
