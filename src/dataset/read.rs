use tracing::trace;
use crate::array::RasterArray;
use crate::error::{Error, Result};
use crate::masked::MaskedArray;
use crate::types::{Complex32, Complex64, DType, Sample};
use crate::window::Window;
use super::{pixel_rect, Dataset};

/// Options of a windowed read
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadOptions {
    /// Region to read; the full grid if unset. Rounded outward before use.
    pub window: Option<Window>,
    /// Return the whole requested window even where it leaves the grid
    pub boundless: bool,
    /// Value of out-of-grid cells; defaults to the band nodata, then 0.
    /// Must be representable in every band read.
    pub fill_value: Option<f64>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(mut self, window: Window) -> Self {
        self.window = Some(window);
        self
    }

    pub fn boundless(mut self, boundless: bool) -> Self {
        self.boundless = boundless;
        self
    }

    pub fn fill_value(mut self, value: f64) -> Self {
        self.fill_value = Some(value);
        self
    }
}

/// Where a read lands: the output window and the part of it inside the grid
struct ReadPlan {
    output: Window,
    inner: Option<Window>,
}

impl Dataset {
    /// Reads `bands` (1-based, empty for all) into a `[band][row][col]` array
    ///
    /// ```no_run
    /// use gridio::{Dataset, ReadOptions, Window};
    ///
    /// let dataset = Dataset::open("scene.tif")?;
    /// let window = Window::new(300.0, 400.0, 200.0, 400.0)?;
    /// let array = dataset.read::<u8>(&[], &ReadOptions::new().window(window))?;
    /// assert_eq!(array.shape(), (dataset.count(), 100, 200));
    /// # Ok::<(), gridio::Error>(())
    /// ```
    pub fn read<T: Sample>(&self, bands: &[usize], options: &ReadOptions) -> Result<RasterArray<T>> {
        let (array, _) = self.read_region::<T>(bands, options, false)?;
        Ok(array)
    }

    /// Like [`read`](Self::read), with a validity mask
    ///
    /// The mask comes from the source's explicit per-pixel mask when it has
    /// one, otherwise from comparing values against each band's nodata.
    /// Cells outside the grid of a boundless read are always invalid.
    pub fn read_masked<T: Sample>(&self, bands: &[usize], options: &ReadOptions) -> Result<MaskedArray<T>> {
        let bands = self.resolve_bands(bands)?;
        let (array, mask) = self.read_region::<T>(&bands, options, true)?;
        let nodata = bands.iter().map(|&b| self.meta.nodata[b - 1]).collect();
        MaskedArray::with_nodata(array, mask, nodata)
    }

    /// Per-band validity masks, 255 = valid and 0 = invalid
    ///
    /// Resolved like [`read_masked`](Self::read_masked), for bands of any
    /// data type.
    pub fn read_masks(&self, bands: &[usize], options: &ReadOptions) -> Result<RasterArray<u8>> {
        let handle = self.handle()?;
        let _scope = self.env.ensure()?;
        let bands = self.resolve_bands(bands)?;

        let plan = self.plan(options)?;
        let (rows, cols) = plan.output.boundless_shape();
        let plane = rows * cols;
        let mut masks = RasterArray::<u8>::zeros((bands.len(), rows, cols));
        let Some(inner) = plan.inner else {
            return Ok(masks);
        };
        let rect = pixel_rect(&inner)?;
        let row_shift = (inner.row_start() - plan.output.row_start()) as usize;
        let col_shift = (inner.col_start() - plan.output.col_start()) as usize;
        let explicit = if self.meta.has_mask { handle.decode_mask(rect)? } else { None };

        for (i, &band) in bands.iter().enumerate() {
            let valid: Vec<u8> = match (&explicit, self.meta.nodata[band - 1]) {
                (Some(mask), _) => mask.iter().map(|&m| if m == 0 { 0 } else { 255 }).collect(),
                (None, Some(sentinel)) => {
                    let dtype = self.meta.dtypes[band - 1];
                    sentinel_hits(dtype, &handle.decode(band - 1, rect)?, sentinel)
                        .into_iter()
                        .map(|hit| if hit { 0 } else { 255 })
                        .collect()
                }
                (None, None) => vec![255; rect.width * rect.height],
            };
            let out = masks.as_mut_slice();
            for r in 0..rect.height {
                let dst = i * plane + (r + row_shift) * cols + col_shift;
                out[dst..dst + rect.width].copy_from_slice(&valid[r * rect.width..(r + 1) * rect.width]);
            }
        }
        Ok(masks)
    }

    /// Validity of whole pixels: 255 where any band is valid
    ///
    /// Returns a single-band array with the shape of the read window.
    pub fn dataset_mask(&self, options: &ReadOptions) -> Result<RasterArray<u8>> {
        let masks = self.read_masks(&[], options)?;
        let (count, rows, cols) = masks.shape();
        let plane = rows * cols;
        let mut merged = vec![0u8; plane];
        for band in 0..count {
            for (m, &v) in merged.iter_mut().zip(&masks.as_slice()[band * plane..(band + 1) * plane]) {
                *m = (*m).max(v);
            }
        }
        RasterArray::from_vec((1, rows, cols), merged)
    }

    /// Band values at each world point, one `Vec` per point
    ///
    /// Points off the grid get each band's nodata, or 0.
    pub fn sample<T: Sample>(&self, points: &[(f64, f64)], bands: &[usize]) -> Result<Vec<Vec<T>>> {
        let options = ReadOptions::new().boundless(true);
        points
            .iter()
            .map(|&(x, y)| {
                let (row, col) = self.index(x, y)?;
                let window = Window::from_offsets(col as f64, row as f64, 1.0, 1.0)?;
                Ok(self.read::<T>(bands, &options.window(window))?.into_vec())
            })
            .collect()
    }

    fn plan(&self, options: &ReadOptions) -> Result<ReadPlan> {
        let full = self.window_full();
        let requested = options.window.map(|w| w.round_outward()).unwrap_or(full);
        let inner = requested.intersection(&full).ok().filter(|w| !w.is_empty());

        if options.boundless || requested.is_empty() {
            return Ok(ReadPlan { output: requested, inner });
        }
        match inner {
            Some(inner) => Ok(ReadPlan { output: inner, inner: Some(inner) }),
            None => Err(Error::WindowOutOfBounds(format!(
                "{} does not overlap the {}x{} grid of {}",
                requested,
                self.meta.height,
                self.meta.width,
                self.name
            ))),
        }
    }

    fn read_region<T: Sample>(
        &self,
        bands: &[usize],
        options: &ReadOptions,
        with_mask: bool,
    ) -> Result<(RasterArray<T>, Vec<bool>)> {
        let handle = self.handle()?;
        let _scope = self.env.ensure()?;
        let bands = self.resolve_bands(bands)?;
        self.check_dtype::<T>(&bands)?;

        let plan = self.plan(options)?;
        let (rows, cols) = plan.output.boundless_shape();
        let plane = rows * cols;
        trace!(name = %self.name, window = %plan.output, bands = ?bands, boundless = options.boundless, "read");

        if let Some(value) = options.fill_value {
            for &band in &bands {
                let dtype = self.meta.dtypes[band - 1];
                if !dtype.can_hold(value) {
                    return Err(Error::InvalidNodata { value, dtype: dtype.name() });
                }
            }
        }

        let mut data = Vec::with_capacity(bands.len() * plane);
        for &band in &bands {
            let fill = options.fill_value.or(self.meta.nodata[band - 1]).unwrap_or(0.0);
            data.extend(std::iter::repeat(T::from_f64(fill)).take(plane));
        }
        let mut array = RasterArray::from_vec((bands.len(), rows, cols), data)?;
        let mut mask = if with_mask { vec![true; array.len()] } else { Vec::new() };

        let Some(inner) = plan.inner else {
            return Ok((array, mask));
        };
        let rect = pixel_rect(&inner)?;
        let row_shift = (inner.row_start() - plan.output.row_start()) as usize;
        let col_shift = (inner.col_start() - plan.output.col_start()) as usize;
        let explicit = if with_mask && self.meta.has_mask { handle.decode_mask(rect)? } else { None };

        for (i, &band) in bands.iter().enumerate() {
            let decoded = RasterArray::<T>::from_bytes((1, rect.height, rect.width), &handle.decode(band - 1, rect)?)?;
            let sentinel = self.meta.nodata[band - 1];
            let values = decoded.as_slice();
            for r in 0..rect.height {
                let src = r * rect.width;
                let dst = i * plane + (r + row_shift) * cols + col_shift;
                let out = array.as_mut_slice();
                out[dst..dst + rect.width].copy_from_slice(&values[src..src + rect.width]);
                if !with_mask {
                    continue;
                }
                for c in 0..rect.width {
                    mask[dst + c] = match &explicit {
                        Some(m) => m[src + c] == 0,
                        None => sentinel.map_or(false, |s| values[src + c].matches_sentinel(s)),
                    };
                }
            }
        }
        Ok((array, mask))
    }
}

/// Which samples of a native-endian band buffer equal `sentinel`
fn sentinel_hits(dtype: DType, bytes: &[u8], sentinel: f64) -> Vec<bool> {
    fn hits<T: Sample>(bytes: &[u8], sentinel: f64) -> Vec<bool> {
        bytemuck::pod_collect_to_vec::<u8, T>(bytes)
            .into_iter()
            .map(|v| v.matches_sentinel(sentinel))
            .collect()
    }
    match dtype {
        DType::U8 => hits::<u8>(bytes, sentinel),
        DType::I8 => hits::<i8>(bytes, sentinel),
        DType::U16 => hits::<u16>(bytes, sentinel),
        DType::I16 => hits::<i16>(bytes, sentinel),
        DType::U32 => hits::<u32>(bytes, sentinel),
        DType::I32 => hits::<i32>(bytes, sentinel),
        DType::U64 => hits::<u64>(bytes, sentinel),
        DType::I64 => hits::<i64>(bytes, sentinel),
        DType::F32 => hits::<f32>(bytes, sentinel),
        DType::F64 => hits::<f64>(bytes, sentinel),
        DType::C64 => hits::<Complex32>(bytes, sentinel),
        DType::C128 => hits::<Complex64>(bytes, sentinel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Mode, OpenOptions};
    use crate::vfs;

    /// 1-band 4x5 u16 ramp with nodata 0 at the first pixel
    fn ramp() -> Dataset {
        let mut ds = OpenOptions::new()
            .mode(Mode::Write)
            .width(5)
            .height(4)
            .count(1)
            .dtype(DType::U16)
            .nodata(0.0)
            .open(&vfs::unique_name("tif"))
            .unwrap();
        let array = RasterArray::from_vec((1, 4, 5), (0..20u16).collect()).unwrap();
        ds.write(&array, &[], None).unwrap();
        ds
    }

    #[test]
    fn test_read_full() {
        let ds = ramp();
        let a = ds.read::<u16>(&[1], &ReadOptions::new()).unwrap();
        assert_eq!(a.shape(), (1, 4, 5));
        assert_eq!(a[(0, 3, 4)], 19);
    }

    #[test]
    fn test_fractional_window_rounds_outward() {
        let ds = ramp();
        let w = Window::new(0.5, 1.2, 1.5, 2.5).unwrap();
        let a = ds.read::<u16>(&[], &ReadOptions::new().window(w)).unwrap();
        assert_eq!(a.shape(), (1, 2, 2));
        assert_eq!(a.as_slice(), &[1, 2, 6, 7]);
    }

    #[test]
    fn test_window_clipped_to_grid() {
        let ds = ramp();
        let w = Window::new(2.0, 10.0, 3.0, 10.0).unwrap();
        let a = ds.read::<u16>(&[], &ReadOptions::new().window(w)).unwrap();
        assert_eq!(a.shape(), (1, 2, 2));
        assert_eq!(a.as_slice(), &[13, 14, 18, 19]);
    }

    #[test]
    fn test_window_outside_grid() {
        let ds = ramp();
        let w = Window::new(10.0, 12.0, 0.0, 2.0).unwrap();
        let err = ds.read::<u16>(&[], &ReadOptions::new().window(w)).unwrap_err();
        assert!(matches!(err, Error::WindowOutOfBounds(_)));

        // touching the edge is still outside
        let edge = Window::new(4.0, 6.0, 0.0, 2.0).unwrap();
        assert!(ds.read::<u16>(&[], &ReadOptions::new().window(edge)).is_err());
    }

    #[test]
    fn test_zero_area_window_reads_nothing() {
        let ds = ramp();
        let w = Window::new(1.0, 1.0, 0.0, 3.0).unwrap();
        let a = ds.read::<u16>(&[], &ReadOptions::new().window(w)).unwrap();
        assert_eq!(a.shape(), (1, 0, 3));
        assert!(a.is_empty());
    }

    #[test]
    fn test_boundless_fill_and_mask() {
        let ds = ramp();
        let w = Window::new(-1.0, 1.0, 3.0, 7.0).unwrap();
        let options = ReadOptions::new().window(w).boundless(true).fill_value(99.0);
        let m = ds.read_masked::<u16>(&[], &options).unwrap();
        assert_eq!(m.shape(), (1, 2, 4));
        assert_eq!(m.data().as_slice(), &[99, 99, 99, 99, 3, 4, 99, 99]);
        assert_eq!(m.mask(), &[true, true, true, true, false, false, true, true]);
    }

    #[test]
    fn test_boundless_defaults_to_nodata() {
        let ds = ramp();
        let w = Window::new(-2.0, -1.0, -2.0, 0.0).unwrap();
        let m = ds.read_masked::<u16>(&[], &ReadOptions::new().window(w).boundless(true)).unwrap();
        assert_eq!(m.data().as_slice(), &[0, 0]);
        assert_eq!(m.valid_count(), 0);
    }

    #[test]
    fn test_masked_from_nodata() {
        let ds = ramp();
        let m = ds.read_masked::<u16>(&[], &ReadOptions::new()).unwrap();
        assert_eq!(m.valid_count(), 19);
        assert_eq!(m.is_masked(0, 0, 0), Some(true));
        assert_eq!(m.nodata(), &[Some(0.0)]);
    }

    #[test]
    fn test_dtype_and_band_checks() {
        let ds = ramp();
        let err = ds.read::<u8>(&[], &ReadOptions::new()).unwrap_err();
        assert!(matches!(err, Error::DTypeMismatch { expected: "uint16", actual: "uint8" }));
        let err = ds.read::<u16>(&[2], &ReadOptions::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidBandIndex { index: 2, count: 1 }));
        assert!(ds.read::<u16>(&[0], &ReadOptions::new()).is_err());
    }

    #[test]
    fn test_fill_value_must_fit_dtype() {
        let ds = ramp();
        let w = Window::new(-1.0, 1.0, 0.0, 2.0).unwrap();
        let options = ReadOptions::new().window(w).boundless(true).fill_value(70000.0);
        let err = ds.read::<u16>(&[], &options).unwrap_err();
        assert!(matches!(err, Error::InvalidNodata { dtype: "uint16", .. }));
        assert!(ds.read::<u16>(&[], &options.fill_value(-1.0)).is_err());
        assert!(ds.read::<u16>(&[], &options.fill_value(65535.0)).is_ok());
    }

    #[test]
    fn test_read_masks_from_nodata() {
        let ds = ramp();
        let masks = ds.read_masks(&[1], &ReadOptions::new()).unwrap();
        assert_eq!(masks.shape(), (1, 4, 5));
        assert_eq!(masks[(0, 0, 0)], 0);
        assert!(masks.as_slice()[1..].iter().all(|&m| m == 255));

        let w = Window::new(-1.0, 1.0, 0.0, 2.0).unwrap();
        let masks = ds.read_masks(&[], &ReadOptions::new().window(w).boundless(true)).unwrap();
        assert_eq!(masks.as_slice(), &[0, 0, 0, 255]);
    }

    #[test]
    fn test_dataset_mask_unions_bands() {
        let mut ds = OpenOptions::new()
            .mode(Mode::Write)
            .width(3)
            .height(1)
            .count(2)
            .dtype(DType::F32)
            .nodata(f64::NAN)
            .open(&vfs::unique_name("tif"))
            .unwrap();
        let nan = f32::NAN;
        let array = RasterArray::from_vec((2, 1, 3), vec![nan, 1.0, nan, 2.0, nan, nan]).unwrap();
        ds.write(&array, &[], None).unwrap();

        let masks = ds.read_masks(&[], &ReadOptions::new()).unwrap();
        assert_eq!(masks.as_slice(), &[0, 255, 0, 255, 0, 0]);
        let mask = ds.dataset_mask(&ReadOptions::new()).unwrap();
        assert_eq!(mask.shape(), (1, 1, 3));
        assert_eq!(mask.as_slice(), &[255, 255, 0]);
    }

    #[test]
    fn test_masks_without_nodata_are_valid() {
        let mut ds = OpenOptions::new()
            .mode(Mode::Write)
            .width(2)
            .height(2)
            .count(1)
            .dtype(DType::I8)
            .open(&vfs::unique_name("tif"))
            .unwrap();
        ds.write(&RasterArray::<i8>::zeros((1, 2, 2)), &[], None).unwrap();
        assert_eq!(ds.dataset_mask(&ReadOptions::new()).unwrap().as_slice(), &[255; 4]);
    }

    #[test]
    fn test_sample_points() {
        let ds = ramp();
        // identity transform: x is the column, y the row
        let values = ds.sample::<u16>(&[(2.5, 1.5), (4.0, 3.0), (-1.0, 0.0)], &[]).unwrap();
        assert_eq!(values, vec![vec![7], vec![19], vec![0]]);
    }
}
