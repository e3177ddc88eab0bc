use tracing::trace;
use crate::array::RasterArray;
use crate::error::{Error, Result};
use crate::masked::MaskedArray;
use crate::types::Sample;
use crate::window::Window;
use super::{pixel_rect, Dataset};

impl Dataset {
    /// Writes a `[band][row][col]` array into `bands` (1-based, empty for all)
    ///
    /// The array shape must equal `(bands, window rows, window cols)`. Writes
    /// are never boundless. A failure partway leaves earlier bands written.
    pub fn write<T: Sample>(&mut self, array: &RasterArray<T>, bands: &[usize], window: Option<&Window>) -> Result<()> {
        self.check_writable()?;
        let bands = self.resolve_bands(bands)?;
        self.check_dtype::<T>(&bands)?;
        let target = self.write_window(window)?;
        let (rows, cols) = target.boundless_shape();
        let expected = (bands.len(), rows, cols);
        if array.shape() != expected {
            return Err(Error::BufferShape { expected, actual: array.shape() });
        }
        if target.is_empty() {
            return Ok(());
        }

        let rect = pixel_rect(&target)?;
        trace!(name = %self.name, window = %target, bands = ?bands, "write");
        let env = self.env;
        let _scope = env.ensure()?;
        let handle = self.handle_mut()?;
        for (&band, values) in bands.iter().zip(array.as_slice().chunks(rows * cols)) {
            handle.encode(band - 1, rect, bytemuck::cast_slice(values))?;
        }
        Ok(())
    }

    /// Stores a per-pixel validity mask shared by all bands, `true` = invalid
    pub fn write_mask(&mut self, mask: &[bool], window: Option<&Window>) -> Result<()> {
        self.check_writable()?;
        let target = self.write_window(window)?;
        let (rows, cols) = target.boundless_shape();
        if mask.len() != rows * cols {
            return Err(Error::BufferShape { expected: (1, rows, cols), actual: (1, 1, mask.len()) });
        }
        if target.is_empty() {
            return Ok(());
        }

        let rect = pixel_rect(&target)?;
        let bytes: Vec<u8> = mask.iter().map(|&invalid| if invalid { 0 } else { 255 }).collect();
        let env = self.env;
        let _scope = env.ensure()?;
        let handle = self.handle_mut()?;
        handle.encode_mask(rect, &bytes)?;
        self.meta = self.handle()?.meta().clone();
        Ok(())
    }

    /// Writes a masked array
    ///
    /// Invalid cells of bands with a nodata sentinel are stored as that
    /// sentinel. Cells invalid in any band without one go to the dataset's
    /// validity mask instead.
    pub fn write_masked<T: Sample>(&mut self, array: &MaskedArray<T>, bands: &[usize], window: Option<&Window>) -> Result<()> {
        let bands = self.resolve_bands(bands)?;
        let (count, rows, cols) = array.shape();
        if count != bands.len() {
            return Err(Error::BufferShape { expected: (bands.len(), rows, cols), actual: array.shape() });
        }

        let plane = rows * cols;
        let mut data = array.data().clone();
        let mut unmasked = vec![false; plane];
        let mut needs_mask = false;
        for (i, &band) in bands.iter().enumerate() {
            let invalid = &array.mask()[i * plane..(i + 1) * plane];
            match self.meta.nodata[band - 1] {
                Some(sentinel) => {
                    let fill = T::from_f64(sentinel);
                    let values = &mut data.as_mut_slice()[i * plane..(i + 1) * plane];
                    for (v, &m) in values.iter_mut().zip(invalid) {
                        if m {
                            *v = fill;
                        }
                    }
                }
                None => {
                    for (u, &m) in unmasked.iter_mut().zip(invalid) {
                        *u |= m;
                    }
                    needs_mask |= invalid.iter().any(|&m| m);
                }
            }
        }

        self.write(&data, &bands, window)?;
        if needs_mask {
            self.write_mask(&unmasked, window)?;
        }
        Ok(())
    }

    /// Rounded write window, which must lie inside the grid
    fn write_window(&self, window: Option<&Window>) -> Result<Window> {
        let full = self.window_full();
        let target = window.map(|w| w.round_outward()).unwrap_or(full);
        if !full.contains(&target) {
            return Err(Error::WindowOutOfBounds(format!(
                "cannot write {} outside the {}x{} grid of {}",
                target, self.meta.height, self.meta.width, self.name
            )));
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{Mode, OpenOptions, ReadOptions};
    use crate::masked::Validity;
    use crate::types::DType;
    use crate::vfs;

    fn create(count: usize, nodata: Option<f64>) -> Dataset {
        let mut options = OpenOptions::new()
            .mode(Mode::Write)
            .width(4)
            .height(3)
            .count(count)
            .dtype(DType::I16);
        if let Some(value) = nodata {
            options = options.nodata(value);
        }
        options.open(&vfs::unique_name("tif")).unwrap()
    }

    #[test]
    fn test_buffer_shape_mismatch() {
        let mut ds = create(2, None);
        let array = RasterArray::<i16>::zeros((1, 3, 4));
        let err = ds.write(&array, &[], None).unwrap_err();
        assert!(matches!(err, Error::BufferShape { expected: (2, 3, 4), actual: (1, 3, 4) }));
    }

    #[test]
    fn test_write_outside_grid() {
        let mut ds = create(1, None);
        let window = Window::new(2.0, 4.0, 0.0, 2.0).unwrap();
        let array = RasterArray::<i16>::zeros((1, 2, 2));
        let err = ds.write(&array, &[], Some(&window)).unwrap_err();
        assert!(matches!(err, Error::WindowOutOfBounds(_)));
    }

    #[test]
    fn test_windowed_write() {
        let mut ds = create(1, None);
        let window = Window::new(1.0, 3.0, 2.0, 4.0).unwrap();
        let array = RasterArray::from_vec((1, 2, 2), vec![1i16, 2, 3, 4]).unwrap();
        ds.write(&array, &[], Some(&window)).unwrap();
        let back = ds.read::<i16>(&[], &ReadOptions::new()).unwrap();
        assert_eq!(back.as_slice(), &[0, 0, 0, 0, 0, 0, 1, 2, 0, 0, 3, 4]);
    }

    #[test]
    fn test_write_masked_uses_nodata() {
        let mut ds = create(1, Some(-1.0));
        let data = RasterArray::from_vec((1, 3, 4), (0..12).collect::<Vec<i16>>()).unwrap();
        let mut mask = vec![false; 12];
        mask[5] = true;
        let masked = MaskedArray::new(data, Validity::Explicit(mask)).unwrap();
        ds.write_masked(&masked, &[], None).unwrap();

        assert!(!ds.has_mask());
        let back = ds.read_masked::<i16>(&[], &ReadOptions::new()).unwrap();
        assert_eq!(back.data()[(0, 1, 1)], -1);
        assert_eq!(back.is_masked(0, 1, 1), Some(true));
        assert_eq!(back.valid_count(), 11);
    }

    #[test]
    fn test_write_masked_without_nodata_stores_mask() {
        let mut ds = create(1, None);
        let data = RasterArray::filled((1, 3, 4), 7i16);
        let mut mask = vec![false; 12];
        mask[0] = true;
        mask[11] = true;
        let masked = MaskedArray::new(data, Validity::Explicit(mask.clone())).unwrap();
        ds.write_masked(&masked, &[], None).unwrap();

        assert!(ds.has_mask());
        let back = ds.read_masked::<i16>(&[], &ReadOptions::new()).unwrap();
        assert_eq!(back.mask(), mask.as_slice());
        assert!(back.data().iter().all(|&v| v == 7));
    }

    #[test]
    fn test_write_mask_shape() {
        let mut ds = create(1, None);
        let err = ds.write_mask(&[true; 5], None).unwrap_err();
        assert!(matches!(err, Error::BufferShape { expected: (1, 3, 4), actual: (1, 1, 5) }));
    }

    #[test]
    fn test_closed_dataset_rejects_writes() {
        let mut ds = create(1, None);
        ds.close().unwrap();
        let array = RasterArray::<i16>::zeros((1, 3, 4));
        assert!(matches!(ds.write(&array, &[], None), Err(Error::ClosedResource(_))));
        assert!(matches!(ds.read::<i16>(&[], &ReadOptions::new()), Err(Error::ClosedResource(_))));
    }
}
