//! Open GeoTIFF rasters
//!
//! Reads go through the block cache until the first write. From then on
//! the handle keeps every band as a full native-endian plane and
//! rewrites the whole file on flush.

use tracing::{debug, info};
use crate::cache::BlockCache;
use crate::compression::Compression;
use crate::driver::{ByteSource, CodecConfig, CreationOptions, PixelRect, RasterHandle, RasterMeta, Target};
use crate::env::Severity;
use crate::error::{Error, Result};
use crate::transform::Affine;
use super::geotiff::GeoInfo;
use super::reader::{BlockReader, DecodePool, TiffReader};
use super::writer::{TiffWriter, WriteOptions};

/// Decoders for the stored image and its mask
struct Stored {
    image: BlockReader,
    mask: Option<BlockReader>,
}

pub struct GTiffHandle {
    meta: RasterMeta,
    stored: Option<Stored>,
    pool: DecodePool,
    /// Full band planes once the raster has been written to
    planes: Option<Vec<Vec<u8>>>,
    /// Full 0/255 mask plane once written to
    mask: Option<Vec<u8>>,
    target: Option<Target>,
    options: WriteOptions,
    dirty: bool,
}

impl GTiffHandle {
    /// Opens existing GeoTIFF bytes; `target` enables updates
    pub fn open(source: ByteSource, target: Option<Target>, config: &CodecConfig) -> Result<Self> {
        let tiff = TiffReader::new(source.clone())?.read()?;
        let ifd = tiff
            .main_ifd()
            .ok_or_else(|| Error::Codec("TIFF file has no image".to_string()))?;

        let geo = GeoInfo::from_ifd(ifd)?;
        let transform = match geo.transform {
            Some(transform) => transform,
            None => {
                config.diagnostics.handle(
                    Severity::Warning,
                    "Dataset has no georeferencing; the identity transform will be used",
                );
                Affine::identity()
            }
        };

        let cache = BlockCache::new(config.block_cache_size);
        let image = BlockReader::new(source.clone(), ifd, cache.clone(), geo.nodata)?;
        let mask = tiff
            .mask_ifd()
            .map(|m| BlockReader::new(source.clone(), m, cache.clone(), None))
            .transpose()?;

        let layout = image.layout().clone();
        let compression = image.compression();
        let meta = RasterMeta {
            width: layout.width,
            height: layout.height,
            count: layout.samples_per_pixel,
            dtypes: vec![layout.dtype; layout.samples_per_pixel],
            transform,
            crs: geo.crs,
            nodata: vec![geo.nodata; layout.samples_per_pixel],
            block_shape: (layout.block_rows, layout.block_cols),
            has_mask: mask.is_some(),
            compression: (compression != Compression::None).then(|| compression.name().to_string()),
            tiled: layout.tiled,
        };

        debug!(
            tiff = %tiff,
            bytes = source.len(),
            update = target.is_some(),
            "opened GeoTIFF"
        );

        Ok(Self {
            options: WriteOptions::preserving(compression, layout.tiled, meta.block_shape),
            meta,
            stored: Some(Stored { image, mask }),
            pool: DecodePool::new(config.num_threads),
            planes: None,
            mask: None,
            target,
            dirty: false,
        })
    }

    /// Starts a new raster filled with nodata (or zero)
    pub fn create(
        target: Target,
        mut meta: RasterMeta,
        options: &CreationOptions,
        config: &CodecConfig,
    ) -> Result<Self> {
        if meta.width == 0 || meta.height == 0 || meta.count == 0 {
            return Err(Error::Codec(format!(
                "Cannot create a {}x{}x{} raster",
                meta.count, meta.height, meta.width
            )));
        }
        if meta.dtypes.len() != meta.count || meta.nodata.len() != meta.count {
            return Err(Error::Codec("Band metadata does not match the band count".to_string()));
        }
        if meta.dtypes.iter().any(|&d| d != meta.dtypes[0]) {
            return Err(Error::Unsupported("bands of different data types in one GeoTIFF".to_string()));
        }

        let write = WriteOptions::from_creation_options(options, meta.width, meta.dtypes[0].size())?;
        target.probe()?;

        let pixels = meta.width * meta.height;
        let planes = meta
            .dtypes
            .iter()
            .zip(&meta.nodata)
            .map(|(dtype, nodata)| dtype.filled(nodata.unwrap_or(0.0), pixels))
            .collect();

        meta.block_shape = write.block_shape;
        meta.tiled = write.tiled;
        meta.compression = (write.compression != Compression::None).then(|| write.compression.name().to_string());
        meta.has_mask = false;

        info!(
            width = meta.width,
            height = meta.height,
            count = meta.count,
            dtype = %meta.dtypes[0],
            "created GeoTIFF"
        );

        Ok(Self {
            meta,
            stored: None,
            pool: DecodePool::new(config.num_threads),
            planes: Some(planes),
            mask: None,
            target: Some(target),
            options: write,
            dirty: true,
        })
    }

    fn sample_size(&self) -> usize {
        self.meta.dtypes[0].size()
    }

    /// Decodes every band into memory ahead of a write
    fn load_planes(&mut self) -> Result<&mut Vec<Vec<u8>>> {
        if self.planes.is_none() {
            let stored = self
                .stored
                .as_ref()
                .ok_or_else(|| Error::Codec("Raster has no pixel data".to_string()))?;
            let full = PixelRect::full(self.meta.width, self.meta.height);
            let planes = (0..self.meta.count)
                .map(|band| stored.image.read_rect(band, full, &self.pool))
                .collect::<Result<Vec<_>>>()?;
            debug!(bands = planes.len(), "loaded band planes for update");
            self.planes = Some(planes);
        }
        self.planes
            .as_mut()
            .ok_or_else(|| Error::Codec("Raster has no pixel data".to_string()))
    }

    /// Loads the stored mask, or an all-valid one
    fn load_mask(&mut self) -> Result<&mut Vec<u8>> {
        if self.mask.is_none() {
            let full = PixelRect::full(self.meta.width, self.meta.height);
            let mask = match self.stored.as_ref().and_then(|s| s.mask.as_ref()) {
                Some(reader) => normalize_mask(reader.read_rect(0, full, &self.pool)?),
                None => vec![255; full.len()],
            };
            self.mask = Some(mask);
        }
        self.mask
            .as_mut()
            .ok_or_else(|| Error::Codec("Raster has no mask".to_string()))
    }

    fn check_writable(&self) -> Result<()> {
        match self.target {
            Some(_) => Ok(()),
            None => Err(Error::Unsupported("writing to a GeoTIFF opened read-only".to_string())),
        }
    }
}

impl RasterHandle for GTiffHandle {
    fn meta(&self) -> &RasterMeta {
        &self.meta
    }

    fn decode(&self, band: usize, rect: PixelRect) -> Result<Vec<u8>> {
        if let Some(planes) = &self.planes {
            let plane = planes.get(band).ok_or_else(|| Error::Codec(format!("No band {}", band)))?;
            return Ok(copy_out(plane, self.meta.width, rect, self.sample_size()));
        }
        match &self.stored {
            Some(stored) => stored.image.read_rect(band, rect, &self.pool),
            None => Err(Error::Codec("Raster has no pixel data".to_string())),
        }
    }

    fn encode(&mut self, band: usize, rect: PixelRect, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        let size = self.sample_size();
        let width = self.meta.width;
        if data.len() != rect.len() * size {
            return Err(Error::Codec(format!(
                "Expected {} bytes for a {}x{} window, got {}",
                rect.len() * size,
                rect.width,
                rect.height,
                data.len()
            )));
        }
        let plane = self
            .load_planes()?
            .get_mut(band)
            .ok_or_else(|| Error::Codec(format!("No band {}", band)))?;
        copy_in(plane, width, rect, size, data);
        self.dirty = true;
        Ok(())
    }

    fn decode_mask(&self, rect: PixelRect) -> Result<Option<Vec<u8>>> {
        if let Some(mask) = &self.mask {
            return Ok(Some(copy_out(mask, self.meta.width, rect, 1)));
        }
        match self.stored.as_ref().and_then(|s| s.mask.as_ref()) {
            Some(reader) => Ok(Some(normalize_mask(reader.read_rect(0, rect, &self.pool)?))),
            None => Ok(None),
        }
    }

    fn encode_mask(&mut self, rect: PixelRect, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        if data.len() != rect.len() {
            return Err(Error::Codec(format!("Expected {} mask bytes, got {}", rect.len(), data.len())));
        }
        let width = self.meta.width;
        let mask = self.load_mask()?;
        copy_in(mask, width, rect, 1, data);
        self.meta.has_mask = true;
        self.dirty = true;
        Ok(())
    }

    fn set_meta(&mut self, meta: RasterMeta) -> Result<()> {
        self.check_writable()?;
        if (meta.width, meta.height, meta.count) != (self.meta.width, self.meta.height, self.meta.count)
            || meta.dtypes != self.meta.dtypes
        {
            return Err(Error::Unsupported("changing raster dimensions or data types".to_string()));
        }
        self.meta.transform = meta.transform;
        self.meta.crs = meta.crs;
        self.meta.nodata = meta.nodata;
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(target) = self.target.clone() else {
            return Ok(());
        };

        self.load_planes()?;
        if self.meta.has_mask {
            self.load_mask()?;
        }
        let planes = self.planes.as_deref().unwrap_or_default();
        let bytes = TiffWriter::new(&self.meta, self.options).write(planes, self.mask.as_deref())?;
        target.store(bytes)?;
        self.dirty = false;
        debug!(bands = self.meta.count, mask = self.meta.has_mask, "flushed GeoTIFF");
        Ok(())
    }
}

/// Any nonzero stored mask value means valid
fn normalize_mask(mut mask: Vec<u8>) -> Vec<u8> {
    for value in mask.iter_mut() {
        if *value != 0 {
            *value = 255;
        }
    }
    mask
}

fn copy_out(plane: &[u8], width: usize, rect: PixelRect, size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(rect.len() * size);
    for row in rect.row_off..rect.row_off + rect.height {
        let start = (row * width + rect.col_off) * size;
        out.extend_from_slice(&plane[start..start + rect.width * size]);
    }
    out
}

fn copy_in(plane: &mut [u8], width: usize, rect: PixelRect, size: usize, data: &[u8]) {
    let row_bytes = rect.width * size;
    if row_bytes == 0 {
        return;
    }
    for (i, chunk) in data.chunks_exact(row_bytes).enumerate() {
        let start = ((rect.row_off + i) * width + rect.col_off) * size;
        plane[start..start + row_bytes].copy_from_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use crate::env::ErrorHandler;
    use crate::types::DType;
    use crate::vfs::SharedBytes;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(Severity, String)>>);

    impl ErrorHandler for Recorder {
        fn handle(&self, severity: Severity, message: &str) {
            self.0.lock().unwrap().push((severity, message.to_string()));
        }
    }

    fn config(handler: Arc<dyn ErrorHandler>) -> CodecConfig {
        CodecConfig { block_cache_size: 8, num_threads: 1, diagnostics: handler }
    }

    fn meta(transform: Affine) -> RasterMeta {
        RasterMeta {
            width: 4,
            height: 3,
            count: 2,
            dtypes: vec![DType::I16; 2],
            transform,
            crs: None,
            nodata: vec![Some(-1.0); 2],
            block_shape: (1, 4),
            has_mask: false,
            compression: None,
            tiled: false,
        }
    }

    fn memory() -> (SharedBytes, Target) {
        let shared: SharedBytes = Arc::new(parking_lot::RwLock::new(Vec::new()));
        (Arc::clone(&shared), Target::Memory(shared))
    }

    fn i16s(bytes: &[u8]) -> Vec<i16> {
        bytes.chunks(2).map(|c| i16::from_ne_bytes([c[0], c[1]])).collect()
    }

    #[test]
    fn test_create_fills_with_nodata() {
        let (_, target) = memory();
        let handler = Arc::new(Recorder::default());
        let handle = GTiffHandle::create(target, meta(Affine::identity()), &CreationOptions::new(), &config(handler)).unwrap();
        let data = handle.decode(1, PixelRect::new(1, 1, 2, 2)).unwrap();
        assert_eq!(i16s(&data), vec![-1; 4]);
        assert!(handle.decode_mask(PixelRect::full(4, 3)).unwrap().is_none());
    }

    #[test]
    fn test_write_flush_reopen() {
        let (shared, target) = memory();
        let handler: Arc<dyn ErrorHandler> = Arc::new(Recorder::default());
        let transform = Affine::new(2.0, 0.0, 10.0, 0.0, -2.0, 20.0);
        let mut handle = GTiffHandle::create(target.clone(), meta(transform), &CreationOptions::new(), &config(handler.clone())).unwrap();

        let values: Vec<i16> = vec![5, 6, 7, 8];
        handle.encode(0, PixelRect::new(2, 1, 2, 2), bytemuck::cast_slice(&values)).unwrap();
        handle.encode_mask(PixelRect::new(0, 0, 1, 1), &[0]).unwrap();
        handle.flush().unwrap();
        assert!(!shared.read().is_empty());

        let source = ByteSource::Shared(Arc::clone(&shared));
        let reopened = GTiffHandle::open(source, None, &config(handler)).unwrap();
        let meta = reopened.meta();
        assert_eq!((meta.width, meta.height, meta.count), (4, 3, 2));
        assert_eq!(meta.transform, transform);
        assert_eq!(meta.nodata, vec![Some(-1.0); 2]);
        assert!(meta.has_mask);

        let band0 = i16s(&reopened.decode(0, PixelRect::full(4, 3)).unwrap());
        assert_eq!(band0, vec![-1, -1, -1, -1, -1, -1, 5, 6, -1, -1, 7, 8]);
        let mask = reopened.decode_mask(PixelRect::new(0, 0, 2, 1)).unwrap().unwrap();
        assert_eq!(mask, vec![0, 255]);
    }

    #[test]
    fn test_missing_georeferencing_warns() {
        let (shared, target) = memory();
        let quiet: Arc<dyn ErrorHandler> = Arc::new(Recorder::default());
        let mut m = meta(Affine::identity());
        m.count = 1;
        m.dtypes.truncate(1);
        m.nodata = vec![None];
        let mut handle = GTiffHandle::create(target, m, &CreationOptions::new(), &config(quiet)).unwrap();
        handle.flush().unwrap();

        let bytes = shared.read().clone();
        let tiff = TiffReader::new(ByteSource::Owned(Arc::new(bytes.clone()))).unwrap().read().unwrap();
        assert!(tiff.main_ifd().unwrap().is_geotiff());

        let recorder = Arc::new(Recorder::default());
        let stripped = strip_geotags(bytes);
        GTiffHandle::open(ByteSource::Owned(Arc::new(stripped)), None, &config(recorder.clone())).unwrap();
        let messages = recorder.0.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, Severity::Warning);
    }

    /// Renames the georeferencing tags of a little-endian classic TIFF
    fn strip_geotags(mut bytes: Vec<u8>) -> Vec<u8> {
        let ifd = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let count = u16::from_le_bytes([bytes[ifd], bytes[ifd + 1]]) as usize;
        for i in 0..count {
            let at = ifd + 2 + i * 12;
            let tag = u16::from_le_bytes([bytes[at], bytes[at + 1]]);
            if tag >= 33550 {
                bytes[at..at + 2].copy_from_slice(&65000u16.to_le_bytes());
            }
        }
        bytes
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let (shared, target) = memory();
        let handler: Arc<dyn ErrorHandler> = Arc::new(Recorder::default());
        let mut handle = GTiffHandle::create(target, meta(Affine::identity()), &CreationOptions::new(), &config(handler.clone())).unwrap();
        handle.flush().unwrap();

        let mut reopened = GTiffHandle::open(ByteSource::Shared(shared), None, &config(handler)).unwrap();
        assert!(matches!(
            reopened.encode(0, PixelRect::new(0, 0, 1, 1), &[0, 0]),
            Err(Error::Unsupported(_))
        ));
    }
}
