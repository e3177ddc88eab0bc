//! GeoTIFF serialization
//!
//! Produces little-endian classic TIFF: the image data blocks, then the
//! mask blocks, then the main IFD followed by the mask IFD. Bands are
//! always stored one plane each.

use tracing::debug;
use crate::compression::Compression;
use crate::driver::{CreationOptions, RasterMeta};
use crate::error::{Error, Result};
use crate::io::ByteOrder;
use crate::types::DType;
use super::geotiff::GeoInfo;
use super::ifd::IFDEntry;
use super::{tags, TIFF_MAGIC};

const DEFAULT_TILE_SIZE: usize = 256;
/// Target uncompressed strip size
const STRIP_BYTES: usize = 8192;

/// Block layout and compression of written files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub compression: Compression,
    pub tiled: bool,
    /// Block size `(rows, cols)`
    pub block_shape: (usize, usize),
}

impl WriteOptions {
    /// Parses `COMPRESS`, `TILED`, `BLOCKXSIZE` and `BLOCKYSIZE`
    pub fn from_creation_options(options: &CreationOptions, width: usize, sample_size: usize) -> Result<Self> {
        let get = |key: &str| {
            options
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.as_str())
        };

        let compression = match get("COMPRESS") {
            Some(name) => Compression::from_name(name)?,
            None => Compression::None,
        };
        let tiled = match get("TILED") {
            Some(value) => crate::env::parse_bool(value)
                .ok_or_else(|| Error::Unsupported(format!("TILED={}", value)))?,
            None => false,
        };
        let block_cols = get("BLOCKXSIZE").map(|v| parse_size("BLOCKXSIZE", v)).transpose()?;
        let block_rows = get("BLOCKYSIZE").map(|v| parse_size("BLOCKYSIZE", v)).transpose()?;

        let block_shape = if tiled {
            let rows = block_rows.unwrap_or(DEFAULT_TILE_SIZE);
            let cols = block_cols.unwrap_or(DEFAULT_TILE_SIZE);
            if rows % 16 != 0 || cols % 16 != 0 {
                return Err(Error::Unsupported(format!(
                    "tile size {}x{}; tile dimensions must be multiples of 16",
                    cols, rows
                )));
            }
            (rows, cols)
        } else {
            let row_bytes = (width * sample_size).max(1);
            let rows = block_rows.unwrap_or((STRIP_BYTES / row_bytes).max(1));
            (rows, width)
        };

        Ok(Self { compression, tiled, block_shape })
    }

    /// Options preserving the layout of an existing file
    pub fn preserving(compression: Compression, tiled: bool, block_shape: (usize, usize)) -> Self {
        let compression = match compression {
            Compression::Lzw | Compression::Jpeg => {
                debug!(from = compression.name(), "rewriting with DEFLATE compression");
                Compression::Deflate
            }
            other => other,
        };
        Self { compression, tiled, block_shape }
    }
}

fn parse_size(key: &str, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Unsupported(format!("{}={}", key, value))),
    }
}

/// TIFF `SampleFormat` of a data type
fn sample_format(dtype: DType) -> u16 {
    match dtype {
        DType::U8 | DType::U16 | DType::U32 | DType::U64 => 1,
        DType::I8 | DType::I16 | DType::I32 | DType::I64 => 2,
        DType::F32 | DType::F64 => 3,
        DType::C64 | DType::C128 => 6,
    }
}

/// Serializes full band planes into GeoTIFF bytes
pub struct TiffWriter<'a> {
    meta: &'a RasterMeta,
    options: WriteOptions,
}

impl<'a> TiffWriter<'a> {
    pub fn new(meta: &'a RasterMeta, options: WriteOptions) -> Self {
        Self { meta, options }
    }

    /// Encodes native-endian `planes` (one per band) and an optional
    /// 0/255 mask plane
    pub fn write(&self, planes: &[Vec<u8>], mask: Option<&[u8]>) -> Result<Vec<u8>> {
        let meta = self.meta;
        let dtype = uniform_dtype(meta)?;
        let pixels = meta.width * meta.height;
        if planes.len() != meta.count || planes.iter().any(|p| p.len() != pixels * dtype.size()) {
            return Err(Error::Codec("Band planes do not match the raster shape".to_string()));
        }
        if mask.is_some_and(|m| m.len() != pixels) {
            return Err(Error::Codec("Mask plane does not match the raster shape".to_string()));
        }

        let mut out = Vec::new();
        out.extend_from_slice(b"II");
        out.extend_from_slice(&TIFF_MAGIC.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());

        let mut offsets = Vec::new();
        let mut counts = Vec::new();
        for plane in planes {
            let mut plane = plane.clone();
            ByteOrder::LittleEndian.to_native(&mut plane, dtype.component_size());
            self.write_blocks(&mut out, &plane, dtype.size(), &mut offsets, &mut counts)?;
        }

        let mut mask_locations = None;
        if let Some(mask) = mask {
            let mut mask_offsets = Vec::new();
            let mut mask_counts = Vec::new();
            self.write_blocks(&mut out, mask, 1, &mut mask_offsets, &mut mask_counts)?;
            mask_locations = Some((mask_offsets, mask_counts));
        }

        let mut entries = self.image_entries(dtype, meta.count, &offsets, &counts);
        let geo = GeoInfo {
            transform: Some(meta.transform),
            crs: meta.crs.clone(),
            nodata: meta.nodata.first().copied().flatten(),
        };
        entries.extend(geo.to_entries());

        let first_ifd = align(&mut out);
        patch_u32(&mut out, 4, to_u32(first_ifd)?);
        let next_pointer = write_ifd(&mut out, entries)?;

        if let Some((mask_offsets, mask_counts)) = mask_locations {
            let mut mask_entries = self.image_entries(DType::U8, 1, &mask_offsets, &mask_counts);
            mask_entries.retain(|e| e.tag != tags::PHOTOMETRIC_INTERPRETATION);
            mask_entries.push(IFDEntry::longs(tags::NEW_SUBFILE_TYPE, &[tags::SUBFILE_MASK as u32]));
            mask_entries.push(IFDEntry::shorts(
                tags::PHOTOMETRIC_INTERPRETATION,
                &[tags::PHOTOMETRIC_MASK as u16],
            ));
            let mask_ifd = align(&mut out);
            patch_u32(&mut out, next_pointer, to_u32(mask_ifd)?);
            write_ifd(&mut out, mask_entries)?;
        }

        debug!(
            bytes = out.len(),
            bands = meta.count,
            compression = self.options.compression.name(),
            tiled = self.options.tiled,
            "serialized GeoTIFF"
        );
        Ok(out)
    }

    /// Appends the compressed blocks of one plane
    fn write_blocks(
        &self,
        out: &mut Vec<u8>,
        plane: &[u8],
        sample_size: usize,
        offsets: &mut Vec<u32>,
        counts: &mut Vec<u32>,
    ) -> Result<()> {
        let (width, height) = (self.meta.width, self.meta.height);
        let (block_rows, block_cols) = self.options.block_shape;
        let row_bytes = width * sample_size;

        for row0 in (0..height).step_by(block_rows) {
            for col0 in (0..width).step_by(block_cols) {
                let block = if self.options.tiled {
                    let mut block = vec![0u8; block_rows * block_cols * sample_size];
                    let cols = block_cols.min(width - col0);
                    for r in 0..block_rows.min(height - row0) {
                        let src = (row0 + r) * row_bytes + col0 * sample_size;
                        let dst = r * block_cols * sample_size;
                        block[dst..dst + cols * sample_size].copy_from_slice(&plane[src..src + cols * sample_size]);
                    }
                    block
                } else {
                    let rows = block_rows.min(height - row0);
                    plane[row0 * row_bytes..(row0 + rows) * row_bytes].to_vec()
                };

                let encoded = self.options.compression.compress(&block)?;
                offsets.push(to_u32(out.len())?);
                counts.push(to_u32(encoded.len())?);
                out.extend_from_slice(&encoded);
            }
        }
        Ok(())
    }

    fn image_entries(&self, dtype: DType, samples: usize, offsets: &[u32], counts: &[u32]) -> Vec<IFDEntry> {
        let (block_rows, block_cols) = self.options.block_shape;
        let samples16 = samples as u16;
        let bits = (dtype.size() * 8) as u16;

        let mut entries = vec![
            IFDEntry::longs(tags::IMAGE_WIDTH, &[self.meta.width as u32]),
            IFDEntry::longs(tags::IMAGE_LENGTH, &[self.meta.height as u32]),
            IFDEntry::shorts(tags::BITS_PER_SAMPLE, &vec![bits; samples]),
            IFDEntry::shorts(tags::COMPRESSION, &[self.options.compression.tag()]),
            IFDEntry::shorts(tags::PHOTOMETRIC_INTERPRETATION, &[1]),
            IFDEntry::shorts(tags::SAMPLES_PER_PIXEL, &[samples16]),
            IFDEntry::shorts(tags::PLANAR_CONFIGURATION, &[if samples > 1 { 2 } else { 1 }]),
            IFDEntry::shorts(tags::SAMPLE_FORMAT, &vec![sample_format(dtype); samples]),
        ];
        if samples > 1 {
            entries.push(IFDEntry::shorts(tags::EXTRA_SAMPLES, &vec![0; samples - 1]));
        }
        if self.options.tiled {
            entries.push(IFDEntry::longs(tags::TILE_WIDTH, &[block_cols as u32]));
            entries.push(IFDEntry::longs(tags::TILE_LENGTH, &[block_rows as u32]));
            entries.push(IFDEntry::longs(tags::TILE_OFFSETS, offsets));
            entries.push(IFDEntry::longs(tags::TILE_BYTE_COUNTS, counts));
        } else {
            entries.push(IFDEntry::longs(tags::ROWS_PER_STRIP, &[block_rows as u32]));
            entries.push(IFDEntry::longs(tags::STRIP_OFFSETS, offsets));
            entries.push(IFDEntry::longs(tags::STRIP_BYTE_COUNTS, counts));
        }
        entries
    }
}

/// Every band must share one data type
fn uniform_dtype(meta: &RasterMeta) -> Result<DType> {
    let first = *meta
        .dtypes
        .first()
        .ok_or_else(|| Error::Codec("Raster has no bands".to_string()))?;
    if meta.dtypes.iter().any(|&d| d != first) {
        return Err(Error::Unsupported("bands of different data types in one GeoTIFF".to_string()));
    }
    Ok(first)
}

/// Writes an IFD at the end of `out`; returns the position of its
/// next-IFD pointer
fn write_ifd(out: &mut Vec<u8>, mut entries: Vec<IFDEntry>) -> Result<usize> {
    entries.sort_by_key(|e| e.tag);
    entries.dedup_by_key(|e| e.tag);

    let start = out.len();
    let mut external = start + 2 + entries.len() * 12 + 4;
    let mut values = Vec::new();

    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in &entries {
        out.extend_from_slice(&entry.tag.to_le_bytes());
        out.extend_from_slice(&entry.field_type.to_le_bytes());
        out.extend_from_slice(&to_u32(entry.count as usize)?.to_le_bytes());
        if entry.is_inline(false) {
            let mut inline = [0u8; 4];
            inline[..entry.data.len()].copy_from_slice(&entry.data);
            out.extend_from_slice(&inline);
        } else {
            out.extend_from_slice(&to_u32(external)?.to_le_bytes());
            values.extend_from_slice(&entry.data);
            if values.len() % 2 == 1 {
                values.push(0);
            }
            external = start + 2 + entries.len() * 12 + 4 + values.len();
        }
    }

    let next_pointer = out.len();
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&values);
    Ok(next_pointer)
}

/// Pads to a word boundary and returns the new length
fn align(out: &mut Vec<u8>) -> usize {
    if out.len() % 2 == 1 {
        out.push(0);
    }
    out.len()
}

fn patch_u32(out: &mut [u8], at: usize, value: u32) {
    out[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Unsupported("GeoTIFF output larger than 4 GiB".to_string()))
}
