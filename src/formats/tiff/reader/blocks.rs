//! Strip and tile decoding
//!
//! Strips are treated as blocks one image wide. Every decoded block is
//! padded to the full block size and converted to native byte order, so
//! copying a rectangle out of it is plain index arithmetic.

use std::sync::Arc;
use tracing::trace;
use crate::cache::BlockCache;
use crate::compression::{jpeg, Compression};
use crate::driver::{ByteSource, PixelRect};
use crate::error::{Error, Result};
use crate::io::ByteOrder;
use crate::types::DType;
use crate::formats::tiff::{IFD, tags};
use super::parallel::DecodePool;

/// Geometry of the block grid of one IFD
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    pub width: usize,
    pub height: usize,
    pub block_rows: usize,
    pub block_cols: usize,
    pub samples_per_pixel: usize,
    pub planar: bool,
    pub tiled: bool,
    pub dtype: DType,
    /// Bits per stored sample; 1 for bilevel masks
    pub bits: u16,
}

impl BlockLayout {
    pub fn from_ifd(ifd: &IFD) -> Result<Self> {
        let dims = ifd.dimensions()?;
        let (block_rows, block_cols) = ifd.block_shape()?;
        let layout = Self {
            width: dims.width as usize,
            height: dims.height as usize,
            block_rows,
            block_cols,
            samples_per_pixel: ifd.samples_per_pixel(),
            planar: ifd.is_planar(),
            tiled: ifd.is_tiled(),
            dtype: ifd.dtype()?,
            bits: ifd.bits_per_sample()?,
        };
        if layout.samples_per_pixel == 0 {
            return Err(Error::Codec("SamplesPerPixel must be at least 1".to_string()));
        }
        if layout.bits == 1 && layout.samples_per_pixel != 1 {
            return Err(Error::Codec("1-bit data is only supported with one sample per pixel".to_string()));
        }
        Ok(layout)
    }

    pub fn blocks_across(&self) -> usize {
        self.width.div_ceil(self.block_cols)
    }

    pub fn blocks_down(&self) -> usize {
        self.height.div_ceil(self.block_rows)
    }

    pub fn blocks_per_plane(&self) -> usize {
        self.blocks_across() * self.blocks_down()
    }

    pub fn block_count(&self) -> usize {
        let planes = if self.planar { self.samples_per_pixel } else { 1 };
        self.blocks_per_plane() * planes
    }

    /// Samples interleaved per pixel within one block
    pub fn interleaved(&self) -> usize {
        if self.planar { 1 } else { self.samples_per_pixel }
    }

    /// Bytes per sample once decoded
    pub fn sample_size(&self) -> usize {
        if self.bits == 1 { 1 } else { self.dtype.size() }
    }

    pub fn block_index(&self, band: usize, block_col: usize, block_row: usize) -> usize {
        let plane = if self.planar { band } else { 0 };
        plane * self.blocks_per_plane() + block_row * self.blocks_across() + block_col
    }

    /// Block row of a block index
    fn block_row_of(&self, index: usize) -> usize {
        (index % self.blocks_per_plane()) / self.blocks_across()
    }

    /// Rows stored for a block row; the last strip may be short
    pub fn stored_rows(&self, block_row: usize) -> usize {
        if self.tiled {
            self.block_rows
        } else {
            self.block_rows.min(self.height.saturating_sub(block_row * self.block_rows))
        }
    }

    /// Bytes per row of a block as stored
    pub fn stored_row_bytes(&self) -> usize {
        if self.bits == 1 {
            self.block_cols.div_ceil(8)
        } else {
            self.block_cols * self.interleaved() * self.dtype.size()
        }
    }

    /// Bytes of a decoded, padded block
    pub fn block_len(&self) -> usize {
        self.block_rows * self.block_cols * self.interleaved() * self.sample_size()
    }

    /// Indexes of the blocks of `band` that intersect `rect`
    pub fn blocks_for(&self, band: usize, rect: PixelRect) -> Vec<usize> {
        if rect.is_empty() {
            return Vec::new();
        }
        let first_col = rect.col_off / self.block_cols;
        let last_col = (rect.col_off + rect.width - 1) / self.block_cols;
        let first_row = rect.row_off / self.block_rows;
        let last_row = (rect.row_off + rect.height - 1) / self.block_rows;

        (first_row..=last_row)
            .flat_map(|by| (first_col..=last_col).map(move |bx| (bx, by)))
            .map(|(bx, by)| self.block_index(band, bx, by))
            .collect()
    }
}

/// Decodes blocks of one IFD through a shared cache
pub struct BlockReader {
    source: ByteSource,
    byte_order: ByteOrder,
    ifd_index: usize,
    layout: BlockLayout,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
    compression: Compression,
    predictor: u64,
    jpeg_tables: Option<Vec<u8>>,
    /// One sample used for sparse blocks, native order
    fill: Vec<u8>,
    cache: BlockCache,
}

impl BlockReader {
    /// Prepares decoding of `ifd`; sparse blocks read as `fill` (or zero)
    pub fn new(source: ByteSource, ifd: &IFD, cache: BlockCache, fill: Option<f64>) -> Result<Self> {
        let layout = BlockLayout::from_ifd(ifd)?;
        let (offsets, byte_counts) = ifd.block_locations()?;
        if offsets.len() < layout.block_count() {
            return Err(Error::Codec(format!(
                "IFD {} has {} blocks, expected {}",
                ifd.number,
                offsets.len(),
                layout.block_count()
            )));
        }

        let compression = ifd.compression()?;
        if compression == Compression::Jpeg && layout.dtype != DType::U8 {
            return Err(Error::Codec(format!("JPEG compression of {} data is not supported", layout.dtype)));
        }

        let predictor = ifd.predictor();
        match predictor {
            1 => {}
            2 if layout.bits == 1 => {}
            2 if !layout.dtype.is_complex() && matches!(layout.dtype.size(), 1 | 2 | 4 | 8) => {}
            3 => return Err(Error::Codec("Floating point predictor (3) is not supported".to_string())),
            other => {
                return Err(Error::Codec(format!(
                    "Predictor {} is not supported for {} data",
                    other, layout.dtype
                )))
            }
        }

        let jpeg_tables = match ifd.get_entry(tags::JPEG_TABLES) {
            Some(entry) if compression == Compression::Jpeg => Some(entry.data.clone()),
            _ => None,
        };

        let fill = match fill {
            Some(value) if layout.bits != 1 => layout.dtype.encode_value(value),
            _ => vec![0; layout.sample_size()],
        };

        Ok(Self {
            source,
            byte_order: ifd.byte_order,
            ifd_index: ifd.number,
            layout,
            offsets,
            byte_counts,
            compression,
            predictor,
            jpeg_tables,
            fill,
            cache,
        })
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn ifd_index(&self) -> usize {
        self.ifd_index
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// Cached or freshly decoded block
    pub fn block(&self, index: usize) -> Result<Arc<Vec<u8>>> {
        if let Some(block) = self.cache.get(self.ifd_index, index) {
            return Ok(block);
        }
        let block = self.load_block(index)?;
        Ok(self.cache.insert(self.ifd_index, index, block))
    }

    /// Decodes one block without consulting the cache
    pub fn load_block(&self, index: usize) -> Result<Vec<u8>> {
        let (offset, byte_count) = match (self.offsets.get(index), self.byte_counts.get(index)) {
            (Some(&offset), Some(&count)) => (offset, count),
            _ => return Err(Error::Codec(format!("Block index {} out of range", index))),
        };

        if offset == 0 || byte_count == 0 {
            trace!(ifd = self.ifd_index, block = index, "sparse block");
            return Ok(self.fill.repeat(self.layout.block_len() / self.fill.len()));
        }

        let raw = self
            .source
            .read_vec(offset, byte_count as usize)
            .map_err(|e| Error::Codec(format!("Block {} at offset {}: {}", index, offset, e)))?;

        let mut data = match (&self.compression, &self.jpeg_tables) {
            (Compression::Jpeg, Some(tables)) => jpeg::decompress_with_tables(&raw, tables)?,
            (compression, _) => compression.decompress(&raw)?,
        };

        let row_bytes = self.layout.stored_row_bytes();
        let stored_rows = self.layout.stored_rows(self.layout.block_row_of(index));
        data.resize(stored_rows * row_bytes, 0);

        if self.layout.bits == 1 {
            return Ok(unpack_bits(&data, row_bytes, &self.layout));
        }

        if self.predictor == 2 {
            undo_horizontal_differencing(
                &mut data,
                row_bytes,
                self.layout.interleaved(),
                self.layout.dtype.size(),
                self.byte_order,
            );
        }
        self.byte_order.to_native(&mut data, self.layout.dtype.component_size());
        data.resize(self.layout.block_len(), 0);
        Ok(data)
    }

    /// Native-endian samples of `band` within `rect`
    pub fn read_rect(&self, band: usize, rect: PixelRect, pool: &DecodePool) -> Result<Vec<u8>> {
        let layout = &self.layout;
        let size = layout.sample_size();
        let mut out = vec![0u8; rect.len() * size];
        if rect.is_empty() {
            return Ok(out);
        }

        let indices = layout.blocks_for(band, rect);
        let blocks = pool.decode_blocks(self, &indices)?;
        let sample = if layout.planar { 0 } else { band };
        let stride = layout.interleaved();

        for (&index, block) in indices.iter().zip(blocks.iter()) {
            let within = index % layout.blocks_per_plane();
            let (bx, by) = (within % layout.blocks_across(), within / layout.blocks_across());
            let block_col0 = bx * layout.block_cols;
            let block_row0 = by * layout.block_rows;

            let col_start = rect.col_off.max(block_col0);
            let col_stop = (rect.col_off + rect.width).min(block_col0 + layout.block_cols);
            let row_start = rect.row_off.max(block_row0);
            let row_stop = (rect.row_off + rect.height).min(block_row0 + layout.block_rows);

            for row in row_start..row_stop {
                let src_row = (row - block_row0) * layout.block_cols;
                let dst_row = (row - rect.row_off) * rect.width;
                if stride == 1 {
                    let src = (src_row + col_start - block_col0) * size;
                    let dst = (dst_row + col_start - rect.col_off) * size;
                    let n = (col_stop - col_start) * size;
                    out[dst..dst + n].copy_from_slice(&block[src..src + n]);
                    continue;
                }
                for col in col_start..col_stop {
                    let src = ((src_row + col - block_col0) * stride + sample) * size;
                    let dst = (dst_row + col - rect.col_off) * size;
                    out[dst..dst + size].copy_from_slice(&block[src..src + size]);
                }
            }
        }
        Ok(out)
    }
}

/// Reverses horizontal differencing on values still in file byte order
fn undo_horizontal_differencing(data: &mut [u8], row_bytes: usize, stride: usize, word: usize, order: ByteOrder) {
    if word == 1 {
        for row in data.chunks_exact_mut(row_bytes) {
            for i in stride..row.len() {
                row[i] = row[i].wrapping_add(row[i - stride]);
            }
        }
        return;
    }

    let mask = if word == 8 { u64::MAX } else { (1u64 << (word * 8)) - 1 };
    for row in data.chunks_exact_mut(row_bytes) {
        let values = row.len() / word;
        for i in stride..values {
            let prev = order.decode_uint(&row[(i - stride) * word..(i - stride + 1) * word]);
            let cur = &mut row[i * word..(i + 1) * word];
            let sum = order.decode_uint(cur).wrapping_add(prev) & mask;
            order.encode_uint(sum, cur);
        }
    }
}

/// Expands MSB-first bilevel rows to one byte per pixel (0 or 1)
fn unpack_bits(data: &[u8], row_bytes: usize, layout: &BlockLayout) -> Vec<u8> {
    let mut out = vec![0u8; layout.block_len()];
    for (row, bits) in data.chunks(row_bytes).enumerate().take(layout.block_rows) {
        let dst = &mut out[row * layout.block_cols..(row + 1) * layout.block_cols];
        for (col, value) in dst.iter_mut().enumerate() {
            let byte = bits.get(col / 8).copied().unwrap_or(0);
            if byte & (0x80 >> (col % 8)) != 0 {
                *value = 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::tiff::IFDEntry;

    fn layout(width: usize, height: usize, block: (usize, usize), spp: usize, planar: bool) -> BlockLayout {
        BlockLayout {
            width,
            height,
            block_rows: block.0,
            block_cols: block.1,
            samples_per_pixel: spp,
            planar,
            tiled: block.1 != width,
            dtype: DType::U8,
            bits: 8,
        }
    }

    /// A 5x3 single-band strip image with two strips, stored uncompressed
    fn strip_source(values: &[u8], rows_per_strip: usize, fill: Option<f64>) -> BlockReader {
        let mut bytes = vec![0u8; 8];
        let mut offsets = Vec::new();
        let mut counts = Vec::new();
        for chunk in values.chunks(5 * rows_per_strip) {
            offsets.push(bytes.len() as u32);
            counts.push(chunk.len() as u32);
            bytes.extend_from_slice(chunk);
        }
        let mut ifd = IFD::new(0, 0, ByteOrder::LittleEndian);
        ifd.add_entry(IFDEntry::longs(tags::IMAGE_WIDTH, &[5]));
        ifd.add_entry(IFDEntry::longs(tags::IMAGE_LENGTH, &[3]));
        ifd.add_entry(IFDEntry::shorts(tags::BITS_PER_SAMPLE, &[8]));
        ifd.add_entry(IFDEntry::longs(tags::ROWS_PER_STRIP, &[rows_per_strip as u32]));
        ifd.add_entry(IFDEntry::longs(tags::STRIP_OFFSETS, &offsets));
        ifd.add_entry(IFDEntry::longs(tags::STRIP_BYTE_COUNTS, &counts));
        let source = ByteSource::Owned(Arc::new(bytes));
        BlockReader::new(source, &ifd, BlockCache::new(4), fill).unwrap()
    }

    #[test]
    fn test_layout_counts() {
        let l = layout(100, 50, (16, 32), 3, true);
        assert_eq!(l.blocks_across(), 4);
        assert_eq!(l.blocks_down(), 4);
        assert_eq!(l.block_count(), 48);
        assert_eq!(l.block_index(2, 1, 3), 2 * 16 + 3 * 4 + 1);
        assert_eq!(l.interleaved(), 1);

        let chunky = layout(100, 50, (16, 32), 3, false);
        assert_eq!(chunky.block_count(), 16);
        assert_eq!(chunky.block_index(2, 1, 3), 13);
        assert_eq!(chunky.block_len(), 16 * 32 * 3);
    }

    #[test]
    fn test_short_last_strip() {
        let l = layout(10, 7, (3, 10), 1, false);
        assert!(!l.tiled);
        assert_eq!(l.stored_rows(0), 3);
        assert_eq!(l.stored_rows(2), 1);
    }

    #[test]
    fn test_blocks_for_rect() {
        let l = layout(100, 50, (16, 32), 1, false);
        assert_eq!(l.blocks_for(0, PixelRect::new(30, 10, 4, 10)), vec![0, 1, 4, 5]);
        assert!(l.blocks_for(0, PixelRect::new(0, 0, 0, 5)).is_empty());
    }

    #[test]
    fn test_read_rect_across_strips() {
        let values: Vec<u8> = (1..=15).collect();
        let reader = strip_source(&values, 2, None);
        let pool = DecodePool::Sequential;

        let all = reader.read_rect(0, PixelRect::full(5, 3), &pool).unwrap();
        assert_eq!(all, values);

        let part = reader.read_rect(0, PixelRect::new(1, 1, 3, 2), &pool).unwrap();
        assert_eq!(part, vec![7, 8, 9, 12, 13, 14]);
        assert_eq!(reader.cache().len(), 2);
    }

    #[test]
    fn test_sparse_block_uses_fill() {
        let values: Vec<u8> = (1..=15).collect();
        let mut reader = strip_source(&values, 2, Some(99.0));
        reader.byte_counts[1] = 0;
        let out = reader.read_rect(0, PixelRect::full(5, 3), &DecodePool::Sequential).unwrap();
        assert_eq!(&out[..10], &values[..10]);
        assert_eq!(&out[10..], &[99; 5]);
    }

    #[test]
    fn test_undo_predictor_bytes() {
        let mut data = vec![1, 2, 3, 4, 5, 6];
        undo_horizontal_differencing(&mut data, 3, 1, 1, ByteOrder::LittleEndian);
        assert_eq!(data, vec![1, 3, 6, 4, 9, 15]);
    }

    #[test]
    fn test_undo_predictor_chunky_u16_big_endian() {
        // two pixels of two samples: deltas (1, 300) then (2, 65535)
        let mut data = Vec::new();
        for v in [1u16, 300, 2, 65535] {
            data.extend_from_slice(&v.to_be_bytes());
        }
        undo_horizontal_differencing(&mut data, 8, 2, 2, ByteOrder::BigEndian);
        let decoded: Vec<u16> = data.chunks(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
        assert_eq!(decoded, vec![1, 300, 3, 299]);
    }

    #[test]
    fn test_unpack_bits() {
        let mut l = layout(10, 2, (2, 10), 1, false);
        l.bits = 1;
        let data = vec![0b1010_0000, 0b1100_0000, 0xFF, 0x00];
        let out = unpack_bits(&data, 2, &l);
        assert_eq!(&out[..10], &[1, 0, 1, 0, 0, 0, 0, 0, 1, 1]);
        assert_eq!(&out[10..], &[1, 1, 1, 1, 1, 1, 1, 1, 0, 0]);
    }
}
