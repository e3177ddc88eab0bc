//! Image File Directory (IFD) structures

use std::collections::HashMap;
use crate::compression::Compression;
use crate::error::{Error, Result};
use crate::io::ByteOrder;
use crate::types::{DType, Dimensions};
use super::reader::tags::TagReader;
use super::tags::{self, field_types};

/// One IFD entry with its value bytes resolved
#[derive(Debug, Clone)]
pub struct IFDEntry {
    /// TIFF tag identifier
    pub tag: u16,
    pub field_type: u16,
    /// Number of values
    pub count: u64,
    /// Raw value bytes in the byte order of the owning IFD
    pub data: Vec<u8>,
}

impl IFDEntry {
    pub fn new(tag: u16, field_type: u16, count: u64, data: Vec<u8>) -> Self {
        Self { tag, field_type, count, data }
    }

    pub fn shorts(tag: u16, values: &[u16]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(tag, field_types::SHORT, values.len() as u64, data)
    }

    pub fn longs(tag: u16, values: &[u32]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(tag, field_types::LONG, values.len() as u64, data)
    }

    pub fn doubles(tag: u16, values: &[f64]) -> Self {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(tag, field_types::DOUBLE, values.len() as u64, data)
    }

    /// NUL-terminated ASCII value
    pub fn ascii(tag: u16, value: &str) -> Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        Self::new(tag, field_types::ASCII, data.len() as u64, data)
    }

    /// Whether the value fits in the entry's offset field
    pub fn is_inline(&self, is_big_tiff: bool) -> bool {
        let inline_size = if is_big_tiff { 8 } else { 4 };
        self.data.len() <= inline_size
    }
}

/// One Image File Directory
#[derive(Debug, Clone)]
pub struct IFD {
    /// IFD number (0-based)
    pub number: usize,
    /// Offset to this IFD in file
    pub offset: u64,
    pub byte_order: ByteOrder,
    pub entries: Vec<IFDEntry>,
    tag_map: HashMap<u16, usize>,
}

impl IFD {
    pub fn new(number: usize, offset: u64, byte_order: ByteOrder) -> Self {
        Self {
            number,
            offset,
            byte_order,
            entries: Vec::new(),
            tag_map: HashMap::new(),
        }
    }

    /// Adds an entry, replacing any earlier entry with the same tag
    pub fn add_entry(&mut self, entry: IFDEntry) {
        match self.tag_map.get(&entry.tag) {
            Some(&index) => self.entries[index] = entry,
            None => {
                self.tag_map.insert(entry.tag, self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    pub fn get_entry(&self, tag: u16) -> Option<&IFDEntry> {
        self.tag_map.get(&tag).and_then(|&idx| self.entries.get(idx))
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Entries in ascending tag order, as TIFF requires on disk
    pub fn sorted_entries(&self) -> Vec<&IFDEntry> {
        let mut entries: Vec<&IFDEntry> = self.entries.iter().collect();
        entries.sort_by_key(|e| e.tag);
        entries
    }

    fn tag_reader(&self) -> TagReader {
        TagReader::new(self.byte_order)
    }

    /// First value of an unsigned integer tag
    pub fn value(&self, tag: u16) -> Option<u64> {
        let entry = self.get_entry(tag)?;
        self.tag_reader().read_u64s(entry).ok()?.first().copied()
    }

    /// All values of a required unsigned integer tag
    pub fn values(&self, tag: u16) -> Result<Vec<u64>> {
        let entry = self.get_entry(tag).ok_or_else(|| missing(tag))?;
        self.tag_reader().read_u64s(entry)
    }

    pub fn shorts(&self, tag: u16) -> Result<Option<Vec<u16>>> {
        self.get_entry(tag).map(|e| self.tag_reader().read_u16s(e)).transpose()
    }

    pub fn doubles(&self, tag: u16) -> Result<Option<Vec<f64>>> {
        self.get_entry(tag).map(|e| self.tag_reader().read_doubles(e)).transpose()
    }

    pub fn ascii(&self, tag: u16) -> Result<Option<String>> {
        self.get_entry(tag).map(|e| self.tag_reader().read_ascii(e)).transpose()
    }

    /// Image dimensions; both tags are required
    pub fn dimensions(&self) -> Result<Dimensions> {
        let width = self.value(tags::IMAGE_WIDTH).ok_or_else(|| missing(tags::IMAGE_WIDTH))?;
        let height = self.value(tags::IMAGE_LENGTH).ok_or_else(|| missing(tags::IMAGE_LENGTH))?;
        if width == 0 || height == 0 {
            return Err(Error::Codec(format!("Invalid image dimensions {} x {}", width, height)));
        }
        Ok(Dimensions::new(width, height))
    }

    pub fn compression(&self) -> Result<Compression> {
        Compression::from_tag(self.value(tags::COMPRESSION).unwrap_or(1))
    }

    pub fn samples_per_pixel(&self) -> usize {
        self.value(tags::SAMPLES_PER_PIXEL).unwrap_or(1) as usize
    }

    /// Bits per sample; every sample must use the same width
    pub fn bits_per_sample(&self) -> Result<u16> {
        let bits = match self.get_entry(tags::BITS_PER_SAMPLE) {
            Some(entry) => self.tag_reader().read_u64s(entry)?,
            None => return Ok(1),
        };
        let first = bits.first().copied().unwrap_or(1);
        if bits.iter().any(|&b| b != first) {
            return Err(Error::Codec(format!("Mixed bits per sample {:?} are not supported", bits)));
        }
        Ok(first as u16)
    }

    /// Sample format (1=unsigned, 2=signed, 3=float, 6=complex float)
    pub fn sample_format(&self) -> u64 {
        self.value(tags::SAMPLE_FORMAT).unwrap_or(1)
    }

    pub fn predictor(&self) -> u64 {
        self.value(tags::PREDICTOR).unwrap_or(1)
    }

    /// Whether samples are stored one plane per band
    pub fn is_planar(&self) -> bool {
        self.value(tags::PLANAR_CONFIGURATION).unwrap_or(1) == 2
    }

    pub fn new_subfile_type(&self) -> u64 {
        self.value(tags::NEW_SUBFILE_TYPE).unwrap_or(0)
    }

    /// Whether this IFD is a transparency mask
    pub fn is_mask(&self) -> bool {
        self.new_subfile_type() & tags::SUBFILE_MASK != 0
    }

    /// Data type of the samples; 1-bit data decodes to bytes
    pub fn dtype(&self) -> Result<DType> {
        let bits = self.bits_per_sample()?;
        let format = self.sample_format();

        let dtype = match (format, bits) {
            (1 | 4, 1 | 8) => DType::U8,
            (1 | 4, 16) => DType::U16,
            (1 | 4, 32) => DType::U32,
            (1 | 4, 64) => DType::U64,
            (2, 8) => DType::I8,
            (2, 16) => DType::I16,
            (2, 32) => DType::I32,
            (2, 64) => DType::I64,
            (3, 32) => DType::F32,
            (3, 64) => DType::F64,
            (6, 64) => DType::C64,
            (6, 128) => DType::C128,
            _ => {
                return Err(Error::Codec(format!(
                    "Unsupported sample format {} with {} bits per sample",
                    format, bits
                )))
            }
        };
        Ok(dtype)
    }

    pub fn is_tiled(&self) -> bool {
        self.get_entry(tags::TILE_WIDTH).is_some()
    }

    /// Block size as `(rows, cols)`: tile size, or rows per strip by width
    pub fn block_shape(&self) -> Result<(usize, usize)> {
        let dims = self.dimensions()?;
        if self.is_tiled() {
            let cols = self.value(tags::TILE_WIDTH).ok_or_else(|| missing(tags::TILE_WIDTH))?;
            let rows = self.value(tags::TILE_LENGTH).ok_or_else(|| missing(tags::TILE_LENGTH))?;
            if cols == 0 || rows == 0 {
                return Err(Error::Codec("Tile dimensions must be non-zero".to_string()));
            }
            return Ok((rows as usize, cols as usize));
        }
        let rows = self
            .value(tags::ROWS_PER_STRIP)
            .unwrap_or(dims.height)
            .clamp(1, dims.height.max(1));
        Ok((rows as usize, dims.width as usize))
    }

    /// Offsets and byte counts of every block
    pub fn block_locations(&self) -> Result<(Vec<u64>, Vec<u64>)> {
        let (offsets_tag, counts_tag) = if self.is_tiled() {
            (tags::TILE_OFFSETS, tags::TILE_BYTE_COUNTS)
        } else {
            (tags::STRIP_OFFSETS, tags::STRIP_BYTE_COUNTS)
        };
        let offsets = self.values(offsets_tag)?;
        let counts = self.values(counts_tag)?;
        if offsets.len() != counts.len() {
            return Err(Error::Codec(format!(
                "{} offsets but {} byte counts",
                offsets.len(),
                counts.len()
            )));
        }
        Ok((offsets, counts))
    }

    /// Whether any GeoTIFF georeferencing tag is present
    pub fn is_geotiff(&self) -> bool {
        self.entries.iter().any(|e| {
            matches!(
                e.tag,
                tags::MODEL_PIXEL_SCALE
                    | tags::MODEL_TIEPOINT
                    | tags::MODEL_TRANSFORMATION
                    | tags::GEO_KEY_DIRECTORY
            )
        })
    }
}

fn missing(tag: u16) -> Error {
    Error::Codec(format!("Missing required tag {} ({})", tag, tags::tag_name(tag)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ifd(entries: Vec<IFDEntry>) -> IFD {
        let mut ifd = IFD::new(0, 8, ByteOrder::LittleEndian);
        for entry in entries {
            ifd.add_entry(entry);
        }
        ifd
    }

    #[test]
    fn test_entry_constructors() {
        let entry = IFDEntry::shorts(tags::BITS_PER_SAMPLE, &[8, 8]);
        assert_eq!(entry.count, 2);
        assert!(entry.is_inline(false));

        let entry = IFDEntry::doubles(tags::MODEL_PIXEL_SCALE, &[1.0, 1.0, 0.0]);
        assert_eq!(entry.data.len(), 24);
        assert!(!entry.is_inline(true));

        let entry = IFDEntry::ascii(tags::GDAL_NODATA, "0");
        assert_eq!(entry.data, b"0\0");
    }

    #[test]
    fn test_add_entry_replaces() {
        let mut ifd = ifd(vec![IFDEntry::longs(tags::IMAGE_WIDTH, &[10])]);
        ifd.add_entry(IFDEntry::longs(tags::IMAGE_WIDTH, &[20]));
        assert_eq!(ifd.entry_count(), 1);
        assert_eq!(ifd.value(tags::IMAGE_WIDTH), Some(20));
    }

    #[test]
    fn test_dimensions_and_defaults() {
        let ifd = ifd(vec![
            IFDEntry::longs(tags::IMAGE_WIDTH, &[1024]),
            IFDEntry::shorts(tags::IMAGE_LENGTH, &[768]),
        ]);
        let dims = ifd.dimensions().unwrap();
        assert_eq!((dims.width, dims.height), (1024, 768));
        assert_eq!(ifd.samples_per_pixel(), 1);
        assert_eq!(ifd.compression().unwrap(), Compression::None);
        assert!(!ifd.is_planar());
        assert!(!ifd.is_mask());
        // rows per strip defaults to the full height
        assert_eq!(ifd.block_shape().unwrap(), (768, 1024));
    }

    #[test]
    fn test_missing_dimension_is_codec_error() {
        let ifd = ifd(vec![IFDEntry::longs(tags::IMAGE_WIDTH, &[4])]);
        assert!(matches!(ifd.dimensions(), Err(Error::Codec(_))));
    }

    #[test]
    fn test_zero_dimension_is_codec_error() {
        for (width, height) in [(0, 3), (4, 0)] {
            let ifd = ifd(vec![
                IFDEntry::longs(tags::IMAGE_WIDTH, &[width]),
                IFDEntry::longs(tags::IMAGE_LENGTH, &[height]),
            ]);
            assert!(matches!(ifd.dimensions(), Err(Error::Codec(_))));
            assert!(ifd.block_shape().is_err());
        }
    }

    #[test]
    fn test_dtype_mapping() {
        let cases = [
            (1, 8, DType::U8),
            (2, 16, DType::I16),
            (1, 64, DType::U64),
            (3, 32, DType::F32),
            (3, 64, DType::F64),
            (6, 64, DType::C64),
            (6, 128, DType::C128),
        ];
        for (format, bits, expected) in cases {
            let ifd = ifd(vec![
                IFDEntry::shorts(tags::BITS_PER_SAMPLE, &[bits]),
                IFDEntry::shorts(tags::SAMPLE_FORMAT, &[format]),
            ]);
            assert_eq!(ifd.dtype().unwrap(), expected);
        }

        let ifd = ifd(vec![
            IFDEntry::shorts(tags::BITS_PER_SAMPLE, &[16]),
            IFDEntry::shorts(tags::SAMPLE_FORMAT, &[3]),
        ]);
        assert!(matches!(ifd.dtype(), Err(Error::Codec(_))));
    }

    #[test]
    fn test_mixed_bits_rejected() {
        let ifd = ifd(vec![IFDEntry::shorts(tags::BITS_PER_SAMPLE, &[8, 16])]);
        assert!(ifd.bits_per_sample().is_err());
    }

    #[test]
    fn test_tiled_block_shape() {
        let ifd = ifd(vec![
            IFDEntry::longs(tags::IMAGE_WIDTH, &[100]),
            IFDEntry::longs(tags::IMAGE_LENGTH, &[50]),
            IFDEntry::longs(tags::TILE_WIDTH, &[32]),
            IFDEntry::longs(tags::TILE_LENGTH, &[16]),
        ]);
        assert!(ifd.is_tiled());
        assert_eq!(ifd.block_shape().unwrap(), (16, 32));
    }

    #[test]
    fn test_mask_subfile() {
        let ifd = ifd(vec![IFDEntry::longs(tags::NEW_SUBFILE_TYPE, &[4])]);
        assert!(ifd.is_mask());
    }

    #[test]
    fn test_block_locations_length_mismatch() {
        let ifd = ifd(vec![
            IFDEntry::longs(tags::STRIP_OFFSETS, &[8, 100]),
            IFDEntry::longs(tags::STRIP_BYTE_COUNTS, &[92]),
        ]);
        assert!(ifd.block_locations().is_err());
    }
}
