//! Codec collaborator contract
//!
//! A [`Driver`] recognizes and opens one raster format; the
//! [`RasterHandle`] it returns decodes and encodes rectangles of one band
//! at a time as native-endian bytes. Datasets never look inside the bytes
//! beyond the [`RasterMeta`] a handle reports.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use memmap2::Mmap;
use crate::env::ErrorHandler;
use crate::error::{Error, Result};
use crate::transform::Affine;
use crate::types::DType;
use crate::vfs::SharedBytes;

/// Format metadata reported by a handle
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMeta {
    pub width: usize,
    pub height: usize,
    pub count: usize,
    /// Data type per band
    pub dtypes: Vec<DType>,
    pub transform: Affine,
    /// Opaque spatial reference, such as `"EPSG:32618"`
    pub crs: Option<String>,
    /// Nodata sentinel per band
    pub nodata: Vec<Option<f64>>,
    /// Natural block size `(rows, cols)`
    pub block_shape: (usize, usize),
    /// Whether the source stores a per-pixel validity mask
    pub has_mask: bool,
    pub compression: Option<String>,
    pub tiled: bool,
}

/// Integer pixel rectangle, always inside the raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelRect {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self { col_off, row_off, width, height }
    }

    pub fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn len(&self) -> usize {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fits(&self, width: usize, height: usize) -> bool {
        self.col_off + self.width <= width && self.row_off + self.height <= height
    }
}

/// Format-specific creation options, keys upper-cased
pub type CreationOptions = BTreeMap<String, String>;

/// Read access to the bytes of a dataset
#[derive(Clone)]
pub enum ByteSource {
    /// Memory-mapped local file
    Mapped(Arc<Mmap>),
    /// In-memory virtual file, possibly still growing
    Shared(SharedBytes),
    /// Bytes loaded up front
    Owned(Arc<Vec<u8>>),
}

impl ByteSource {
    /// Opens a local file, memory-mapping it when `use_mmap` is set
    pub fn from_path(path: &Path, use_mmap: bool) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if !use_mmap || len == 0 {
            let mut bytes = Vec::with_capacity(len as usize);
            (&file).read_to_end(&mut bytes)?;
            return Ok(ByteSource::Owned(Arc::new(bytes)));
        }

        // SAFETY: the mapping is read-only; files rewritten in place are
        // loaded through the `Owned` branch instead.
        let mmap = unsafe { Mmap::map(&file)? };
        #[cfg(unix)]
        unsafe {
            libc::madvise(mmap.as_ptr() as *mut libc::c_void, mmap.len(), libc::MADV_WILLNEED);
        }
        Ok(ByteSource::Mapped(Arc::new(mmap)))
    }

    pub fn len(&self) -> usize {
        match self {
            ByteSource::Mapped(mmap) => mmap.len(),
            ByteSource::Shared(bytes) => bytes.read().len(),
            ByteSource::Owned(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fills `buf` from `offset`, failing with `UnexpectedEof` past the end
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        fn copy(src: &[u8], offset: u64, buf: &mut [u8]) -> io::Result<()> {
            let start = usize::try_from(offset).map_err(|_| eof(offset))?;
            let end = start.checked_add(buf.len()).ok_or_else(|| eof(offset))?;
            let chunk = src.get(start..end).ok_or_else(|| eof(offset))?;
            buf.copy_from_slice(chunk);
            Ok(())
        }
        fn eof(offset: u64) -> io::Error {
            io::Error::new(io::ErrorKind::UnexpectedEof, format!("read past end of data at offset {}", offset))
        }

        match self {
            ByteSource::Mapped(mmap) => copy(mmap, offset, buf),
            ByteSource::Shared(bytes) => copy(&bytes.read(), offset, buf),
            ByteSource::Owned(bytes) => copy(bytes, offset, buf),
        }
    }

    /// Reads `len` bytes from `offset`
    pub fn read_vec(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// A seekable cursor over this source
    pub fn reader(&self) -> SourceReader {
        SourceReader { source: self.clone(), pos: 0 }
    }
}

/// `Read + Seek` cursor over a [`ByteSource`]
pub struct SourceReader {
    source: ByteSource,
    pos: u64,
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.source.len() as u64;
        if self.pos >= len {
            return Ok(0);
        }
        let n = buf.len().min((len - self.pos) as usize);
        self.source.read_at(self.pos, &mut buf[..n])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => (self.source.len() as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        self.pos = next.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position")
        })?;
        Ok(self.pos)
    }
}

/// Where a writable handle persists its bytes on flush
#[derive(Clone)]
pub enum Target {
    File(PathBuf),
    Memory(SharedBytes),
}

impl Target {
    /// Replaces the target's contents with `bytes`
    pub fn store(&self, bytes: Vec<u8>) -> Result<()> {
        match self {
            Target::File(path) => std::fs::write(path, bytes)?,
            Target::Memory(shared) => *shared.write() = bytes,
        }
        Ok(())
    }

    /// Checks the target can be written without storing anything yet
    pub fn probe(&self) -> Result<()> {
        if let Target::File(path) = self {
            File::create(path)?;
        }
        Ok(())
    }
}

/// Environment settings a driver honours
#[derive(Clone)]
pub struct CodecConfig {
    /// Blocks kept decoded per dataset
    pub block_cache_size: usize,
    /// Worker threads for block decode; 0 means all CPUs
    pub num_threads: usize,
    /// Receiver of non-fatal diagnostics
    pub diagnostics: Arc<dyn ErrorHandler>,
}

/// One raster format
pub trait Driver: Send + Sync {
    /// Short name such as `"GTiff"`
    fn name(&self) -> &'static str;

    /// Whether the leading bytes of a source look like this format
    fn identify(&self, header: &[u8]) -> bool;

    /// Opens existing bytes; `target` is set for in-place updates
    fn open(
        &self,
        source: ByteSource,
        target: Option<Target>,
        config: &CodecConfig,
    ) -> Result<Box<dyn RasterHandle>>;

    /// Creates a new raster that is persisted to `target` on flush
    fn create(
        &self,
        target: Target,
        meta: RasterMeta,
        options: &CreationOptions,
        config: &CodecConfig,
    ) -> Result<Box<dyn RasterHandle>>;
}

/// An open raster inside a driver
///
/// Band indexes are zero-based here. Rectangles are validated by the
/// caller to lie within the raster.
pub trait RasterHandle: Send + Sync {
    fn meta(&self) -> &RasterMeta;

    /// Native-endian samples of `band` within `rect`, row-major
    fn decode(&self, band: usize, rect: PixelRect) -> Result<Vec<u8>>;

    /// Stores native-endian samples of `band` within `rect`
    fn encode(&mut self, band: usize, rect: PixelRect, data: &[u8]) -> Result<()>;

    /// Per-pixel mask within `rect`, 0 = invalid, 255 = valid
    fn decode_mask(&self, _rect: PixelRect) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn encode_mask(&mut self, _rect: PixelRect, _data: &[u8]) -> Result<()> {
        Err(Error::Unsupported("per-pixel masks".to_string()))
    }

    /// Replaces georeferencing and nodata; dimensions and types are fixed
    fn set_meta(&mut self, meta: RasterMeta) -> Result<()>;

    /// Persists pending changes
    fn flush(&mut self) -> Result<()>;
}
