//! TIFF and BigTIFF format support
//!
//! [`GTiffDriver`] is the built-in driver registered by the environment.

pub mod tags;
pub mod ifd;
pub mod types;
pub mod reader;
pub mod geotiff;
pub mod writer;
pub mod handle;

pub use ifd::{IFD, IFDEntry};
pub use types::Tiff;
pub use reader::TiffReader;
pub use geotiff::GeoInfo;
pub use handle::GTiffHandle;
pub use writer::{TiffWriter, WriteOptions};

use crate::driver::{ByteSource, CodecConfig, CreationOptions, Driver, RasterHandle, RasterMeta, Target};
use crate::error::Result;

/// TIFF magic number (42)
pub const TIFF_MAGIC: u16 = 42;

/// BigTIFF magic number (43)
pub const BIGTIFF_MAGIC: u16 = 43;

/// GeoTIFF driver
#[derive(Debug, Default, Clone, Copy)]
pub struct GTiffDriver;

impl Driver for GTiffDriver {
    fn name(&self) -> &'static str {
        "GTiff"
    }

    fn identify(&self, header: &[u8]) -> bool {
        match header {
            [b'I', b'I', magic, 0, ..] => matches!(*magic as u16, TIFF_MAGIC | BIGTIFF_MAGIC),
            [b'M', b'M', 0, magic, ..] => matches!(*magic as u16, TIFF_MAGIC | BIGTIFF_MAGIC),
            _ => false,
        }
    }

    fn open(
        &self,
        source: ByteSource,
        target: Option<Target>,
        config: &CodecConfig,
    ) -> Result<Box<dyn RasterHandle>> {
        Ok(Box::new(GTiffHandle::open(source, target, config)?))
    }

    fn create(
        &self,
        target: Target,
        meta: RasterMeta,
        options: &CreationOptions,
        config: &CodecConfig,
    ) -> Result<Box<dyn RasterHandle>> {
        Ok(Box::new(GTiffHandle::create(target, meta, options, config)?))
    }
}
