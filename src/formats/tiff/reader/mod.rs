//! TIFF directory parsing and block access

pub mod tags;
pub mod blocks;
pub mod parallel;

use std::collections::HashSet;
use std::io::{self, Seek, SeekFrom};
use crate::driver::{ByteSource, SourceReader};
use crate::error::{Error, Result};
use crate::io::{ByteOrder, ByteOrderHandler};
use crate::formats::tiff::{Tiff, IFD, IFDEntry, TIFF_MAGIC, BIGTIFF_MAGIC};
use crate::formats::tiff::tags::field_types;

pub use self::blocks::{BlockLayout, BlockReader};
pub use self::parallel::DecodePool;

const MAX_IFDS: usize = 1000;

/// Parses the header and directories of TIFF bytes
pub struct TiffReader {
    source: ByteSource,
    byte_order: ByteOrder,
    is_big_tiff: bool,
    first_ifd_offset: u64,
}

impl TiffReader {
    /// Validates the header of `source`
    pub fn new(source: ByteSource) -> Result<Self> {
        let mut reader = source.reader();
        let byte_order = ByteOrder::detect(&mut reader).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => truncated(e),
            _ => Error::Codec(format!("Not a TIFF file: {}", e)),
        })?;
        let handler = byte_order.handler();

        let magic = handler.read_u16(&mut reader).map_err(truncated)?;
        let is_big_tiff = match magic {
            TIFF_MAGIC => false,
            BIGTIFF_MAGIC => true,
            _ => return Err(Error::Codec(format!("Invalid TIFF magic number: {}", magic))),
        };

        if is_big_tiff {
            let offset_size = handler.read_u16(&mut reader).map_err(truncated)?;
            if offset_size != 8 {
                return Err(Error::Codec(format!("Invalid BigTIFF offset size: {}", offset_size)));
            }
            let _reserved = handler.read_u16(&mut reader).map_err(truncated)?;
        }

        let first_ifd_offset = read_offset(&*handler, &mut reader, is_big_tiff)?;

        Ok(Self { source, byte_order, is_big_tiff, first_ifd_offset })
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn is_big_tiff(&self) -> bool {
        self.is_big_tiff
    }

    pub fn source(&self) -> &ByteSource {
        &self.source
    }

    /// Walks the IFD chain
    pub fn read(&self) -> Result<Tiff> {
        let handler = self.byte_order.handler();
        let mut reader = self.source.reader();
        let mut tiff = Tiff::new(self.is_big_tiff, self.byte_order);
        let mut visited = HashSet::new();
        let mut next_offset = self.first_ifd_offset;

        while next_offset != 0 {
            if tiff.ifd_count() >= MAX_IFDS {
                return Err(Error::Codec("Too many IFDs".to_string()));
            }
            if !visited.insert(next_offset) {
                return Err(Error::Codec(format!("IFD chain loops back to offset {}", next_offset)));
            }

            let (ifd, following) = self.read_ifd(&*handler, &mut reader, tiff.ifd_count(), next_offset)?;
            tiff.add_ifd(ifd);
            next_offset = following;
        }

        if tiff.ifd_count() == 0 {
            return Err(Error::Codec("TIFF file contains no images".to_string()));
        }
        Ok(tiff)
    }

    /// Reads one IFD and returns it with the offset of the next
    fn read_ifd(
        &self,
        handler: &dyn ByteOrderHandler,
        reader: &mut SourceReader,
        number: usize,
        offset: u64,
    ) -> Result<(IFD, u64)> {
        reader.seek(SeekFrom::Start(offset))?;

        let entry_count = if self.is_big_tiff {
            handler.read_u64(reader).map_err(truncated)?
        } else {
            handler.read_u16(reader).map_err(truncated)? as u64
        };

        let mut ifd = IFD::new(number, offset, self.byte_order);
        let inline_size = if self.is_big_tiff { 8 } else { 4 };

        for _ in 0..entry_count {
            let tag = handler.read_u16(reader).map_err(truncated)?;
            let field_type = handler.read_u16(reader).map_err(truncated)?;
            let count = if self.is_big_tiff {
                handler.read_u64(reader).map_err(truncated)?
            } else {
                handler.read_u32(reader).map_err(truncated)? as u64
            };
            let mut raw = [0u8; 8];
            io::Read::read_exact(reader, &mut raw[..inline_size]).map_err(truncated)?;

            // Unknown field types are skipped
            let Some(size) = field_types::size(field_type) else {
                continue;
            };
            let total = count
                .checked_mul(size as u64)
                .filter(|&total| total <= self.source.len() as u64)
                .ok_or_else(|| Error::Codec(format!("Tag {} declares {} values", tag, count)))?
                as usize;

            let data = if total <= inline_size {
                raw[..total].to_vec()
            } else {
                let value_offset = self.byte_order.decode_uint(&raw[..inline_size]);
                self.source.read_vec(value_offset, total).map_err(truncated)?
            };
            ifd.add_entry(IFDEntry::new(tag, field_type, count, data));
        }

        let next = read_offset(handler, reader, self.is_big_tiff)?;
        Ok((ifd, next))
    }
}

fn read_offset(handler: &dyn ByteOrderHandler, reader: &mut SourceReader, is_big_tiff: bool) -> Result<u64> {
    if is_big_tiff {
        handler.read_u64(reader).map_err(truncated)
    } else {
        Ok(handler.read_u32(reader).map_err(truncated)? as u64)
    }
}

fn truncated(err: io::Error) -> Error {
    Error::Codec(format!("Truncated TIFF data: {}", err))
}
