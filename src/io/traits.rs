//! Core I/O traits

use std::io::{Read, Seek};

/// Readers that support both reading and seeking
///
/// Implemented for every `Read + Seek + Send + Sync` type, including
/// [`SourceReader`](crate::driver::SourceReader) over dataset bytes.
pub trait SeekableReader: Read + Seek + Send + Sync {}

impl<T: Read + Seek + Send + Sync> SeekableReader for T {}
