//! Members of zip archives
//!
//! An archive member is opened by extracting it into memory. The archive
//! itself is read from disk or from the virtual filesystem.

use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;
use crate::error::{Error, Result};
use crate::path::VSIMEM_PREFIX;
use crate::vfs;

/// Contents of `member` inside the zip archive at `archive`
pub fn read_member(archive: &str, member: &str) -> Result<Vec<u8>> {
    let member = member.trim_start_matches('/');
    if archive.starts_with(VSIMEM_PREFIX) {
        let shared = vfs::get(archive)
            .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, archive.to_string())))?;
        let bytes = shared.read();
        extract(&bytes, member)
    } else {
        let bytes = std::fs::read(archive)?;
        extract(&bytes, member)
    }
}

fn extract(archive: &[u8], member: &str) -> Result<Vec<u8>> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;
    let mut entry = zip.by_name(member)?;
    let mut data = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut data)?;
    debug!(member, bytes = data.len(), "extracted archive member");
    Ok(data)
}

/// Names of the files in a zip archive, in archive order
pub fn members(archive: &[u8]) -> Result<Vec<String>> {
    let zip = ZipArchive::new(Cursor::new(archive))?;
    Ok(zip.file_names().map(str::to_string).collect())
}
