//! In-memory files
//!
//! A [`MemoryFile`] is a named buffer in the virtual filesystem that can be
//! opened as a dataset without touching disk. It is either pre-populated
//! and sealed, or starts empty and grows by appending until it is opened.
//!
//! ```no_run
//! use std::io::Write;
//! use gridio::MemoryFile;
//!
//! let bytes = std::fs::read("scene.tif")?;
//! let mut file = MemoryFile::new();
//! for chunk in bytes.chunks(8192) {
//!     file.write_all(chunk)?;
//! }
//! let dataset = file.open()?;
//! println!("{} bands", dataset.count());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};
use parking_lot::{MappedRwLockReadGuard, RwLockReadGuard};
use tracing::debug;
use crate::archive;
use crate::dataset::{Dataset, OpenOptions};
use crate::error::{Error, Result};
use crate::vfs::{self, SharedBytes};

pub struct MemoryFile {
    name: String,
    bytes: Option<SharedBytes>,
    sealed: bool,
    /// Read cursor; appends always go to the end
    pos: u64,
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFile {
    /// An empty, appendable `.tif` file
    pub fn new() -> Self {
        Self::with_ext("tif")
    }

    /// An empty, appendable file whose name ends in `ext`
    pub fn with_ext(ext: &str) -> Self {
        let name = vfs::unique_name(ext);
        let bytes = vfs::create(&name, Vec::new());
        Self { name, bytes: Some(bytes), sealed: false, pos: 0 }
    }

    /// A sealed file holding `bytes`
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::sealed_with_ext(bytes, "tif")
    }

    fn sealed_with_ext(bytes: Vec<u8>, ext: &str) -> Self {
        let name = vfs::unique_name(ext);
        let shared = vfs::create(&name, bytes);
        Self { name, bytes: Some(shared), sealed: true, pos: 0 }
    }

    /// Virtual filesystem name, usable with [`Dataset::open`]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bytes.as_ref().map_or(0, |b| b.read().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn exists(&self) -> bool {
        self.bytes.is_some() && vfs::exists(&self.name)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn closed(&self) -> bool {
        self.bytes.is_none()
    }

    fn shared(&self) -> Result<&SharedBytes> {
        self.bytes
            .as_ref()
            .ok_or_else(|| Error::ClosedResource(self.name.clone()))
    }

    /// Appends `data` to the end of the file
    pub fn append(&mut self, data: &[u8]) -> Result<usize> {
        let shared = self.shared()?;
        if self.sealed {
            return Err(Error::SealedFile(self.name.clone()));
        }
        shared.write().extend_from_slice(data);
        Ok(data.len())
    }

    /// Up to `n` bytes from the read cursor
    pub fn read_chunk(&mut self, n: usize) -> Result<Vec<u8>> {
        let bytes = self.shared()?.read();
        let start = (self.pos as usize).min(bytes.len());
        let end = start.saturating_add(n).min(bytes.len());
        let chunk = bytes[start..end].to_vec();
        drop(bytes);
        self.pos = end as u64;
        Ok(chunk)
    }

    /// Zero-copy view of the current contents
    ///
    /// Appends block while the view is held.
    pub fn get_buffer(&self) -> Result<MappedRwLockReadGuard<'_, [u8]>> {
        let guard = self.shared()?.read();
        Ok(RwLockReadGuard::map(guard, |bytes| bytes.as_slice()))
    }

    /// Seals the file and opens its contents read-only
    pub fn open(&mut self) -> Result<Dataset> {
        self.open_with(&OpenOptions::new())
    }

    /// Seals the file and opens it with `options`
    ///
    /// In write mode the dataset keeps storing into this file when it is
    /// flushed, even though the file itself no longer accepts appends.
    pub fn open_with(&mut self, options: &OpenOptions) -> Result<Dataset> {
        self.shared()?;
        if !self.sealed {
            debug!(name = %self.name, len = self.len(), "sealing memory file");
            self.sealed = true;
        }
        options.open(&self.name)
    }

    /// Releases the buffer; later operations fail with `ClosedResource`
    ///
    /// Datasets already open on the file keep their own reference.
    pub fn close(&mut self) {
        if self.bytes.take().is_some() {
            vfs::remove(&self.name);
            debug!(name = %self.name, "closed memory file");
        }
    }
}

impl Drop for MemoryFile {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MemoryFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFile")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("sealed", &self.sealed)
            .field("closed", &self.closed())
            .finish()
    }
}

/// An in-memory zip archive whose members open as datasets
///
/// ```no_run
/// use gridio::ZipMemoryFile;
///
/// let mut archive = ZipMemoryFile::from_bytes(std::fs::read("scenes.zip")?);
/// let dataset = archive.open("RGB.byte.tif")?;
/// println!("{}", dataset.name());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct ZipMemoryFile {
    file: MemoryFile,
}

impl Default for ZipMemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipMemoryFile {
    /// An empty, appendable `.zip` file
    pub fn new() -> Self {
        Self { file: MemoryFile::with_ext("zip") }
    }

    /// A sealed archive holding `bytes`
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { file: MemoryFile::sealed_with_ext(bytes, "zip") }
    }

    pub fn name(&self) -> &str {
        self.file.name()
    }

    pub fn len(&self) -> usize {
        self.file.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    pub fn closed(&self) -> bool {
        self.file.closed()
    }

    pub fn append(&mut self, data: &[u8]) -> Result<usize> {
        self.file.append(data)
    }

    /// Names of the archived files
    pub fn members(&self) -> Result<Vec<String>> {
        archive::members(&self.file.get_buffer()?)
    }

    /// Seals the archive and opens `member` read-only
    pub fn open(&mut self, member: &str) -> Result<Dataset> {
        self.file.shared()?;
        self.file.sealed = true;
        let path = format!("zip://{}!/{}", self.file.name, member.trim_start_matches('/'));
        OpenOptions::new().open(&path)
    }

    pub fn close(&mut self) {
        self.file.close();
    }
}

fn to_io(err: Error) -> io::Error {
    match err {
        Error::Io(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

impl Read for MemoryFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let chunk = self.read_chunk(buf.len()).map_err(to_io)?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf).map_err(to_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.shared().map(|_| ()).map_err(to_io)
    }
}

impl Seek for MemoryFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let next = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => (self.len() as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        self.pos = next.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative position"))?;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_then_read() {
        let mut file = MemoryFile::new();
        assert!(file.is_empty());
        assert!(file.name().ends_with(".tif"));
        file.append(b"abc").unwrap();
        file.write_all(b"def").unwrap();
        assert_eq!(file.len(), 6);
        assert_eq!(&*file.get_buffer().unwrap(), b"abcdef");

        assert_eq!(file.read_chunk(4).unwrap(), b"abcd");
        assert_eq!(file.read_chunk(4).unwrap(), b"ef");
        assert!(file.read_chunk(4).unwrap().is_empty());

        file.seek(SeekFrom::Start(1)).unwrap();
        let mut rest = String::new();
        file.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "bcdef");
    }

    #[test]
    fn test_prepopulated_is_sealed() {
        let mut file = MemoryFile::from_bytes(vec![1, 2, 3]);
        assert!(file.is_sealed());
        assert!(matches!(file.append(&[4]), Err(Error::SealedFile(_))));
        let err = file.write(&[4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert_eq!(file.len(), 3);
    }

    #[test]
    fn test_close_releases_storage() {
        let mut file = MemoryFile::new();
        file.append(&[0; 16]).unwrap();
        let name = file.name().to_string();
        assert!(vfs::exists(&name));

        file.close();
        file.close();
        assert!(file.closed());
        assert!(!vfs::exists(&name));
        assert_eq!(file.len(), 0);
        assert!(matches!(file.append(&[1]), Err(Error::ClosedResource(_))));
        assert!(matches!(file.read_chunk(1), Err(Error::ClosedResource(_))));
        assert!(file.get_buffer().is_err());
        assert!(matches!(file.open(), Err(Error::ClosedResource(_))));
    }

    #[test]
    fn test_drop_removes_file() {
        let name = {
            let file = MemoryFile::with_ext("bin");
            file.name().to_string()
        };
        assert!(!vfs::exists(&name));
    }

    #[test]
    fn test_open_seals_even_on_failure() {
        let mut file = MemoryFile::new();
        assert!(matches!(file.open(), Err(Error::DatasetOpen { .. })));
        assert!(file.is_sealed());
        assert!(file.append(b"II").is_err());
    }

    #[test]
    fn test_zip_member_opens_as_dataset() {
        use crate::array::RasterArray;
        use crate::dataset::{Mode, ReadOptions};
        use crate::types::DType;

        let options = OpenOptions::new().mode(Mode::Write).width(3).height(2).count(1).dtype(DType::U8);
        let mut tif = MemoryFile::new();
        let mut ds = tif.open_with(&options).unwrap();
        let array = RasterArray::from_vec((1, 2, 3), vec![1u8, 2, 3, 4, 5, 6]).unwrap();
        ds.write(&array, &[], None).unwrap();
        ds.close().unwrap();
        let tif_bytes = tif.get_buffer().unwrap().to_vec();

        let zipped = archive::tests::zip_bytes(&[("readme.txt", b"scenes"), ("data/scene.tif", &tif_bytes)]);
        let mut zip = ZipMemoryFile::from_bytes(zipped);
        assert!(zip.name().ends_with(".zip"));
        assert_eq!(zip.members().unwrap(), vec!["readme.txt", "data/scene.tif"]);

        let ds = zip.open("/data/scene.tif").unwrap();
        assert_eq!(ds.name(), format!("zip://{}!/data/scene.tif", zip.name()));
        assert_eq!(ds.read::<u8>(&[], &ReadOptions::new()).unwrap(), array);

        assert!(matches!(zip.open("missing.tif"), Err(Error::DatasetOpen { .. })));
        assert!(matches!(zip.append(b"PK"), Err(Error::SealedFile(_))));
        zip.close();
        assert!(matches!(zip.open("data/scene.tif"), Err(Error::ClosedResource(_))));
    }

    #[test]
    fn test_seek_negative() {
        let mut file = MemoryFile::from_bytes(vec![0; 4]);
        assert_eq!(file.seek(SeekFrom::End(-1)).unwrap(), 3);
        assert!(file.seek(SeekFrom::Current(-10)).is_err());
    }
}
