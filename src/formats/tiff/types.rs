//! TIFF data structures

use std::fmt;
use crate::io::ByteOrder;
use super::ifd::IFD;

/// Parsed directory structure of a TIFF or BigTIFF file
#[derive(Debug)]
pub struct Tiff {
    pub is_big_tiff: bool,
    pub byte_order: ByteOrder,
    /// Image File Directories in file order
    pub ifds: Vec<IFD>,
}

impl Tiff {
    pub fn new(is_big_tiff: bool, byte_order: ByteOrder) -> Self {
        Self { is_big_tiff, byte_order, ifds: Vec::new() }
    }

    pub fn add_ifd(&mut self, ifd: IFD) {
        self.ifds.push(ifd);
    }

    /// The full-resolution image: the first IFD that is not a mask
    pub fn main_ifd(&self) -> Option<&IFD> {
        self.ifds.iter().find(|ifd| !ifd.is_mask())
    }

    /// The transparency mask of the main image, if stored
    pub fn mask_ifd(&self) -> Option<&IFD> {
        let main = self.main_ifd()?;
        let dims = main.dimensions().ok()?;
        self.ifds.iter().find(|ifd| {
            ifd.is_mask()
                && ifd.samples_per_pixel() == 1
                && ifd.dimensions().map(|d| d == dims).unwrap_or(false)
        })
    }

    pub fn ifd_count(&self) -> usize {
        self.ifds.len()
    }
}

impl fmt::Display for Tiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}), {} IFD(s)",
            if self.is_big_tiff { "BigTIFF" } else { "TIFF" },
            self.byte_order,
            self.ifds.len()
        )?;
        if let Some(ifd) = self.main_ifd() {
            if let Ok(dims) = ifd.dimensions() {
                write!(f, ", {} x {} x {}", dims.width, dims.height, ifd.samples_per_pixel())?;
            }
        }
        if self.mask_ifd().is_some() {
            write!(f, ", with mask")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::tiff::ifd::IFDEntry;
    use crate::formats::tiff::tags;

    fn image(number: usize, subfile: u32) -> IFD {
        let mut ifd = IFD::new(number, 8, ByteOrder::LittleEndian);
        ifd.add_entry(IFDEntry::longs(tags::NEW_SUBFILE_TYPE, &[subfile]));
        ifd.add_entry(IFDEntry::longs(tags::IMAGE_WIDTH, &[64]));
        ifd.add_entry(IFDEntry::longs(tags::IMAGE_LENGTH, &[32]));
        ifd
    }

    #[test]
    fn test_empty() {
        let tiff = Tiff::new(false, ByteOrder::LittleEndian);
        assert_eq!(tiff.ifd_count(), 0);
        assert!(tiff.main_ifd().is_none());
        assert!(tiff.mask_ifd().is_none());
    }

    #[test]
    fn test_main_and_mask() {
        let mut tiff = Tiff::new(true, ByteOrder::BigEndian);
        tiff.add_ifd(image(0, 0));
        tiff.add_ifd(image(1, 4));

        assert_eq!(tiff.main_ifd().unwrap().number, 0);
        assert_eq!(tiff.mask_ifd().unwrap().number, 1);
        let text = tiff.to_string();
        assert!(text.contains("BigTIFF"));
        assert!(text.contains("64 x 32 x 1"));
        assert!(text.contains("with mask"));
    }

    #[test]
    fn test_mask_must_match_dimensions() {
        let mut tiff = Tiff::new(false, ByteOrder::LittleEndian);
        tiff.add_ifd(image(0, 0));
        let mut mask = image(1, 4);
        mask.add_entry(IFDEntry::longs(tags::IMAGE_WIDTH, &[16]));
        tiff.add_ifd(mask);
        assert!(tiff.mask_ifd().is_none());
    }
}
