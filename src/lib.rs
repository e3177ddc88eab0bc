//! gridio - Georeferenced windowed raster I/O for Rust
//!
//! gridio opens gridded raster datasets, reads and writes rectangular
//! windows of pixels as typed arrays, converts between pixel and world
//! coordinates, and reconciles nodata sentinels with explicit validity
//! masks. GeoTIFF support is built in; other formats plug in through the
//! [`driver::Driver`] trait.
//!
//! # Examples
//!
//! ## Reading a window
//!
//! ```no_run
//! use gridio::{Dataset, ReadOptions, Window};
//!
//! let dataset = Dataset::open("scene.tif")?;
//! println!("{} x {}, {} bands", dataset.width(), dataset.height(), dataset.count());
//!
//! let window = Window::new(300.0, 400.0, 200.0, 400.0)?;
//! let band = dataset.read_masked::<u8>(&[1], &ReadOptions::new().window(window))?;
//! println!("{} valid pixels", band.valid_count());
//!
//! let (row, col) = dataset.index(201985.0, 2776915.0)?;
//! println!("pixel ({}, {})", row, col);
//! # Ok::<(), gridio::Error>(())
//! ```
//!
//! ## Creating a dataset in memory
//!
//! ```no_run
//! use gridio::{Affine, DType, MemoryFile, Mode, OpenOptions, RasterArray};
//!
//! let mut file = MemoryFile::new();
//! let options = OpenOptions::new()
//!     .mode(Mode::Write)
//!     .width(64)
//!     .height(64)
//!     .count(1)
//!     .dtype(DType::F32)
//!     .transform(Affine::new(10.0, 0.0, 500000.0, 0.0, -10.0, 4100000.0))
//!     .crs("EPSG:32633");
//! let mut dataset = file.open_with(&options)?;
//! dataset.write(&RasterArray::<f32>::zeros((1, 64, 64)), &[], None)?;
//! dataset.close()?;
//! println!("{} bytes", file.len());
//! # Ok::<(), gridio::Error>(())
//! ```

pub mod io;
pub mod error;
pub mod types;
pub mod transform;
pub mod window;
pub mod env;
pub mod driver;
pub mod path;
pub mod vfs;
pub mod archive;
pub mod cache;
pub mod compression;
pub mod formats;
pub mod array;
pub mod masked;
pub mod profile;
pub mod memfile;
pub mod dataset;

pub use error::{Error, Result};
pub use types::{DType, Sample};
pub use transform::{Affine, PixelOffset};
pub use window::{Bounds, RoundOp, Window};
pub use env::Environment;
pub use array::RasterArray;
pub use masked::{get_data_window, MaskedArray, Validity};
pub use profile::Profile;
pub use memfile::{MemoryFile, ZipMemoryFile};
pub use dataset::{Dataset, Mode, OpenOptions, ReadOptions};
pub use formats::tiff::GTiffDriver;
