use std::sync::Arc;
use tracing::{debug, info};
use crate::archive;
use crate::driver::{ByteSource, CreationOptions, Driver, RasterMeta, Target};
use crate::env::{self, Environment};
use crate::error::{Error, Result};
use crate::path::DatasetPath;
use crate::profile::Profile;
use crate::transform::Affine;
use crate::types::DType;
use crate::vfs;
use super::{Dataset, Mode};

/// Leading bytes handed to driver identification
const HEADER_LEN: usize = 16;

/// Builder for opening or creating a dataset
///
/// ```no_run
/// use gridio::{DType, Mode, OpenOptions};
///
/// let mut dataset = OpenOptions::new()
///     .mode(Mode::Write)
///     .width(256)
///     .height(256)
///     .count(1)
///     .dtype(DType::F32)
///     .nodata(-9999.0)
///     .creation_option("COMPRESS", "DEFLATE")
///     .open("out.tif")?;
/// dataset.close()?;
/// # Ok::<(), gridio::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct OpenOptions {
    mode: Mode,
    driver: Option<String>,
    width: Option<usize>,
    height: Option<usize>,
    count: Option<usize>,
    dtype: Option<DType>,
    transform: Option<Affine>,
    crs: Option<String>,
    nodata: Option<f64>,
    creation_options: CreationOptions,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenOptions {
    /// Read-only options
    pub fn new() -> Self {
        Self {
            mode: Mode::Read,
            driver: None,
            width: None,
            height: None,
            count: None,
            dtype: None,
            transform: None,
            crs: None,
            nodata: None,
            creation_options: CreationOptions::new(),
        }
    }

    /// Write-mode options for a dataset matching `profile`
    pub fn from_profile(profile: &Profile) -> Self {
        let mut options = Self::new()
            .mode(Mode::Write)
            .driver(&profile.driver)
            .width(profile.width)
            .height(profile.height)
            .count(profile.count)
            .dtype(profile.dtype)
            .transform(profile.transform);
        options.crs = profile.crs.clone();
        options.nodata = profile.nodata;
        options.creation_options = profile.creation_options();
        options
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Driver by name; otherwise identified from the source bytes, or
    /// `GTiff` when creating
    pub fn driver(mut self, name: &str) -> Self {
        self.driver = Some(name.to_string());
        self
    }

    pub fn width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    pub fn height(mut self, height: usize) -> Self {
        self.height = Some(height);
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn transform(mut self, transform: Affine) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn crs(mut self, crs: &str) -> Self {
        self.crs = Some(crs.to_string());
        self
    }

    pub fn nodata(mut self, nodata: f64) -> Self {
        self.nodata = Some(nodata);
        self
    }

    /// Driver-specific option, passed through verbatim
    pub fn creation_option(mut self, key: &str, value: &str) -> Self {
        self.creation_options.insert(key.to_string(), value.to_string());
        self
    }

    /// Opens `path` with these options
    ///
    /// Creating a `/vsimem/` name that does not exist yet adds it to the
    /// in-memory filesystem, where it stays after the dataset is closed
    /// until [`vfs::remove`] unlinks it. Files owned by a
    /// [`MemoryFile`](crate::memfile::MemoryFile) are unlinked when it closes.
    pub fn open(&self, path: &str) -> Result<Dataset> {
        let env = Environment::global();
        let _scope = env.ensure()?;
        let parsed = DatasetPath::parse(path)?;
        let name = parsed.name();

        let dataset = match self.mode {
            Mode::Read | Mode::Update => self.open_existing(env, &parsed, &name)?,
            Mode::Write => self.create(env, &parsed, &name)?,
        };
        info!(
            name = %name,
            driver = dataset.driver(),
            mode = %self.mode,
            width = dataset.width(),
            height = dataset.height(),
            count = dataset.count(),
            "opened dataset"
        );
        Ok(dataset)
    }

    fn open_existing(&self, env: &'static Environment, path: &DatasetPath, name: &str) -> Result<Dataset> {
        let update = self.mode == Mode::Update;
        let (source, target) = match path {
            DatasetPath::Local(file) => {
                let use_mmap = !update && env.get_config_bool(env::USE_MMAP, true);
                let source = ByteSource::from_path(file, use_mmap).map_err(|e| open_error(name, e))?;
                (source, update.then(|| Target::File(file.clone())))
            }
            DatasetPath::Memory(key) => {
                let shared = vfs::get(key).ok_or_else(|| open_error(name, "no such memory file"))?;
                if update {
                    let bytes = shared.read().clone();
                    (ByteSource::Owned(Arc::new(bytes)), Some(Target::Memory(shared)))
                } else {
                    (ByteSource::Shared(shared), None)
                }
            }
            DatasetPath::Uri { scheme, archive: Some(archive), path: member } if scheme == "zip" => {
                if update {
                    return Err(open_error(name, "archive members cannot be opened for update"));
                }
                let bytes = archive::read_member(archive, member).map_err(|e| open_error(name, e))?;
                (ByteSource::Owned(Arc::new(bytes)), None)
            }
            DatasetPath::Uri { scheme, .. } => return Err(no_transport(name, scheme)),
        };

        if source.is_empty() {
            return Err(open_error(name, "file is empty"));
        }
        let driver = match &self.driver {
            Some(driver_name) => env.driver(driver_name)?,
            None => identify(env, &source).ok_or_else(|| open_error(name, "not recognized as a supported file format"))?,
        };
        debug!(name = %name, driver = driver.name(), update, "opening with driver");

        let handle = driver
            .open(source, target, &env.codec_config())
            .map_err(|e| Error::open_failed(name, e))?;
        Ok(Dataset::from_handle(name.to_string(), driver.name(), self.mode, handle, env))
    }

    fn create(&self, env: &'static Environment, path: &DatasetPath, name: &str) -> Result<Dataset> {
        let width = self.width.ok_or(Error::MissingCreationOption("width"))?;
        let height = self.height.ok_or(Error::MissingCreationOption("height"))?;
        let count = self.count.ok_or(Error::MissingCreationOption("count"))?;
        let dtype = self.dtype.ok_or(Error::MissingCreationOption("dtype"))?;

        let transform = self.transform.unwrap_or_else(Affine::identity);
        transform.invert()?;
        if let Some(value) = self.nodata {
            if !dtype.can_hold(value) {
                return Err(Error::InvalidNodata { value, dtype: dtype.name() });
            }
        }

        let driver = env.driver(self.driver.as_deref().unwrap_or("GTiff"))?;
        let target = match path {
            DatasetPath::Local(file) => Target::File(file.clone()),
            // A new entry outlives the dataset so the raster can be reopened
            // by name; unlink it with `vfs::remove`
            DatasetPath::Memory(key) => Target::Memory(vfs::get(key).unwrap_or_else(|| vfs::create(key, Vec::new()))),
            DatasetPath::Uri { scheme, .. } => return Err(no_transport(name, scheme)),
        };

        let meta = RasterMeta {
            width,
            height,
            count,
            dtypes: vec![dtype; count],
            transform,
            crs: self.crs.clone(),
            nodata: vec![self.nodata; count],
            block_shape: (0, 0),
            has_mask: false,
            compression: None,
            tiled: false,
        };
        let handle = driver.create(target, meta, &self.creation_options, &env.codec_config())?;
        Ok(Dataset::from_handle(name.to_string(), driver.name(), Mode::Write, handle, env))
    }
}

fn identify(env: &Environment, source: &ByteSource) -> Option<Arc<dyn Driver>> {
    let header = source.read_vec(0, source.len().min(HEADER_LEN)).ok()?;
    env.drivers().into_iter().find(|driver| driver.identify(&header))
}

fn open_error(name: &str, message: impl ToString) -> Error {
    Error::DatasetOpen { path: name.to_string(), message: message.to_string() }
}

fn no_transport(name: &str, scheme: &str) -> Error {
    open_error(name, format!("no transport is available for '{}' URIs", scheme))
}
