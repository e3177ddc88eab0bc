//! Error types for gridio

use std::io;
use thiserror::Error;

/// Result type for gridio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in gridio operations
#[derive(Error, Debug)]
pub enum Error {
    /// Driver or error-handler registration failed
    #[error("Environment initialization failed: {0}")]
    EnvironmentInit(String),

    /// Source missing, unreadable or in an unsupported format
    #[error("Failed to open dataset '{path}': {message}")]
    DatasetOpen { path: String, message: String },

    /// Write-mode open without a required creation field
    #[error("Missing required creation option: {0}")]
    MissingCreationOption(&'static str),

    /// Non-invertible affine transform
    #[error("Singular transform: determinant {0} is not invertible")]
    SingularTransform(f64),

    /// Window lies outside the dataset extent
    #[error("Window out of bounds: {0}")]
    WindowOutOfBounds(String),

    /// Intersection of windows that do not overlap
    #[error("Windows do not intersect")]
    DisjointWindows,

    /// Write buffer shape does not match the target window
    #[error("Buffer shape mismatch: expected {expected:?}, got {actual:?}")]
    BufferShape {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    /// Opaque decode/encode failure from the codec
    #[error("Codec error: {0}")]
    Codec(String),

    /// Append to a memory file that was created from initial bytes or already opened
    #[error("Memory file '{0}' is sealed")]
    SealedFile(String),

    /// Operation on a closed dataset or memory file
    #[error("I/O operation on closed resource '{0}'")]
    ClosedResource(String),

    /// Malformed window
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    /// Band index outside `1..=count`
    #[error("Band index {index} out of range (count: {count})")]
    InvalidBandIndex { index: usize, count: usize },

    /// Typed access to a band of a different data type
    #[error("Data type mismatch: expected {expected}, got {actual}")]
    DTypeMismatch { expected: &'static str, actual: &'static str },

    /// Nodata sentinel not representable in the band data type
    #[error("Nodata value {value} is not representable as {dtype}")]
    InvalidNodata { value: f64, dtype: &'static str },

    /// Operation not permitted in the dataset's open mode
    #[error("Operation not permitted in '{0}' mode")]
    Mode(&'static str),

    /// Unparseable path or unsupported URI scheme
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// No registered driver with this name
    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Unreadable zip archive or missing member
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Profile (de)serialization failure
    #[error("Profile serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Wraps a codec diagnostic into a `DatasetOpen` error for `path`
    pub(crate) fn open_failed(path: &str, err: Error) -> Self {
        match err {
            Error::DatasetOpen { .. } => err,
            Error::Codec(message) => Error::DatasetOpen { path: path.to_string(), message },
            other => Error::DatasetOpen { path: path.to_string(), message: other.to_string() },
        }
    }
}
