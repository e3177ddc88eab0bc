//! Dataset paths and URIs
//!
//! Accepts local paths, `/vsimem/` virtual file names and `scheme://` URIs
//! whose scheme is one of [`SCHEMES`] or a `+`-chain of them such as
//! `zip+https`. Archive schemes address a member with `archive!member`.

use std::fmt;
use std::path::PathBuf;
use crate::error::{Error, Result};

/// Recognized URI schemes and the virtual filesystem handler each maps to
pub const SCHEMES: &[(&str, &str)] = &[
    ("ftp", "curl"),
    ("gzip", "gzip"),
    ("http", "curl"),
    ("https", "curl"),
    ("s3", "s3"),
    ("tar", "tar"),
    ("zip", "zip"),
    ("file", "file"),
    ("oss", "oss"),
    ("gs", "gs"),
    ("az", "az"),
];

const ARCHIVE_SCHEMES: &[&str] = &["gzip", "tar", "zip"];

/// Prefix of in-memory virtual file names
pub const VSIMEM_PREFIX: &str = "/vsimem/";

fn handler_for(scheme: &str) -> Option<&'static str> {
    SCHEMES.iter().find(|(s, _)| *s == scheme).map(|(_, h)| *h)
}

fn is_remote_scheme(scheme: &str) -> bool {
    matches!(handler_for(scheme), Some("curl" | "s3" | "oss" | "gs" | "az"))
}

/// A parsed dataset identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetPath {
    /// Plain filesystem path or `file://` URI
    Local(PathBuf),
    /// In-memory virtual file
    Memory(String),
    /// URI with a non-file scheme
    Uri {
        scheme: String,
        archive: Option<String>,
        path: String,
    },
}

impl DatasetPath {
    /// Parses a path or URI
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::InvalidPath("empty path".to_string()));
        }
        if raw.starts_with(VSIMEM_PREFIX) {
            return Ok(DatasetPath::Memory(raw.to_string()));
        }
        if raw.starts_with("/vsi") {
            return Err(Error::InvalidPath(format!("unsupported virtual filesystem '{}'", raw)));
        }

        let Some((scheme, rest)) = raw.split_once("://") else {
            return Ok(DatasetPath::Local(PathBuf::from(raw)));
        };
        // Windows drive letters such as `C:` are not schemes
        if scheme.len() == 1 && scheme.chars().all(|c| c.is_ascii_alphabetic()) {
            return Ok(DatasetPath::Local(PathBuf::from(raw)));
        }

        let scheme = scheme.to_ascii_lowercase();
        if let Some(unknown) = scheme.split('+').find(|part| handler_for(part).is_none()) {
            return Err(Error::InvalidPath(format!("unsupported scheme '{}' in '{}'", unknown, raw)));
        }

        let (netloc, tail) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        let is_archive = ARCHIVE_SCHEMES.iter().any(|s| scheme.starts_with(s));
        let (archive, path) = if is_archive {
            match tail.rsplit_once('!') {
                Some((archive, member)) => (Some(format!("{}{}", netloc, archive)), member.to_string()),
                None => (None, format!("{}{}", netloc, tail)),
            }
        } else {
            (None, format!("{}{}", netloc, tail))
        };

        if scheme == "file" {
            return Ok(DatasetPath::Local(PathBuf::from(path)));
        }
        Ok(DatasetPath::Uri { scheme, archive, path })
    }

    /// True for network object stores and http(s)/ftp URIs
    pub fn is_remote(&self) -> bool {
        match self {
            DatasetPath::Uri { scheme, .. } => scheme.rsplit('+').next().is_some_and(is_remote_scheme),
            _ => false,
        }
    }

    pub fn is_local(&self) -> bool {
        !self.is_remote()
    }

    /// The identifier in the form it was given
    pub fn name(&self) -> String {
        match self {
            DatasetPath::Local(path) => path.display().to_string(),
            DatasetPath::Memory(name) => name.clone(),
            DatasetPath::Uri { scheme, archive: Some(archive), path } => {
                format!("{}://{}!{}", scheme, archive, path)
            }
            DatasetPath::Uri { scheme, archive: None, path } => format!("{}://{}", scheme, path),
        }
    }

    /// Virtual filesystem form, e.g. `/vsizip/vsicurl/https://host/a.zip/b.tif`
    pub fn as_vsi(&self) -> String {
        match self {
            DatasetPath::Local(path) => path.display().to_string(),
            DatasetPath::Memory(name) => name.clone(),
            DatasetPath::Uri { scheme, archive, path } => {
                let last = scheme.rsplit('+').next().unwrap_or_default();
                let suffix = if handler_for(last) == Some("curl") {
                    format!("{}://", last)
                } else {
                    String::new()
                };
                let prefix = scheme
                    .split('+')
                    .filter(|part| *part != "file")
                    .filter_map(handler_for)
                    .map(|handler| format!("vsi{}", handler))
                    .collect::<Vec<_>>()
                    .join("/");
                match archive {
                    Some(archive) => format!("/{}/{}{}/{}", prefix, suffix, archive, path.trim_start_matches('/')),
                    None => format!("/{}/{}{}", prefix, suffix, path),
                }
            }
        }
    }
}

impl fmt::Display for DatasetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}
