//! Dataset creation profiles
//!
//! A [`Profile`] captures what is needed to create a dataset compatible
//! with an existing one. It round-trips through JSON, so it can be stored
//! next to derived products.

use serde::{Deserialize, Serialize};
use crate::driver::CreationOptions;
use crate::error::Result;
use crate::transform::Affine;
use crate::types::DType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub driver: String,
    pub width: usize,
    pub height: usize,
    pub count: usize,
    pub dtype: DType,
    pub transform: Affine,
    #[serde(default)]
    pub crs: Option<String>,
    /// NaN serializes as JSON `null` and reads back as no nodata
    #[serde(default)]
    pub nodata: Option<f64>,
    #[serde(default)]
    pub blockxsize: Option<usize>,
    #[serde(default)]
    pub blockysize: Option<usize>,
    #[serde(default)]
    pub tiled: bool,
    #[serde(default)]
    pub compress: Option<String>,
}

impl Profile {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Driver creation options equivalent to the layout fields
    pub fn creation_options(&self) -> CreationOptions {
        let mut options = CreationOptions::new();
        if self.tiled {
            options.insert("TILED".to_string(), "YES".to_string());
            if let Some(x) = self.blockxsize {
                options.insert("BLOCKXSIZE".to_string(), x.to_string());
            }
        }
        if let Some(y) = self.blockysize {
            options.insert("BLOCKYSIZE".to_string(), y.to_string());
        }
        if let Some(compress) = &self.compress {
            options.insert("COMPRESS".to_string(), compress.clone());
        }
        options
    }
}
