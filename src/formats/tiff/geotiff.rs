//! GeoTIFF georeferencing
//!
//! Reads the affine transform, CRS and nodata tags of an IFD into a
//! [`GeoInfo`], and produces the equivalent tags for the writer.

use crate::error::{Error, Result};
use crate::transform::Affine;
use super::ifd::{IFD, IFDEntry};
use super::tags::{self, geokeys};

/// Georeferencing extracted from an IFD
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeoInfo {
    /// Pixel (col, row) to world (x, y), corner based
    pub transform: Option<Affine>,
    /// `"EPSG:n"` or the citation text
    pub crs: Option<String>,
    pub nodata: Option<f64>,
}

/// One GeoKey entry as stored in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GeoKey {
    id: u16,
    location: u16,
    count: u16,
    value: u16,
}

impl GeoInfo {
    /// Extracts georeferencing from an IFD
    pub fn from_ifd(ifd: &IFD) -> Result<Self> {
        let keys = read_geokeys(ifd)?;
        let ascii = ifd.ascii(tags::GEO_ASCII_PARAMS)?.unwrap_or_default();

        let mut transform = read_transform(ifd)?;
        let pixel_is_point = keys
            .iter()
            .any(|k| k.id == geokeys::GT_RASTER_TYPE && k.location == 0 && k.value == geokeys::RASTER_PIXEL_IS_POINT);
        if pixel_is_point {
            transform = transform.map(|t| t.compose(&Affine::translation(-0.5, -0.5)));
        }

        let nodata = match ifd.ascii(tags::GDAL_NODATA)? {
            Some(text) => Some(parse_nodata(&text)?),
            None => None,
        };

        Ok(GeoInfo { transform, crs: crs_from_keys(&keys, &ascii), nodata })
    }

    /// Tags that encode this georeferencing
    pub fn to_entries(&self) -> Vec<IFDEntry> {
        let mut entries = Vec::new();

        if let Some(t) = self.transform {
            if t.is_rectilinear() {
                entries.push(IFDEntry::doubles(tags::MODEL_PIXEL_SCALE, &[t.a, -t.e, 0.0]));
                entries.push(IFDEntry::doubles(tags::MODEL_TIEPOINT, &[0.0, 0.0, 0.0, t.c, t.f, 0.0]));
            } else {
                let matrix = [
                    t.a, t.b, 0.0, t.c,
                    t.d, t.e, 0.0, t.f,
                    0.0, 0.0, 0.0, 0.0,
                    0.0, 0.0, 0.0, 1.0,
                ];
                entries.push(IFDEntry::doubles(tags::MODEL_TRANSFORMATION, &matrix));
            }
        }

        if self.transform.is_some() || self.crs.is_some() {
            let (directory, ascii) = build_geokeys(self.crs.as_deref());
            entries.push(IFDEntry::shorts(tags::GEO_KEY_DIRECTORY, &directory));
            if let Some(ascii) = ascii {
                entries.push(IFDEntry::ascii(tags::GEO_ASCII_PARAMS, &ascii));
            }
        }

        if let Some(nodata) = self.nodata {
            entries.push(IFDEntry::ascii(tags::GDAL_NODATA, &format_nodata(nodata)));
        }

        entries
    }
}

fn read_transform(ifd: &IFD) -> Result<Option<Affine>> {
    if let Some(m) = ifd.doubles(tags::MODEL_TRANSFORMATION)? {
        if m.len() < 16 {
            return Err(Error::Codec(format!("ModelTransformation has {} values, expected 16", m.len())));
        }
        return Ok(Some(Affine::new(m[0], m[1], m[3], m[4], m[5], m[7])));
    }

    let scale = ifd.doubles(tags::MODEL_PIXEL_SCALE)?;
    let tiepoints = ifd.doubles(tags::MODEL_TIEPOINT)?;
    match (scale, tiepoints) {
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => {
            let (sx, sy) = (scale[0], scale[1]);
            let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
            Ok(Some(Affine::new(sx, 0.0, x - i * sx, 0.0, -sy, y + j * sy)))
        }
        _ => Ok(None),
    }
}

fn read_geokeys(ifd: &IFD) -> Result<Vec<GeoKey>> {
    let directory = match ifd.shorts(tags::GEO_KEY_DIRECTORY)? {
        Some(directory) => directory,
        None => return Ok(Vec::new()),
    };
    if directory.len() < 4 {
        return Err(Error::Codec("GeoKeyDirectory header is truncated".to_string()));
    }
    let declared = directory[3] as usize;
    Ok(directory[4..]
        .chunks_exact(4)
        .take(declared)
        .map(|k| GeoKey { id: k[0], location: k[1], count: k[2], value: k[3] })
        .collect())
}

fn crs_from_keys(keys: &[GeoKey], ascii: &str) -> Option<String> {
    let code = |id: u16| {
        keys.iter()
            .find(|k| k.id == id && k.location == 0)
            .map(|k| k.value)
            .filter(|&v| v != 0 && v != geokeys::USER_DEFINED)
    };
    if let Some(epsg) = code(geokeys::PROJECTED_CS_TYPE).or_else(|| code(geokeys::GEOGRAPHIC_TYPE)) {
        return Some(format!("EPSG:{}", epsg));
    }

    [geokeys::PCS_CITATION, geokeys::GEOG_CITATION, geokeys::GT_CITATION]
        .iter()
        .filter_map(|&id| keys.iter().find(|k| k.id == id && k.location == tags::GEO_ASCII_PARAMS))
        .filter_map(|k| ascii_param(ascii, k))
        .find(|s| !s.is_empty())
}

fn ascii_param(ascii: &str, key: &GeoKey) -> Option<String> {
    let start = key.value as usize;
    let end = start.checked_add(key.count as usize)?;
    let text = ascii.get(start..end.min(ascii.len()))?;
    Some(text.trim_end_matches('|').trim_end_matches('\0').to_string())
}

/// Builds the GeoKey directory and the GeoAsciiParams text, if any
fn build_geokeys(crs: Option<&str>) -> (Vec<u16>, Option<String>) {
    let epsg = crs.and_then(parse_epsg);
    let mut keys: Vec<[u16; 4]> = Vec::new();
    let mut ascii = None;

    let model_type = match (epsg, crs) {
        (Some(code), _) if (4000..5000).contains(&code) => geokeys::MODEL_TYPE_GEOGRAPHIC,
        (Some(_), _) => geokeys::MODEL_TYPE_PROJECTED,
        (None, Some(_)) => geokeys::MODEL_TYPE_USER_DEFINED,
        (None, None) => geokeys::MODEL_TYPE_PROJECTED,
    };
    keys.push([geokeys::GT_MODEL_TYPE, 0, 1, model_type]);
    keys.push([geokeys::GT_RASTER_TYPE, 0, 1, geokeys::RASTER_PIXEL_IS_AREA]);

    match (epsg, crs) {
        (Some(code), _) if model_type == geokeys::MODEL_TYPE_GEOGRAPHIC => {
            keys.push([geokeys::GEOGRAPHIC_TYPE, 0, 1, code]);
        }
        (Some(code), _) => keys.push([geokeys::PROJECTED_CS_TYPE, 0, 1, code]),
        (None, Some(text)) => {
            let citation = format!("{}|", text.replace('|', " "));
            keys.push([geokeys::GT_CITATION, tags::GEO_ASCII_PARAMS, citation.len() as u16, 0]);
            ascii = Some(citation);
        }
        (None, None) => {}
    }

    let mut directory = vec![1, 1, 0, keys.len() as u16];
    directory.extend(keys.iter().flatten());
    (directory, ascii)
}

fn parse_epsg(crs: &str) -> Option<u16> {
    let (authority, code) = crs.trim().split_once(':')?;
    if !authority.eq_ignore_ascii_case("EPSG") {
        return None;
    }
    code.trim().parse().ok().filter(|&c| c != 0 && c != geokeys::USER_DEFINED)
}

/// Parses the `GDAL_NODATA` text, accepting `nan` and `inf`
pub fn parse_nodata(text: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| Error::Codec(format!("Invalid GDAL_NODATA value '{}'", text)))
}

pub fn format_nodata(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{}", value)
    }
}
