//! Affine georeferencing transforms
//!
//! An [`Affine`] maps pixel `(col, row)` to world `(x, y)`:
//!
//! ```text
//! | x |   | a  b  c | | col |
//! | y | = | d  e  f | | row |
//! | 1 |   | 0  0  1 | |  1  |
//! ```
//!
//! `c` and `f` are the world coordinates of the upper left corner of the
//! pixel grid.

use std::fmt;
use std::ops::Mul;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};

/// Immutable 2D affine transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

/// Where within a pixel [`Affine::xy_offset`] lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelOffset {
    #[default]
    UpperLeft,
    UpperRight,
    Center,
    LowerLeft,
    LowerRight,
}

impl PixelOffset {
    fn fractions(self) -> (f64, f64) {
        match self {
            PixelOffset::UpperLeft => (0.0, 0.0),
            PixelOffset::UpperRight => (1.0, 0.0),
            PixelOffset::Center => (0.5, 0.5),
            PixelOffset::LowerLeft => (0.0, 1.0),
            PixelOffset::LowerRight => (1.0, 1.0),
        }
    }
}

impl Affine {
    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    pub const fn translation(xoff: f64, yoff: f64) -> Self {
        Self::new(1.0, 0.0, xoff, 0.0, 1.0, yoff)
    }

    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, 0.0, sy, 0.0)
    }

    /// North-up transform with the upper left corner at `(west, north)`
    ///
    /// `x_res` and `y_res` are positive pixel sizes; rows grow southwards.
    pub fn from_bounds(west: f64, north: f64, x_res: f64, y_res: f64) -> Self {
        Self::new(x_res, 0.0, west, 0.0, -y_res, north)
    }

    /// Builds a transform from GDAL geotransform ordering `(c, a, b, f, d, e)`
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self::new(gt[1], gt[2], gt[0], gt[4], gt[5], gt[3])
    }

    /// Returns GDAL geotransform ordering `(c, a, b, f, d, e)`
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// True when there is no rotation or shear
    pub fn is_rectilinear(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// True when the linear part cannot be safely inverted
    ///
    /// The determinant is compared against the magnitude of its own terms so
    /// that tiny but legitimate pixel sizes (fractions of a degree) still pass.
    pub fn is_degenerate(&self) -> bool {
        let det = self.determinant();
        let magnitude = (self.a * self.e).abs() + (self.b * self.d).abs();
        !det.is_finite() || det == 0.0 || det.abs() <= f64::EPSILON * magnitude
    }

    /// Pixel size as `(x, y)`, both positive for rectilinear transforms
    pub fn resolution(&self) -> (f64, f64) {
        (
            (self.a * self.a + self.d * self.d).sqrt(),
            (self.b * self.b + self.e * self.e).sqrt(),
        )
    }

    /// Forward map from `(col, row)` to `(x, y)`
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// World coordinates of a location within the pixel at `(row, col)`
    pub fn xy_offset(&self, row: f64, col: f64, offset: PixelOffset) -> (f64, f64) {
        let (dc, dr) = offset.fractions();
        self.apply(col + dc, row + dr)
    }

    pub fn invert(&self) -> Result<Affine> {
        if self.is_degenerate() {
            return Err(Error::SingularTransform(self.determinant()));
        }
        let inv_det = 1.0 / self.determinant();
        let ra = self.e * inv_det;
        let rb = -self.b * inv_det;
        let rd = -self.d * inv_det;
        let re = self.a * inv_det;
        Ok(Affine::new(
            ra,
            rb,
            -self.c * ra - self.f * rb,
            rd,
            re,
            -self.c * rd - self.f * re,
        ))
    }

    /// Matrix product `self * other`: `other` is applied first
    pub fn compose(&self, other: &Affine) -> Affine {
        Affine::new(
            self.a * other.a + self.b * other.d,
            self.a * other.b + self.b * other.e,
            self.a * other.c + self.b * other.f + self.c,
            self.d * other.a + self.e * other.d,
            self.d * other.b + self.e * other.e,
            self.d * other.c + self.e * other.f + self.f,
        )
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Affine {
    type Output = Affine;

    fn mul(self, rhs: Affine) -> Affine {
        self.compose(&rhs)
    }
}

impl Mul<(f64, f64)> for Affine {
    type Output = (f64, f64);

    fn mul(self, rhs: (f64, f64)) -> (f64, f64) {
        self.apply(rhs.0, rhs.1)
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Affine({}, {}, {}, {}, {}, {})",
            self.a, self.b, self.c, self.d, self.e, self.f
        )
    }
}
