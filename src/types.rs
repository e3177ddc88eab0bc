//! Core data types for gridio

use std::fmt;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Represents pixel data types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// Unsigned 8-bit integer
    #[serde(rename = "uint8")]
    U8,
    /// Signed 8-bit integer
    #[serde(rename = "int8")]
    I8,
    /// Unsigned 16-bit integer
    #[serde(rename = "uint16")]
    U16,
    /// Signed 16-bit integer
    #[serde(rename = "int16")]
    I16,
    /// Unsigned 32-bit integer
    #[serde(rename = "uint32")]
    U32,
    /// Signed 32-bit integer
    #[serde(rename = "int32")]
    I32,
    /// Unsigned 64-bit integer
    #[serde(rename = "uint64")]
    U64,
    /// Signed 64-bit integer
    #[serde(rename = "int64")]
    I64,
    /// 32-bit floating point
    #[serde(rename = "float32")]
    F32,
    /// 64-bit floating point
    #[serde(rename = "float64")]
    F64,
    /// Complex with 32-bit float components
    #[serde(rename = "complex64")]
    C64,
    /// Complex with 64-bit float components
    #[serde(rename = "complex128")]
    C128,
}

impl DType {
    /// Returns the size in bytes for this data type
    pub fn size(&self) -> usize {
        match self {
            DType::U8 | DType::I8 => 1,
            DType::U16 | DType::I16 => 2,
            DType::U32 | DType::I32 | DType::F32 => 4,
            DType::U64 | DType::I64 | DType::F64 | DType::C64 => 8,
            DType::C128 => 16,
        }
    }

    /// Returns the name of this data type
    pub fn name(&self) -> &'static str {
        match self {
            DType::U8 => "uint8",
            DType::I8 => "int8",
            DType::U16 => "uint16",
            DType::I16 => "int16",
            DType::U32 => "uint32",
            DType::I32 => "int32",
            DType::U64 => "uint64",
            DType::I64 => "int64",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::C64 => "complex64",
            DType::C128 => "complex128",
        }
    }

    /// Parses a data type name such as `"uint8"` or `"float32"`
    pub fn from_name(name: &str) -> Option<Self> {
        let dtype = match name.to_ascii_lowercase().as_str() {
            "uint8" | "byte" => DType::U8,
            "int8" => DType::I8,
            "uint16" => DType::U16,
            "int16" => DType::I16,
            "uint32" => DType::U32,
            "int32" => DType::I32,
            "uint64" => DType::U64,
            "int64" => DType::I64,
            "float32" => DType::F32,
            "float64" => DType::F64,
            "complex64" => DType::C64,
            "complex128" => DType::C128,
            _ => return None,
        };
        Some(dtype)
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DType::C64 | DType::C128)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Size in bytes of one scalar component (half the size for complex types)
    pub fn component_size(&self) -> usize {
        if self.is_complex() {
            self.size() / 2
        } else {
            self.size()
        }
    }

    /// Inclusive value range of an integer type, `None` for float and complex types
    pub fn int_range(&self) -> Option<(f64, f64)> {
        match self {
            DType::U8 => Some((0.0, u8::MAX as f64)),
            DType::I8 => Some((i8::MIN as f64, i8::MAX as f64)),
            DType::U16 => Some((0.0, u16::MAX as f64)),
            DType::I16 => Some((i16::MIN as f64, i16::MAX as f64)),
            DType::U32 => Some((0.0, u32::MAX as f64)),
            DType::I32 => Some((i32::MIN as f64, i32::MAX as f64)),
            DType::U64 => Some((0.0, u64::MAX as f64)),
            DType::I64 => Some((i64::MIN as f64, i64::MAX as f64)),
            _ => None,
        }
    }

    /// Native-endian bytes of one sample holding `value`
    pub fn encode_value(&self, value: f64) -> Vec<u8> {
        match self {
            DType::U8 => u8::from_f64(value).to_ne_bytes().to_vec(),
            DType::I8 => i8::from_f64(value).to_ne_bytes().to_vec(),
            DType::U16 => u16::from_f64(value).to_ne_bytes().to_vec(),
            DType::I16 => i16::from_f64(value).to_ne_bytes().to_vec(),
            DType::U32 => u32::from_f64(value).to_ne_bytes().to_vec(),
            DType::I32 => i32::from_f64(value).to_ne_bytes().to_vec(),
            DType::U64 => u64::from_f64(value).to_ne_bytes().to_vec(),
            DType::I64 => i64::from_f64(value).to_ne_bytes().to_vec(),
            DType::F32 => (value as f32).to_ne_bytes().to_vec(),
            DType::F64 => value.to_ne_bytes().to_vec(),
            DType::C64 => bytemuck::bytes_of(&Complex32::from_f64(value)).to_vec(),
            DType::C128 => bytemuck::bytes_of(&Complex64::from_f64(value)).to_vec(),
        }
    }

    /// A buffer of `len` samples all holding `value`
    pub fn filled(&self, value: f64, len: usize) -> Vec<u8> {
        let sample = self.encode_value(value);
        if sample.iter().all(|&b| b == 0) {
            return vec![0; len * sample.len()];
        }
        sample.repeat(len)
    }

    /// Whether `value` is exactly representable as a sample of this type
    pub fn can_hold(&self, value: f64) -> bool {
        match self.int_range() {
            Some((lo, hi)) => value.is_finite() && value.fract() == 0.0 && value >= lo && value <= hi,
            None => match self {
                DType::F32 | DType::C64 => {
                    !value.is_finite() || (value.abs() <= f32::MAX as f64)
                }
                _ => true,
            },
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Complex sample with 32-bit float components
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Complex32 {
    pub re: f32,
    pub im: f32,
}

/// Complex sample with 64-bit float components
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Complex64 {
    pub re: f64,
    pub im: f64,
}

/// A Rust type that can hold the samples of one [`DType`]
///
/// Reads and writes are typed: the element type of a buffer must match the
/// band data type exactly.
pub trait Sample: Pod + PartialEq + Send + Sync + fmt::Debug + 'static {
    /// The band data type this Rust type represents
    const DTYPE: DType;

    /// Converts a sentinel or fill value, saturating at the type bounds
    fn from_f64(value: f64) -> Self;

    /// Whether this sample is NaN (always false for integers)
    fn is_nan(self) -> bool {
        false
    }

    /// Nodata comparison: exact equality, with NaN matching NaN
    fn matches_sentinel(self, sentinel: f64) -> bool {
        if sentinel.is_nan() {
            return self.is_nan();
        }
        Self::DTYPE.can_hold(sentinel) && self == Self::from_f64(sentinel)
    }
}

macro_rules! impl_int_sample {
    ($($ty:ty => $dtype:expr),* $(,)?) => {
        $(
            impl Sample for $ty {
                const DTYPE: DType = $dtype;

                fn from_f64(value: f64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_int_sample! {
    u8 => DType::U8,
    i8 => DType::I8,
    u16 => DType::U16,
    i16 => DType::I16,
    u32 => DType::U32,
    i32 => DType::I32,
    u64 => DType::U64,
    i64 => DType::I64,
}

impl Sample for f32 {
    const DTYPE: DType = DType::F32;

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }
}

impl Sample for f64 {
    const DTYPE: DType = DType::F64;

    fn from_f64(value: f64) -> Self {
        value
    }

    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }
}

impl Sample for Complex32 {
    const DTYPE: DType = DType::C64;

    fn from_f64(value: f64) -> Self {
        Complex32 { re: value as f32, im: 0.0 }
    }

    fn is_nan(self) -> bool {
        self.re.is_nan() || self.im.is_nan()
    }
}

impl Sample for Complex64 {
    const DTYPE: DType = DType::C128;

    fn from_f64(value: f64) -> Self {
        Complex64 { re: value, im: 0.0 }
    }

    fn is_nan(self) -> bool {
        self.re.is_nan() || self.im.is_nan()
    }
}

/// Represents image dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    /// Width in pixels
    pub width: u64,
    /// Height in pixels
    pub height: u64,
}

impl Dimensions {
    /// Creates new dimensions
    pub fn new(width: u64, height: u64) -> Self {
        Self { width, height }
    }

    /// Returns the total number of pixels
    pub fn pixel_count(&self) -> u64 {
        self.width * self.height
    }
}
