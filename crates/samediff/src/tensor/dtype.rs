//! Enumerates the scalar element types supported by buffers and the NPY layer.

use half::f16;
use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between buffers, arrays and serialized forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 16-bit floating point (IEEE half precision).
    F16,
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point.
    F64,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// Boolean, stored as one byte per element (0 or 1).
    Bool,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
            DType::I32 => 4,
            DType::I64 => 8,
            DType::Bool => 1,
        }
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::F32 | DType::F64)
    }

    /// Returns `true` when the dtype is a signed integer.
    pub fn is_integer(self) -> bool {
        matches!(self, DType::I32 | DType::I64)
    }

    /// Produces a stable tag used when serializing buffers.
    pub fn tag(self) -> u32 {
        match self {
            DType::F16 => 0,
            DType::F32 => 1,
            DType::F64 => 2,
            DType::I32 => 3,
            DType::I64 => 4,
            DType::Bool => 5,
        }
    }

    /// Reconstructs a `DType` from its serialized tag representation.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(DType::F16),
            1 => Some(DType::F32),
            2 => Some(DType::F64),
            3 => Some(DType::I32),
            4 => Some(DType::I64),
            5 => Some(DType::Bool),
            _ => None,
        }
    }

    /// NumPy `descr` string for this dtype, little-endian.
    pub fn npy_descr(self) -> &'static str {
        match self {
            DType::F16 => "<f2",
            DType::F32 => "<f4",
            DType::F64 => "<f8",
            DType::I32 => "<i4",
            DType::I64 => "<i8",
            DType::Bool => "|b1",
        }
    }

    /// Parses a NumPy `descr` string. `=` and missing byte-order markers are
    /// treated as little-endian, matching NumPy's behaviour on LE hosts.
    pub fn from_npy_descr(descr: &str) -> Option<Self> {
        let normalized = match descr.as_bytes().first() {
            Some(b'<') | Some(b'|') | Some(b'=') => &descr[1..],
            Some(b'>') => return None,
            _ => descr,
        };
        match normalized {
            "f2" => Some(DType::F16),
            "f4" => Some(DType::F32),
            "f8" => Some(DType::F64),
            "i4" => Some(DType::I32),
            "i8" => Some(DType::I64),
            "b1" => Some(DType::Bool),
            _ => None,
        }
    }
}

/// Scalar type that can live inside a [`DataBuffer`](super::DataBuffer).
///
/// The `f64` round-trip is the lowest common denominator used by generic
/// kernels and updaters; integer dtypes are exact within the 53-bit mantissa.
pub trait Element: Copy + Send + Sync + 'static {
    /// The dtype this element type stores as.
    const DTYPE: DType;

    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
    fn to_le_bytes_vec(self) -> Vec<u8>;
    fn from_le_slice(bytes: &[u8]) -> Self;
}

impl Element for f16 {
    const DTYPE: DType = DType::F16;

    fn from_f64(v: f64) -> Self {
        f16::from_f64(v)
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn to_le_bytes_vec(self) -> Vec<u8> {
        self.to_bits().to_le_bytes().to_vec()
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        f16::from_bits(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    fn from_f64(v: f64) -> Self {
        v as f32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn to_le_bytes_vec(self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    fn from_f64(v: f64) -> Self {
        v
    }

    fn to_f64(self) -> f64 {
        self
    }

    fn to_le_bytes_vec(self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        f64::from_le_bytes(buf)
    }
}

impl Element for i32 {
    const DTYPE: DType = DType::I32;

    fn from_f64(v: f64) -> Self {
        v as i32
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn to_le_bytes_vec(self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl Element for i64 {
    const DTYPE: DType = DType::I64;

    fn from_f64(v: f64) -> Self {
        v as i64
    }

    fn to_f64(self) -> f64 {
        self as f64
    }

    fn to_le_bytes_vec(self) -> Vec<u8> {
        self.to_le_bytes().to_vec()
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        i64::from_le_bytes(buf)
    }
}

/// Boolean elements store as a single byte, 0 or 1.
impl Element for u8 {
    const DTYPE: DType = DType::Bool;

    fn from_f64(v: f64) -> Self {
        u8::from(v != 0.0)
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn to_le_bytes_vec(self) -> Vec<u8> {
        vec![self]
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        bytes[0]
    }
}
