//! NumPy `.npy` (format version 1.0) reading and writing.
//!
//! Arrays serialize byte-exactly: the header dict is rendered in NumPy's own
//! field order, space-padded so the data section starts on a 64-byte
//! boundary, and element bytes are little-endian in the declared order.
//! Malformed input fails fast with a descriptive error; nothing is guessed.

use std::fs;
use std::io;
use std::path::Path;

use crate::tensor::{DataBuffer, DType, NdArray, Order, Shape};

use thiserror::Error;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const ALIGN: usize = 64;

#[derive(Debug, Error)]
pub enum NpyError {
    #[error("not an npy file: bad magic bytes")]
    InvalidMagic,
    #[error("unsupported npy format version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("malformed npy header: {0}")]
    HeaderParse(String),
    #[error("unsupported npy dtype descriptor '{0}'")]
    UnsupportedDescr(String),
    #[error("npy payload is {actual} bytes, header implies {expected}")]
    PayloadLength { expected: usize, actual: usize },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Serializes an array to npy bytes. Non-contiguous views are densified in
/// their own ordering first.
pub fn to_npy_bytes(array: &NdArray) -> Vec<u8> {
    let dense = if array.is_contiguous() {
        array.clone()
    } else {
        array.dup()
    };
    let fortran = dense.order() == Order::F;
    let descr = dense.dtype().npy_descr();
    let shape = format_shape(dense.shape());
    let dict = format!(
        "{{'descr': '{descr}', 'fortran_order': {}, 'shape': {shape}, }}",
        if fortran { "True" } else { "False" }
    );
    // 8 bytes magic+version, 2 bytes header length, then the dict padded
    // with spaces to a 64-byte boundary and terminated by a newline.
    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (ALIGN - unpadded % ALIGN) % ALIGN;
    let header_len = (dict.len() + padding + 1) as u16;

    let mut out = Vec::with_capacity(unpadded + padding + dense.buffer().bytes().len());
    out.extend_from_slice(MAGIC);
    out.push(1);
    out.push(0);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out.extend(std::iter::repeat(b' ').take(padding));
    out.push(b'\n');
    out.extend_from_slice(dense.buffer().bytes());
    out
}

/// Deserializes npy bytes into an array.
pub fn from_npy_bytes(bytes: &[u8]) -> Result<NdArray, NpyError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(NpyError::InvalidMagic);
    }
    let (major, minor) = (bytes[6], bytes[7]);
    if major != 1 || minor != 0 {
        return Err(NpyError::UnsupportedVersion { major, minor });
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = 10 + header_len;
    if bytes.len() < data_start {
        return Err(NpyError::HeaderParse(
            "declared header length exceeds file size".to_string(),
        ));
    }
    let header = std::str::from_utf8(&bytes[10..data_start])
        .map_err(|_| NpyError::HeaderParse("header is not valid utf-8".to_string()))?;

    let descr = extract_str_field(header, "descr")?;
    let dtype = DType::from_npy_descr(&descr).ok_or(NpyError::UnsupportedDescr(descr))?;
    let fortran = extract_bool_field(header, "fortran_order")?;
    let dims = extract_shape_field(header)?;
    let shape = Shape::new(dims);

    let expected = shape.num_elements() * dtype.size_in_bytes();
    let payload = &bytes[data_start..];
    if payload.len() != expected {
        return Err(NpyError::PayloadLength {
            expected,
            actual: payload.len(),
        });
    }
    let buffer = DataBuffer::from_le_bytes(payload.to_vec(), dtype)
        .expect("payload length checked against dtype size");
    let order = if fortran { Order::F } else { Order::C };
    NdArray::from_buffer(buffer, shape, order)
        .map_err(|e| NpyError::HeaderParse(format!("shape does not fit payload: {e}")))
}

pub fn save_npy(path: impl AsRef<Path>, array: &NdArray) -> Result<(), NpyError> {
    fs::write(path, to_npy_bytes(array))?;
    Ok(())
}

pub fn load_npy(path: impl AsRef<Path>) -> Result<NdArray, NpyError> {
    from_npy_bytes(&fs::read(path)?)
}

fn format_shape(shape: &Shape) -> String {
    match shape.dims() {
        [] => "()".to_string(),
        [d] => format!("({d},)"),
        dims => {
            let inner: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            format!("({})", inner.join(", "))
        }
    }
}

/// Pulls `'key': '<value>'` out of the header dict.
fn extract_str_field(header: &str, key: &str) -> Result<String, NpyError> {
    let rest = field_value(header, key)?;
    let rest = rest.trim_start();
    let quote = rest
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| NpyError::HeaderParse(format!("'{key}' value is not a string")))?;
    let rest = &rest[1..];
    let end = rest
        .find(quote)
        .ok_or_else(|| NpyError::HeaderParse(format!("unterminated '{key}' string")))?;
    Ok(rest[..end].to_string())
}

fn extract_bool_field(header: &str, key: &str) -> Result<bool, NpyError> {
    let rest = field_value(header, key)?.trim_start();
    if rest.starts_with("True") {
        Ok(true)
    } else if rest.starts_with("False") {
        Ok(false)
    } else {
        Err(NpyError::HeaderParse(format!("'{key}' is not a boolean")))
    }
}

fn extract_shape_field(header: &str) -> Result<Vec<usize>, NpyError> {
    let rest = field_value(header, "shape")?.trim_start();
    if !rest.starts_with('(') {
        return Err(NpyError::HeaderParse("'shape' is not a tuple".to_string()));
    }
    let end = rest
        .find(')')
        .ok_or_else(|| NpyError::HeaderParse("unterminated 'shape' tuple".to_string()))?;
    let inner = &rest[1..end];
    let mut dims = Vec::new();
    for part in inner.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let dim: usize = part
            .parse()
            .map_err(|_| NpyError::HeaderParse(format!("bad shape dimension '{part}'")))?;
        dims.push(dim);
    }
    Ok(dims)
}

fn field_value<'h>(header: &'h str, key: &str) -> Result<&'h str, NpyError> {
    let needle_single = format!("'{key}'");
    let pos = header
        .find(&needle_single)
        .ok_or_else(|| NpyError::HeaderParse(format!("missing '{key}' field")))?;
    let rest = &header[pos + needle_single.len()..];
    let rest = rest.trim_start();
    let rest = rest
        .strip_prefix(':')
        .ok_or_else(|| NpyError::HeaderParse(format!("missing ':' after '{key}'")))?;
    Ok(rest)
}
