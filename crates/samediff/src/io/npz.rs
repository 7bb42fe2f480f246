//! NumPy `.npz` archives: a zip container of `.npy` entries.
//!
//! Entries are stored uncompressed, which keeps the container format
//! self-contained and lets NumPy open the result directly. The reader goes
//! through the central directory and rejects compressed entries.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::tensor::NdArray;

use super::npy::{from_npy_bytes, to_npy_bytes, NpyError};

const LOCAL_SIG: u32 = 0x0403_4b50;
const CENTRAL_SIG: u32 = 0x0201_4b50;
const EOCD_SIG: u32 = 0x0605_4b50;

#[derive(Debug, Error)]
pub enum NpzError {
    #[error("not an npz file: no end-of-central-directory record")]
    MissingEocd,
    #[error("malformed npz archive: {0}")]
    Malformed(String),
    #[error("entry '{0}' uses compression; only stored entries are supported")]
    Compressed(String),
    #[error("entry '{name}' crc mismatch")]
    CrcMismatch { name: String },
    #[error("entry '{name}': {source}")]
    Entry {
        name: String,
        #[source]
        source: NpyError,
    },
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Serializes named arrays into stored-zip npz bytes. Entry order follows
/// the input; each name gets a `.npy` suffix.
pub fn to_npz_bytes(entries: &[(String, NdArray)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, array) in entries {
        let file_name = format!("{name}.npy");
        let data = to_npy_bytes(array);
        let crc = crc32(&data);
        let offset = out.len() as u32;

        out.extend_from_slice(&LOCAL_SIG.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes()); // version needed
        out.extend_from_slice(&0u16.to_le_bytes()); // flags
        out.extend_from_slice(&0u16.to_le_bytes()); // method: stored
        out.extend_from_slice(&0u16.to_le_bytes()); // mod time
        out.extend_from_slice(&0u16.to_le_bytes()); // mod date
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(file_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // extra len
        out.extend_from_slice(file_name.as_bytes());
        out.extend_from_slice(&data);

        central.extend_from_slice(&CENTRAL_SIG.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes()); // version made by
        central.extend_from_slice(&20u16.to_le_bytes()); // version needed
        central.extend_from_slice(&0u16.to_le_bytes()); // flags
        central.extend_from_slice(&0u16.to_le_bytes()); // method
        central.extend_from_slice(&0u16.to_le_bytes()); // mod time
        central.extend_from_slice(&0u16.to_le_bytes()); // mod date
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(data.len() as u32).to_le_bytes());
        central.extend_from_slice(&(file_name.len() as u16).to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes()); // extra len
        central.extend_from_slice(&0u16.to_le_bytes()); // comment len
        central.extend_from_slice(&0u16.to_le_bytes()); // disk number
        central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
        central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(file_name.as_bytes());
    }
    let cd_offset = out.len() as u32;
    out.extend_from_slice(&central);
    out.extend_from_slice(&EOCD_SIG.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // disk number
    out.extend_from_slice(&0u16.to_le_bytes()); // cd start disk
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&(central.len() as u32).to_le_bytes());
    out.extend_from_slice(&cd_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // comment len
    out
}

/// Parses npz bytes into `(name, array)` pairs in archive order. The `.npy`
/// suffix is stripped from entry names.
pub fn from_npz_bytes(bytes: &[u8]) -> Result<Vec<(String, NdArray)>, NpzError> {
    let eocd = find_eocd(bytes)?;
    let entry_count = read_u16(bytes, eocd + 10)? as usize;
    let cd_offset = read_u32(bytes, eocd + 16)? as usize;

    let mut entries = Vec::with_capacity(entry_count);
    let mut pos = cd_offset;
    for _ in 0..entry_count {
        if read_u32(bytes, pos)? != CENTRAL_SIG {
            return Err(NpzError::Malformed(
                "bad central directory signature".to_string(),
            ));
        }
        let method = read_u16(bytes, pos + 10)?;
        let crc = read_u32(bytes, pos + 16)?;
        let size = read_u32(bytes, pos + 20)? as usize;
        let name_len = read_u16(bytes, pos + 28)? as usize;
        let extra_len = read_u16(bytes, pos + 30)? as usize;
        let comment_len = read_u16(bytes, pos + 32)? as usize;
        let local_offset = read_u32(bytes, pos + 42)? as usize;
        let name = std::str::from_utf8(slice(bytes, pos + 46, name_len)?)
            .map_err(|_| NpzError::Malformed("entry name is not utf-8".to_string()))?
            .to_string();
        pos += 46 + name_len + extra_len + comment_len;

        if method != 0 {
            return Err(NpzError::Compressed(name));
        }

        if read_u32(bytes, local_offset)? != LOCAL_SIG {
            return Err(NpzError::Malformed(format!(
                "entry '{name}': bad local header signature"
            )));
        }
        let local_name_len = read_u16(bytes, local_offset + 26)? as usize;
        let local_extra_len = read_u16(bytes, local_offset + 28)? as usize;
        let data_start = local_offset + 30 + local_name_len + local_extra_len;
        let data = slice(bytes, data_start, size)?;
        if crc32(data) != crc {
            return Err(NpzError::CrcMismatch { name });
        }
        let base = name.strip_suffix(".npy").unwrap_or(&name).to_string();
        let array = from_npy_bytes(data).map_err(|source| NpzError::Entry {
            name: base.clone(),
            source,
        })?;
        entries.push((base, array));
    }
    Ok(entries)
}

pub fn save_npz(path: impl AsRef<Path>, entries: &[(String, NdArray)]) -> Result<(), NpzError> {
    fs::write(path, to_npz_bytes(entries))?;
    Ok(())
}

pub fn load_npz(path: impl AsRef<Path>) -> Result<Vec<(String, NdArray)>, NpzError> {
    from_npz_bytes(&fs::read(path)?)
}

/// Scans backward for the end-of-central-directory signature; the record has
/// a variable-length trailing comment.
fn find_eocd(bytes: &[u8]) -> Result<usize, NpzError> {
    if bytes.len() < 22 {
        return Err(NpzError::MissingEocd);
    }
    let floor = bytes.len().saturating_sub(22 + u16::MAX as usize);
    let mut pos = bytes.len() - 22;
    loop {
        if u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
            == EOCD_SIG
        {
            return Ok(pos);
        }
        if pos == floor {
            return Err(NpzError::MissingEocd);
        }
        pos -= 1;
    }
}

fn slice(bytes: &[u8], start: usize, len: usize) -> Result<&[u8], NpzError> {
    bytes
        .get(start..start + len)
        .ok_or_else(|| NpzError::Malformed("offset out of range".to_string()))
}

fn read_u16(bytes: &[u8], pos: usize) -> Result<u16, NpzError> {
    let s = slice(bytes, pos, 2)?;
    Ok(u16::from_le_bytes([s[0], s[1]]))
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<u32, NpzError> {
    let s = slice(bytes, pos, 4)?;
    Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

/// CRC-32 (IEEE 802.3), bitwise reflected form.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    let mut crc = !0u32;
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}
