//! Element precision of shard buffers and the backend selector.
//!
//! Shards are written as a flat little-endian slab of `rows × dim` floats,
//! either half (f16, the usual case) or single (f32) precision.

use std::fmt;
use std::str::FromStr;

use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F16,
    F32,
}

impl Precision {
    pub fn element_size(self) -> usize {
        match self {
            Precision::F16 => 2,
            Precision::F32 => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Precision::F16 => "f16",
            Precision::F32 => "f32",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Precision {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "f16" | "half" => Ok(Precision::F16),
            "f32" | "float" | "single" => Ok(Precision::F32),
            other => Err(IndexError::config(format!("unknown precision: {other}"))),
        }
    }
}

/// Which backend holds a partition's rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Lazily paged memory map: low resident memory, I/O on first touch.
    Mmap,
    /// Whole shard read and converted to f32 at load time.
    #[default]
    Memory,
}

impl StorageMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageMode::Mmap => "mmap",
            StorageMode::Memory => "memory",
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageMode {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mmap" => Ok(StorageMode::Mmap),
            "memory" | "mem" => Ok(StorageMode::Memory),
            other => Err(IndexError::config(format!("unknown storage mode: {other}"))),
        }
    }
}

pub(crate) fn bytes_as_f32(bytes: &[u8]) -> Option<&[f32]> {
    if !bytes.len().is_multiple_of(4) {
        return None;
    }
    // SAFETY: length and alignment are validated before the slice is used as f32.
    let (prefix, aligned, suffix) = unsafe { bytes.align_to::<f32>() };
    if !prefix.is_empty() || !suffix.is_empty() {
        return None;
    }
    Some(aligned)
}

pub(crate) fn bytes_as_f16(bytes: &[u8]) -> Option<&[f16]> {
    if !bytes.len().is_multiple_of(2) {
        return None;
    }
    // SAFETY: length and alignment are validated before the slice is used as f16.
    let (prefix, aligned, suffix) = unsafe { bytes.align_to::<f16>() };
    if !prefix.is_empty() || !suffix.is_empty() {
        return None;
    }
    Some(aligned)
}

/// Decode a little-endian slab into f32 regardless of alignment.
pub(crate) fn decode_to_f32(bytes: &[u8], precision: Precision) -> Vec<f32> {
    match precision {
        Precision::F16 => bytes
            .chunks_exact(2)
            .map(|c| f16::from_le_bytes([c[0], c[1]]).to_f32())
            .collect(),
        Precision::F32 => bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_parse_and_reject_unknown() {
        assert_eq!("mmap".parse::<StorageMode>().unwrap(), StorageMode::Mmap);
        assert_eq!("MEM".parse::<StorageMode>().unwrap(), StorageMode::Memory);
        assert!("disk".parse::<StorageMode>().unwrap_err().is_configuration());

        assert_eq!("f16".parse::<Precision>().unwrap(), Precision::F16);
        assert_eq!("single".parse::<Precision>().unwrap(), Precision::F32);
        assert!("bf16".parse::<Precision>().unwrap_err().is_configuration());
    }

    #[test]
    fn element_sizes() {
        assert_eq!(Precision::F16.element_size(), 2);
        assert_eq!(Precision::F32.element_size(), 4);
    }

    #[test]
    fn decode_matches_source_values() {
        let values = [1.5f32, -0.25, 3.0];
        let f16_bytes: Vec<u8> = values
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_le_bytes())
            .collect();
        assert_eq!(decode_to_f32(&f16_bytes, Precision::F16), values);

        let f32_bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(decode_to_f32(&f32_bytes, Precision::F32), values);
    }

    #[test]
    fn misaligned_length_is_rejected() {
        assert!(bytes_as_f16(&[0u8; 3]).is_none());
        assert!(bytes_as_f32(&[0u8; 6]).is_none());
    }
}
