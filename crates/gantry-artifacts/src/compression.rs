//! Compression utilities for stored blobs.

use gantry_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Compression algorithm.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    #[default]
    Zstd,
}

/// Compress data using the specified algorithm.
pub fn compress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>> {
    match algorithm {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Zstd => compress_zstd(data),
    }
}

/// Decompress data using the specified algorithm.
pub fn decompress(data: &[u8], algorithm: CompressionType) -> Result<Vec<u8>> {
    match algorithm {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Zstd => decompress_zstd(data),
    }
}

fn compress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)
        .map_err(|e| Error::Internal(format!("Zstd compression failed: {}", e)))?;
    encoder
        .write_all(data)
        .map_err(|e| Error::Internal(format!("Zstd write failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Internal(format!("Zstd finish failed: {}", e)))
}

fn decompress_zstd(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = zstd::Decoder::new(data)
        .map_err(|e| Error::Internal(format!("Zstd decompression failed: {}", e)))?;
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| Error::Internal(format!("Zstd read failed: {}", e)))?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zstd_shrinks_repetitive_data() {
        let data = "image: ghcr.io/org/repo:sha-abc123\n".repeat(64);
        let compressed = compress(data.as_bytes(), CompressionType::Zstd).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = decompress(&compressed, CompressionType::Zstd).unwrap();
        assert_eq!(data.as_bytes(), decompressed.as_slice());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decompress(b"not zstd", CompressionType::Zstd).is_err());
    }
}
