//! Compression adapter — thin wrapper around an external deflate-style
//! byte compressor.
//!
//! The container and data codec only ever call `compress(bytes, level)`
//! and `decompress(bytes, expected_len)` — codec selection itself is out
//! of scope for the wire format, which has only a single per-entry
//! `compress` flag bit, not a codec-id field. This keeps the shape of a
//! pluggable `Compressor` trait but narrows the registry to the one
//! generic compressor the format actually needs.

use std::io::{self, Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("compression error: {0}")]
    Compression(String),
    #[error("decompression error: {0}")]
    Decompression(String),
}

/// Compress `data` at `level` (clamped to 0..=9, the deflate level
/// range the container's `compress` field encodes).
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>, CodecError> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;

    let level = level.min(9);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| CodecError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CodecError::Compression(e.to_string()))
}

/// Decompress `data`, which must inflate to exactly `expected_len` bytes.
/// Returns `Decompression` if the stream is truncated/corrupt or the
/// inflated length does not match `expected_len`.
pub fn decompress(data: &[u8], expected_len: usize) -> Result<Vec<u8>, CodecError> {
    use flate2::read::ZlibDecoder;

    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CodecError::Decompression(e.to_string()))?;
    if out.len() != expected_len {
        return Err(CodecError::Decompression(format!(
            "decompressed {} bytes, expected {expected_len}",
            out.len()
        )));
    }
    Ok(out)
}

impl From<io::Error> for CodecError {
    fn from(e: io::Error) -> Self {
        CodecError::Decompression(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = compress(&data, 6).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn wrong_expected_len_errors() {
        let data = b"hello world".to_vec();
        let compressed = compress(&data, 3).unwrap();
        assert!(decompress(&compressed, data.len() + 1).is_err());
    }

    #[test]
    fn level_zero_is_store_like() {
        let data = vec![0x41u8; 4096];
        let compressed = compress(&data, 0).unwrap();
        let decompressed = decompress(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }
}
