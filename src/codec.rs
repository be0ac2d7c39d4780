//! Segment codec
//!
//! Thin wrapper over the LZ4 block codec and SHA-256. NSO segment
//! payloads are raw LZ4 blocks truncated to their exact compressed
//! size; hashes cover the decompressed bytes and are only produced
//! during ELF -> NSO synthesis, never verified on the way in (the
//! converter is not a security boundary).

use sha2::{Digest, Sha256};

use crate::error::{ConvertError, Result};

/// Decompress one NSO segment payload.
///
/// Fails with `CorruptSegment` if the decoder reports an error or the
/// output length does not match the descriptor.
pub fn decompress_segment(
    name: &'static str,
    compressed: &[u8],
    decompressed_size: u32,
) -> Result<Vec<u8>> {
    let expected = decompressed_size as usize;
    if expected == 0 {
        return Ok(Vec::new());
    }

    let raw = lz4_flex::block::decompress(compressed, expected)
        .map_err(|e| ConvertError::corrupt_segment(name, format!("lz4 decode failed: {e}")))?;
    if raw.len() != expected {
        return Err(ConvertError::corrupt_segment(
            name,
            format!("decompressed to {} bytes, descriptor says {}", raw.len(), expected),
        ));
    }
    Ok(raw)
}

/// Compress one segment at the fastest LZ4 setting, returning only
/// the bytes actually produced.
pub fn compress_segment(raw: &[u8]) -> Vec<u8> {
    if raw.is_empty() {
        return Vec::new();
    }
    lz4_flex::block::compress(raw)
}

/// SHA-256 over a decompressed segment.
pub fn hash_segment(raw: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(raw);
    digest.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_then_decompress_is_identity() {
        let raw: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let compressed = compress_segment(&raw);
        assert!(compressed.len() < raw.len());
        let back = decompress_segment("text", &compressed, raw.len() as u32).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn empty_segment_round_trips() {
        let compressed = compress_segment(&[]);
        let back = decompress_segment("rodata", &compressed, 0).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn size_mismatch_is_corrupt_segment() {
        let compressed = compress_segment(&[7u8; 64]);
        let err = decompress_segment("data", &compressed, 65).unwrap_err();
        assert!(matches!(err, ConvertError::CorruptSegment { segment: "data", .. }));
    }

    #[test]
    fn garbage_input_is_corrupt_segment() {
        let err = decompress_segment("text", &[0xFF, 0xFF, 0xFF], 128).unwrap_err();
        assert!(matches!(err, ConvertError::CorruptSegment { .. }));
    }

    #[test]
    fn hash_is_sha256() {
        // SHA-256 of the empty input, a fixed reference value
        let empty = hash_segment(&[]);
        assert_eq!(
            hex::encode(empty),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
