//! Frame encoding: JSON serialization plus threshold-gated deflate.
//!
//! Payloads at or below the compression threshold are sent as the raw
//! serialized bytes. Larger payloads are sent as [`COMPRESSED_MARKER`]
//! followed by a deflate stream. A serialized envelope always starts with
//! `{`, so the marker can never be mistaken for an uncompressed frame.

use super::types::Envelope;
use crate::error::CodecError;
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use std::borrow::Cow;
use std::io::{Read, Write};

/// Prefix identifying a deflate-compressed frame.
pub const COMPRESSED_MARKER: [u8; 2] = [0xFF, 0x5A];

/// Refuse to inflate frames past this size.
pub const MAX_DECOMPRESSED_SIZE: usize = 16 * 1024 * 1024;

/// An encoded frame ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub compressed: bool,
}

pub fn is_compressed(frame: &[u8]) -> bool {
    frame.starts_with(&COMPRESSED_MARKER)
}

/// Deflates `data` and prefixes the compression marker.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = DeflateEncoder::new(COMPRESSED_MARKER.to_vec(), Compression::fast());
    encoder.write_all(data).map_err(CodecError::Compression)?;
    encoder.finish().map_err(CodecError::Compression)
}

/// Inflates a marked frame; unmarked frames are returned as-is.
pub fn decompress(frame: &[u8]) -> Result<Cow<'_, [u8]>, CodecError> {
    if !is_compressed(frame) {
        return Ok(Cow::Borrowed(frame));
    }

    let decoder = DeflateDecoder::new(&frame[COMPRESSED_MARKER.len()..]);
    let mut inflated = Vec::new();
    decoder
        .take(MAX_DECOMPRESSED_SIZE as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(CodecError::Decompression)?;

    if inflated.len() > MAX_DECOMPRESSED_SIZE {
        return Err(CodecError::FrameTooLarge {
            limit: MAX_DECOMPRESSED_SIZE,
        });
    }
    Ok(Cow::Owned(inflated))
}

/// Compresses `data` only when it exceeds `threshold` bytes.
pub fn compress_if_needed(data: Vec<u8>, threshold: usize) -> Result<EncodedFrame, CodecError> {
    if data.len() > threshold {
        Ok(EncodedFrame {
            bytes: compress(&data)?,
            compressed: true,
        })
    } else {
        Ok(EncodedFrame {
            bytes: data,
            compressed: false,
        })
    }
}

/// Serializes an envelope and applies the compression policy.
pub fn encode(envelope: &Envelope, threshold: usize) -> Result<EncodedFrame, CodecError> {
    let serialized = serde_json::to_vec(envelope)?;
    compress_if_needed(serialized, threshold)
}

/// Decompresses (when marked) and parses a frame received from a peer.
pub fn decode(frame: &[u8]) -> Result<Envelope, CodecError> {
    let bytes = decompress(frame)?;
    serde_json::from_slice(&bytes).map_err(CodecError::Deserialization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::MessageKind;

    #[test]
    fn test_small_payload_sent_unmodified() {
        let envelope = Envelope::game(1, b"tiny".to_vec());
        let frame = encode(&envelope, 1024).unwrap();
        assert!(!frame.compressed);
        assert_eq!(frame.bytes, serde_json::to_vec(&envelope).unwrap());
        assert_eq!(decode(&frame.bytes).unwrap(), envelope);
    }

    #[test]
    fn test_large_payload_compressed() {
        let envelope = Envelope::game(1, vec![7u8; 8192]);
        let frame = encode(&envelope, 1024).unwrap();
        assert!(frame.compressed);
        assert!(is_compressed(&frame.bytes));
        assert!(frame.bytes.len() < 8192);
        assert_eq!(decode(&frame.bytes).unwrap(), envelope);
    }

    #[test]
    fn test_compression_symmetry_across_sizes() {
        for size in [0usize, 1, 63, 64, 65, 1000, 4096, 100_000] {
            let data: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
            let frame = compress_if_needed(data.clone(), 64).unwrap();
            if size > 64 {
                assert!(frame.compressed, "size {size} should compress");
                assert_eq!(decompress(&frame.bytes).unwrap().as_ref(), data.as_slice());
            } else {
                assert!(!frame.compressed);
                assert_eq!(frame.bytes, data);
            }
        }
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let data = vec![1u8; 64];
        assert!(!compress_if_needed(data.clone(), 64).unwrap().compressed);
        assert!(compress_if_needed(data, 63).unwrap().compressed);
    }

    #[test]
    fn test_garbage_frames_fail_to_decode() {
        assert!(decode(b"not json").is_err());
        assert!(decode(&[0xFF, 0x5A, 0x00, 0x13, 0x37]).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_compressed_kind_preserved() {
        let envelope = Envelope::new(MessageKind::Handshake, vec![0u8; 5000]);
        let frame = encode(&envelope, 10).unwrap();
        assert_eq!(decode(&frame.bytes).unwrap().kind, MessageKind::Handshake);
    }
}
