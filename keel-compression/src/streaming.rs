//! Streaming Decompression - Decode chunks as they arrive
//!
//! This module decodes a compressed response body incrementally. Each call
//! to [`StreamingDecompressor::decompress_chunk`] accepts whatever the network
//! delivered and returns whatever plaintext the codec could produce from it,
//! which may be empty while the codec is still reading a header.
//!
//! # Example
//!
//! ```rust
//! use keel_compression::{ContentEncoding, StreamingDecompressor};
//!
//! let mut decoder = StreamingDecompressor::new(ContentEncoding::Identity).unwrap();
//! let out = decoder.decompress_chunk(b"pass-through").unwrap();
//! assert_eq!(&out[..], b"pass-through");
//! ```

use crate::{CompressionError, ContentEncoding, Result};
use bytes::Bytes;

#[cfg(feature = "gzip")]
use flate2::write::{GzDecoder, ZlibDecoder};

#[cfg(feature = "gzip")]
use std::io::Write;

/// Internal decoder state.
enum DecoderState {
    Identity,
    #[cfg(feature = "gzip")]
    Gzip(GzDecoder<Vec<u8>>),
    #[cfg(feature = "gzip")]
    Deflate(ZlibDecoder<Vec<u8>>),
}

/// Streaming decompressor that decodes chunks incrementally.
pub struct StreamingDecompressor {
    encoding: ContentEncoding,
    decoder: DecoderState,
    bytes_in: u64,
    bytes_out: u64,
    finished: bool,
}

impl StreamingDecompressor {
    /// Create a decoder for the given content encoding.
    pub fn new(encoding: ContentEncoding) -> Result<Self> {
        let decoder = match encoding {
            ContentEncoding::Identity => DecoderState::Identity,
            #[cfg(feature = "gzip")]
            ContentEncoding::Gzip => DecoderState::Gzip(GzDecoder::new(Vec::new())),
            #[cfg(feature = "gzip")]
            ContentEncoding::Deflate => DecoderState::Deflate(ZlibDecoder::new(Vec::new())),
            #[allow(unreachable_patterns)]
            other => return Err(CompressionError::UnsupportedEncoding(other.to_string())),
        };

        Ok(Self {
            encoding,
            decoder,
            bytes_in: 0,
            bytes_out: 0,
            finished: false,
        })
    }

    /// Create a decoder from a raw `Content-Encoding` header value.
    pub fn from_content_encoding(header: Option<&str>) -> Result<Self> {
        Self::new(ContentEncoding::from_optional_header(header))
    }

    /// The encoding this decoder undoes.
    pub fn encoding(&self) -> ContentEncoding {
        self.encoding
    }

    /// Decode a chunk of data.
    ///
    /// Returns all plaintext the input so far decodes to. May return empty
    /// while the codec waits on a partial header or block.
    pub fn decompress_chunk(&mut self, data: &[u8]) -> Result<Bytes> {
        if self.finished {
            return Err(CompressionError::AlreadyFinished);
        }

        if data.is_empty() {
            return Ok(Bytes::new());
        }

        self.bytes_in += data.len() as u64;

        let output = match &mut self.decoder {
            DecoderState::Identity => Bytes::copy_from_slice(data),

            #[cfg(feature = "gzip")]
            DecoderState::Gzip(decoder) => {
                decoder
                    .write_all(data)
                    .and_then(|()| decoder.flush())
                    .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;
                Bytes::from(std::mem::take(decoder.get_mut()))
            }

            #[cfg(feature = "gzip")]
            DecoderState::Deflate(decoder) => {
                decoder
                    .write_all(data)
                    .and_then(|()| decoder.flush())
                    .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;
                Bytes::from(std::mem::take(decoder.get_mut()))
            }
        };

        self.bytes_out += output.len() as u64;
        Ok(output)
    }

    /// Finish decoding and return any trailing plaintext.
    ///
    /// Calling `finish` more than once returns empty bytes.
    pub fn finish(&mut self) -> Result<Bytes> {
        if self.finished {
            return Ok(Bytes::new());
        }
        self.finished = true;

        let output = match &mut self.decoder {
            DecoderState::Identity => Bytes::new(),

            #[cfg(feature = "gzip")]
            DecoderState::Gzip(decoder) => {
                decoder
                    .try_finish()
                    .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;
                Bytes::from(std::mem::take(decoder.get_mut()))
            }

            #[cfg(feature = "gzip")]
            DecoderState::Deflate(decoder) => {
                decoder
                    .try_finish()
                    .map_err(|e| CompressionError::DecompressionFailed(e.to_string()))?;
                Bytes::from(std::mem::take(decoder.get_mut()))
            }
        };

        self.bytes_out += output.len() as u64;
        tracing::trace!(
            encoding = %self.encoding,
            bytes_in = self.bytes_in,
            bytes_out = self.bytes_out,
            "Decompression finished"
        );
        Ok(output)
    }

    /// Whether `finish` has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Get decompression statistics.
    pub fn stats(&self) -> DecompressionStats {
        DecompressionStats {
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
        }
    }
}

impl std::fmt::Debug for StreamingDecompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingDecompressor")
            .field("encoding", &self.encoding)
            .field("bytes_in", &self.bytes_in)
            .field("bytes_out", &self.bytes_out)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Decompression statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecompressionStats {
    /// Total encoded bytes fed to the decoder
    pub bytes_in: u64,
    /// Total plaintext bytes produced
    pub bytes_out: u64,
}

impl DecompressionStats {
    /// Expansion ratio (out/in). 1.0 before any input.
    pub fn expansion(&self) -> f64 {
        if self.bytes_in == 0 {
            return 1.0;
        }
        self.bytes_out as f64 / self.bytes_in as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_in_chunks(encoding: ContentEncoding, payload: &[u8], chunk_size: usize) -> Vec<u8> {
        let mut decoder = StreamingDecompressor::new(encoding).unwrap();
        let mut output = Vec::new();
        for chunk in payload.chunks(chunk_size) {
            output.extend_from_slice(&decoder.decompress_chunk(chunk).unwrap());
        }
        output.extend_from_slice(&decoder.finish().unwrap());
        output
    }

    #[test]
    fn test_passthrough_decoder() {
        let mut decoder = StreamingDecompressor::new(ContentEncoding::Identity).unwrap();

        let out = decoder.decompress_chunk(b"Hello, World!").unwrap();
        assert_eq!(out.as_ref(), b"Hello, World!");

        let tail = decoder.finish().unwrap();
        assert!(tail.is_empty());
        assert_eq!(decoder.stats().bytes_in, 13);
        assert_eq!(decoder.stats().bytes_out, 13);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_gzip_streaming_small_chunks() {
        let original = b"Hello, World! This is a test chunk.\n".repeat(50);
        let compressed = ContentEncoding::Gzip.compress(&original, 6).unwrap();

        // One byte at a time forces the decoder through partial headers
        let decoded = decode_in_chunks(ContentEncoding::Gzip, &compressed, 1);
        assert_eq!(decoded, original);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_deflate_streaming() {
        let original = b"deflate me please ".repeat(100);
        let compressed = ContentEncoding::Deflate.compress(&original, 9).unwrap();

        let decoded = decode_in_chunks(ContentEncoding::Deflate, &compressed, 64);
        assert_eq!(decoded, original);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_whole_member_in_one_chunk_decodes_immediately() {
        let original = vec![b'x'; 4000];
        let compressed = ContentEncoding::Gzip.compress(&original, 6).unwrap();

        let mut decoder = StreamingDecompressor::new(ContentEncoding::Gzip).unwrap();
        let out = decoder.decompress_chunk(&compressed).unwrap();
        assert_eq!(out.len(), 4000);
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_deflate_chunk_output_is_not_deferred() {
        let original = b"zlib body ".repeat(200);
        let compressed = ContentEncoding::Deflate.compress(&original, 6).unwrap();

        let mut decoder = StreamingDecompressor::new(ContentEncoding::Deflate).unwrap();
        let out = decoder.decompress_chunk(&compressed).unwrap();
        assert_eq!(out.as_ref(), &original[..]);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_stats_track_both_sides() {
        let original = vec![b'a'; 10_000];
        let compressed = ContentEncoding::Gzip.compress(&original, 9).unwrap();

        let mut decoder = StreamingDecompressor::new(ContentEncoding::Gzip).unwrap();
        decoder.decompress_chunk(&compressed).unwrap();
        decoder.finish().unwrap();

        let stats = decoder.stats();
        assert_eq!(stats.bytes_in, compressed.len() as u64);
        assert_eq!(stats.bytes_out, 10_000);
        assert!(stats.expansion() > 1.0);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_invalid_gzip_is_an_error() {
        let mut decoder = StreamingDecompressor::new(ContentEncoding::Gzip).unwrap();
        let result = decoder.decompress_chunk(b"definitely not a gzip header at all");
        assert!(matches!(result, Err(CompressionError::DecompressionFailed(_))));
    }

    #[test]
    fn test_chunk_after_finish_is_rejected() {
        let mut decoder = StreamingDecompressor::new(ContentEncoding::Identity).unwrap();
        decoder.finish().unwrap();

        assert!(decoder.is_finished());
        assert!(matches!(
            decoder.decompress_chunk(b"late"),
            Err(CompressionError::AlreadyFinished)
        ));
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_from_content_encoding() {
        let decoder = StreamingDecompressor::from_content_encoding(None).unwrap();
        assert_eq!(decoder.encoding(), ContentEncoding::Identity);
    }

    #[test]
    fn test_expansion_without_input() {
        let stats = DecompressionStats {
            bytes_in: 0,
            bytes_out: 0,
        };
        assert_eq!(stats.expansion(), 1.0);
    }
}
