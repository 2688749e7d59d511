//! Response Body Decompression for Keel
//!
//! This crate decodes `Content-Encoding: gzip` and `Content-Encoding: deflate`
//! response bodies incrementally, one chunk at a time, so a streamed download
//! never has to be buffered in full before it can be consumed.
//!
//! # Features
//!
//! - `gzip` - Enable the gzip and deflate codecs (enabled by default)
//!
//! # Example
//!
//! ```rust
//! use keel_compression::{ContentEncoding, StreamingDecompressor};
//!
//! let encoding = ContentEncoding::from_header("gzip");
//! assert!(encoding.is_compressed());
//!
//! let payload = encoding.compress(b"hello, world", 6).unwrap();
//! let mut decoder = StreamingDecompressor::new(encoding).unwrap();
//!
//! let mut output = Vec::new();
//! for chunk in payload.chunks(4) {
//!     output.extend_from_slice(&decoder.decompress_chunk(chunk).unwrap());
//! }
//! output.extend_from_slice(&decoder.finish().unwrap());
//!
//! assert_eq!(output, b"hello, world");
//! ```
//!
//! # Encodings
//!
//! | `Content-Encoding` | Variant | Codec |
//! |---|---|---|
//! | `gzip`, `x-gzip` | [`ContentEncoding::Gzip`] | gzip member |
//! | `deflate` | [`ContentEncoding::Deflate`] | zlib-wrapped deflate |
//! | absent, `identity`, anything else | [`ContentEncoding::Identity`] | pass-through |

mod algorithm;
mod error;
pub mod streaming;

pub use algorithm::{ACCEPT_ENCODING, ContentEncoding};
pub use error::CompressionError;
pub use streaming::{DecompressionStats, StreamingDecompressor};

/// Result type for compression operations
pub type Result<T> = std::result::Result<T, CompressionError>;
