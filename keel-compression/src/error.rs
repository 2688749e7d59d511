//! Error types for compression operations

use thiserror::Error;

/// Errors that can occur while encoding or decoding a body
#[derive(Error, Debug)]
pub enum CompressionError {
    /// Compression operation failed
    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    /// Decompression operation failed
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    /// The decoder was fed after `finish` was called
    #[error("Decompressor already finished")]
    AlreadyFinished,

    /// Encoding is known but its codec is compiled out
    #[error("Unsupported content encoding: {0}")]
    UnsupportedEncoding(String),

    /// IO error during compression
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
