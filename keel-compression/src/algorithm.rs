//! Content encodings understood by the decoder

use crate::{CompressionError, Result};

/// `Accept-Encoding` value advertised for streamed downloads.
pub const ACCEPT_ENCODING: &str = "gzip, deflate";

/// Content encoding of a response body, as declared by `Content-Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    /// Body bytes are the payload itself
    #[default]
    Identity,

    /// Gzip member (`gzip`, `x-gzip`)
    Gzip,

    /// Zlib-wrapped deflate stream (`deflate`)
    Deflate,
}

impl ContentEncoding {
    /// Parse a `Content-Encoding` header value.
    ///
    /// Unknown and stacked encodings are treated as identity; only the
    /// encodings this crate can undo are reported as compressed.
    pub fn from_header(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Self::Gzip,
            "deflate" => Self::Deflate,
            _ => Self::Identity,
        }
    }

    /// Parse an optional header, defaulting to identity when absent.
    pub fn from_optional_header(value: Option<&str>) -> Self {
        value.map(Self::from_header).unwrap_or_default()
    }

    /// Get the `Content-Encoding` header value for this encoding
    pub fn encoding_name(&self) -> Option<&'static str> {
        match self {
            Self::Identity => None,
            Self::Gzip => Some("gzip"),
            Self::Deflate => Some("deflate"),
        }
    }

    /// Whether the body must be decoded before use.
    pub fn is_compressed(&self) -> bool {
        !matches!(self, Self::Identity)
    }

    /// Check if the codec for this encoding is compiled in
    pub fn is_available(&self) -> bool {
        match self {
            Self::Identity => true,
            Self::Gzip | Self::Deflate => cfg!(feature = "gzip"),
        }
    }

    /// Compress data with this encoding.
    ///
    /// Used to build fixtures and by servers that need to mirror what the
    /// decoder accepts.
    pub fn compress(&self, data: &[u8], level: u32) -> Result<Vec<u8>> {
        match self {
            Self::Identity => Ok(data.to_vec()),
            #[cfg(feature = "gzip")]
            Self::Gzip => compress_gzip(data, level),
            #[cfg(feature = "gzip")]
            Self::Deflate => compress_deflate(data, level),
            #[allow(unreachable_patterns)]
            _ => Err(CompressionError::UnsupportedEncoding(self.to_string())),
        }
    }
}

impl std::fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Identity => write!(f, "identity"),
            Self::Gzip => write!(f, "gzip"),
            Self::Deflate => write!(f, "deflate"),
        }
    }
}

// ========== Flate Implementations ==========

#[cfg(feature = "gzip")]
fn compress_gzip(data: &[u8], level: u32) -> Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.clamp(0, 9)));
    encoder
        .write_all(data)
        .map_err(|e| CompressionError::CompressionFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CompressionError::CompressionFailed(e.to_string()))
}

#[cfg(feature = "gzip")]
fn compress_deflate(data: &[u8], level: u32) -> Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.clamp(0, 9)));
    encoder
        .write_all(data)
        .map_err(|e| CompressionError::CompressionFailed(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| CompressionError::CompressionFailed(e.to_string()))
}
