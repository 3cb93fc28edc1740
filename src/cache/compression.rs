//! Payload Compression
//!
//! LZ4 compression for large payloads whose access pattern the optimizer
//! has flagged. Compressed payloads carry a short magic prefix so readers
//! can tell them apart from plain JSON without any side channel.
//!
//! # Example
//!
//! ```
//! use sprintcache::cache::compression::CompressionManager;
//!
//! let manager = CompressionManager::new();
//! let data = vec![b'a'; 4096];
//!
//! let framed = manager.compress(&data);
//! assert!(CompressionManager::is_compressed(&framed));
//! assert_eq!(manager.decompress(&framed).unwrap(), data);
//! ```

use crate::error::{CacheError, Result};

/// Prefix marking an LZ4-framed payload. JSON never starts with a NUL byte.
pub const LZ4_MAGIC: &[u8; 4] = b"\0LZ4";

/// Largest decompressed size a framed payload may declare
pub const MAX_DECOMPRESSED_BYTES: usize = 64 * 1024 * 1024;

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Supported compression algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionAlgorithm {
    /// No compression
    None,
    /// LZ4 - fast compression
    #[default]
    Lz4,
}

impl CompressionAlgorithm {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Lz4 => "lz4",
        }
    }

    /// Typical compressed/original ratio, used for space estimates
    pub fn typical_ratio(&self) -> f64 {
        match self {
            CompressionAlgorithm::None => 1.0,
            CompressionAlgorithm::Lz4 => 0.5,
        }
    }
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Configuration for compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Algorithm applied to flagged payloads
    pub algorithm: CompressionAlgorithm,
    /// Minimum size to compress (smaller payloads are stored as-is)
    pub min_size_bytes: usize,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::Lz4,
            min_size_bytes: 1024,
            level: 4,
        }
    }
}

// =============================================================================
// Compression Manager
// =============================================================================

/// Frames and unframes compressed payloads, falling back to the raw bytes
/// whenever compression does not pay off.
pub struct CompressionManager {
    config: CompressionConfig,
}

impl CompressionManager {
    /// Create a new compression manager with default config
    pub fn new() -> Self {
        Self::with_config(CompressionConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    pub fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// True if the payload carries the LZ4 frame prefix
    pub fn is_compressed(data: &[u8]) -> bool {
        data.starts_with(LZ4_MAGIC)
    }

    /// Compress `data`, returning the framed payload or the input unchanged
    /// when it is too small, compression fails, or the output is not smaller.
    pub fn compress(&self, data: &[u8]) -> Vec<u8> {
        if self.config.algorithm == CompressionAlgorithm::None
            || data.len() < self.config.min_size_bytes
        {
            return data.to_vec();
        }

        match lz4::block::compress(
            data,
            Some(lz4::block::CompressionMode::HIGHCOMPRESSION(self.config.level)),
            true,
        ) {
            Ok(compressed) if compressed.len() + LZ4_MAGIC.len() < data.len() => {
                let mut framed = Vec::with_capacity(LZ4_MAGIC.len() + compressed.len());
                framed.extend_from_slice(LZ4_MAGIC);
                framed.extend_from_slice(&compressed);
                framed
            }
            Ok(_) => data.to_vec(),
            Err(e) => {
                tracing::warn!(error = %e, "LZ4 compression failed, storing uncompressed");
                data.to_vec()
            }
        }
    }

    /// Undo [`compress`](Self::compress). Unframed input is returned as-is.
    ///
    /// The declared size is checked against [`MAX_DECOMPRESSED_BYTES`]
    /// before any buffer is allocated.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let Some(body) = data.strip_prefix(LZ4_MAGIC.as_slice()) else {
            return Ok(data.to_vec());
        };
        let failed = |reason: String| CacheError::DecompressionFailed {
            algorithm: CompressionAlgorithm::Lz4.to_string(),
            reason,
        };

        let (prefix, block) = body
            .split_first_chunk::<4>()
            .ok_or_else(|| failed("truncated size prefix".into()))?;
        let declared = i32::from_le_bytes(*prefix);
        if declared < 0 || declared as usize > MAX_DECOMPRESSED_BYTES {
            return Err(failed(format!(
                "declared size {declared} exceeds limit of {MAX_DECOMPRESSED_BYTES} bytes"
            )));
        }

        lz4::block::decompress(block, Some(declared)).map_err(|e| failed(e.to_string()))
    }
}

impl Default for CompressionManager {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
