//! Payload Codec
//!
//! The single (de)serialization boundary between typed values at call sites
//! and the opaque bytes both tiers store. Payloads are JSON so other
//! processes sharing the distributed tier can read them; large payloads may
//! additionally be LZ4-framed by [`CompressionManager`].

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::compression::CompressionManager;
use crate::error::{CacheError, Result};

/// Serialize `value` for storage under `key`.
pub fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| CacheError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Serialize and, when `compress` is set, LZ4-frame the result.
pub fn encode_with<T: Serialize + ?Sized>(
    key: &str,
    value: &T,
    compression: &CompressionManager,
    compress: bool,
) -> Result<Bytes> {
    let raw = encode(key, value)?;
    if !compress {
        return Ok(raw);
    }
    Ok(Bytes::from(compression.compress(&raw)))
}

/// Decode a stored payload, transparently unframing compressed ones.
pub fn decode<T: DeserializeOwned>(
    key: &str,
    payload: &[u8],
    compression: &CompressionManager,
) -> Result<T> {
    let deserialize = |bytes: &[u8]| {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Deserialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
    };

    if CompressionManager::is_compressed(payload) {
        let raw = compression.decompress(payload)?;
        deserialize(&raw)
    } else {
        deserialize(payload)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Issue {
        key: String,
        points: u32,
    }

    #[test]
    fn test_encode_is_plain_json() {
        let issue = Issue {
            key: "PROJ-1".into(),
            points: 3,
        };
        let bytes = encode("k", &issue).unwrap();
        assert_eq!(bytes.as_ref(), br#"{"key":"PROJ-1","points":3}"#);
    }

    #[test]
    fn test_decode_corrupt_payload() {
        let compression = CompressionManager::new();
        let err = decode::<Issue>("sprint:1:issues", b"{not json", &compression).unwrap_err();
        match err {
            CacheError::Deserialization { key, .. } => assert_eq!(key, "sprint:1:issues"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_type_mismatch() {
        let compression = CompressionManager::new();
        let result = decode::<Issue>("k", b"[1,2,3]", &compression);
        assert!(matches!(result, Err(CacheError::Deserialization { .. })));
    }

    #[test]
    fn test_compressed_payload_decodes() {
        let compression = CompressionManager::new();
        let issues: Vec<Issue> = (0..200)
            .map(|i| Issue {
                key: format!("PROJ-{i}"),
                points: 5,
            })
            .collect();

        let framed = encode_with("k", &issues, &compression, true).unwrap();
        assert!(CompressionManager::is_compressed(&framed));

        let back: Vec<Issue> = decode("k", &framed, &compression).unwrap();
        assert_eq!(back, issues);
    }
}
