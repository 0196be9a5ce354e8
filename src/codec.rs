//! # Body Integrity and Timestamps
//!
//! Bodies are stored as-is, one row per message. Each body carries an XXH3-64
//! checksum (little-endian, 8 bytes) computed at append time and verified when
//! the body is resolved.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

// =============================================================================
// Checksums
// =============================================================================

/// Computes the stored checksum of a message body.
pub fn compute_checksum(data: &[u8]) -> Vec<u8> {
    let hash = xxhash_rust::xxh3::xxh3_64(data);
    hash.to_le_bytes().to_vec()
}

/// Verifies a body against its stored checksum.
///
/// # Errors
///
/// `Error::Corrupted` carrying `position` when the checksum doesn't match.
pub fn verify_checksum(position: i64, data: &[u8], expected: &[u8]) -> Result<()> {
    if compute_checksum(data) != expected {
        tracing::warn!(position, "message body failed checksum verification");
        return Err(Error::Corrupted { position });
    }
    Ok(())
}

// =============================================================================
// Time
// =============================================================================

/// Returns the current time in milliseconds since Unix epoch.
///
/// A clock set before the epoch reads as 0.
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_deterministic() {
        let data = b"hello world";
        assert_eq!(compute_checksum(data), compute_checksum(data));
        assert_eq!(compute_checksum(data).len(), 8);
    }

    #[test]
    fn test_checksum_different_data() {
        assert_ne!(compute_checksum(b"hello"), compute_checksum(b"world"));
    }

    #[test]
    fn test_verify_checksum() {
        let body = b"{\"order\":7}";
        let checksum = compute_checksum(body);

        assert!(verify_checksum(3, body, &checksum).is_ok());

        let err = verify_checksum(3, b"{\"order\":8}", &checksum).unwrap_err();
        assert!(matches!(err, Error::Corrupted { position: 3 }));
    }

    #[test]
    fn test_current_time_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(current_time_ms() > 1_577_836_800_000);
    }
}
