//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only view the worker has of persistent
//! storage: append one row, count rows. Backends:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteVectorStore`] | Default on-disk store (sqlx, WAL journal) |
//! | [`MemoryStore`] | Tests and embedding in other processes |
//!
//! Implementations must be `Send + Sync`; the worker holds them behind an
//! `Arc` for its whole lifetime.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::models::VectorRow;

pub use memory::MemoryStore;
pub use sqlite::SqliteVectorStore;

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Vector length every appended row must have.
    fn dims(&self) -> usize;

    /// Append one row. Rows are never updated in place.
    async fn append(&self, row: &VectorRow) -> Result<()>;

    /// Number of persisted rows.
    async fn count_rows(&self) -> Result<u64>;
}

/// SHA-256 hex digest of a chunk's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes, producing a BLOB of `vec.len() × 4`
/// bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub(crate) fn check_dims(expected: usize, row: &VectorRow) -> Result<()> {
    if row.vector.len() != expected {
        anyhow::bail!(
            "vector has {} dimensions, store expects {}",
            row.vector.len(),
            expected
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("").len(), 64);
    }
}
