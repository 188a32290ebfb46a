//! In-memory [`VectorStore`] for tests and embedding.
//!
//! Rows live in a `Vec` behind a `RwLock`. Cloning the store shares the
//! rows, so a test can keep a handle while a worker owns another.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::models::VectorRow;

use super::{check_dims, VectorStore};

#[derive(Clone)]
pub struct MemoryStore {
    dims: usize,
    rows: Arc<RwLock<Vec<VectorRow>>>,
}

impl MemoryStore {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            rows: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Copy of every row, in append order.
    pub fn rows(&self) -> Vec<VectorRow> {
        self.rows.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn append(&self, row: &VectorRow) -> Result<()> {
        check_dims(self.dims, row)?;
        self.rows.write().push(row.clone());
        Ok(())
    }

    async fn count_rows(&self) -> Result<u64> {
        Ok(self.rows.read().len() as u64)
    }
}
