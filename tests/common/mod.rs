//! Fakes shared by the worker and supervisor tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use codeindex::embedding::Embedder;
use codeindex::store::MemoryStore;
use codeindex::worker::{Backend, WorkerResources};

pub const DIMS: usize = 4;

/// Deterministic embedder. Counts calls across every clone and can be told
/// to panic on one specific call or to fail on matching text.
#[derive(Clone, Default)]
pub struct FakeEmbedder {
    pub calls: Arc<AtomicUsize>,
    pub panic_on_call: Option<usize>,
    pub fail_when_contains: Option<String>,
    pub delay: Duration,
}

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic_on_call == Some(call) {
            panic!("embedder blew up on call {}", call);
        }
        if let Some(needle) = &self.fail_when_contains {
            if text.contains(needle.as_str()) {
                anyhow::bail!("cannot embed text containing '{}'", needle);
            }
        }
        Ok(vec![text.len() as f32, 1.0, 0.0, -1.0])
    }
}

/// Worker resources backed by a shared [`MemoryStore`].
#[derive(Clone)]
pub struct FakeResources {
    pub store: MemoryStore,
    pub embedder: FakeEmbedder,
    /// Initialization fails with this message for the first
    /// `init_failures` attempts.
    pub init_error: Option<String>,
    pub init_failures: usize,
    pub init_delay: Duration,
    pub init_attempts: Arc<AtomicUsize>,
}

impl FakeResources {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            embedder: FakeEmbedder::default(),
            init_error: None,
            init_failures: usize::MAX,
            init_delay: Duration::ZERO,
            init_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl WorkerResources for FakeResources {
    async fn open(&self) -> Result<Backend> {
        let attempt = self.init_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        if let Some(message) = &self.init_error {
            if attempt <= self.init_failures {
                anyhow::bail!("{}", message);
            }
        }
        Ok(Backend {
            embedder: Arc::new(self.embedder.clone()),
            store: Arc::new(self.store.clone()),
        })
    }
}
