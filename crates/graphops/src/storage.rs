//! Host storage for byte payloads.
//!
//! Tasks never receive file contents inline. Uploads read from a URI the host
//! rendered into the task input, and downloads hand back a URI the host can
//! resolve later. Hosts plug their own blob store in through [`Storage`];
//! [`MemoryStorage`] backs local runs and tests.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use bytes::Bytes;

/// Errors returned by a [`Storage`] backend.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("no object stored at '{0}'")]
    NotFound(String),

    #[error("unsupported storage URI '{0}'")]
    InvalidUri(String),

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Blob store owned by the host.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Reads the whole object at `uri`.
    async fn get(&self, uri: &str) -> Result<Bytes, StorageError>;

    /// Stores `data` under a fresh URI derived from `name` and returns it.
    async fn put(&self, name: &str, data: Bytes) -> Result<String, StorageError>;
}

const MEMORY_SCHEME: &str = "mem:///";

/// In-process [`Storage`] keyed by `mem:///{uuid}/{name}` URIs.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    objects: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, uri: &str) -> Result<Bytes, StorageError> {
        if !uri.starts_with(MEMORY_SCHEME) {
            return Err(StorageError::InvalidUri(uri.to_string()));
        }
        let objects = self
            .objects
            .read()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        objects
            .get(uri)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))
    }

    async fn put(&self, name: &str, data: Bytes) -> Result<String, StorageError> {
        let file_name = name.rsplit('/').next().unwrap_or(name);
        let file_name = if file_name.is_empty() { "object" } else { file_name };
        let uri = format!("{MEMORY_SCHEME}{}/{file_name}", uuid::Uuid::new_v4());

        self.objects
            .write()
            .map_err(|e| StorageError::Backend(e.to_string()))?
            .insert(uri.clone(), data);
        Ok(uri)
    }
}
