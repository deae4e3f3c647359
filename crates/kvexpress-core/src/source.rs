//! Desired state as fetched from the key/value store.
//!
//! Each managed key `K` under prefix `P` is stored as two values:
//!
//! - `P/K/data`      the file content
//! - `P/K/checksum`  hex SHA-256 of that content
//!
//! The transport lives outside this crate behind [`KvFetch`].

use std::collections::BTreeMap;

use crate::error::FetchError;

pub const DEFAULT_PREFIX: &str = "kvexpress";

pub trait KvFetch {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPaths {
    pub data: String,
    pub checksum: String,
}

impl KeyPaths {
    pub fn new(prefix: &str, key: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        let key = key.trim_matches('/');
        let base = if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        };
        Self {
            data: format!("{base}/data"),
            checksum: format!("{base}/checksum"),
        }
    }
}

/// One fetched value, consumed by a single apply attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub content: Vec<u8>,
    pub checksum: String,
    pub min_length: usize,
}

impl DesiredState {
    pub fn new(content: impl Into<Vec<u8>>, checksum: impl Into<String>, min_length: usize) -> Self {
        Self {
            content: content.into(),
            checksum: checksum.into(),
            min_length,
        }
    }

    /// Fetch both keys. A failed fetch becomes an empty value, which the
    /// engine then rejects as too short (or as a checksum mismatch when
    /// `min_length` is zero).
    pub fn fetch(kv: &dyn KvFetch, paths: &KeyPaths, min_length: usize) -> Self {
        let content = fetch_or_empty(kv, &paths.data);
        let checksum = fetch_or_empty(kv, &paths.checksum);
        Self {
            content,
            checksum: String::from_utf8_lossy(&checksum).trim().to_string(),
            min_length,
        }
    }
}

fn fetch_or_empty(kv: &dyn KvFetch, key: &str) -> Vec<u8> {
    match kv.fetch(key) {
        Ok(bytes) => {
            tracing::debug!(key = %key, bytes = bytes.len(), "fetched");
            bytes
        }
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "fetch failed; treating value as empty");
            Vec::new()
        }
    }
}

/// In-memory store, for tests and for embedding callers that already hold the
/// values.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    values: BTreeMap<String, Vec<u8>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) {
        self.values.insert(key.into(), value.into());
    }

    /// Store `content` and its checksum under the layout for `paths`.
    pub fn publish(&mut self, paths: &KeyPaths, content: &[u8]) {
        self.insert(paths.data.clone(), content.to_vec());
        self.insert(paths.checksum.clone(), crate::checksum::compute(content));
    }
}

impl KvFetch for MemoryKv {
    fn fetch(&self, key: &str) -> Result<Vec<u8>, FetchError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(key.to_string()))
    }
}
