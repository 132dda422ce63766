//! Ephemeral memory store used by executors for response caching.
//!
//! An unstructured concurrent key/value mapping scoped to an execution run
//! (or longer, when an outer process owns it). Values round-trip through
//! JSON text, so retrieval follows JSON-compatible semantics: numeric
//! scalars may come back widened to floating point and callers compare
//! numbers with tolerance rather than integer identity.

use crate::error::Error;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe in-memory key/value store.
///
/// Writes are atomic per key. TTL-based eviction is not implemented;
/// entries live as long as the store does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Retrieves a value by key, or `None` when absent or undecodable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .and_then(|text| serde_json::from_str(text).ok())
    }

    /// Stores a value under a key, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized to JSON.
    pub fn set(&self, key: &str, value: &Value) -> Result<(), Error> {
        let text = serde_json::to_string(value)
            .map_err(|e| Error::serialization_error(format!("failed to store '{key}': {e}")))?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), text);
        Ok(())
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
