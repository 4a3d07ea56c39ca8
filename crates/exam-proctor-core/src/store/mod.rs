//! Durable per-attempt key-value storage
//!
//! The session clock persists its deadline through a [`KeyValueStore`] so
//! that a reload or crash resumes the same countdown. Keys are scoped to one
//! assignment attempt with [`AttemptScope`].
//!
//! Two backends are provided:
//! - [`MemoryStore`]: process-local map, used by tests and dry runs
//! - [`SledStore`]: embedded on-disk database

pub mod sled_store;

pub use sled_store::SledStore;

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use thiserror::Error;

/// Errors from a storage backend
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not complete the operation
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be decoded
    #[error("Invalid stored value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// String key-value storage that survives page reloads
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Short backend name for logs
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Remove a key; removing a missing key is not an error
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Every stored key starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Key namespace for one assignment attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptScope {
    pub assignment_id: String,
    pub attempt_id: String,
}

impl AttemptScope {
    const PREFIX: &'static str = "exam-proctor";

    pub fn new(assignment_id: impl Into<String>, attempt_id: impl Into<String>) -> Self {
        Self {
            assignment_id: assignment_id.into(),
            attempt_id: attempt_id.into(),
        }
    }

    /// Fully qualified key for a field of this attempt
    pub fn key(&self, field: &str) -> String {
        format!("{}{}", self.prefix(), field)
    }

    /// Prefix shared by every key of this attempt
    pub fn prefix(&self) -> String {
        format!(
            "{}:{}:{}:",
            Self::PREFIX,
            self.assignment_id,
            self.attempt_id
        )
    }
}

impl fmt::Display for AttemptScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.assignment_id, self.attempt_id)
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("memory store lock poisoned".to_string())
    }
}

impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
        entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().map_err(|_| Self::poisoned())?;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_keys() {
        let scope = AttemptScope::new("quiz-7", "attempt-1");
        assert_eq!(
            scope.key("deadlineEpochMs"),
            "exam-proctor:quiz-7:attempt-1:deadlineEpochMs"
        );
        assert!(scope.key("x").starts_with(&scope.prefix()));
        assert_eq!(scope.to_string(), "quiz-7/attempt-1");
    }

    #[test]
    fn test_memory_store_operations() {
        let store = MemoryStore::new();
        assert!(store.get("a").unwrap().is_none());

        store.set("a", "1").unwrap();
        store.set("ab", "2").unwrap();
        store.set("b", "3").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.keys_with_prefix("a").unwrap(), vec!["a", "ab"]);

        store.remove("a").unwrap();
        store.remove("missing").unwrap();
        assert_eq!(store.len(), 2);
    }
}
