//! The local persistence collaborator.
//!
//! The host supplies a synchronous key-value store with a capacity ceiling
//! (a browser-local store, a file, anything). The engine only ever degrades
//! on set failure - reconciled in-memory state is never lost to a full
//! backend.

use std::collections::BTreeMap;

use thiserror::Error;

/// Persistence failure. Quota exhaustion is expected operation, not a bug.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KvError {
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage backend failed: {reason}")]
    Backend { reason: String },
}

/// Synchronous key-value storage seam.
pub trait KeyValue: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), KvError>;
    fn remove(&mut self, key: &str);
}

/// In-memory implementation with an optional byte capacity, for tests and
/// hosts without durable storage.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: BTreeMap<String, String>,
    capacity_bytes: Option<usize>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self {
            map: BTreeMap::new(),
            capacity_bytes: Some(capacity_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn used_bytes_excluding(&self, key: &str) -> usize {
        self.map
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl KeyValue for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), KvError> {
        if let Some(cap) = self.capacity_bytes
            && self.used_bytes_excluding(key) + key.len() + value.len() > cap
        {
            return Err(KvError::QuotaExceeded);
        }
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut kv = MemoryKv::new();
        kv.set("a", "1").unwrap();
        assert_eq!(kv.get("a").as_deref(), Some("1"));
        kv.remove("a");
        assert_eq!(kv.get("a"), None);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut kv = MemoryKv::with_capacity(8);
        kv.set("k", "1234").unwrap();
        assert_eq!(kv.set("k2", "56789"), Err(KvError::QuotaExceeded));
        // Overwriting an existing key only counts the new value.
        kv.set("k", "567").unwrap();
    }
}
