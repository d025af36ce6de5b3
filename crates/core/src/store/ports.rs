//! Port interface for the local durable key/value store

use async_trait::async_trait;
use haven_domain::Result;

/// Guard evaluated inside a [`Txn`] before any write is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Key must not exist.
    Absent(String),
    /// Key must exist with exactly this value.
    Equals(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Put(String, String),
    Delete(String),
}

/// Conditional batch: every precondition is checked and every op applied in
/// one transaction, or nothing happens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub conditions: Vec<Precondition>,
    pub ops: Vec<KvOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_absent(mut self, key: impl Into<String>) -> Self {
        self.conditions.push(Precondition::Absent(key.into()));
        self
    }

    pub fn require_equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push(Precondition::Equals(key.into(), value.into()));
        self
    }

    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(KvOp::Put(key.into(), value.into()));
        self
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(KvOp::Delete(key.into()));
        self
    }
}

/// Persistent key/value storage.
///
/// Every method is a single atomic transaction. Read-modify-write sequences
/// must go through [`KeyValueStore::commit`] with a precondition on the value
/// that was read, so two execution contexts sharing the store (the foreground
/// app and a background wake) cannot interleave.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn put(&self, key: &str, value: String) -> Result<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;

    /// Apply `txn` atomically. Returns `false` (and writes nothing) if any
    /// precondition failed.
    async fn commit(&self, txn: Txn) -> Result<bool>;

    async fn put_if_absent(&self, key: &str, value: String) -> Result<bool> {
        self.commit(Txn::new().require_absent(key).put(key, value)).await
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: String) -> Result<bool> {
        self.commit(Txn::new().require_equals(key, expected).put(key, new)).await
    }

    /// Delete every key under `prefix`; returns how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let entries = self.scan_prefix(prefix).await?;
        let mut removed = 0;
        for (key, _) in entries {
            if self.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
