//! The key-value capability every instance shares.
//!
//! Each method maps onto a single atomic Redis command, so callers never hold
//! a lock across a suspension point. Read-modify-write sequences built on top
//! of these calls are not linearizable across instances.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;

use crate::error_handling::StoreError;

pub mod in_memory;

pub use in_memory::InMemoryStore;

#[async_trait]
pub trait SharedStateStore: Send + Sync {
    /// All fields of a hash; empty when the key does not exist.
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError>;

    /// Writes the hash and adds `member` to the `index_key` set as one
    /// transaction: either both land or neither does.
    async fn hset_indexed(
        &self,
        key: &str,
        fields: &[(&str, String)],
        index_key: &str,
        member: &str,
    ) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Sets a string value that disappears after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removes and returns up to `count` elements from the head of a list.
    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError>;

    async fn llen(&self, key: &str) -> Result<usize, StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError>;

    async fn del(&self, keys: &[String]) -> Result<(), StoreError>;
}
