use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};

use crate::{error_handling::StoreError, store::SharedStateStore};

#[derive(Debug, Clone)]
enum Value {
    Str {
        value: String,
        expires_at: Option<Instant>,
    },
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
}

/// Process-local stand-in for Redis, used for single-instance runs and tests.
///
/// String TTLs follow `tokio::time`, so paused-clock tests can expire them.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
    unavailable: Arc<AtomicBool>,
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Malformed {
        key: key.to_string(),
        reason: "operation against a key holding the wrong kind of value".to_string(),
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail, simulating an unreachable store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Pool("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// Writes a raw string without expiry.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Value::Str {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl SharedStateStore for InMemoryStore {
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(fields)) => Ok(fields.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()));
        match entry {
            Value::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert((*field).to_string(), value.clone());
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn hset_indexed(
        &self,
        key: &str,
        fields: &[(&str, String)],
        index_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        if !matches!(entries.get(key), None | Some(Value::Hash(_))) {
            return Err(wrong_type(key));
        }
        if !matches!(entries.get(index_key), None | Some(Value::Set(_))) {
            return Err(wrong_type(index_key));
        }

        if let Value::Hash(hash) = entries
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()))
        {
            for (field, value) in fields {
                hash.insert((*field).to_string(), value.clone());
            }
        }
        if let Value::Set(set) = entries
            .entry(index_key.to_string())
            .or_insert_with(|| Value::Set(BTreeSet::new()))
        {
            set.insert(member.to_string());
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let value = match entries.get(key) {
            None => return Ok(None),
            Some(Value::Str { value, expires_at }) => match expires_at {
                Some(at) if Instant::now() >= *at => None,
                _ => Some(value.clone()),
            },
            Some(_) => return Err(wrong_type(key)),
        };
        if value.is_none() {
            entries.remove(key);
        }
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Value::Str {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Value::List(VecDeque::new()));
        match entry {
            Value::List(list) => {
                list.push_back(value.to_string());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let popped = match entries.get_mut(key) {
            None => return Ok(Vec::new()),
            Some(Value::List(list)) => {
                let take = count.min(list.len());
                list.drain(..take).collect::<Vec<_>>()
            }
            Some(_) => return Err(wrong_type(key)),
        };
        if matches!(entries.get(key), Some(Value::List(list)) if list.is_empty()) {
            entries.remove(key);
        }
        Ok(popped)
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        self.check()?;
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Ok(0),
            Some(Value::List(list)) => Ok(list.len()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(BTreeSet::new()));
        match entry {
            Value::Set(set) => {
                set.insert(member.to_string());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let entries = self.entries.lock().await;
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_is_fifo_and_pops_in_batches() {
        let store = InMemoryStore::new();
        for item in ["a", "b", "c"] {
            store.rpush("queue", item).await.unwrap();
        }

        assert_eq!(store.lpop("queue", 2).await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.llen("queue").await.unwrap(), 1);
        assert_eq!(store.lpop("queue", 5).await.unwrap(), vec!["c"]);
        assert!(store.lpop("queue", 5).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_strings_expire() {
        let store = InMemoryStore::new();
        store
            .set_with_ttl("health", "{}", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(store.get("health").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(store.get("health").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hash_fields_merge() {
        let store = InMemoryStore::new();
        store
            .hset_multiple("circuit:default", &[("state", "OPEN".into()), ("failures", "2".into())])
            .await
            .unwrap();
        store
            .hset_multiple("circuit:default", &[("failures", "3".into())])
            .await
            .unwrap();

        let fields = store.hget_all("circuit:default").await.unwrap();
        assert_eq!(fields["state"], "OPEN");
        assert_eq!(fields["failures"], "3");
    }

    #[tokio::test]
    async fn test_wrong_type_and_unavailable_are_errors() {
        let store = InMemoryStore::new();
        store.rpush("queue", "a").await.unwrap();
        assert!(store.hget_all("queue").await.is_err());

        store.set_unavailable(true);
        assert!(matches!(store.get("x").await, Err(StoreError::Pool(_))));
        store.set_unavailable(false);
        assert!(store.get("x").await.unwrap().is_none());
    }
}
