use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use bb8_redis::redis::{self, AsyncCommands};
use bb8_redis::RedisConnectionManager;
use tokio_postgres::NoTls;

use crate::{error_handling::StoreError, store::SharedStateStore};

pub(crate) type PostgresConnectionPool = Pool<PostgresConnectionManager<NoTls>>;

pub(crate) type PostgresPooledConnection<'a> =
    bb8::PooledConnection<'a, PostgresConnectionManager<NoTls>>;

#[derive(Debug, Clone)]
pub struct PostgresDatabase {
    pub pool: PostgresConnectionPool,
}

impl PostgresDatabase {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let manager = PostgresConnectionManager::new_from_stringlike(database_url, NoTls)?;
        let pool = Pool::builder().max_size(16).build(manager).await?;
        Ok(Self { pool })
    }

    pub(crate) async fn conn(&self) -> Result<PostgresPooledConnection<'_>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

pub(crate) type MemoryDatabaseConnection = Pool<RedisConnectionManager>;

/// The Redis-backed shared state store.
#[derive(Debug, Clone)]
pub struct RedisStore {
    pool: MemoryDatabaseConnection,
}

impl RedisStore {
    pub async fn connect(memory_database_url: &str) -> Result<Self, StoreError> {
        let manager = RedisConnectionManager::new(memory_database_url)?;
        let pool = Pool::builder()
            .min_idle(Some(10))
            .max_size(32)
            .connection_timeout(Duration::from_secs(2))
            .build(manager)
            .await?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))
    }
}

#[async_trait]
impl SharedStateStore for RedisStore {
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }

    async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = conn.hset_multiple(key, fields).await?;
        Ok(())
    }

    async fn hset_indexed(
        &self,
        key: &str,
        fields: &[(&str, String)],
        index_key: &str,
        member: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(key, fields)
            .ignore()
            .sadd(index_key, member)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl.as_millis().max(1) as u64)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = conn.rpush(key, value).await?;
        Ok(())
    }

    async fn lpop(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let values: Option<Vec<String>> = redis::cmd("LPOP")
            .arg(key)
            .arg(count)
            .query_async(&mut *conn)
            .await?;
        Ok(values.unwrap_or_default())
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn().await?;
        let len: usize = conn.llen(key).await?;
        Ok(len)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: () = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn del(&self, keys: &[String]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let _: () = conn.del(keys).await?;
        Ok(())
    }
}

pub const DEFAULT_MEMORY_DATABASE_URL: &str = "redis://localhost:6379";
