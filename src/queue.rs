use std::sync::Arc;

use tracing::warn;

use crate::{error_handling::StoreError, store::SharedStateStore, structs::PaymentTask};

pub const PAYMENT_QUEUE_KEY: &str = "payment_queue";

/// FIFO of pending payment tasks: pushed at the tail, popped from the head.
#[derive(Clone)]
pub struct PaymentQueue {
    store: Arc<dyn SharedStateStore>,
    collection_name: String,
}

impl PaymentQueue {
    pub fn new(store: Arc<dyn SharedStateStore>) -> Self {
        Self::with_name(store, PAYMENT_QUEUE_KEY)
    }

    pub fn with_name(store: Arc<dyn SharedStateStore>, collection_name: impl Into<String>) -> Self {
        Self {
            store,
            collection_name: collection_name.into(),
        }
    }

    pub async fn push(&self, task: &PaymentTask) -> Result<(), StoreError> {
        let value = serde_json::to_string(task)?;
        self.store.rpush(&self.collection_name, &value).await
    }

    /// Pops up to `max` tasks. Elements that do not decode are logged and
    /// discarded; they can never be delivered.
    pub async fn pop_batch(&self, max: usize) -> Result<Vec<PaymentTask>, StoreError> {
        let raw = self.store.lpop(&self.collection_name, max).await?;
        Ok(raw
            .into_iter()
            .filter_map(|value| match serde_json::from_str(&value) {
                Ok(task) => Some(task),
                Err(err) => {
                    warn!(%value, error = %err, "dropping undecodable queue element");
                    None
                }
            })
            .collect())
    }

    pub async fn len(&self) -> Result<usize, StoreError> {
        self.store.llen(&self.collection_name).await
    }

    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.del(&[self.collection_name.clone()]).await
    }
}
