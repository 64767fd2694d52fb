use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio_postgres::Row;
use tracing::warn;

use crate::{
    db::PostgresDatabase,
    error_handling::StoreError,
    payment_processors::service::ProcessorId,
    store::SharedStateStore,
    structs::{PaymentRecord, PaymentsSummary},
};

/// Durable record of delivered payments.
///
/// Records are keyed by correlation id, so saving the same payment twice
/// replaces the first write.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn save(&self, record: &PaymentRecord) -> Result<(), StoreError>;

    /// Totals per processor over records with `from <= requestedAt <= to`;
    /// a missing bound is unbounded.
    async fn summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<PaymentsSummary, StoreError>;

    /// Deletes every record, returning how many were removed.
    async fn purge(&self) -> Result<u64, StoreError>;
}

fn within(at: DateTime<Utc>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
    from.map_or(true, |from| at >= from) && to.map_or(true, |to| at <= to)
}

pub const PAYMENT_INDEX_KEY: &str = "payments";

fn payment_key(correlation_id: &str) -> String {
    format!("payment:{correlation_id}")
}

/// Ledger stored as `payment:<correlationId>` hashes plus an index set.
#[derive(Clone)]
pub struct RedisLedger {
    store: Arc<dyn SharedStateStore>,
}

impl RedisLedger {
    pub fn new(store: Arc<dyn SharedStateStore>) -> Self {
        Self { store }
    }

    fn decode(correlation_id: &str, fields: &HashMap<String, String>) -> Option<PaymentRecord> {
        let amount = fields.get("amount")?.parse::<Decimal>().ok()?;
        let requested_at = DateTime::parse_from_rfc3339(fields.get("requestedAt")?)
            .ok()?
            .with_timezone(&Utc);
        let processor = fields.get("processor")?.parse().ok()?;
        Some(PaymentRecord {
            correlation_id: correlation_id.to_string(),
            amount,
            requested_at,
            processor,
        })
    }
}

#[async_trait]
impl Ledger for RedisLedger {
    async fn save(&self, record: &PaymentRecord) -> Result<(), StoreError> {
        self.store
            .hset_indexed(
                &payment_key(&record.correlation_id),
                &[
                    ("amount", record.amount.to_string()),
                    (
                        "requestedAt",
                        record
                            .requested_at
                            .to_rfc3339_opts(SecondsFormat::Millis, true),
                    ),
                    ("processor", record.processor.to_string()),
                ],
                PAYMENT_INDEX_KEY,
                &record.correlation_id,
            )
            .await
    }

    async fn summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<PaymentsSummary, StoreError> {
        let ids = self.store.smembers(PAYMENT_INDEX_KEY).await?;
        let records = join_all(ids.iter().map(|id| async move {
            self.store
                .hget_all(&payment_key(id))
                .await
                .map(|fields| (id, fields))
        }))
        .await;

        let mut summary = PaymentsSummary::default();
        for result in records {
            let (id, fields) = result?;
            if fields.is_empty() {
                continue;
            }
            match Self::decode(id, &fields) {
                Some(record) if within(record.requested_at, from, to) => {
                    summary.add(record.processor, record.amount)
                }
                Some(_) => {}
                None => warn!(correlation_id = %id, "skipping malformed payment record"),
            }
        }
        Ok(summary)
    }

    async fn purge(&self) -> Result<u64, StoreError> {
        let ids = self.store.smembers(PAYMENT_INDEX_KEY).await?;
        let mut keys: Vec<String> = ids.iter().map(|id| payment_key(id)).collect();
        keys.push(PAYMENT_INDEX_KEY.to_string());
        self.store.del(&keys).await?;
        Ok(ids.len() as u64)
    }
}

const CREATE_TABLE_QUERY: &str = "CREATE TABLE IF NOT EXISTS payments (correlation_id TEXT PRIMARY KEY, amount NUMERIC(14, 2) NOT NULL, requested_at TIMESTAMPTZ NOT NULL, processor TEXT NOT NULL)";

const INSERT_QUERY: &str = "INSERT INTO payments (correlation_id, amount, requested_at, processor) VALUES ($1, $2, $3, $4) ON CONFLICT (correlation_id) DO UPDATE SET amount = EXCLUDED.amount, requested_at = EXCLUDED.requested_at, processor = EXCLUDED.processor";

const SUMMARY_QUERY: &str = "SELECT processor, COUNT(*) AS total_requests, COALESCE(SUM(amount), 0) AS total_amount FROM payments WHERE ($1::timestamptz IS NULL OR requested_at >= $1) AND ($2::timestamptz IS NULL OR requested_at <= $2) GROUP BY processor";

const PURGE_QUERY: &str = "DELETE FROM payments";

/// Ledger stored as rows in a `payments` table.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    database: PostgresDatabase,
}

impl PostgresLedger {
    pub fn new(database: PostgresDatabase) -> Self {
        Self { database }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let conn = self.database.conn().await?;
        conn.execute(CREATE_TABLE_QUERY, &[]).await?;
        Ok(())
    }

    fn decode_row(row: &Row) -> Result<(String, i64, Decimal), StoreError> {
        Ok((
            row.try_get("processor")?,
            row.try_get("total_requests")?,
            row.try_get("total_amount")?,
        ))
    }
}

/// Folds `(processor, total_requests, total_amount)` rows of the summary
/// query into per-processor totals.
fn fold_summary_rows<I>(rows: I) -> Result<PaymentsSummary, StoreError>
where
    I: IntoIterator<Item = (String, i64, Decimal)>,
{
    let mut summary = PaymentsSummary::default();
    for (processor, total_requests, total_amount) in rows {
        let processor: ProcessorId = processor.parse().map_err(|e| StoreError::Malformed {
            key: "payments.processor".to_string(),
            reason: format!("{e}"),
        })?;
        let totals = summary.totals_mut(processor);
        totals.total_requests += total_requests.max(0) as u64;
        totals.total_amount += total_amount;
    }
    Ok(summary)
}

#[async_trait]
impl Ledger for PostgresLedger {
    async fn save(&self, record: &PaymentRecord) -> Result<(), StoreError> {
        let conn = self.database.conn().await?;
        conn.execute(
            INSERT_QUERY,
            &[
                &record.correlation_id,
                &record.amount,
                &record.requested_at,
                &record.processor.as_str(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<PaymentsSummary, StoreError> {
        let conn = self.database.conn().await?;
        let rows = conn.query(SUMMARY_QUERY, &[&from, &to]).await?;

        let decoded = rows
            .iter()
            .map(Self::decode_row)
            .collect::<Result<Vec<_>, _>>()?;
        fold_summary_rows(decoded)
    }

    async fn purge(&self) -> Result<u64, StoreError> {
        let conn = self.database.conn().await?;
        Ok(conn.execute(PURGE_QUERY, &[]).await?)
    }
}
