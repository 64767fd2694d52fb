//! Per-processor failure counting persisted in the shared store.
//!
//! ```text
//! CLOSED --(failures > threshold)--> OPEN --(recovery elapsed)--> HALF_OPEN
//!    ^                                                               |
//!    +--------------------------(record_success)---------------------+
//! ```
//!
//! A failure while HALF_OPEN re-opens immediately because the failure count
//! is only reset by a success.

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc, time::Duration};

use tracing::{info, warn};

use crate::{
    clock::Clock, error_handling::StoreError, payment_processors::service::ProcessorId,
    store::SharedStateStore,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLOSED" => Ok(CircuitState::Closed),
            "OPEN" => Ok(CircuitState::Open),
            "HALF_OPEN" => Ok(CircuitState::HalfOpen),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitRecord {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Epoch milliseconds of the last failure since the last success.
    pub last_failure_at: Option<i64>,
}

impl Default for CircuitRecord {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
        }
    }
}

impl CircuitRecord {
    /// Decodes the `state` / `failures` / `lastFailure` hash. Anything missing
    /// or unparseable yields `None` so the caller re-initialises the record.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let state = fields.get("state")?.parse().ok()?;
        let failure_count = fields.get("failures")?.parse().ok()?;
        let last_failure_at = match fields.get("lastFailure").map(String::as_str) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse().ok()?),
        };
        Some(Self {
            state,
            failure_count,
            last_failure_at,
        })
    }

    pub fn to_fields(&self) -> [(&'static str, String); 3] {
        [
            ("state", self.state.as_str().to_string()),
            ("failures", self.failure_count.to_string()),
            (
                "lastFailure",
                self.last_failure_at.map(|at| at.to_string()).unwrap_or_default(),
            ),
        ]
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures tolerated; one more opens the circuit.
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(6000),
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreaker {
    store: Arc<dyn SharedStateStore>,
    clock: Arc<dyn Clock>,
    config: CircuitBreakerConfig,
}

fn circuit_key(processor: ProcessorId) -> String {
    format!("circuit:{processor}")
}

impl CircuitBreaker {
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        clock: Arc<dyn Clock>,
        config: CircuitBreakerConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Reads the record, writing the closed default if none (or a malformed one) exists.
    pub async fn load(&self, processor: ProcessorId) -> Result<CircuitRecord, StoreError> {
        let key = circuit_key(processor);
        let fields = self.store.hget_all(&key).await?;
        match CircuitRecord::from_fields(&fields) {
            Some(record) => Ok(record),
            None => {
                if !fields.is_empty() {
                    warn!(%processor, ?fields, "discarding malformed circuit record");
                }
                let record = CircuitRecord::default();
                self.save(processor, &record).await?;
                Ok(record)
            }
        }
    }

    async fn save(&self, processor: ProcessorId, record: &CircuitRecord) -> Result<(), StoreError> {
        self.store
            .hset_multiple(&circuit_key(processor), &record.to_fields())
            .await
    }

    pub async fn record_failure(&self, processor: ProcessorId) -> Result<(), StoreError> {
        let mut record = self.load(processor).await?;
        record.failure_count = record.failure_count.saturating_add(1);
        record.last_failure_at = Some(self.clock.now_ms());
        if record.failure_count > self.config.failure_threshold
            && record.state != CircuitState::Open
        {
            info!(%processor, failures = record.failure_count, "circuit opened");
            record.state = CircuitState::Open;
        }
        self.save(processor, &record).await
    }

    pub async fn record_success(&self, processor: ProcessorId) -> Result<(), StoreError> {
        let mut record = self.load(processor).await?;
        if record.state != CircuitState::Closed {
            info!(%processor, from = %record.state, "circuit closed");
        }
        record.failure_count = 0;
        record.state = CircuitState::Closed;
        record.last_failure_at = None;
        self.save(processor, &record).await
    }

    /// Whether the processor must be skipped right now. Once the recovery
    /// timeout has passed an OPEN circuit moves to HALF_OPEN and this returns
    /// `false`, letting one trial request through.
    pub async fn is_open(&self, processor: ProcessorId) -> Result<bool, StoreError> {
        let mut record = self.load(processor).await?;
        if record.state != CircuitState::Open {
            return Ok(false);
        }

        let recovered = record.last_failure_at.is_some_and(|at| {
            self.clock.now_ms().saturating_sub(at) > self.config.recovery_timeout.as_millis() as i64
        });
        if recovered {
            info!(%processor, "circuit half-open");
            record.state = CircuitState::HalfOpen;
            self.save(processor, &record).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// `is_open` for routing decisions: an unreadable circuit counts as closed.
    pub async fn is_open_or_closed_on_error(&self, processor: ProcessorId) -> bool {
        match self.is_open(processor).await {
            Ok(open) => open,
            Err(err) => {
                warn!(%processor, error = %err, "circuit state unavailable, assuming closed");
                false
            }
        }
    }
}
