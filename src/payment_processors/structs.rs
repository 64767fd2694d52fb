use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Body sent to `POST {processor}/payments`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProcessorDTO {
    pub correlation_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub requested_at: DateTime<Utc>,
}

/// Latency and availability judgment for one processor.
///
/// Upstream reports `minResponseTime`; the cached form is written as
/// `minResponseTimeMs`, and both spellings decode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub failing: bool,
    #[serde(rename = "minResponseTimeMs", alias = "minResponseTime")]
    pub min_response_time_ms: u64,
}

impl HealthSnapshot {
    pub fn healthy(min_response_time_ms: u64) -> Self {
        Self {
            failing: false,
            min_response_time_ms,
        }
    }

    pub fn failing(min_response_time_ms: u64) -> Self {
        Self {
            failing: true,
            min_response_time_ms,
        }
    }
}

/// Both processors' snapshots, cached together under the `health` key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProcessorHealth {
    pub default_processor: HealthSnapshot,
    pub fallback_processor: HealthSnapshot,
}
