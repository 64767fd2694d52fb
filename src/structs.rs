use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    payment_processors::{service::ProcessorId, structs::PaymentProcessorDTO},
    queue::PaymentQueue,
    repository::Ledger,
};

/// Inbound `POST /payments` body. Fields are optional so that a missing
/// field is answered with 400 rather than a deserialization rejection.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDTO {
    pub correlation_id: Option<String>,
    pub amount: Option<Decimal>,
}

/// A queued unit of work, JSON-encoded in the `payment_queue` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTask {
    pub correlation_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default)]
    pub retry_attempts: u32,
}

impl PaymentTask {
    pub fn new(correlation_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            amount,
            retry_attempts: 0,
        }
    }

    /// The same task, one retry further along.
    pub fn next_attempt(&self) -> Self {
        Self {
            retry_attempts: self.retry_attempts + 1,
            ..self.clone()
        }
    }

    pub fn to_processor_dto(&self, requested_at: DateTime<Utc>) -> PaymentProcessorDTO {
        PaymentProcessorDTO {
            correlation_id: self.correlation_id.clone(),
            amount: self.amount,
            requested_at,
        }
    }
}

/// Terminal outcome of a delivered task, keyed by correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRecord {
    pub correlation_id: String,
    pub amount: Decimal,
    pub requested_at: DateTime<Utc>,
    pub processor: ProcessorId,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentSummaryQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorTotals {
    pub total_requests: u64,
    pub total_amount: Decimal,
}

/// Exact per-processor totals; rounding happens only when rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaymentsSummary {
    pub default: ProcessorTotals,
    pub fallback: ProcessorTotals,
}

impl PaymentsSummary {
    pub fn totals_mut(&mut self, processor: ProcessorId) -> &mut ProcessorTotals {
        match processor {
            ProcessorId::Default => &mut self.default,
            ProcessorId::Fallback => &mut self.fallback,
        }
    }

    pub fn add(&mut self, processor: ProcessorId, amount: Decimal) {
        let totals = self.totals_mut(processor);
        totals.total_requests += 1;
        totals.total_amount += amount;
    }
}

#[derive(Clone, Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentsServiceSummary {
    pub total_requests: u64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
}

impl From<ProcessorTotals> for PaymentsServiceSummary {
    fn from(totals: ProcessorTotals) -> Self {
        Self {
            total_requests: totals.total_requests,
            total_amount: totals.total_amount.round_dp(2),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PaymentsSummaryResponseDTO {
    pub default: PaymentsServiceSummary,
    pub fallback: PaymentsServiceSummary,
}

impl From<PaymentsSummary> for PaymentsSummaryResponseDTO {
    fn from(summary: PaymentsSummary) -> Self {
        Self {
            default: summary.default.into(),
            fallback: summary.fallback.into(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub queue: PaymentQueue,
    pub ledger: Arc<dyn Ledger>,
}
