use std::{fmt, str::FromStr, time::Duration};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error_handling::DeliveryError,
    payment_processors::structs::{HealthSnapshot, PaymentProcessorDTO},
};

pub const PAYMENT_PROCESSOR_DEFAULT_URL: &str = "http://localhost:8001";
pub const PAYMENT_PROCESSOR_FALLBACK_URL: &str = "http://localhost:8002";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorId {
    Default,
    Fallback,
}

impl ProcessorId {
    pub const ALL: [ProcessorId; 2] = [ProcessorId::Default, ProcessorId::Fallback];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorId::Default => "default",
            ProcessorId::Fallback => "fallback",
        }
    }

    /// The processor to try when this one fails.
    pub fn other(&self) -> ProcessorId {
        match self {
            ProcessorId::Default => ProcessorId::Fallback,
            ProcessorId::Fallback => ProcessorId::Default,
        }
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProcessor(pub String);

impl fmt::Display for UnknownProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown processor {:?}", self.0)
    }
}

impl std::error::Error for UnknownProcessor {}

impl FromStr for ProcessorId {
    type Err = UnknownProcessor;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(ProcessorId::Default),
            "fallback" => Ok(ProcessorId::Fallback),
            other => Err(UnknownProcessor(other.to_string())),
        }
    }
}

/// HTTP access to the two upstream processors.
#[derive(Debug, Clone)]
pub struct PaymentProcessorClient {
    http: reqwest::Client,
    default_url: String,
    fallback_url: String,
}

impl PaymentProcessorClient {
    pub fn new(http: reqwest::Client, default_url: String, fallback_url: String) -> Self {
        Self {
            http,
            default_url: default_url.trim_end_matches('/').to_string(),
            fallback_url: fallback_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, processor: ProcessorId) -> &str {
        match processor {
            ProcessorId::Default => &self.default_url,
            ProcessorId::Fallback => &self.fallback_url,
        }
    }

    /// Posts one payment; any 2xx is a success.
    pub async fn process_transaction(
        &self,
        processor: ProcessorId,
        transaction: &PaymentProcessorDTO,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(format!("{}/payments", self.url(processor)))
            .timeout(timeout)
            .json(transaction)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            debug!(%processor, status = status.as_u16(), "processor refused payment");
            Err(DeliveryError::Rejected(status.as_u16()))
        }
    }

    /// Probes the health endpoint. Every failure mode folds into a failing
    /// snapshot whose latency is the probe timeout.
    pub async fn get_service_health(
        &self,
        processor: ProcessorId,
        timeout: Duration,
    ) -> HealthSnapshot {
        let unavailable = HealthSnapshot::failing(timeout.as_millis() as u64);

        let response = match self
            .http
            .get(format!("{}/payments/service-health", self.url(processor)))
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                debug!(%processor, error = %err, "health probe failed");
                return unavailable;
            }
        };

        match response.status() {
            status if status.is_success() => {
                response.json().await.unwrap_or(unavailable)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                debug!(%processor, "health probe rate limited");
                unavailable
            }
            status => {
                debug!(%processor, status = status.as_u16(), "health probe returned error status");
                unavailable
            }
        }
    }
}
