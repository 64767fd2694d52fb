use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::join;
use tracing::{debug, error, instrument, warn};

use crate::{
    circuit_breaker::CircuitBreaker,
    error_handling::{DeliveryError, RouterError},
    health::HealthMonitor,
    payment_processors::{
        service::{PaymentProcessorClient, ProcessorId},
        structs::{HealthSnapshot, PaymentProcessorDTO, PaymentProcessorHealth},
    },
    repository::Ledger,
    structs::{PaymentRecord, PaymentTask},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RoutingPolicy {
    /// `default` whenever it reports healthy and its circuit is not open.
    CircuitAware,
    /// `default` unless it is slower than `fallback` by more than `tolerance`
    /// (0.5 means 50 %).
    LatencyWeighted { tolerance: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct RouterConfig {
    pub timeout_ceiling: Duration,
    /// Lower bound on the attempt timeout, so a processor reporting a 0 ms
    /// minimum response time still gets a usable window.
    pub timeout_floor: Duration,
    pub timeout_multiplier: f64,
    pub policy: RoutingPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            timeout_ceiling: Duration::from_millis(500),
            timeout_floor: Duration::from_millis(100),
            timeout_multiplier: 1.5,
            policy: RoutingPolicy::CircuitAware,
        }
    }
}

/// Picks between the two processors of a combined snapshot by latency.
pub fn choose_by_latency(health: &PaymentProcessorHealth, tolerance: f64) -> ProcessorId {
    let default = &health.default_processor;
    let fallback = &health.fallback_processor;
    match (default.failing, fallback.failing) {
        (true, false) => ProcessorId::Fallback,
        (false, true) | (true, true) => ProcessorId::Default,
        (false, false) => {
            let limit = fallback.min_response_time_ms as f64 * (1.0 + tolerance);
            if default.min_response_time_ms as f64 > limit {
                ProcessorId::Fallback
            } else {
                ProcessorId::Default
            }
        }
    }
}

/// Chooses a processor for each payment and runs the primary-then-other
/// delivery sequence.
#[derive(Clone)]
pub struct Router {
    breaker: CircuitBreaker,
    health: HealthMonitor,
    client: PaymentProcessorClient,
    ledger: Arc<dyn Ledger>,
    config: RouterConfig,
}

impl Router {
    pub fn new(
        breaker: CircuitBreaker,
        health: HealthMonitor,
        client: PaymentProcessorClient,
        ledger: Arc<dyn Ledger>,
        config: RouterConfig,
    ) -> Self {
        Self {
            breaker,
            health,
            client,
            ledger,
            config,
        }
    }

    pub async fn choose(&self) -> ProcessorId {
        match self.config.policy {
            RoutingPolicy::CircuitAware => {
                let (default_healthy, default_open) = join!(
                    self.health.is_healthy(ProcessorId::Default),
                    self.breaker.is_open_or_closed_on_error(ProcessorId::Default)
                );
                if default_healthy && !default_open {
                    ProcessorId::Default
                } else {
                    ProcessorId::Fallback
                }
            }
            RoutingPolicy::LatencyWeighted { tolerance } => {
                let (health, default_open) = join!(
                    self.health.get_health_pair(),
                    self.breaker.is_open_or_closed_on_error(ProcessorId::Default)
                );
                if default_open {
                    ProcessorId::Fallback
                } else {
                    choose_by_latency(&health, tolerance)
                }
            }
        }
    }

    /// The observed best-case latency scaled by the multiplier, kept between
    /// the floor and the ceiling.
    pub fn attempt_timeout(&self, snapshot: &HealthSnapshot) -> Duration {
        let micros =
            (snapshot.min_response_time_ms as f64 * self.config.timeout_multiplier * 1000.0).round();
        let scaled = Duration::from_micros(micros.max(0.0) as u64);
        let ceiling = self.config.timeout_ceiling;
        scaled.min(ceiling).max(self.config.timeout_floor.min(ceiling))
    }

    pub async fn deliver(&self, task: &PaymentTask) -> Result<ProcessorId, RouterError> {
        let primary = self.choose().await;
        self.deliver_via(primary, task).await
    }

    /// Tries `primary`, then the other processor. Each processor is tried at
    /// most once and its circuit updated once.
    #[instrument(skip(self, task), fields(correlation_id = %task.correlation_id))]
    pub async fn deliver_via(
        &self,
        primary: ProcessorId,
        task: &PaymentTask,
    ) -> Result<ProcessorId, RouterError> {
        let requested_at = Utc::now();
        let transaction = task.to_processor_dto(requested_at);

        let primary_error = match self.attempt(primary, &transaction).await {
            Ok(()) => {
                self.complete(primary, task, requested_at).await;
                return Ok(primary);
            }
            Err(err) => err,
        };
        debug!(processor = %primary, error = %primary_error, "primary attempt failed");
        self.note_failure(primary).await;

        let secondary = primary.other();
        match self.attempt(secondary, &transaction).await {
            Ok(()) => {
                self.complete(secondary, task, requested_at).await;
                Ok(secondary)
            }
            Err(secondary_error) => {
                self.note_failure(secondary).await;
                Err(RouterError::BothFailed {
                    primary,
                    primary_error,
                    secondary,
                    secondary_error,
                })
            }
        }
    }

    async fn attempt(
        &self,
        processor: ProcessorId,
        transaction: &PaymentProcessorDTO,
    ) -> Result<(), DeliveryError> {
        let snapshot = self.health.get_health(processor).await;
        let timeout = self.attempt_timeout(&snapshot);
        self.client
            .process_transaction(processor, transaction, timeout)
            .await
    }

    async fn note_failure(&self, processor: ProcessorId) {
        if let Err(err) = self.breaker.record_failure(processor).await {
            warn!(%processor, error = %err, "dropped circuit failure update");
        }
    }

    async fn complete(&self, processor: ProcessorId, task: &PaymentTask, requested_at: DateTime<Utc>) {
        let record = PaymentRecord {
            correlation_id: task.correlation_id.clone(),
            amount: task.amount,
            requested_at,
            processor,
        };
        let (circuit, saved) = join!(
            self.breaker.record_success(processor),
            self.ledger.save(&record)
        );
        if let Err(err) = circuit {
            warn!(%processor, error = %err, "dropped circuit success update");
        }
        if let Err(err) = saved {
            error!(%processor, error = %err, "payment delivered but its record was not persisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        circuit_breaker::{CircuitBreakerConfig, CircuitState},
        clock::ManualClock,
        health::HealthMonitorConfig,
        repository::RedisLedger,
        store::InMemoryStore,
    };
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Harness {
        router: Router,
        breaker: CircuitBreaker,
        ledger: RedisLedger,
    }

    async fn processor(health: serde_json::Value, payment_status: u16, expected_posts: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/service-health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(health))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/payments"))
            .respond_with(ResponseTemplate::new(payment_status))
            .expect(expected_posts)
            .mount(&server)
            .await;
        server
    }

    fn harness(default_url: String, fallback_url: String, config: RouterConfig) -> Harness {
        let store = InMemoryStore::new();
        let shared: Arc<dyn crate::store::SharedStateStore> = Arc::new(store);
        let client = PaymentProcessorClient::new(reqwest::Client::new(), default_url, fallback_url);
        let breaker = CircuitBreaker::new(
            shared.clone(),
            Arc::new(ManualClock::new(0)),
            CircuitBreakerConfig::default(),
        );
        let health = HealthMonitor::new(shared.clone(), client.clone(), HealthMonitorConfig::default());
        let ledger = RedisLedger::new(shared);
        let router = Router::new(
            breaker.clone(),
            health,
            client,
            Arc::new(ledger.clone()),
            config,
        );
        Harness {
            router,
            breaker,
            ledger,
        }
    }

    fn healthy() -> serde_json::Value {
        json!({"failing": false, "minResponseTime": 10})
    }

    #[tokio::test]
    async fn test_healthy_default_is_used() {
        let default = processor(healthy(), 200, 1).await;
        let h = harness(default.uri(), "http://127.0.0.1:9".into(), RouterConfig::default());

        let task = PaymentTask::new("p-1", dec!(19.90));
        assert_eq!(h.router.deliver(&task).await, Ok(ProcessorId::Default));

        let summary = h.ledger.summary(None, None).await.unwrap();
        assert_eq!(summary.default.total_requests, 1);
        assert_eq!(summary.default.total_amount, dec!(19.90));
        assert_eq!(summary.fallback.total_requests, 0);
    }

    #[tokio::test]
    async fn test_falls_back_once_when_default_rejects() {
        let default = processor(healthy(), 500, 1).await;
        let fallback = processor(healthy(), 200, 1).await;
        let h = harness(default.uri(), fallback.uri(), RouterConfig::default());

        let task = PaymentTask::new("p-2", dec!(5));
        assert_eq!(h.router.deliver(&task).await, Ok(ProcessorId::Fallback));

        let default_circuit = h.breaker.load(ProcessorId::Default).await.unwrap();
        assert_eq!(default_circuit.failure_count, 1);
        let fallback_circuit = h.breaker.load(ProcessorId::Fallback).await.unwrap();
        assert_eq!(fallback_circuit.state, CircuitState::Closed);

        let summary = h.ledger.summary(None, None).await.unwrap();
        assert_eq!(summary.fallback.total_requests, 1);
    }

    #[tokio::test]
    async fn test_both_failing_tries_each_processor_once() {
        let default = processor(healthy(), 500, 1).await;
        let fallback = processor(healthy(), 503, 1).await;
        let h = harness(default.uri(), fallback.uri(), RouterConfig::default());

        let result = h.router.deliver(&PaymentTask::new("p-3", dec!(1))).await;
        let err = result.unwrap_err();
        assert!(!err.retryable());
        assert_eq!(
            err,
            RouterError::BothFailed {
                primary: ProcessorId::Default,
                primary_error: DeliveryError::Rejected(500),
                secondary: ProcessorId::Fallback,
                secondary_error: DeliveryError::Rejected(503),
            }
        );
        assert_eq!(
            h.ledger.summary(None, None).await.unwrap(),
            Default::default()
        );
    }

    #[tokio::test]
    async fn test_open_default_circuit_routes_to_fallback() {
        let default = processor(healthy(), 200, 0).await;
        let fallback = processor(healthy(), 200, 1).await;
        let h = harness(default.uri(), fallback.uri(), RouterConfig::default());
        h.breaker.record_failure(ProcessorId::Default).await.unwrap();
        h.breaker.record_failure(ProcessorId::Default).await.unwrap();

        let task = PaymentTask::new("p-4", dec!(1));
        assert_eq!(h.router.deliver(&task).await, Ok(ProcessorId::Fallback));
    }

    #[tokio::test]
    async fn test_failing_default_health_routes_to_fallback() {
        let default = processor(json!({"failing": true, "minResponseTime": 0}), 200, 0).await;
        let fallback = processor(healthy(), 200, 1).await;
        let h = harness(default.uri(), fallback.uri(), RouterConfig::default());

        assert_eq!(h.router.choose().await, ProcessorId::Fallback);
        let task = PaymentTask::new("p-5", dec!(1));
        assert_eq!(h.router.deliver(&task).await, Ok(ProcessorId::Fallback));
    }

    #[tokio::test]
    async fn test_success_after_failure_heals_circuit() {
        let default = processor(healthy(), 200, 1).await;
        let h = harness(default.uri(), "http://127.0.0.1:9".into(), RouterConfig::default());
        h.breaker.record_failure(ProcessorId::Default).await.unwrap();

        let task = PaymentTask::new("p-6", dec!(1));
        assert_eq!(h.router.deliver(&task).await, Ok(ProcessorId::Default));
        assert_eq!(h.breaker.load(ProcessorId::Default).await.unwrap().failure_count, 0);
    }

    #[test]
    fn test_attempt_timeout_scales_and_is_bounded() {
        let h = harness("http://a".into(), "http://b".into(), RouterConfig::default());
        assert_eq!(
            h.router.attempt_timeout(&HealthSnapshot::healthy(100)),
            Duration::from_millis(150)
        );
        assert_eq!(
            h.router.attempt_timeout(&HealthSnapshot::healthy(2000)),
            Duration::from_millis(500)
        );
        assert_eq!(
            h.router.attempt_timeout(&HealthSnapshot::healthy(0)),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_latency_policy_prefers_default_within_tolerance() {
        let pair = |d: HealthSnapshot, f: HealthSnapshot| PaymentProcessorHealth {
            default_processor: d,
            fallback_processor: f,
        };
        let ok = HealthSnapshot::healthy;
        let down = HealthSnapshot::failing;

        assert_eq!(choose_by_latency(&pair(ok(150), ok(100)), 0.5), ProcessorId::Default);
        assert_eq!(choose_by_latency(&pair(ok(151), ok(100)), 0.5), ProcessorId::Fallback);
        assert_eq!(choose_by_latency(&pair(ok(101), ok(100)), 0.0), ProcessorId::Fallback);
        assert_eq!(choose_by_latency(&pair(down(0), ok(900)), 0.5), ProcessorId::Fallback);
        assert_eq!(choose_by_latency(&pair(ok(900), down(0)), 0.5), ProcessorId::Default);
        assert_eq!(choose_by_latency(&pair(down(0), down(0)), 0.5), ProcessorId::Default);
    }

    #[tokio::test]
    async fn test_latency_policy_reads_combined_snapshot() {
        let default = processor(json!({"failing": false, "minResponseTime": 400}), 200, 0).await;
        let fallback = processor(json!({"failing": false, "minResponseTime": 100}), 200, 1).await;
        let config = RouterConfig {
            policy: RoutingPolicy::LatencyWeighted { tolerance: 0.5 },
            ..Default::default()
        };
        let h = harness(default.uri(), fallback.uri(), config);

        let task = PaymentTask::new("p-7", dec!(1));
        assert_eq!(h.router.deliver(&task).await, Ok(ProcessorId::Fallback));
    }
}
