#![allow(dead_code)]

use std::sync::Arc;

use payment_router::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    clock::ManualClock,
    health::{HealthMonitor, HealthMonitorConfig},
    payment_processors::service::PaymentProcessorClient,
    queue::PaymentQueue,
    repository::RedisLedger,
    router::{Router, RouterConfig},
    store::{InMemoryStore, SharedStateStore},
    structs::AppState,
    worker::{QueueWorker, WorkerConfig},
};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One service instance wired against an in-memory shared store.
pub struct Instance {
    pub store: InMemoryStore,
    pub queue: PaymentQueue,
    pub ledger: RedisLedger,
    pub breaker: CircuitBreaker,
    pub clock: ManualClock,
    pub worker: QueueWorker,
}

impl Instance {
    pub fn app_state(&self) -> AppState {
        AppState {
            queue: self.queue.clone(),
            ledger: Arc::new(self.ledger.clone()),
        }
    }
}

pub fn instance(default_url: String, fallback_url: String) -> Instance {
    let store = InMemoryStore::new();
    let shared: Arc<dyn SharedStateStore> = Arc::new(store.clone());
    let clock = ManualClock::new(1_750_000_000_000);
    let client = PaymentProcessorClient::new(reqwest::Client::new(), default_url, fallback_url);
    let breaker = CircuitBreaker::new(
        shared.clone(),
        Arc::new(clock.clone()),
        CircuitBreakerConfig::default(),
    );
    let health = HealthMonitor::new(shared.clone(), client.clone(), HealthMonitorConfig::default());
    let ledger = RedisLedger::new(shared.clone());
    let router = Router::new(
        breaker.clone(),
        health,
        client,
        Arc::new(ledger.clone()),
        RouterConfig::default(),
    );
    let queue = PaymentQueue::new(shared);
    let worker = QueueWorker::new(queue.clone(), router, WorkerConfig::default());
    Instance {
        store,
        queue,
        ledger,
        breaker,
        clock,
        worker,
    }
}

/// A processor that reports itself healthy and answers payments with `status`.
pub async fn processor(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/payments/service-health"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"failing": false, "minResponseTime": 5})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/payments"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

pub const UNREACHABLE: &str = "http://127.0.0.1:9";
