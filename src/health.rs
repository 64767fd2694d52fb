use std::{sync::Arc, time::Duration};

use serde::{de::DeserializeOwned, Serialize};
use tokio::{join, sync::Mutex};
use tracing::{debug, info, warn};

use crate::{
    payment_processors::{
        service::{PaymentProcessorClient, ProcessorId},
        structs::{HealthSnapshot, PaymentProcessorHealth},
    },
    store::SharedStateStore,
};

pub const HEALTH_KEY: &str = "health";

fn health_key(processor: ProcessorId) -> String {
    format!("{HEALTH_KEY}:{processor}")
}

#[derive(Debug, Clone, Copy)]
pub struct HealthMonitorConfig {
    pub ttl: Duration,
    pub probe_timeout: Duration,
    /// Whether this instance is the one allowed to probe processors.
    pub designated_refresher: bool,
    /// How long a non-designated instance waits before its single re-read.
    pub wait_interval: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(500),
            designated_refresher: true,
            wait_interval: Duration::from_millis(50),
        }
    }
}

/// One lock per cache entry, held while probing so concurrent misses on this
/// instance wait for the probe in flight instead of starting their own.
#[derive(Default)]
struct ProbeLocks {
    default: Mutex<()>,
    fallback: Mutex<()>,
    pair: Mutex<()>,
}

impl ProbeLocks {
    fn for_processor(&self, processor: ProcessorId) -> &Mutex<()> {
        match processor {
            ProcessorId::Default => &self.default,
            ProcessorId::Fallback => &self.fallback,
        }
    }
}

/// Reads processor health from the shared cache, probing only on the
/// designated refresher instance.
#[derive(Clone)]
pub struct HealthMonitor {
    store: Arc<dyn SharedStateStore>,
    client: PaymentProcessorClient,
    config: HealthMonitorConfig,
    probe_locks: Arc<ProbeLocks>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn SharedStateStore>,
        client: PaymentProcessorClient,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            store,
            client,
            config,
            probe_locks: Arc::new(ProbeLocks::default()),
        }
    }

    /// Used when nothing fresh is visible and this instance may not probe.
    pub fn safe_default() -> HealthSnapshot {
        HealthSnapshot::healthy(0)
    }

    pub async fn get_health(&self, processor: ProcessorId) -> HealthSnapshot {
        let key = health_key(processor);
        if let Some(snapshot) = self.read_cached(&key).await {
            return snapshot;
        }

        if self.config.designated_refresher {
            let _probing = self.probe_locks.for_processor(processor).lock().await;
            if let Some(snapshot) = self.read_cached(&key).await {
                return snapshot;
            }
            let snapshot = self
                .client
                .get_service_health(processor, self.config.probe_timeout)
                .await;
            self.write_cached(&key, &snapshot).await;
            return snapshot;
        }

        tokio::time::sleep(self.config.wait_interval).await;
        match self.read_cached(&key).await {
            Some(snapshot) => snapshot,
            None => {
                debug!(%processor, "no fresh health snapshot, using safe default");
                Self::safe_default()
            }
        }
    }

    /// Both processors at once, cached under a single key. A probe also
    /// refreshes the per-processor entries.
    pub async fn get_health_pair(&self) -> PaymentProcessorHealth {
        if let Some(health) = self.read_cached(HEALTH_KEY).await {
            return health;
        }

        if self.config.designated_refresher {
            let _probing = self.probe_locks.pair.lock().await;
            if let Some(health) = self.read_cached(HEALTH_KEY).await {
                return health;
            }
            return self.probe_pair().await;
        }

        tokio::time::sleep(self.config.wait_interval).await;
        match self.read_cached(HEALTH_KEY).await {
            Some(health) => health,
            None => PaymentProcessorHealth {
                default_processor: Self::safe_default(),
                fallback_processor: Self::safe_default(),
            },
        }
    }

    /// Probes both processors regardless of what is cached and rewrites all
    /// three entries.
    pub async fn refresh_pair(&self) -> PaymentProcessorHealth {
        let _probing = self.probe_locks.pair.lock().await;
        self.probe_pair().await
    }

    pub async fn is_healthy(&self, processor: ProcessorId) -> bool {
        !self.get_health(processor).await.failing
    }

    /// Rewrites the shared entries every half TTL, so they are replaced
    /// before they expire and other instances rarely miss them.
    pub async fn run_refresher(self) {
        info!(ttl_ms = self.config.ttl.as_millis() as u64, "health refresher started");
        let interval = (self.config.ttl / 2).max(Duration::from_millis(10));
        loop {
            let health = self.refresh_pair().await;
            debug!(?health, "health cache refreshed");
            tokio::time::sleep(interval).await;
        }
    }

    async fn probe_pair(&self) -> PaymentProcessorHealth {
        let (default_processor, fallback_processor) = join!(
            self.client
                .get_service_health(ProcessorId::Default, self.config.probe_timeout),
            self.client
                .get_service_health(ProcessorId::Fallback, self.config.probe_timeout)
        );
        let health = PaymentProcessorHealth {
            default_processor,
            fallback_processor,
        };
        let default_key = health_key(ProcessorId::Default);
        let fallback_key = health_key(ProcessorId::Fallback);
        join!(
            self.write_cached(HEALTH_KEY, &health),
            self.write_cached(&default_key, &default_processor),
            self.write_cached(&fallback_key, &fallback_processor)
        );
        health
    }

    async fn read_cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(key, error = %err, "health cache unreadable");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, error = %err, "discarding malformed health cache entry");
                None
            }
        }
    }

    async fn write_cached<T: Serialize>(&self, key: &str, value: &T) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key, error = %err, "could not encode health snapshot");
                return;
            }
        };
        if let Err(err) = self.store.set_with_ttl(key, &raw, self.config.ttl).await {
            warn!(key, error = %err, "dropped health cache write");
        }
    }
}
