use std::{sync::Arc, time::Duration};

use payment_router::{
    circuit_breaker::CircuitBreaker,
    clock::SystemClock,
    config::{Settings, IN_MEMORY_URL},
    controller,
    db::{PostgresDatabase, RedisStore},
    health::HealthMonitor,
    payment_processors::service::PaymentProcessorClient,
    queue::PaymentQueue,
    repository::{Ledger, PostgresLedger, RedisLedger},
    router::Router,
    store::{InMemoryStore, SharedStateStore},
    structs::AppState,
    worker::QueueWorker,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;
    info!(port = settings.port, workers = settings.num_workers, "starting payment router");

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .connect_timeout(Duration::from_secs(2))
        .tcp_nodelay(true)
        .pool_max_idle_per_host(500)
        .build()?;

    let store: Arc<dyn SharedStateStore> = if settings.memory_database_url == IN_MEMORY_URL {
        info!("using in-process shared state store");
        Arc::new(InMemoryStore::new())
    } else {
        info!("connecting to redis");
        Arc::new(RedisStore::connect(&settings.memory_database_url).await?)
    };

    let ledger: Arc<dyn Ledger> = match &settings.database_url {
        Some(database_url) => {
            info!("connecting to postgres");
            let ledger = PostgresLedger::new(PostgresDatabase::connect(database_url).await?);
            ledger.ensure_schema().await?;
            Arc::new(ledger)
        }
        None => Arc::new(RedisLedger::new(store.clone())),
    };

    let client = PaymentProcessorClient::new(
        http_client,
        settings.default_processor_url.clone(),
        settings.fallback_processor_url.clone(),
    );
    let breaker = CircuitBreaker::new(store.clone(), Arc::new(SystemClock), settings.circuit);
    let health = HealthMonitor::new(store.clone(), client.clone(), settings.health);
    let router = Router::new(breaker, health.clone(), client, ledger.clone(), settings.router);
    let queue = PaymentQueue::new(store.clone());

    if settings.health.designated_refresher {
        info!("this instance refreshes processor health");
        tokio::spawn(health.run_refresher());
    }

    let mut workers = Vec::with_capacity(settings.num_workers);
    for _ in 0..settings.num_workers {
        let worker = QueueWorker::new(queue.clone(), router.clone(), settings.worker);
        workers.push(tokio::spawn(async move { worker.run().await }));
    }

    let app = controller::app(AppState { queue, ledger });
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.port)).await?;
    info!(address = %listener.local_addr()?, "server up");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "could not listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    for worker in workers {
        worker.abort();
    }
    info!("server down");
    served.map_err(Into::into)
}
