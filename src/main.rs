use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing::info;

use payments_api as api;

use api::cache::{CacheBackend, InMemoryCache, RedisCache};
use api::coordination::DistributedLock;
use api::events::producer::EventPublisher;
use api::events::{topics, EventConsumer, RedisStreamProducer};
use api::gateways::GatewayRegistry;
use api::handlers::AppServices;
use api::repositories::PaymentRepository;
use api::services::payments::ExternalFailureHandler;
use api::services::PaymentService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    // Init DB
    let db = api::db::establish_connection(&cfg.database_url)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_create_schema {
        api::db::ensure_schema(&db)
            .await
            .context("failed to create schema")?;
    }
    let db = Arc::new(db);

    // Redis backs the cache, the webhook lock, and the message bus.
    let redis_client = Arc::new(
        redis::Client::open(cfg.redis_url.clone()).context("invalid redis url")?,
    );
    let cache: Arc<dyn CacheBackend> = match cfg.cache.cache_type.as_str() {
        "in-memory" => {
            info!("using in-memory cache");
            Arc::new(InMemoryCache::new())
        }
        _ => Arc::new(RedisCache::new(redis_client.clone())),
    };

    let gateways = Arc::new(
        GatewayRegistry::from_config(&cfg.gateways)
            .context("failed to build gateway registry")?,
    );

    // The bus producer is a process-wide resource with an explicit
    // connect/disconnect lifecycle.
    let producer = Arc::new(RedisStreamProducer::new(
        redis_client.clone(),
        cfg.bus.clone(),
    ));
    producer
        .connect()
        .await
        .context("failed to connect event producer")?;

    let repo = PaymentRepository::new(
        db.clone(),
        cache.clone(),
        Duration::from_secs(cfg.cache.default_ttl_secs),
    );
    let lock = DistributedLock::new(
        cache.clone(),
        Duration::from_secs(cfg.webhook_lock_ttl_secs),
    );
    let payments = Arc::new(PaymentService::new(
        db.clone(),
        repo,
        gateways.clone(),
        producer.clone() as Arc<dyn EventPublisher>,
        lock,
        cfg.callback_base_url.clone(),
    ));

    // Inbound saga events
    let mut consumer = EventConsumer::new(redis_client.clone(), cfg.bus.clone());
    consumer.register_handler(
        topics::PAYMENT_EXTERNAL_FAILED,
        Arc::new(ExternalFailureHandler::new(payments.clone())),
    );
    let consumer_tasks = consumer
        .start()
        .await
        .context("failed to start event consumer")?;

    let bind_addr = cfg.bind_addr();
    let state = api::AppState {
        db,
        config: cfg,
        redis: redis_client,
        gateways,
        services: AppServices { payments },
    };
    let app = api::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    info!("payments api listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    for task in consumer_tasks {
        task.abort();
    }
    producer.disconnect().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
}
