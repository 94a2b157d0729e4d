use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::config::BusConfig;
use crate::errors::ServiceError;

use super::{PaymentEvent, SERVICE_IDENTITY};

/// Publishes lifecycle events to the partitioned bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish with the event's own partition key (saga id first).
    async fn publish(&self, event: &PaymentEvent) -> Result<(), ServiceError> {
        self.publish_with_key(None, event).await
    }

    /// Publish with an explicit partition key overriding the event's own.
    async fn publish_with_key(
        &self,
        key: Option<&str>,
        event: &PaymentEvent,
    ) -> Result<(), ServiceError>;
}

/// Bus producer over Redis Streams: one stream per topic-partition, appended
/// with `XADD`. The append reply is the delivery acknowledgement; every send
/// carries a bounded timeout. The connection is a long-lived process-wide
/// resource with an explicit connect/disconnect lifecycle.
pub struct RedisStreamProducer {
    client: Arc<redis::Client>,
    conn: RwLock<Option<ConnectionManager>>,
    cfg: BusConfig,
}

impl RedisStreamProducer {
    pub fn new(client: Arc<redis::Client>, cfg: BusConfig) -> Self {
        Self {
            client,
            conn: RwLock::new(None),
            cfg,
        }
    }

    /// Establish the bus connection with bounded retry and backoff. Called
    /// once at process startup.
    pub async fn connect(&self) -> Result<(), ServiceError> {
        let mut attempt: u32 = 0;
        loop {
            match self.client.get_tokio_connection_manager().await {
                Ok(conn) => {
                    *self.conn.write().await = Some(conn);
                    info!(namespace = %self.cfg.namespace, "event producer connected");
                    return Ok(());
                }
                Err(e) if attempt < self.cfg.connect_max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_secs(
                        self.cfg.connect_backoff_secs.saturating_mul(u64::from(attempt)),
                    );
                    warn!(error = %e, attempt, "bus connection failed, retrying after {:?}", backoff);
                    sleep(backoff).await;
                }
                Err(e) => {
                    return Err(ServiceError::EventPublish(format!(
                        "bus connection failed after {} attempts: {}",
                        attempt + 1,
                        e
                    )));
                }
            }
        }
    }

    pub async fn disconnect(&self) {
        *self.conn.write().await = None;
        info!("event producer disconnected");
    }

    fn stream_key(&self, topic: &str, partition: u32) -> String {
        format!("{}:{}:{}", self.cfg.namespace, topic, partition)
    }
}

/// FNV-1a, chosen for a stable partition assignment across processes and
/// restarts (std's hasher is randomly seeded).
fn fnv1a(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

pub(crate) fn partition_for(key: Option<&str>, partitions: u32) -> u32 {
    match key {
        Some(key) if partitions > 1 => (fnv1a(key) % u64::from(partitions)) as u32,
        _ => 0,
    }
}

#[async_trait]
impl EventPublisher for RedisStreamProducer {
    async fn publish_with_key(
        &self,
        key: Option<&str>,
        event: &PaymentEvent,
    ) -> Result<(), ServiceError> {
        let mut conn = {
            let guard = self.conn.read().await;
            guard
                .clone()
                .ok_or_else(|| ServiceError::EventPublish("producer is not connected".into()))?
        };

        let own_key = event.partition_key();
        let partition_key = key.or(own_key.as_deref());
        let partition = partition_for(partition_key, self.cfg.partitions);
        let stream = self.stream_key(event.topic(), partition);

        let payload = serde_json::to_string(event)
            .map_err(|e| ServiceError::EventPublish(format!("event serialization: {}", e)))?;
        let correlation_id = event.saga_id().to_string();
        let published_at = chrono::Utc::now().to_rfc3339();

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&stream)
            .arg("*")
            .arg("payload")
            .arg(&payload)
            .arg("correlation_id")
            .arg(&correlation_id)
            .arg("producer")
            .arg(SERVICE_IDENTITY)
            .arg("published_at")
            .arg(&published_at);
        let send = cmd.query_async::<_, String>(&mut conn);

        let entry_id = timeout(Duration::from_secs(self.cfg.send_timeout_secs), send)
            .await
            .map_err(|_| {
                ServiceError::EventPublish(format!(
                    "publish to {} timed out after {}s",
                    stream, self.cfg.send_timeout_secs
                ))
            })?
            .map_err(|e| ServiceError::EventPublish(format!("publish to {}: {}", stream, e)))?;

        tracing::debug!(
            topic = event.topic(),
            partition,
            entry_id = %entry_id,
            correlation_id = %correlation_id,
            "event published"
        );
        Ok(())
    }
}
