use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::Connection;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::BusConfig;
use crate::errors::ServiceError;

/// Per-topic message handler invoked by the consumer.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &Value) -> Result<(), ServiceError>;
}

/// What happened to one inbound message. Drives the ack/dead-letter decision.
#[derive(Debug)]
enum Dispatch {
    Handled,
    NoHandler,
    Malformed(String),
    Failed(String),
}

async fn dispatch(
    handlers: &HashMap<String, Arc<dyn EventHandler>>,
    topic: &str,
    raw: &str,
) -> Dispatch {
    let payload: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        // A malformed payload can never succeed; retrying is pointless.
        Err(e) => return Dispatch::Malformed(e.to_string()),
    };
    let Some(handler) = handlers.get(topic) else {
        return Dispatch::NoHandler;
    };
    match handler.handle(topic, &payload).await {
        Ok(()) => Dispatch::Handled,
        Err(e) => Dispatch::Failed(e.to_string()),
    }
}

/// Bus consumer over Redis Streams consumer groups. Each topic-partition
/// stream is read in order by its own task over a dedicated connection
/// (blocking reads must not share a multiplexed one); partitions share a
/// bounded worker budget. Offsets advance (`XACK`) only after the handler
/// returns -- except for poison messages, which are dead-lettered and
/// acknowledged so they cannot stall the partition.
pub struct EventConsumer {
    client: Arc<redis::Client>,
    cfg: BusConfig,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventConsumer {
    pub fn new(client: Arc<redis::Client>, cfg: BusConfig) -> Self {
        Self {
            client,
            cfg,
            handlers: HashMap::new(),
        }
    }

    pub fn register_handler(&mut self, topic: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(topic.into(), handler);
    }

    fn stream_key(cfg: &BusConfig, topic: &str, partition: u32) -> String {
        format!("{}:{}:{}", cfg.namespace, topic, partition)
    }

    fn dlq_key(cfg: &BusConfig) -> String {
        format!("{}:dlq", cfg.namespace)
    }

    /// Create the consumer groups and spawn one reader task per
    /// topic-partition. Returns the task handles so the caller can abort
    /// them on shutdown.
    pub async fn start(self) -> Result<Vec<JoinHandle<()>>, ServiceError> {
        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| ServiceError::EventPublish(format!("bus connection failed: {}", e)))?;

        for topic in &self.cfg.subscribe_topics {
            for partition in 0..self.cfg.partitions.max(1) {
                let stream = Self::stream_key(&self.cfg, topic, partition);
                let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(&stream)
                    .arg(&self.cfg.consumer_group)
                    .arg("0")
                    .arg("MKSTREAM")
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = created {
                    // The group surviving a restart is the normal case.
                    if !e.to_string().contains("BUSYGROUP") {
                        return Err(ServiceError::EventPublish(format!(
                            "consumer group create on {}: {}",
                            stream, e
                        )));
                    }
                }
            }
        }

        info!(
            group = %self.cfg.consumer_group,
            topics = ?self.cfg.subscribe_topics,
            partitions = self.cfg.partitions,
            "event consumer starting"
        );

        let handlers = Arc::new(self.handlers);
        let workers = Arc::new(Semaphore::new(self.cfg.max_concurrency.max(1)));
        let mut tasks = Vec::new();

        for topic in self.cfg.subscribe_topics.clone() {
            for partition in 0..self.cfg.partitions.max(1) {
                let stream = Self::stream_key(&self.cfg, &topic, partition);
                tasks.push(tokio::spawn(run_partition(
                    self.client.clone(),
                    self.cfg.clone(),
                    topic.clone(),
                    stream,
                    partition,
                    handlers.clone(),
                    workers.clone(),
                )));
            }
        }
        Ok(tasks)
    }
}

async fn run_partition(
    client: Arc<redis::Client>,
    cfg: BusConfig,
    topic: String,
    stream: String,
    partition: u32,
    handlers: Arc<HashMap<String, Arc<dyn EventHandler>>>,
    workers: Arc<Semaphore>,
) {
    let opts = StreamReadOptions::default()
        .group(&cfg.consumer_group, &cfg.consumer_name)
        .count(10)
        .block(cfg.block_timeout_ms);

    'reconnect: loop {
        let mut conn = match client.get_async_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(stream = %stream, error = %e, "bus connection failed, backing off");
                sleep(Duration::from_secs(cfg.connect_backoff_secs)).await;
                continue;
            }
        };

        loop {
            let permit = workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore never closes");

            let reply: StreamReadReply =
                match conn.xread_options(&[&stream], &[">"], &opts).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!(stream = %stream, error = %e, "bus read failed, reconnecting");
                        drop(permit);
                        sleep(Duration::from_secs(cfg.connect_backoff_secs)).await;
                        continue 'reconnect;
                    }
                };

            for key in reply.keys {
                for entry in key.ids {
                    let raw: String = entry.get("payload").unwrap_or_default();
                    process_entry(
                        &client, &mut conn, &cfg, &topic, partition, &stream, &entry.id, &raw,
                        &handlers,
                    )
                    .await;
                }
            }
            drop(permit);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_entry(
    client: &Arc<redis::Client>,
    conn: &mut Connection,
    cfg: &BusConfig,
    topic: &str,
    partition: u32,
    stream: &str,
    entry_id: &str,
    raw: &str,
    handlers: &HashMap<String, Arc<dyn EventHandler>>,
) {
    // Keep-alive: periodically reclaim the in-flight entry to this consumer
    // so idle-based reclaim does not steal it during a long handler.
    let keepalive = tokio::spawn(claim_loop(
        client.clone(),
        cfg.clone(),
        stream.to_string(),
        entry_id.to_string(),
    ));

    let outcome = dispatch(handlers, topic, raw).await;
    keepalive.abort();

    match outcome {
        Dispatch::Handled => {
            ack(conn, cfg, stream, entry_id).await;
            debug!(topic, partition, entry_id, "message handled");
        }
        Dispatch::NoHandler => {
            // Not an error: this instance simply does not consume the topic.
            ack(conn, cfg, stream, entry_id).await;
            debug!(topic, entry_id, "no handler registered, skipping");
        }
        Dispatch::Malformed(err) => {
            warn!(topic, entry_id, error = %err, "malformed payload, dead-lettering");
            dead_letter(conn, cfg, topic, partition, entry_id, raw, &err).await;
            ack(conn, cfg, stream, entry_id).await;
        }
        Dispatch::Failed(err) => {
            error!(topic, partition, entry_id, error = %err, "handler failed, dead-lettering");
            // Commit anyway: a poison message must not stall the partition.
            ack(conn, cfg, stream, entry_id).await;
            dead_letter(conn, cfg, topic, partition, entry_id, raw, &err).await;
            // Backpressure valve before this partition resumes.
            sleep(Duration::from_secs(cfg.pause_on_error_secs)).await;
        }
    }
}

async fn ack(conn: &mut Connection, cfg: &BusConfig, stream: &str, entry_id: &str) {
    let acked: Result<i32, redis::RedisError> =
        conn.xack(stream, &cfg.consumer_group, &[entry_id]).await;
    if let Err(e) = acked {
        warn!(stream, entry_id, error = %e, "offset commit failed");
    }
}

async fn dead_letter(
    conn: &mut Connection,
    cfg: &BusConfig,
    topic: &str,
    partition: u32,
    entry_id: &str,
    raw: &str,
    error_text: &str,
) {
    let result: Result<String, redis::RedisError> = redis::cmd("XADD")
        .arg(EventConsumer::dlq_key(cfg))
        .arg("*")
        .arg("topic")
        .arg(topic)
        .arg("partition")
        .arg(partition)
        .arg("message_id")
        .arg(entry_id)
        .arg("payload")
        .arg(raw)
        .arg("error")
        .arg(error_text)
        .arg("failed_at")
        .arg(chrono::Utc::now().to_rfc3339())
        .query_async(&mut *conn)
        .await;
    if let Err(e) = result {
        error!(topic, entry_id, error = %e, "dead-letter write failed");
    }
}

async fn claim_loop(client: Arc<redis::Client>, cfg: BusConfig, stream: String, entry_id: String) {
    let interval = Duration::from_secs(cfg.claim_interval_secs.max(1));
    let Ok(mut conn) = client.get_async_connection().await else {
        return;
    };
    loop {
        sleep(interval).await;
        let claimed: Result<Vec<String>, redis::RedisError> = redis::cmd("XCLAIM")
            .arg(&stream)
            .arg(&cfg.consumer_group)
            .arg(&cfg.consumer_name)
            .arg(0)
            .arg(&entry_id)
            .arg("JUSTID")
            .query_async(&mut conn)
            .await;
        if let Err(e) = claimed {
            warn!(stream = %stream, entry_id = %entry_id, error = %e, "keep-alive claim failed");
        }
    }
}
