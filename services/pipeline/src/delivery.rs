//! Delivery channel for the hangar pipeline.
//!
//! Every derived event leaves the process through [`DeliveryChannel`]. It
//! owns one shared broker connection and one broker channel per worker, and
//! publishes with a bounded, fixed-interval retry policy. A publish that
//! still fails after the last attempt is reported to the caller and the
//! message is dropped; there is no outbox.

use crate::broker::{Broker, BrokerChannel, BrokerConnection};
use crate::config::DeliveryConfig;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Errors that can occur while delivering messages
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Failed to connect to broker at {endpoint}: {message}")]
    ConnectFailed { endpoint: String, message: String },

    #[error("Broker connection is not open")]
    NotConnected,

    #[error("Channel closed by broker: {0}")]
    ChannelClosed(String),

    #[error("Connection closed by broker: {0}")]
    ConnectionClosed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Publish to {queue} timed out after {timeout:?}")]
    Timeout { queue: String, timeout: Duration },

    #[error("Failed to serialize message: {0}")]
    SerializationError(String),

    #[error("Failed to publish to {queue} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        queue: String,
        attempts: u32,
        last_error: String,
    },
}

impl DeliveryError {
    /// Whether the failure only affects the worker's channel and leaves the
    /// shared connection usable
    pub fn is_channel_level(&self) -> bool {
        matches!(self, DeliveryError::ChannelClosed(_))
    }
}

/// Identifies the worker owning a broker channel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Message to be published to a queue
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    /// Queue the message is routed to
    pub queue: String,
    /// Serialized message payload
    pub payload: Vec<u8>,
    /// Unique message identifier
    pub message_id: String,
    /// MIME type of the payload
    pub content_type: String,
    /// Optional application-level message type
    pub message_type: Option<String>,
}

impl OutgoingMessage {
    /// Create a plain-text message
    pub fn text(queue: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            payload: body.into().into_bytes(),
            message_id: Uuid::new_v4().to_string(),
            content_type: "text/plain".to_string(),
            message_type: None,
        }
    }

    /// Create a message carrying an already serialized JSON document
    pub fn json_str(queue: impl Into<String>, json: impl Into<String>) -> Self {
        Self {
            content_type: "application/json".to_string(),
            ..Self::text(queue, json)
        }
    }

    /// Create a message with a JSON payload
    pub fn new_json<T: serde::Serialize>(
        queue: impl Into<String>,
        message: &T,
    ) -> Result<Self, DeliveryError> {
        let json = serde_json::to_string(message)
            .map_err(|e| DeliveryError::SerializationError(e.to_string()))?;
        Ok(Self::json_str(queue, json))
    }

    /// Set the message type
    pub fn with_message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }
}

/// Counters kept by the delivery channel
#[derive(Debug, Default, Clone)]
pub struct DeliveryStats {
    pub published: u64,
    pub failed: u64,
    pub retries: u64,
    pub connections_opened: u64,
    pub connect_failures: u64,
}

/// Shared publish path to the broker
pub struct DeliveryChannel {
    broker: Arc<dyn Broker>,
    config: DeliveryConfig,
    /// Connection lifecycle lock
    connection: tokio::sync::Mutex<Option<Arc<dyn BrokerConnection>>>,
    /// Serializes declare/publish on broker channels
    publish_lock: tokio::sync::Mutex<()>,
    channels: Mutex<HashMap<WorkerId, Arc<dyn BrokerChannel>>>,
    connected: AtomicBool,
    stats: RwLock<DeliveryStats>,
}

impl DeliveryChannel {
    /// Create a delivery channel; no connection is made until first use
    pub fn new(broker: Arc<dyn Broker>, config: DeliveryConfig) -> Self {
        info!(
            endpoint = %broker.endpoint(),
            max_attempts = config.max_attempts,
            "Creating delivery channel"
        );

        Self {
            broker,
            config,
            connection: tokio::sync::Mutex::new(None),
            publish_lock: tokio::sync::Mutex::new(()),
            channels: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            stats: RwLock::new(DeliveryStats::default()),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn endpoint(&self) -> String {
        self.broker.endpoint()
    }

    /// Whether the shared connection is currently considered up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> DeliveryStats {
        self.stats.read().clone()
    }

    /// Number of cached worker channels
    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    /// Make sure a connection is open, opening one if needed.
    ///
    /// On failure the error is logged and the call waits for the reconnect
    /// backoff before returning it, so callers looping on this method are
    /// naturally throttled.
    #[instrument(skip(self), fields(endpoint = %self.broker.endpoint()))]
    pub async fn ensure_connected(&self) -> Result<(), DeliveryError> {
        let result = {
            let mut guard = self.connection.lock().await;

            if let Some(connection) = guard.as_ref() {
                if connection.is_open() {
                    return Ok(());
                }
            }

            // Channels belong to the connection being replaced
            guard.take();
            self.channels.lock().clear();

            match self.broker.connect().await {
                Ok(connection) => {
                    *guard = Some(connection);
                    self.connected.store(true, Ordering::SeqCst);
                    self.stats.write().connections_opened += 1;
                    info!("Connected to broker");
                    Ok(())
                }
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    Err(e)
                }
            }
        };

        if let Err(ref e) = result {
            self.stats.write().connect_failures += 1;
            error!(
                error = %e,
                backoff_ms = self.config.reconnect_backoff_ms,
                "Failed to connect to broker"
            );
            tokio::time::sleep(self.config.reconnect_backoff()).await;
        }

        result
    }

    /// Get the worker's channel, opening it (and the connection) on demand
    pub async fn channel_for(
        &self,
        worker: &WorkerId,
    ) -> Result<Arc<dyn BrokerChannel>, DeliveryError> {
        if let Some(channel) = self.cached_channel(worker) {
            return Ok(channel);
        }

        self.ensure_connected().await?;

        let connection = self
            .connection
            .lock()
            .await
            .clone()
            .ok_or(DeliveryError::NotConnected)?;

        let channel = connection.open_channel().await?;
        self.channels.lock().insert(worker.clone(), channel.clone());
        debug!(worker = %worker, "Opened broker channel");

        Ok(channel)
    }

    fn cached_channel(&self, worker: &WorkerId) -> Option<Arc<dyn BrokerChannel>> {
        let mut channels = self.channels.lock();
        match channels.get(worker) {
            Some(channel) if channel.is_open() && self.is_connected() => Some(channel.clone()),
            Some(_) => {
                channels.remove(worker);
                None
            }
            None => None,
        }
    }

    /// Forget the worker's cached channel
    pub fn drop_channel(&self, worker: &WorkerId) {
        if self.channels.lock().remove(worker).is_some() {
            debug!(worker = %worker, "Dropped broker channel");
        }
    }

    /// Mark the shared connection as down. The next operation reconnects.
    pub async fn mark_down(&self) {
        let stale = {
            let mut guard = self.connection.lock().await;
            self.connected.store(false, Ordering::SeqCst);
            self.channels.lock().clear();
            guard.take()
        };

        if let Some(connection) = stale {
            if connection.is_open() {
                if let Err(e) = connection.close().await {
                    debug!(error = %e, "Failed to close stale broker connection");
                }
            }
        }
    }

    /// Publish a message, retrying on channel and connection failures.
    ///
    /// Each attempt declares the target queue and publishes on the worker's
    /// channel. A channel closed by the broker is recreated; any other
    /// failure marks the connection down so the next attempt reconnects.
    #[instrument(skip(self, message), fields(worker = %worker, queue = %message.queue))]
    pub async fn publish(
        &self,
        worker: &WorkerId,
        message: &OutgoingMessage,
    ) -> Result<(), DeliveryError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.try_publish(worker, message).await {
                Ok(()) => {
                    self.stats.write().published += 1;
                    debug!(
                        attempt = attempt,
                        size = message.payload.len(),
                        "Message published"
                    );
                    return Ok(());
                }
                Err(e) => {
                    if e.is_channel_level() {
                        warn!(attempt = attempt, error = %e, "Channel closed by broker, recreating");
                        self.drop_channel(worker);
                    } else {
                        warn!(attempt = attempt, error = %e, "Broker connection lost, reconnecting");
                        self.mark_down().await;
                    }
                    last_error = e.to_string();
                }
            }

            if attempt < max_attempts {
                self.stats.write().retries += 1;
                tokio::time::sleep(self.config.retry_interval()).await;
            }
        }

        self.stats.write().failed += 1;
        error!(
            attempts = max_attempts,
            error = %last_error,
            "Failed to publish message after retries"
        );

        Err(DeliveryError::RetriesExhausted {
            queue: message.queue.clone(),
            attempts: max_attempts,
            last_error,
        })
    }

    async fn try_publish(
        &self,
        worker: &WorkerId,
        message: &OutgoingMessage,
    ) -> Result<(), DeliveryError> {
        let channel = self.channel_for(worker).await?;

        let _guard = self.publish_lock.lock().await;
        channel.declare_queue(&message.queue).await?;
        channel.publish(message).await
    }

    /// Close the shared connection. Safe to call when never connected.
    pub async fn close(&self) {
        let mut guard = self.connection.lock().await;
        self.channels.lock().clear();
        self.connected.store(false, Ordering::SeqCst);

        match guard.take() {
            Some(connection) if connection.is_open() => match connection.close().await {
                Ok(()) => info!("Broker connection closed"),
                Err(e) => error!(error = %e, "Error closing broker connection"),
            },
            _ => debug!("No open broker connection to close"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InjectedFailure, MemoryBroker};

    fn test_config() -> DeliveryConfig {
        DeliveryConfig {
            max_attempts: 3,
            retry_interval_ms: 1000,
            reconnect_backoff_ms: 0,
        }
    }

    fn delivery(broker: &MemoryBroker) -> DeliveryChannel {
        DeliveryChannel::new(Arc::new(broker.clone()), test_config())
    }

    #[test]
    fn test_outgoing_message_builder() {
        let message = OutgoingMessage::text("heartbeat", "Heartbeat message")
            .with_message_type("liveness");

        assert_eq!(message.queue, "heartbeat");
        assert_eq!(message.payload, b"Heartbeat message".to_vec());
        assert_eq!(message.content_type, "text/plain");
        assert_eq!(message.message_type.as_deref(), Some("liveness"));
        assert!(!message.message_id.is_empty());
    }

    #[test]
    fn test_json_message_keeps_non_ascii() {
        let value = serde_json::json!({"plane_number": "歼-10"});
        let message = OutgoingMessage::new_json("predicate", &value).unwrap();

        assert_eq!(message.content_type, "application/json");
        let text = String::from_utf8(message.payload).unwrap();
        assert!(text.contains("歼-10"));
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = OutgoingMessage::text("q", "x");
        let b = OutgoingMessage::text("q", "x");
        assert_ne!(a.message_id, b.message_id);
    }

    #[tokio::test]
    async fn test_close_without_connection_is_safe() {
        let broker = MemoryBroker::new();
        let channel = delivery(&broker);

        channel.close().await;
        assert!(!channel.is_connected());
        assert_eq!(broker.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_ensure_connected_is_idempotent() {
        let broker = MemoryBroker::new();
        let channel = delivery(&broker);

        channel.ensure_connected().await.unwrap();
        channel.ensure_connected().await.unwrap();

        assert!(channel.is_connected());
        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(channel.stats().connections_opened, 1);
    }

    #[tokio::test]
    async fn test_concurrent_ensure_connected_opens_one_connection() {
        let broker = MemoryBroker::new();
        let channel = Arc::new(delivery(&broker));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let channel = channel.clone();
                tokio::spawn(async move { channel.ensure_connected().await })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_channel_cached_per_worker() {
        let broker = MemoryBroker::new();
        let channel = delivery(&broker);
        let camera_a = WorkerId::new("camera-a");
        let camera_b = WorkerId::new("camera-b");

        channel.channel_for(&camera_a).await.unwrap();
        channel.channel_for(&camera_a).await.unwrap();
        channel.channel_for(&camera_b).await.unwrap();

        assert_eq!(channel.channel_count(), 2);
        assert_eq!(broker.channels_opened(), 2);
    }

    #[tokio::test]
    async fn test_publish_declares_queue_and_delivers() {
        let broker = MemoryBroker::new();
        let channel = delivery(&broker);
        let worker = WorkerId::new("camera-1");

        channel
            .publish(&worker, &OutgoingMessage::json_str("predicate", r#"{"a":1}"#))
            .await
            .unwrap();

        let published = broker.published_to("predicate");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, br#"{"a":1}"#.to_vec());
        assert!(broker.is_declared("predicate"));
        assert_eq!(channel.stats().published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_unreachable_fails_after_three_attempts() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let channel = delivery(&broker);
        let worker = WorkerId::new("camera-1");

        let started = tokio::time::Instant::now();
        let result = channel
            .publish(&worker, &OutgoingMessage::text("predicate", "event"))
            .await;
        let elapsed = started.elapsed();

        assert!(matches!(
            result,
            Err(DeliveryError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(broker.connect_attempts(), 3);
        assert!(!channel.is_connected());
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));

        let times = broker.connect_attempt_times();
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(1));
        }

        let stats = channel.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.connect_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_closed_by_broker_recreates_channel() {
        let broker = MemoryBroker::new();
        let channel = delivery(&broker);
        let worker = WorkerId::new("camera-1");

        channel.channel_for(&worker).await.unwrap();
        broker.fail_next_publish(InjectedFailure::ChannelClosed);

        channel
            .publish(&worker, &OutgoingMessage::text("predicate", "event"))
            .await
            .unwrap();

        assert_eq!(broker.connect_attempts(), 1);
        assert_eq!(broker.channels_opened(), 2);
        assert_eq!(broker.published_to("predicate").len(), 1);
        assert_eq!(channel.stats().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_closed_by_broker_reconnects() {
        let broker = MemoryBroker::new();
        let channel = delivery(&broker);
        let worker = WorkerId::new("camera-1");

        channel.ensure_connected().await.unwrap();
        broker.fail_next_publish(InjectedFailure::ConnectionClosed);

        channel
            .publish(&worker, &OutgoingMessage::text("predicate", "event"))
            .await
            .unwrap();

        assert_eq!(broker.connect_attempts(), 2);
        assert!(channel.is_connected());
        assert_eq!(broker.published_to("predicate").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_marks_connection_down_then_recovers() {
        let broker = MemoryBroker::new();
        let channel = delivery(&broker);
        let worker = WorkerId::new("camera-1");

        broker.fail_next_publish(InjectedFailure::Transport);

        channel
            .publish(&worker, &OutgoingMessage::text("predicate", "event"))
            .await
            .unwrap();

        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(broker.published_to("predicate").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_outage_then_recovery() {
        let broker = MemoryBroker::new();
        let channel = delivery(&broker);
        let worker = WorkerId::new("camera-1");

        channel
            .publish(&worker, &OutgoingMessage::text("predicate", "first"))
            .await
            .unwrap();

        broker.set_reachable(false);
        assert!(channel
            .publish(&worker, &OutgoingMessage::text("predicate", "lost"))
            .await
            .is_err());
        assert!(!channel.is_connected());

        broker.set_reachable(true);
        channel
            .publish(&worker, &OutgoingMessage::text("predicate", "second"))
            .await
            .unwrap();

        let payloads: Vec<_> = broker
            .published_to("predicate")
            .into_iter()
            .map(|m| String::from_utf8(m.payload).unwrap())
            .collect();
        assert_eq!(payloads, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_close_after_connect() {
        let broker = MemoryBroker::new();
        let channel = delivery(&broker);
        let worker = WorkerId::new("camera-1");

        channel.channel_for(&worker).await.unwrap();
        channel.close().await;

        assert!(!channel.is_connected());
        assert_eq!(channel.channel_count(), 0);
        assert_eq!(broker.open_connections(), 0);
    }
}
