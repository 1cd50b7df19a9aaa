//! Queue consumer for the hangar pipeline.
//!
//! This module provides a small interface for watching the event and
//! liveness queues. Deliveries are auto-acknowledged and handed to a
//! [`MessageHandler`] one at a time until shutdown is signalled.

use crate::amqp::{build_uri, open_connection};
use crate::config::BrokerConfig;
use futures::stream::{self, BoxStream, StreamExt};
use lapin::message::Delivery;
use lapin::options::{BasicConsumeOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Errors that can occur during message consumption
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Failed to connect consumer: {0}")]
    ConnectError(String),

    #[error("Failed to subscribe to queue {queue}: {message}")]
    SubscriptionError { queue: String, message: String },

    #[error("Failed to deserialize message: {0}")]
    DeserializationError(String),
}

/// A received message with payload and delivery metadata
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Raw message payload
    pub payload: Vec<u8>,
    /// Queue the message was consumed from
    pub queue: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    /// Message type property, if the publisher set one
    pub message_type: Option<String>,
}

impl IncomingMessage {
    fn from_delivery(delivery: Delivery) -> Self {
        Self {
            queue: delivery.routing_key.as_str().to_string(),
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            message_type: delivery
                .properties
                .kind()
                .as_ref()
                .map(|kind| kind.as_str().to_string()),
            payload: delivery.data,
        }
    }

    /// Deserialize the payload as JSON
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ConsumerError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| ConsumerError::DeserializationError(e.to_string()))
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn payload_str(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Handler trait for processing messages
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process a single message
    async fn handle(&self, message: IncomingMessage) -> Result<(), ConsumerError>;

    /// Called when message processing fails
    async fn on_error(&self, message: IncomingMessage, error: ConsumerError) {
        warn!(
            queue = %message.queue,
            delivery_tag = message.delivery_tag,
            error = %error,
            "Message processing failed"
        );
    }
}

/// Consumer watching one or more queues over its own connection
pub struct QueueConsumer {
    connection: Connection,
    channel: Channel,
    shutdown_tx: broadcast::Sender<()>,
}

impl QueueConsumer {
    /// Connect to the broker described by `config`
    pub async fn connect(config: &BrokerConfig) -> Result<Self, ConsumerError> {
        info!(endpoint = %config.endpoint(), "Connecting queue consumer");

        let connection = open_connection(
            build_uri(config),
            &config.endpoint(),
            config.connection_timeout(),
        )
        .await
        .map_err(|e| ConsumerError::ConnectError(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| ConsumerError::ConnectError(e.to_string()))?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            connection,
            channel,
            shutdown_tx,
        })
    }

    /// Get a shutdown receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown to stop consuming
    pub fn shutdown(&self) {
        info!("Signaling consumer shutdown");
        let _ = self.shutdown_tx.send(());
    }

    async fn subscribe(
        &self,
        queue: &str,
    ) -> Result<BoxStream<'static, lapin::Result<Delivery>>, ConsumerError> {
        let subscription_error = |e: lapin::Error| ConsumerError::SubscriptionError {
            queue: queue.to_string(),
            message: e.to_string(),
        };

        self.channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map_err(subscription_error)?;

        let consumer = self
            .channel
            .basic_consume(
                queue,
                &format!("hangar-tail-{}", queue),
                BasicConsumeOptions {
                    no_ack: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(subscription_error)?;

        Ok(consumer.boxed())
    }

    /// Consume the given queues and process deliveries with `handler`
    #[instrument(skip(self, handler))]
    pub async fn run<H: MessageHandler>(
        &self,
        queues: &[&str],
        handler: Arc<H>,
    ) -> Result<(), ConsumerError> {
        let mut streams = Vec::with_capacity(queues.len());
        for queue in queues {
            streams.push(self.subscribe(queue).await?);
        }
        let mut deliveries = stream::select_all(streams);
        let mut shutdown_rx = self.shutdown_receiver();

        info!("Starting message consumption loop");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal");
                    break;
                }
                delivery = deliveries.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            let incoming = IncomingMessage::from_delivery(delivery);
                            debug!(
                                queue = %incoming.queue,
                                delivery_tag = incoming.delivery_tag,
                                "Received message"
                            );

                            if let Err(e) = handler.handle(incoming.clone()).await {
                                handler.on_error(incoming, e).await;
                            }
                        }
                        Some(Err(e)) => {
                            error!(error = %e, "Consumer error");
                        }
                        None => {
                            debug!("Stream ended");
                            break;
                        }
                    }
                }
            }
        }

        if let Err(e) = self.connection.close(200, "consumer shutdown").await {
            warn!(error = %e, "Failed to close consumer connection");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(payload: &[u8]) -> IncomingMessage {
        IncomingMessage {
            payload: payload.to_vec(),
            queue: "predicate".to_string(),
            delivery_tag: 7,
            redelivered: false,
            message_type: Some("aircraft".to_string()),
        }
    }

    #[test]
    fn test_decode_json_payload() {
        let incoming = message(br#"{"camera_id": "cam-1", "event_type": 1}"#);
        let value: serde_json::Value = incoming.decode_json().unwrap();
        assert_eq!(value["camera_id"], "cam-1");
        assert_eq!(value["event_type"], 1);
    }

    #[test]
    fn test_decode_json_rejects_text() {
        let incoming = message(b"Heartbeat message");
        let result: Result<serde_json::Value, _> = incoming.decode_json();
        assert!(matches!(result, Err(ConsumerError::DeserializationError(_))));
        assert_eq!(incoming.payload_str(), "Heartbeat message");
    }
}
