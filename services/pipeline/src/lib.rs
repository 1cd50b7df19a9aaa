//! Hangar Pipeline - broker delivery for hangar event publication
//!
//! This library moves derived hangar events to a RabbitMQ broker. It handles:
//!
//! - One shared broker connection with a cached channel per worker
//! - Bounded, retried publication with reconnect on connection loss
//! - A periodic liveness probe on its own queue
//! - A queue consumer for watching what was published
//!
//! # Example
//!
//! ```rust,no_run
//! use hangar_pipeline::{AmqpBroker, DeliveryChannel, OutgoingMessage, PipelineConfig, WorkerId};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::from_env()?;
//!     let broker = Arc::new(AmqpBroker::new(&config.broker));
//!     let delivery = Arc::new(DeliveryChannel::new(broker, config.delivery.clone()));
//!
//!     let probe = delivery.start_liveness(&config.queues.liveness, &config.liveness);
//!
//!     let worker = WorkerId::new("camera-1");
//!     let message = OutgoingMessage::json_str(config.queues.events.as_str(), r#"{"event_type":1}"#);
//!     delivery.publish(&worker, &message).await?;
//!
//!     probe.stop().await;
//!     delivery.close().await;
//!     Ok(())
//! }
//! ```

pub mod amqp;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod delivery;
pub mod liveness;
pub mod memory;

// Re-export main types
pub use amqp::AmqpBroker;
pub use broker::{Broker, BrokerChannel, BrokerConnection};
pub use config::{
    BrokerBackend, BrokerConfig, ConfigError, DeliveryConfig, LivenessConfig, PipelineConfig,
    QueueConfig,
};
pub use consumer::{ConsumerError, IncomingMessage, MessageHandler, QueueConsumer};
pub use delivery::{DeliveryChannel, DeliveryError, DeliveryStats, OutgoingMessage, WorkerId};
pub use liveness::LivenessProbe;
pub use memory::{InjectedFailure, MemoryBroker, PublishedMessage};

/// Async trait for message handlers (re-export for convenience)
pub use async_trait::async_trait;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::consumer::{ConsumerError, IncomingMessage, MessageHandler, QueueConsumer};
    pub use crate::delivery::{DeliveryChannel, DeliveryError, OutgoingMessage, WorkerId};
    pub use async_trait::async_trait;
}

use std::sync::Arc;

/// Build the broker selected by `config.backend`
pub fn build_broker(config: &BrokerConfig) -> Arc<dyn Broker> {
    match config.backend {
        BrokerBackend::Amqp => Arc::new(AmqpBroker::new(config)),
        BrokerBackend::Memory => Arc::new(MemoryBroker::new()),
    }
}
