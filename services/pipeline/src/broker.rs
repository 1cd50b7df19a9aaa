//! Broker abstraction used by the delivery channel.
//!
//! A broker hands out connections, a connection hands out channels, and a
//! channel declares queues and publishes. Channels are not safe for
//! concurrent use; the delivery channel keeps one per worker and serializes
//! the calls that mutate them.

use crate::delivery::{DeliveryError, OutgoingMessage};
use async_trait::async_trait;
use std::sync::Arc;

/// Entry point of a broker implementation
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new connection to the broker
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, DeliveryError>;

    /// Endpoint description used in logs
    fn endpoint(&self) -> String;
}

/// An open broker connection shared by all workers
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn is_open(&self) -> bool;

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, DeliveryError>;

    async fn close(&self) -> Result<(), DeliveryError>;
}

/// A communication channel owned by a single worker
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    fn is_open(&self) -> bool;

    /// Declare a queue; declaring an existing queue is a no-op
    async fn declare_queue(&self, queue: &str) -> Result<(), DeliveryError>;

    async fn publish(&self, message: &OutgoingMessage) -> Result<(), DeliveryError>;
}
