//! RabbitMQ broker backed by lapin.

use crate::broker::{Broker, BrokerChannel, BrokerConnection};
use crate::config::BrokerConfig;
use crate::delivery::{DeliveryError, OutgoingMessage};
use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPQueryString, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const REPLY_SUCCESS: u16 = 200;

/// Broker reachable over AMQP 0-9-1
pub struct AmqpBroker {
    uri: AMQPUri,
    endpoint: String,
    connect_timeout: Duration,
    publish_timeout: Duration,
}

impl AmqpBroker {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            uri: build_uri(config),
            endpoint: config.endpoint(),
            connect_timeout: config.connection_timeout(),
            publish_timeout: config.blocked_connection_timeout(),
        }
    }
}

/// Build the connection URI from broker settings
pub fn build_uri(config: &BrokerConfig) -> AMQPUri {
    AMQPUri {
        scheme: AMQPScheme::AMQP,
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: config.username.clone(),
                password: config.password.clone(),
            },
            host: config.host.clone(),
            port: config.port,
        },
        vhost: config.vhost.clone(),
        query: AMQPQueryString {
            heartbeat: Some(config.heartbeat_secs),
            connection_timeout: Some(config.connection_timeout_ms),
            ..Default::default()
        },
    }
}

/// Open a raw lapin connection with the configured connect timeout
pub(crate) async fn open_connection(
    uri: AMQPUri,
    endpoint: &str,
    connect_timeout: Duration,
) -> Result<Connection, DeliveryError> {
    let connect = Connection::connect_uri(uri, ConnectionProperties::default());

    match tokio::time::timeout(connect_timeout, connect).await {
        Ok(Ok(connection)) => Ok(connection),
        Ok(Err(e)) => Err(DeliveryError::ConnectFailed {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(DeliveryError::ConnectFailed {
            endpoint: endpoint.to_string(),
            message: format!("timed out after {:?}", connect_timeout),
        }),
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, DeliveryError> {
        let connection =
            open_connection(self.uri.clone(), &self.endpoint, self.connect_timeout).await?;
        info!(endpoint = %self.endpoint, "AMQP connection established");

        Ok(Arc::new(AmqpConnection {
            connection: Arc::new(connection),
            publish_timeout: self.publish_timeout,
        }))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

struct AmqpConnection {
    connection: Arc<Connection>,
    publish_timeout: Duration,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, DeliveryError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| classify(&self.connection, None, e))?;

        debug!(channel_id = channel.id(), "AMQP channel opened");

        Ok(Arc::new(AmqpChannel {
            channel,
            connection: self.connection.clone(),
            publish_timeout: self.publish_timeout,
        }))
    }

    async fn close(&self) -> Result<(), DeliveryError> {
        self.connection
            .close(REPLY_SUCCESS, "shutdown")
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}

struct AmqpChannel {
    channel: Channel,
    connection: Arc<Connection>,
    publish_timeout: Duration,
}

/// Map a lapin error onto the delivery taxonomy by looking at which side
/// of the link is gone
fn classify(
    connection: &Connection,
    channel: Option<&Channel>,
    error: lapin::Error,
) -> DeliveryError {
    if !connection.status().connected() {
        return DeliveryError::ConnectionClosed(error.to_string());
    }
    match channel {
        Some(channel) if !channel.status().connected() => {
            DeliveryError::ChannelClosed(error.to_string())
        }
        _ => DeliveryError::Transport(error.to_string()),
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), DeliveryError> {
        self.channel
            .queue_declare(queue, QueueDeclareOptions::default(), FieldTable::default())
            .await
            .map(|_| ())
            .map_err(|e| classify(&self.connection, Some(&self.channel), e))
    }

    async fn publish(&self, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        let mut properties = BasicProperties::default()
            .with_message_id(message.message_id.clone().into())
            .with_content_type(message.content_type.clone().into());
        if let Some(ref message_type) = message.message_type {
            properties = properties.with_kind(message_type.clone().into());
        }

        let publish = async {
            self.channel
                .basic_publish(
                    "",
                    &message.queue,
                    BasicPublishOptions::default(),
                    &message.payload,
                    properties,
                )
                .await?
                .await
        };

        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(_confirmation)) => Ok(()),
            Ok(Err(e)) => Err(classify(&self.connection, Some(&self.channel), e)),
            Err(_) => Err(DeliveryError::Timeout {
                queue: message.queue.clone(),
                timeout: self.publish_timeout,
            }),
        }
    }
}
