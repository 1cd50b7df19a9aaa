//! In-process broker.
//!
//! Records everything published to it instead of talking to a server. Used
//! for dry runs of the event service and as the broker in tests, where its
//! reachability can be toggled and publish failures injected.

use crate::broker::{Broker, BrokerChannel, BrokerConnection};
use crate::delivery::{DeliveryError, OutgoingMessage};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

const DEFAULT_RETAINED: usize = 10_000;

/// Failure injected into the next publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    /// The broker closes the publishing channel
    ChannelClosed,
    /// The broker closes the whole connection
    ConnectionClosed,
    /// The socket fails underneath the connection
    Transport,
}

/// A message recorded by the memory broker
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub queue: String,
    pub payload: Vec<u8>,
    pub message_type: Option<String>,
}

#[derive(Debug)]
struct State {
    reachable: bool,
    /// Bumped whenever the broker goes away; older connections are dead
    generation: u64,
    connect_attempts: Vec<Instant>,
    channels_opened: usize,
    declared: HashSet<String>,
    published: VecDeque<PublishedMessage>,
    retained: usize,
    next_failure: Option<InjectedFailure>,
}

/// Broker that keeps published messages in memory
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
    open_connections: Arc<Mutex<Vec<Arc<MemoryConnection>>>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_retained(DEFAULT_RETAINED)
    }

    /// Keep at most `retained` published messages, dropping the oldest
    pub fn with_retained(retained: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                reachable: true,
                generation: 0,
                connect_attempts: Vec::new(),
                channels_opened: 0,
                declared: HashSet::new(),
                published: VecDeque::new(),
                retained: retained.max(1),
                next_failure: None,
            })),
            open_connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Toggle reachability. Going unreachable kills every live connection.
    pub fn set_reachable(&self, reachable: bool) {
        let mut state = self.state.lock();
        if state.reachable && !reachable {
            state.generation += 1;
        }
        state.reachable = reachable;
    }

    /// Make the next publish fail the given way
    pub fn fail_next_publish(&self, failure: InjectedFailure) {
        self.state.lock().next_failure = Some(failure);
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts.len()
    }

    pub fn connect_attempt_times(&self) -> Vec<Instant> {
        self.state.lock().connect_attempts.clone()
    }

    pub fn channels_opened(&self) -> usize {
        self.state.lock().channels_opened
    }

    pub fn is_declared(&self, queue: &str) -> bool {
        self.state.lock().declared.contains(queue)
    }

    /// Connections that are still open
    pub fn open_connections(&self) -> usize {
        self.open_connections
            .lock()
            .iter()
            .filter(|c| c.is_open())
            .count()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().published.iter().cloned().collect()
    }

    pub fn published_to(&self, queue: &str) -> Vec<PublishedMessage> {
        self.state
            .lock()
            .published
            .iter()
            .filter(|m| m.queue == queue)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, DeliveryError> {
        let generation = {
            let mut state = self.state.lock();
            state.connect_attempts.push(Instant::now());
            if !state.reachable {
                return Err(DeliveryError::ConnectFailed {
                    endpoint: self.endpoint(),
                    message: "broker unreachable".to_string(),
                });
            }
            state.generation
        };

        let connection = Arc::new(MemoryConnection {
            state: self.state.clone(),
            generation,
            open: Arc::new(AtomicBool::new(true)),
        });

        let mut open = self.open_connections.lock();
        open.retain(|c| c.is_open());
        open.push(connection.clone());

        Ok(connection)
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Debug)]
struct MemoryConnection {
    state: Arc<Mutex<State>>,
    generation: u64,
    open: Arc<AtomicBool>,
}

impl MemoryConnection {
    fn alive(state: &State, generation: u64) -> bool {
        state.reachable && state.generation == generation
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && Self::alive(&self.state.lock(), self.generation)
    }

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, DeliveryError> {
        if !self.is_open() {
            return Err(DeliveryError::ConnectionClosed(
                "connection is closed".to_string(),
            ));
        }

        self.state.lock().channels_opened += 1;

        Ok(Arc::new(MemoryChannel {
            state: self.state.clone(),
            generation: self.generation,
            connection_open: self.open.clone(),
            open: AtomicBool::new(true),
        }))
    }

    async fn close(&self) -> Result<(), DeliveryError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryChannel {
    state: Arc<Mutex<State>>,
    generation: u64,
    connection_open: Arc<AtomicBool>,
    open: AtomicBool,
}

impl MemoryChannel {
    fn check_open(&self) -> Result<(), DeliveryError> {
        if !self.connection_open.load(Ordering::SeqCst)
            || !MemoryConnection::alive(&self.state.lock(), self.generation)
        {
            return Err(DeliveryError::ConnectionClosed(
                "connection is closed".to_string(),
            ));
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(DeliveryError::ChannelClosed("channel is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.check_open().is_ok()
    }

    async fn declare_queue(&self, queue: &str) -> Result<(), DeliveryError> {
        self.check_open()?;
        self.state.lock().declared.insert(queue.to_string());
        Ok(())
    }

    async fn publish(&self, message: &OutgoingMessage) -> Result<(), DeliveryError> {
        self.check_open()?;

        let mut state = self.state.lock();
        match state.next_failure.take() {
            Some(InjectedFailure::ChannelClosed) => {
                self.open.store(false, Ordering::SeqCst);
                return Err(DeliveryError::ChannelClosed(
                    "PRECONDITION_FAILED injected".to_string(),
                ));
            }
            Some(InjectedFailure::ConnectionClosed) => {
                state.generation += 1;
                return Err(DeliveryError::ConnectionClosed(
                    "CONNECTION_FORCED injected".to_string(),
                ));
            }
            Some(InjectedFailure::Transport) => {
                state.generation += 1;
                return Err(DeliveryError::Transport("connection reset".to_string()));
            }
            None => {}
        }

        if state.published.len() >= state.retained {
            state.published.pop_front();
        }
        state.published.push_back(PublishedMessage {
            queue: message.queue.clone(),
            payload: message.payload.clone(),
            message_type: message.message_type.clone(),
        });
        debug!(queue = %message.queue, "Recorded message");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_broker_refuses_connections() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);

        assert!(matches!(
            broker.connect().await,
            Err(DeliveryError::ConnectFailed { .. })
        ));
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_outage_kills_live_connections() {
        let broker = MemoryBroker::new();
        let connection = broker.connect().await.unwrap();
        let channel = connection.open_channel().await.unwrap();

        broker.set_reachable(false);
        broker.set_reachable(true);

        assert!(!connection.is_open());
        assert!(!channel.is_open());
        assert!(broker.connect().await.unwrap().is_open());
    }

    #[tokio::test]
    async fn test_retained_messages_are_bounded() {
        let broker = MemoryBroker::with_retained(2);
        let connection = broker.connect().await.unwrap();
        let channel = connection.open_channel().await.unwrap();

        for body in ["a", "b", "c"] {
            channel
                .publish(&OutgoingMessage::text("predicate", body))
                .await
                .unwrap();
        }

        let payloads: Vec<_> = broker.published().into_iter().map(|m| m.payload).collect();
        assert_eq!(payloads, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[tokio::test]
    async fn test_injected_channel_failure_only_closes_channel() {
        let broker = MemoryBroker::new();
        let connection = broker.connect().await.unwrap();
        let channel = connection.open_channel().await.unwrap();

        broker.fail_next_publish(InjectedFailure::ChannelClosed);
        let err = channel
            .publish(&OutgoingMessage::text("predicate", "x"))
            .await
            .unwrap_err();

        assert!(err.is_channel_level());
        assert!(!channel.is_open());
        assert!(connection.is_open());
    }
}
