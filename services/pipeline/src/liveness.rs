//! Periodic liveness messages.
//!
//! The probe runs as its own worker on the delivery channel and publishes a
//! fixed payload to the liveness queue once per interval. The first message
//! goes out one full interval after start. A failed publish is logged and
//! the connection marked down; the probe keeps running.

use crate::config::LivenessConfig;
use crate::delivery::{DeliveryChannel, OutgoingMessage, WorkerId};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Worker id used by the liveness probe
pub const LIVENESS_WORKER: &str = "liveness";

/// Message type attached to liveness messages
pub const LIVENESS_MESSAGE_TYPE: &str = "liveness";

/// Handle to a running liveness probe
pub struct LivenessProbe {
    handle: JoinHandle<u64>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LivenessProbe {
    /// Stop the probe and return how many messages it published
    pub async fn stop(self) -> u64 {
        let _ = self.shutdown_tx.send(());
        match self.handle.await {
            Ok(sent) => sent,
            Err(e) => {
                error!(error = %e, "Liveness probe task failed");
                0
            }
        }
    }
}

impl DeliveryChannel {
    /// Start publishing liveness messages to `queue`
    pub fn start_liveness(
        self: &Arc<Self>,
        queue: &str,
        config: &LivenessConfig,
    ) -> LivenessProbe {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let delivery = Arc::clone(self);
        let queue = queue.to_string();
        let payload = config.payload.clone();
        let period = config.interval();

        info!(queue = %queue, interval_secs = config.interval_secs, "Starting liveness probe");

        let handle = tokio::spawn(async move {
            let worker = WorkerId::new(LIVENESS_WORKER);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut sent = 0u64;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Liveness probe shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let message = OutgoingMessage::text(queue.as_str(), payload.as_str())
                            .with_message_type(LIVENESS_MESSAGE_TYPE);

                        match delivery.publish(&worker, &message).await {
                            Ok(()) => {
                                sent += 1;
                                debug!(sent = sent, "Liveness message sent");
                            }
                            Err(e) => {
                                error!(error = %e, "Failed to send liveness message");
                                delivery.mark_down().await;
                            }
                        }
                    }
                }
            }

            sent
        });

        LivenessProbe {
            handle,
            shutdown_tx,
        }
    }
}
