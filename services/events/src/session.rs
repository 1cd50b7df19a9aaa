//! Camera session: the per-frame cycle of one camera.
//!
//! detection frame -> event state -> message update -> publish

use crate::detection::{Detection, DetectionFrame};
use crate::message::{EventMessage, MessageKind};
use crate::state::{EventDiff, EventState, EventThresholds};
use chrono::Local;
use hangar_pipeline::{DeliveryChannel, OutgoingMessage, WorkerId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Counters for one camera session
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_processed: u64,
    pub events_published: u64,
    pub publish_failures: u64,
    /// Frames where a label was detected more than once
    pub ambiguous_frames: u64,
    pub serialization_failures: u64,
}

/// Result of processing one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOutcome {
    pub diff: EventDiff,
    /// `None` when nothing was due for publication, otherwise whether the
    /// publish succeeded
    pub published: Option<bool>,
}

/// Binds one camera's event state and message to the shared delivery channel
pub struct CameraSession {
    camera_id: String,
    worker: WorkerId,
    state: EventState,
    message: EventMessage,
    delivery: Arc<DeliveryChannel>,
    queue: String,
    frames_seen: u64,
    stats: SessionStats,
}

impl CameraSession {
    pub fn new(
        camera_id: impl Into<String>,
        kind: MessageKind,
        thresholds: EventThresholds,
        delivery: Arc<DeliveryChannel>,
        queue: impl Into<String>,
    ) -> Self {
        let camera_id = camera_id.into();
        Self {
            worker: WorkerId::new(format!("camera-{}", camera_id)),
            state: EventState::new(thresholds),
            message: EventMessage::new(kind, &camera_id),
            delivery,
            queue: queue.into(),
            frames_seen: 0,
            stats: SessionStats::default(),
            camera_id,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn state(&self) -> &EventState {
        &self.state
    }

    pub fn message(&self) -> &EventMessage {
        &self.message
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Run one frame through the state machine and publish the message if
    /// an edge fired or a level field changed
    #[instrument(
        skip(self, detections),
        fields(camera_id = %self.camera_id, frame = self.frames_seen)
    )]
    pub async fn process_frame(&mut self, detections: &[Detection]) -> FrameOutcome {
        let frame = DetectionFrame::from_detections(detections);
        if frame.duplicates() > 0 {
            self.stats.ambiguous_frames += 1;
            warn!(
                duplicates = frame.duplicates(),
                "Label detected more than once, keeping last box"
            );
        }

        let is_first_detect = self.frames_seen == 0;
        self.frames_seen += 1;
        self.stats.frames_processed += 1;

        let diff = self.state.update(frame, is_first_detect);
        // The first frame only seeds the state machine
        if is_first_detect || !self.message.apply(&diff, Local::now()) {
            return FrameOutcome {
                diff,
                published: None,
            };
        }

        let published = self.publish_message().await;
        FrameOutcome {
            diff,
            published: Some(published),
        }
    }

    async fn publish_message(&mut self) -> bool {
        let json = match self.message.to_json() {
            Ok(json) => json,
            Err(e) => {
                self.stats.serialization_failures += 1;
                error!(error = %e, "Failed to serialize event message");
                return false;
            }
        };

        let outgoing = OutgoingMessage::json_str(self.queue.as_str(), json)
            .with_message_type(self.message.kind().as_str());

        match self.delivery.publish(&self.worker, &outgoing).await {
            Ok(()) => {
                self.stats.events_published += 1;
                debug!(queue = %self.queue, "Event published");
                true
            }
            Err(e) => {
                // Message state is kept; only this event is lost
                self.stats.publish_failures += 1;
                error!(error = %e, "Dropping event after failed publish");
                false
            }
        }
    }

    /// Process frames until the sender side closes
    pub async fn run(mut self, mut frames: mpsc::Receiver<Vec<Detection>>) -> SessionStats {
        info!(camera_id = %self.camera_id, worker = %self.worker, "Camera session started");

        while let Some(detections) = frames.recv().await {
            self.process_frame(&detections).await;
        }

        info!(
            camera_id = %self.camera_id,
            frames_processed = self.stats.frames_processed,
            events_published = self.stats.events_published,
            publish_failures = self.stats.publish_failures,
            "Camera session finished"
        );
        self.stats
    }
}
