//! Hangar Events
//!
//! Turns per-frame object detections from hangar cameras into debounced
//! operational events and publishes them to the broker.
//!
//! ## Features
//!
//! - **Event inference**: aircraft entering, exiting and standing still,
//!   canopy opening and closing, pilot boarding and deboarding, skin panel
//!   presence, pilot and ground crew presence
//! - **Debounced signals**: consecutive-frame hysteresis on movement and
//!   skin level, containment/disjointness band on pilot location
//! - **Cumulative messages**: one message per camera, published only when
//!   one of its fields changes
//!
//! ## Architecture
//!
//! ```text
//! detections ──▶ DetectionFrame ──▶ EventState ──▶ EventMessage ──▶ DeliveryChannel
//!  (per frame)    (last wins)        (EventDiff)    (apply, JSON)     (retried publish)
//! ```

pub mod config;
pub mod detection;
pub mod geometry;
pub mod labels;
pub mod message;
pub mod session;
pub mod state;

pub use config::{CameraConfig, ConfigValidationError, LoggingConfig, ServiceConfig};
pub use detection::{Detection, DetectionFrame};
pub use geometry::{BoundingBox, GeometryError};
pub use labels::{Label, LabelError, LabelVocabulary};
pub use message::{EventMessage, MessageError, MessageKind};
pub use session::{CameraSession, FrameOutcome, SessionStats};
pub use state::{EventDiff, EventState, EventThresholds};
