//! Event messages published for downstream consumers.
//!
//! A message is a cumulative snapshot per camera: applying an [`EventDiff`]
//! only touches the fields the diff names, everything else keeps its last
//! value. The JSON form puts the shared header first, then the variant
//! fields, with small integer codes for every status.

use crate::state::{CabinCover, EventDiff, PilotBoarding, PlaneSliding, Skin};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Format of `message_time`
pub const MESSAGE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message has no numeric event_type")]
    MissingEventType,

    #[error("Unknown event_type {0}")]
    UnknownEventType(u64),

    #[error("Invalid code {code} for {field}")]
    InvalidCode { field: &'static str, code: u8 },

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),
}

/// Declares a status enum carried on the wire as its integer code
macro_rules! coded_enum {
    ($(#[$meta:meta])* $name:ident, $field:literal { $($variant:ident = $code:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
        #[serde(into = "u8", try_from = "u8")]
        pub enum $name {
            #[default]
            $($variant),+
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                match value {
                    $($name::$variant => $code),+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = MessageError;

            fn try_from(code: u8) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok($name::$variant),)+
                    _ => Err(MessageError::InvalidCode { field: $field, code }),
                }
            }
        }
    };
}

coded_enum!(PlaneSlidingStatus, "plane_sliding_status" {
    Unknown = 0, Entering = 1, Exiting = 2, Static = 3,
});

coded_enum!(BoardingStatus, "Pilot_boarding_status" {
    Unknown = 0, Boarding = 1, Deboarding = 2,
});

coded_enum!(PilotPresence, "pilot_in_the_hangar" {
    Unknown = 0, Present = 1, Absent = 2,
});

coded_enum!(SkinStatus, "skin" {
    Unknown = 0, Installed = 1, Removed = 2,
});

coded_enum!(CabinCoverStatus, "cabin_cover" {
    Unknown = 0, Opened = 1, Closed = 2,
});

coded_enum!(HookBinStatus, "hook_bin" {
    Unknown = 0, Open = 1, Closed = 2,
});

coded_enum!(Occupancy, "occupancy" {
    Unknown = 0, Occupied = 1, Empty = 2,
});

coded_enum!(EngineStatus, "engine_status" {
    Unknown = 0, Off = 1, On = 2,
});

coded_enum!(PersonnelKind, "personnel" {
    None = 0, GroundCrew = 1, Aviator = 2,
});

coded_enum!(VehiclePresence, "vehicle" {
    Unknown = 0, Present = 1, Absent = 2,
});

coded_enum!(FireStatus, "area_on_fire" {
    Unknown = 0, No = 1, Yes = 2,
});

/// Vehicle type code; 1 is a fuel truck, other codes pass through
pub const VEHICLE_FUEL_TRUCK: u8 = 1;

/// Which message variant a camera reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Aircraft,
    Personnel,
    Vehicle,
    Safety,
}

impl MessageKind {
    pub fn event_type(&self) -> u8 {
        match self {
            MessageKind::Aircraft => 1,
            MessageKind::Personnel => 2,
            MessageKind::Vehicle => 3,
            MessageKind::Safety => 4,
        }
    }

    pub fn from_event_type(event_type: u64) -> Option<Self> {
        match event_type {
            1 => Some(MessageKind::Aircraft),
            2 => Some(MessageKind::Personnel),
            3 => Some(MessageKind::Vehicle),
            4 => Some(MessageKind::Safety),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Aircraft => "aircraft",
            MessageKind::Personnel => "personnel",
            MessageKind::Vehicle => "vehicle",
            MessageKind::Safety => "safety",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aircraft" => Ok(MessageKind::Aircraft),
            "personnel" => Ok(MessageKind::Personnel),
            "vehicle" => Ok(MessageKind::Vehicle),
            "safety" => Ok(MessageKind::Safety),
            other => Err(MessageError::UnknownKind(other.to_string())),
        }
    }
}

/// Fields shared by every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Epoch seconds of the last change, 0 until the first one
    pub timestamp: i64,
    /// Local time of the last change
    pub message_time: String,
    pub camera_id: String,
    pub event_type: u8,
}

impl MessageHeader {
    fn new(kind: MessageKind, camera_id: &str, now: DateTime<Local>) -> Self {
        Self {
            timestamp: 0,
            message_time: now.format(MESSAGE_TIME_FORMAT).to_string(),
            camera_id: camera_id.to_string(),
            event_type: kind.event_type(),
        }
    }

    fn touch(&mut self, now: DateTime<Local>) {
        self.timestamp = now.timestamp();
        self.message_time = now.format(MESSAGE_TIME_FORMAT).to_string();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AircraftEvent {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub plane_sliding_status: PlaneSlidingStatus,
    #[serde(rename = "Pilot_boarding_status")]
    pub pilot_boarding_status: BoardingStatus,
    pub pilot_in_the_hangar: PilotPresence,
    pub skin: SkinStatus,
    /// Tail number, empty when unknown
    pub plane_number: String,
    pub cabin_cover: CabinCoverStatus,
    pub hook_bin: HookBinStatus,
    pub cabin_occupied: Occupancy,
    pub engine_status: EngineStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonnelEvent {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub personnel: PersonnelKind,
    pub area_occupied: Occupancy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleEvent {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub vehicle_type: u8,
    pub vehicle: VehiclePresence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyEvent {
    #[serde(flatten)]
    pub header: MessageHeader,
    pub area_on_fire: FireStatus,
}

/// One camera's event message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EventMessage {
    Aircraft(AircraftEvent),
    Personnel(PersonnelEvent),
    Vehicle(VehicleEvent),
    Safety(SafetyEvent),
}

fn replace<T: PartialEq>(field: &mut T, value: T) -> bool {
    if *field == value {
        false
    } else {
        *field = value;
        true
    }
}

impl From<PlaneSliding> for PlaneSlidingStatus {
    fn from(value: PlaneSliding) -> Self {
        match value {
            PlaneSliding::None => PlaneSlidingStatus::Unknown,
            PlaneSliding::Entering => PlaneSlidingStatus::Entering,
            PlaneSliding::Exiting => PlaneSlidingStatus::Exiting,
            PlaneSliding::Static => PlaneSlidingStatus::Static,
        }
    }
}

impl From<PilotBoarding> for BoardingStatus {
    fn from(value: PilotBoarding) -> Self {
        match value {
            PilotBoarding::None => BoardingStatus::Unknown,
            PilotBoarding::Boarding => BoardingStatus::Boarding,
            PilotBoarding::Deboarding => BoardingStatus::Deboarding,
        }
    }
}

impl From<CabinCover> for CabinCoverStatus {
    fn from(value: CabinCover) -> Self {
        match value {
            CabinCover::None => CabinCoverStatus::Unknown,
            CabinCover::Opened => CabinCoverStatus::Opened,
            CabinCover::Closed => CabinCoverStatus::Closed,
        }
    }
}

impl From<Skin> for SkinStatus {
    fn from(value: Skin) -> Self {
        match value {
            Skin::None => SkinStatus::Unknown,
            Skin::Installed => SkinStatus::Installed,
            Skin::Removed => SkinStatus::Removed,
        }
    }
}

impl AircraftEvent {
    fn apply(&mut self, diff: &EventDiff) -> bool {
        // Edges publish even when they repeat the stored value
        let mut changed = diff.has_transition();

        if diff.plane_sliding != PlaneSliding::None {
            self.plane_sliding_status = diff.plane_sliding.into();
        }
        if diff.pilot_boarding != PilotBoarding::None {
            self.pilot_boarding_status = diff.pilot_boarding.into();
        }
        if diff.cabin_cover != CabinCover::None {
            self.cabin_cover = diff.cabin_cover.into();
        }
        if diff.skin != Skin::None {
            changed |= replace(&mut self.skin, diff.skin.into());
        }

        let presence = if diff.pilot_in_hangar {
            PilotPresence::Present
        } else {
            PilotPresence::Absent
        };
        changed |= replace(&mut self.pilot_in_the_hangar, presence);

        changed
    }
}

impl PersonnelEvent {
    fn apply(&mut self, diff: &EventDiff) -> bool {
        let (personnel, area) = if diff.pilot_in_hangar {
            (PersonnelKind::Aviator, Occupancy::Occupied)
        } else if diff.ground_crew_in_hangar {
            (PersonnelKind::GroundCrew, Occupancy::Occupied)
        } else {
            (PersonnelKind::None, Occupancy::Empty)
        };

        let personnel_changed = replace(&mut self.personnel, personnel);
        let area_changed = replace(&mut self.area_occupied, area);
        personnel_changed || area_changed
    }
}

impl EventMessage {
    /// Fresh message for `camera_id` using the local clock
    pub fn new(kind: MessageKind, camera_id: &str) -> Self {
        Self::new_at(kind, camera_id, Local::now())
    }

    pub fn new_at(kind: MessageKind, camera_id: &str, now: DateTime<Local>) -> Self {
        let header = MessageHeader::new(kind, camera_id, now);
        match kind {
            MessageKind::Aircraft => EventMessage::Aircraft(AircraftEvent {
                header,
                plane_sliding_status: PlaneSlidingStatus::default(),
                pilot_boarding_status: BoardingStatus::default(),
                pilot_in_the_hangar: PilotPresence::default(),
                skin: SkinStatus::default(),
                plane_number: String::new(),
                cabin_cover: CabinCoverStatus::default(),
                hook_bin: HookBinStatus::default(),
                cabin_occupied: Occupancy::default(),
                engine_status: EngineStatus::default(),
            }),
            MessageKind::Personnel => EventMessage::Personnel(PersonnelEvent {
                header,
                personnel: PersonnelKind::default(),
                area_occupied: Occupancy::default(),
            }),
            MessageKind::Vehicle => EventMessage::Vehicle(VehicleEvent {
                header,
                vehicle_type: 0,
                vehicle: VehiclePresence::default(),
            }),
            MessageKind::Safety => EventMessage::Safety(SafetyEvent {
                header,
                area_on_fire: FireStatus::default(),
            }),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            EventMessage::Aircraft(_) => MessageKind::Aircraft,
            EventMessage::Personnel(_) => MessageKind::Personnel,
            EventMessage::Vehicle(_) => MessageKind::Vehicle,
            EventMessage::Safety(_) => MessageKind::Safety,
        }
    }

    pub fn header(&self) -> &MessageHeader {
        match self {
            EventMessage::Aircraft(m) => &m.header,
            EventMessage::Personnel(m) => &m.header,
            EventMessage::Vehicle(m) => &m.header,
            EventMessage::Safety(m) => &m.header,
        }
    }

    fn header_mut(&mut self) -> &mut MessageHeader {
        match self {
            EventMessage::Aircraft(m) => &mut m.header,
            EventMessage::Personnel(m) => &mut m.header,
            EventMessage::Vehicle(m) => &mut m.header,
            EventMessage::Safety(m) => &mut m.header,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.header().camera_id
    }

    /// Fold a diff into the message. Returns whether the message should be
    /// published: an edge fired or a level field changed. In that case the
    /// header timestamps are refreshed to `now`.
    pub fn apply(&mut self, diff: &EventDiff, now: DateTime<Local>) -> bool {
        let changed = match self {
            EventMessage::Aircraft(m) => m.apply(diff),
            EventMessage::Personnel(m) => m.apply(diff),
            // No detector inputs feed these yet
            EventMessage::Vehicle(_) | EventMessage::Safety(_) => false,
        };

        if changed {
            self.header_mut().touch(now);
        }
        changed
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a message, choosing the variant from `event_type`
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let event_type = value
            .get("event_type")
            .and_then(serde_json::Value::as_u64)
            .ok_or(MessageError::MissingEventType)?;

        let kind = MessageKind::from_event_type(event_type)
            .ok_or(MessageError::UnknownEventType(event_type))?;

        let message = match kind {
            MessageKind::Aircraft => EventMessage::Aircraft(serde_json::from_value(value)?),
            MessageKind::Personnel => EventMessage::Personnel(serde_json::from_value(value)?),
            MessageKind::Vehicle => EventMessage::Vehicle(serde_json::from_value(value)?),
            MessageKind::Safety => EventMessage::Safety(serde_json::from_value(value)?),
        };
        Ok(message)
    }
}
