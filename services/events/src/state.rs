//! Per-camera event inference.
//!
//! [`EventState`] consumes one [`DetectionFrame`] per processed frame and
//! reports what changed as an [`EventDiff`]. Every per-frame signal that
//! could flicker goes through a consecutive-frame debounce before it is
//! committed: plane movement, skin level, and the pilot location (which
//! uses containment/disjointness as a hysteresis band instead).
//!
//! One instance belongs to exactly one camera session and is fed frames in
//! order.

use crate::detection::DetectionFrame;
use crate::geometry::{is_moving_vertically, BoundingBox, DEFAULT_MOVEMENT_THRESHOLD_PX};
use crate::labels::Label;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PilotLocation {
    #[default]
    Unknown,
    InCockpit,
    OutsideCockpit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CockpitStatus {
    #[default]
    Invalid,
    Open,
    Closed,
}

impl CockpitStatus {
    fn from_frame(frame: &DetectionFrame) -> Self {
        if frame.contains(Label::CabinCoverOn) {
            CockpitStatus::Open
        } else if frame.contains(Label::CabinCoverOff) {
            CockpitStatus::Closed
        } else {
            CockpitStatus::Invalid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaneSliding {
    #[default]
    None,
    Entering,
    Exiting,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PilotBoarding {
    #[default]
    None,
    Boarding,
    Deboarding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CabinCover {
    #[default]
    None,
    Opened,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Skin {
    #[default]
    None,
    Installed,
    Removed,
}

impl Skin {
    fn from_frame(frame: &DetectionFrame) -> Self {
        if frame.contains(Label::RedOn) {
            Skin::Installed
        } else if frame.contains(Label::RedOff) {
            Skin::Removed
        } else {
            Skin::None
        }
    }
}

/// Events whose last occurrence is remembered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Aviator,
    PlaneEntering,
    PlaneExiting,
}

/// What changed on one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventDiff {
    pub plane_sliding: PlaneSliding,
    pub pilot_boarding: PilotBoarding,
    pub pilot_in_hangar: bool,
    pub cabin_cover: CabinCover,
    pub skin: Skin,
    pub ground_crew_in_hangar: bool,
}

impl EventDiff {
    /// Whether any edge-triggered field fired
    pub fn has_transition(&self) -> bool {
        self.plane_sliding != PlaneSliding::None
            || self.pilot_boarding != PilotBoarding::None
            || self.cabin_cover != CabinCover::None
    }
}

/// Tuning knobs of the state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventThresholds {
    /// Vertical displacement in pixels that counts as movement
    #[serde(default = "default_movement_threshold_px")]
    pub movement_threshold_px: i32,

    /// Consecutive frames of one movement classification before it commits
    #[serde(default = "default_debounce_frames")]
    pub debounce_frames: u32,

    /// Consecutive frames of a new skin level before it commits; 0 follows
    /// every frame
    #[serde(default)]
    pub skin_debounce_frames: u32,

    /// Minimum gap between two "pilot entered hangar" notices
    #[serde(default = "default_pilot_notice_cooldown_secs")]
    pub pilot_notice_cooldown_secs: u64,
}

fn default_movement_threshold_px() -> i32 {
    DEFAULT_MOVEMENT_THRESHOLD_PX
}

fn default_debounce_frames() -> u32 {
    5
}

fn default_pilot_notice_cooldown_secs() -> u64 {
    1200
}

impl Default for EventThresholds {
    fn default() -> Self {
        Self {
            movement_threshold_px: default_movement_threshold_px(),
            debounce_frames: default_debounce_frames(),
            skin_debounce_frames: 0,
            pilot_notice_cooldown_secs: default_pilot_notice_cooldown_secs(),
        }
    }
}

/// Commits a new value only after it was observed on more than
/// `threshold` consecutive frames
#[derive(Debug, Clone)]
pub struct Hysteresis<T> {
    committed: T,
    candidate: T,
    run: u32,
    threshold: u32,
}

impl<T: Copy + PartialEq> Hysteresis<T> {
    pub fn new(initial: T, threshold: u32) -> Self {
        Self {
            committed: initial,
            candidate: initial,
            run: 0,
            threshold,
        }
    }

    /// Commit `value` immediately
    pub fn seed(&mut self, value: T) {
        self.committed = value;
        self.candidate = value;
        self.run = 0;
    }

    /// Feed one observation and return the committed value
    pub fn observe(&mut self, value: T) -> T {
        if self.threshold == 0 || value == self.committed {
            self.seed(value);
            return self.committed;
        }

        if value == self.candidate {
            self.run = self.run.saturating_add(1);
        } else {
            self.candidate = value;
            self.run = 1;
        }

        if self.run > self.threshold {
            self.seed(value);
        }
        self.committed
    }

    pub fn committed(&self) -> T {
        self.committed
    }
}

/// Event state of a single camera
#[derive(Debug, Clone)]
pub struct EventState {
    thresholds: EventThresholds,
    previous: DetectionFrame,
    pilot_location: PilotLocation,
    plane_in_hangar: bool,
    cockpit_status: CockpitStatus,
    is_moving: bool,
    static_run: u32,
    moving_run: u32,
    aviator_seen_last_frame: bool,
    skin: Hysteresis<Skin>,
    last_notified: HashMap<EventKind, DateTime<Utc>>,
}

impl Default for EventState {
    fn default() -> Self {
        Self::new(EventThresholds::default())
    }
}

impl EventState {
    pub fn new(thresholds: EventThresholds) -> Self {
        let skin = Hysteresis::new(Skin::None, thresholds.skin_debounce_frames);
        Self {
            thresholds,
            previous: DetectionFrame::new(),
            pilot_location: PilotLocation::Unknown,
            plane_in_hangar: false,
            cockpit_status: CockpitStatus::Invalid,
            is_moving: false,
            static_run: 0,
            moving_run: 0,
            aviator_seen_last_frame: false,
            skin,
            last_notified: HashMap::new(),
        }
    }

    /// Consume a frame using the wall clock
    pub fn update(&mut self, frame: DetectionFrame, is_first_detect: bool) -> EventDiff {
        self.update_at(frame, is_first_detect, Utc::now())
    }

    /// Consume a frame observed at `now`
    pub fn update_at(
        &mut self,
        frame: DetectionFrame,
        is_first_detect: bool,
        now: DateTime<Utc>,
    ) -> EventDiff {
        let has_plane = frame.has_plane();
        let raw_skin = Skin::from_frame(&frame);
        let aviator_detected = frame.contains(Label::Aviator);
        let aviator = frame.get(Label::Aviator).copied();
        let cockpit = frame.cockpit_box().copied();

        if aviator_detected && !self.aviator_seen_last_frame {
            self.notice_pilot(now);
        }
        self.aviator_seen_last_frame = aviator_detected;

        if is_first_detect {
            self.plane_in_hangar = has_plane;
            self.pilot_location = match (aviator, cockpit) {
                (Some(a), Some(c)) if a.is_fully_contained_in(&c) => PilotLocation::InCockpit,
                _ => PilotLocation::Unknown,
            };
            self.cockpit_status = CockpitStatus::from_frame(&frame);
            self.skin.seed(raw_skin);
            self.previous = frame;

            debug!(
                plane_in_hangar = self.plane_in_hangar,
                pilot_location = ?self.pilot_location,
                cockpit_status = ?self.cockpit_status,
                "Initialized event state"
            );
            return EventDiff::default();
        }

        let mut diff = EventDiff {
            pilot_in_hangar: aviator_detected,
            ground_crew_in_hangar: frame.contains(Label::AirCrew),
            ..Default::default()
        };

        diff.cabin_cover = self.track_cockpit(&frame);
        diff.plane_sliding = self.track_plane(&frame, has_plane, now);
        diff.skin = self.skin.observe(raw_skin);

        if let (Some(aviator), Some(cockpit)) = (aviator, cockpit) {
            diff.pilot_boarding = self.track_pilot(&aviator, &cockpit);
        }

        self.previous = frame;
        diff
    }

    fn notice_pilot(&mut self, now: DateTime<Utc>) {
        let cooldown_ms = i64::try_from(self.thresholds.pilot_notice_cooldown_secs)
            .unwrap_or(i64::MAX)
            .saturating_mul(1000);
        let due = self.last_notified.get(&EventKind::Aviator).map_or(true, |last| {
            now.signed_duration_since(*last).num_milliseconds() > cooldown_ms
        });

        if due {
            info!("Pilot entered hangar");
            self.last_notified.insert(EventKind::Aviator, now);
        }
    }

    fn track_cockpit(&mut self, frame: &DetectionFrame) -> CabinCover {
        let status = CockpitStatus::from_frame(frame);
        let edge = match (self.cockpit_status, status) {
            (CockpitStatus::Closed, CockpitStatus::Open) => {
                info!("Canopy opened");
                CabinCover::Opened
            }
            (CockpitStatus::Open, CockpitStatus::Closed) => {
                info!("Canopy closed");
                CabinCover::Closed
            }
            _ => CabinCover::None,
        };
        self.cockpit_status = status;
        edge
    }

    fn track_plane(
        &mut self,
        frame: &DetectionFrame,
        has_plane: bool,
        now: DateTime<Utc>,
    ) -> PlaneSliding {
        if !self.plane_in_hangar && has_plane {
            info!("Plane entering hangar");
            self.plane_in_hangar = true;
            self.last_notified.insert(EventKind::PlaneEntering, now);
            self.reset_runs();
            PlaneSliding::Entering
        } else if self.plane_in_hangar && !has_plane {
            info!("Plane exiting hangar");
            self.plane_in_hangar = false;
            self.last_notified.insert(EventKind::PlaneExiting, now);
            self.reset_runs();
            PlaneSliding::Exiting
        } else if has_plane {
            self.track_movement(frame)
        } else {
            PlaneSliding::None
        }
    }

    fn track_movement(&mut self, frame: &DetectionFrame) -> PlaneSliding {
        let threshold = self.thresholds.movement_threshold_px;
        let moving = Label::PLANE_PARTS.iter().any(|part| {
            is_moving_vertically(frame.get(*part), self.previous.get(*part), threshold)
        });

        if moving {
            self.moving_run = self.moving_run.saturating_add(1);
            self.static_run = 0;
            if self.moving_run > self.thresholds.debounce_frames && !self.is_moving {
                info!("Plane started moving");
                self.is_moving = true;
            }
            PlaneSliding::None
        } else {
            self.static_run = self.static_run.saturating_add(1);
            self.moving_run = 0;
            if self.static_run > self.thresholds.debounce_frames {
                if self.is_moving {
                    info!("Plane stopped moving");
                    self.is_moving = false;
                }
                PlaneSliding::Static
            } else {
                PlaneSliding::None
            }
        }
    }

    fn reset_runs(&mut self) {
        self.static_run = 0;
        self.moving_run = 0;
    }

    fn track_pilot(&mut self, aviator: &BoundingBox, cockpit: &BoundingBox) -> PilotBoarding {
        match self.pilot_location {
            PilotLocation::Unknown => {
                if aviator.is_fully_contained_in(cockpit) {
                    debug!("Pilot located in cockpit");
                    self.pilot_location = PilotLocation::InCockpit;
                }
                PilotBoarding::None
            }
            PilotLocation::InCockpit => {
                if aviator.is_fully_disjoint_from(cockpit) {
                    info!("Pilot deboarded");
                    self.pilot_location = PilotLocation::OutsideCockpit;
                    PilotBoarding::Deboarding
                } else {
                    PilotBoarding::None
                }
            }
            PilotLocation::OutsideCockpit => {
                if aviator.is_fully_contained_in(cockpit) {
                    info!("Pilot boarded");
                    self.pilot_location = PilotLocation::InCockpit;
                    PilotBoarding::Boarding
                } else {
                    PilotBoarding::None
                }
            }
        }
    }

    pub fn thresholds(&self) -> &EventThresholds {
        &self.thresholds
    }

    pub fn pilot_location(&self) -> PilotLocation {
        self.pilot_location
    }

    pub fn plane_in_hangar(&self) -> bool {
        self.plane_in_hangar
    }

    pub fn cockpit_status(&self) -> CockpitStatus {
        self.cockpit_status
    }

    pub fn is_moving(&self) -> bool {
        self.is_moving
    }

    pub fn static_run(&self) -> u32 {
        self.static_run
    }

    pub fn moving_run(&self) -> u32 {
        self.moving_run
    }

    pub fn committed_skin(&self) -> Skin {
        self.skin.committed()
    }

    pub fn last_notified(&self, kind: EventKind) -> Option<DateTime<Utc>> {
        self.last_notified.get(&kind).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bbox(x1: i32, y1: i32, x2: i32, y2: i32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2).unwrap()
    }

    fn cockpit() -> BoundingBox {
        bbox(100, 100, 300, 300)
    }

    fn frame() -> DetectionFrame {
        DetectionFrame::new()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_first_frame_reports_nothing() {
        let mut state = EventState::default();
        let first = frame()
            .with(Label::CabinCoverOn, cockpit())
            .with(Label::Aviator, bbox(150, 150, 200, 200))
            .with(Label::RedOn, bbox(0, 0, 50, 50));

        let diff = state.update_at(first, true, t0());

        assert_eq!(diff, EventDiff::default());
        assert!(state.plane_in_hangar());
        assert_eq!(state.pilot_location(), PilotLocation::InCockpit);
        assert_eq!(state.cockpit_status(), CockpitStatus::Open);
        assert_eq!(state.committed_skin(), Skin::Installed);
    }

    #[test]
    fn test_first_frame_without_cockpit_leaves_pilot_unknown() {
        let mut state = EventState::default();
        state.update_at(frame().with(Label::Aviator, bbox(0, 0, 10, 10)), true, t0());
        assert_eq!(state.pilot_location(), PilotLocation::Unknown);
        assert_eq!(state.cockpit_status(), CockpitStatus::Invalid);
    }

    #[test]
    fn test_canopy_edges_fire_once() {
        let mut state = EventState::default();
        state.update_at(frame().with(Label::CabinCoverOff, cockpit()), true, t0());

        let opened = state.update_at(frame().with(Label::CabinCoverOn, cockpit()), false, t0());
        assert_eq!(opened.cabin_cover, CabinCover::Opened);

        let steady = state.update_at(frame().with(Label::CabinCoverOn, cockpit()), false, t0());
        assert_eq!(steady.cabin_cover, CabinCover::None);

        let closed = state.update_at(frame().with(Label::CabinCoverOff, cockpit()), false, t0());
        assert_eq!(closed.cabin_cover, CabinCover::Closed);
    }

    #[test]
    fn test_canopy_via_invalid_is_not_an_edge() {
        let mut state = EventState::default();
        state.update_at(frame().with(Label::CabinCoverOff, cockpit()), true, t0());
        state.update_at(frame().with(Label::RedOn, cockpit()), false, t0());

        let diff = state.update_at(frame().with(Label::CabinCoverOn, cockpit()), false, t0());
        assert_eq!(diff.cabin_cover, CabinCover::None);
        assert_eq!(state.cockpit_status(), CockpitStatus::Open);
    }

    #[test]
    fn test_static_fires_on_sixth_still_frame() {
        let mut state = EventState::default();
        let plane = || frame().with(Label::CabinCoverOn, cockpit());

        state.update_at(plane(), true, t0());
        for still in 1..=5 {
            let diff = state.update_at(plane(), false, t0());
            assert_eq!(diff.plane_sliding, PlaneSliding::None, "still frame {}", still);
        }

        let diff = state.update_at(plane(), false, t0());
        assert_eq!(diff.plane_sliding, PlaneSliding::Static);
        assert_eq!(state.static_run(), 6);

        let diff = state.update_at(plane(), false, t0());
        assert_eq!(diff.plane_sliding, PlaneSliding::Static);
    }

    #[test]
    fn test_plane_entering_scenario() {
        let mut state = EventState::default();
        let mut diffs = Vec::new();

        for index in 1..=3 {
            diffs.push(state.update_at(frame(), index == 1, t0()));
        }
        for _ in 4..=10 {
            diffs.push(state.update_at(frame().with(Label::CabinCoverOn, cockpit()), false, t0()));
        }

        let sliding: Vec<_> = diffs.iter().map(|d| d.plane_sliding).collect();
        assert_eq!(
            sliding,
            vec![
                PlaneSliding::None,
                PlaneSliding::None,
                PlaneSliding::None,
                PlaneSliding::Entering,
                PlaneSliding::None,
                PlaneSliding::None,
                PlaneSliding::None,
                PlaneSliding::None,
                PlaneSliding::None,
                PlaneSliding::Static,
            ]
        );
        assert!(diffs.iter().all(|d| !d.pilot_in_hangar));
        assert_eq!(state.last_notified(EventKind::PlaneEntering), Some(t0()));
    }

    #[test]
    fn test_plane_exiting_resets_runs() {
        let mut state = EventState::default();
        let plane = || frame().with(Label::RedOff, bbox(0, 0, 40, 40));

        state.update_at(plane(), true, t0());
        state.update_at(plane(), false, t0());
        assert_eq!(state.static_run(), 1);

        let diff = state.update_at(frame(), false, t0());
        assert_eq!(diff.plane_sliding, PlaneSliding::Exiting);
        assert!(!state.plane_in_hangar());
        assert_eq!(state.static_run(), 0);
        assert_eq!(state.last_notified(EventKind::PlaneExiting), Some(t0()));

        let diff = state.update_at(frame(), false, t0());
        assert_eq!(diff.plane_sliding, PlaneSliding::None);
    }

    #[test]
    fn test_sustained_movement_commits_without_event() {
        let mut state = EventState::default();
        let at = |y: i32| frame().with(Label::CabinCoverOn, bbox(100, y, 300, y + 200));

        state.update_at(at(0), true, t0());
        for step in 1..=6 {
            let diff = state.update_at(at(step * 60), false, t0());
            assert_eq!(diff.plane_sliding, PlaneSliding::None);
        }

        assert!(state.is_moving());
        assert_eq!(state.moving_run(), 6);
    }

    #[test]
    fn test_jitter_below_threshold_counts_as_still() {
        let mut state = EventState::default();
        let at = |y: i32| frame().with(Label::CabinCoverOn, bbox(100, y, 300, y + 200));

        state.update_at(at(100), true, t0());
        state.update_at(at(150), false, t0());
        state.update_at(at(100), false, t0());

        assert_eq!(state.static_run(), 2);
        assert_eq!(state.moving_run(), 0);
    }

    #[test]
    fn test_deboard_then_board_with_partial_overlap() {
        let mut state = EventState::default();
        let with_pilot = |pilot: BoundingBox| {
            frame()
                .with(Label::CabinCoverOn, cockpit())
                .with(Label::Aviator, pilot)
        };

        state.update_at(with_pilot(bbox(150, 150, 200, 200)), true, t0());
        assert_eq!(state.pilot_location(), PilotLocation::InCockpit);

        let out = state.update_at(with_pilot(bbox(400, 150, 450, 200)), false, t0());
        assert_eq!(out.pilot_boarding, PilotBoarding::Deboarding);
        assert_eq!(state.pilot_location(), PilotLocation::OutsideCockpit);

        let straddling = state.update_at(with_pilot(bbox(280, 150, 330, 200)), false, t0());
        assert_eq!(straddling.pilot_boarding, PilotBoarding::None);
        assert_eq!(state.pilot_location(), PilotLocation::OutsideCockpit);

        let back = state.update_at(with_pilot(bbox(150, 150, 200, 200)), false, t0());
        assert_eq!(back.pilot_boarding, PilotBoarding::Boarding);
        assert_eq!(state.pilot_location(), PilotLocation::InCockpit);
    }

    #[test]
    fn test_unknown_resolves_to_cockpit_silently() {
        let mut state = EventState::default();
        state.update_at(frame(), true, t0());

        let diff = state.update_at(
            frame()
                .with(Label::CabinCoverOff, cockpit())
                .with(Label::Aviator, bbox(150, 150, 200, 200)),
            false,
            t0(),
        );

        assert_eq!(diff.pilot_boarding, PilotBoarding::None);
        assert_eq!(state.pilot_location(), PilotLocation::InCockpit);
    }

    #[test]
    fn test_pilot_without_cockpit_box_keeps_location() {
        let mut state = EventState::default();
        state.update_at(
            frame()
                .with(Label::CabinCoverOn, cockpit())
                .with(Label::Aviator, bbox(150, 150, 200, 200)),
            true,
            t0(),
        );

        let diff = state.update_at(frame().with(Label::Aviator, bbox(900, 900, 950, 950)), false, t0());
        assert_eq!(diff.pilot_boarding, PilotBoarding::None);
        assert_eq!(state.pilot_location(), PilotLocation::InCockpit);
        assert!(diff.pilot_in_hangar);
    }

    #[test]
    fn test_pilot_notice_cooldown_gates_logging_only() {
        let mut state = EventState::default();
        let pilot = || frame().with(Label::Aviator, bbox(0, 0, 10, 10));

        state.update_at(frame(), true, t0());
        let diff = state.update_at(pilot(), false, t0());
        assert!(diff.pilot_in_hangar);
        assert_eq!(state.last_notified(EventKind::Aviator), Some(t0()));

        let later = t0() + chrono::Duration::seconds(600);
        state.update_at(frame(), false, later);
        let diff = state.update_at(pilot(), false, later);
        assert!(diff.pilot_in_hangar);
        assert_eq!(state.last_notified(EventKind::Aviator), Some(t0()));

        let much_later = t0() + chrono::Duration::seconds(1300);
        state.update_at(frame(), false, much_later);
        state.update_at(pilot(), false, much_later);
        assert_eq!(state.last_notified(EventKind::Aviator), Some(much_later));
    }

    #[test]
    fn test_pilot_present_without_rising_edge_does_not_notify() {
        let mut state = EventState::default();
        let pilot = || frame().with(Label::Aviator, bbox(0, 0, 10, 10));

        state.update_at(pilot(), true, t0());
        assert_eq!(state.last_notified(EventKind::Aviator), Some(t0()));

        let later = t0() + chrono::Duration::seconds(5000);
        state.update_at(pilot(), false, later);
        assert_eq!(state.last_notified(EventKind::Aviator), Some(t0()));
    }

    #[test]
    fn test_skin_change_is_debounced() {
        let mut state = EventState::new(EventThresholds {
            skin_debounce_frames: 5,
            ..Default::default()
        });
        let installed = || frame().with(Label::RedOn, bbox(0, 0, 40, 40));
        let removed = || frame().with(Label::RedOff, bbox(0, 0, 40, 40));

        state.update_at(installed(), true, t0());
        assert_eq!(state.update_at(installed(), false, t0()).skin, Skin::Installed);

        // A single flicker does not change the reported level
        assert_eq!(state.update_at(removed(), false, t0()).skin, Skin::Installed);
        assert_eq!(state.update_at(installed(), false, t0()).skin, Skin::Installed);

        for _ in 0..5 {
            assert_eq!(state.update_at(removed(), false, t0()).skin, Skin::Installed);
        }
        assert_eq!(state.update_at(removed(), false, t0()).skin, Skin::Removed);
    }

    #[test]
    fn test_skin_follows_each_frame_by_default() {
        let mut state = EventState::default();
        assert_eq!(state.thresholds().skin_debounce_frames, 0);

        state.update_at(frame(), true, t0());
        let diff = state.update_at(frame().with(Label::RedOff, bbox(0, 0, 40, 40)), false, t0());
        assert_eq!(diff.skin, Skin::Removed);

        let diff = state.update_at(frame().with(Label::RedOn, bbox(0, 0, 40, 40)), false, t0());
        assert_eq!(diff.skin, Skin::Installed);
    }

    #[test]
    fn test_ground_crew_reported() {
        let mut state = EventState::default();
        state.update_at(frame(), true, t0());

        let diff = state.update_at(frame().with(Label::AirCrew, bbox(0, 0, 10, 10)), false, t0());
        assert!(diff.ground_crew_in_hangar);
        assert!(!diff.has_transition());
    }

    #[test]
    fn test_hysteresis_generic() {
        let mut filter = Hysteresis::new(0u8, 2);
        assert_eq!(filter.observe(1), 0);
        assert_eq!(filter.observe(1), 0);
        assert_eq!(filter.observe(1), 1);
        assert_eq!(filter.observe(2), 1);
        assert_eq!(filter.observe(3), 1);
        assert_eq!(filter.committed(), 1);
    }
}
