pub mod commands;
pub mod reconciliation;

pub use reconciliation::SharedRoom;

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::history::History;
use crate::provider::PlaybackSnapshot;
use crate::queue::{Queue, Track};
use crate::session::SessionRegistry;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PlaybackMode {
    Playing,
    Paused,
}

/// Everything the spec requires to be mutated under one serialising guard.
pub struct Room {
    pub queue: Queue,
    pub sessions: SessionRegistry,
    pub history: History,
    pub state: RoomState,
}

pub struct RoomState {
    pub mode: PlaybackMode,
    pub current: Option<Track>,
    pub current_is_fallback: bool,
    pub current_consumed: bool,
    pub conductor_session_id: Option<String>,
    pub last_commanded_change: Option<Instant>,
    pub last_manual_skip: Option<Instant>,
    pub last_snapshot: Option<PlaybackSnapshot>,
    pub expected_uri: Option<String>,
    pub expected_deadline: Option<Instant>,
}

impl Default for RoomState {
    fn default() -> Self {
        Self {
            mode: PlaybackMode::Paused,
            current: None,
            current_is_fallback: false,
            current_consumed: false,
            conductor_session_id: None,
            last_commanded_change: None,
            last_manual_skip: None,
            last_snapshot: None,
            expected_uri: None,
            expected_deadline: None,
        }
    }
}

/// 3 second window after a commanded change in which observed
/// transitions are not interpreted as user intent.
pub const GRACE_WINDOW: std::time::Duration = std::time::Duration::from_millis(3000);
/// 5 second window in which a nominated track must be observed playing.
pub const PLAYBACK_FAILURE_WINDOW: std::time::Duration = std::time::Duration::from_millis(5000);

impl RoomState {
    pub fn in_grace_window(&self) -> bool {
        self.last_commanded_change.map(|t| t.elapsed() < GRACE_WINDOW).unwrap_or(false)
    }

    pub fn in_recent_manual_skip(&self) -> bool {
        self.last_manual_skip.map(|t| t.elapsed() < GRACE_WINDOW).unwrap_or(false)
    }
}

impl Room {
    pub fn new() -> Self {
        Self { queue: Queue::new(), sessions: SessionRegistry::new(), history: History::new(), state: RoomState::default() }
    }
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}
