use serde::{Deserialize, Serialize};

use crate::history::{HistoryEvent, PlayHistoryEntry};
use crate::queue::{DisplayTrack, Track};
use crate::session::SessionSummary;

/// Inbound frames accepted over the persistent bidirectional channel.
/// The first frame on a new connection must be `Login`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IncomingMessage {
    Login { session_id: String },
    GetTracks,
    GetSessions,
    GetPlayHistory,
    Ping,
    RemoveTrack { uri: String },
    DelayTrack { uri: String },
    Jam { uri: String, unjam: Option<bool> },
    MasterPlay,
    MasterPause,
    MasterSkip,
    StartFallback,
    SessionPlay,
    SessionPause,
    Airhorn { name: String },
    TakeMasterControl,
    HistoryMessage { text: String },
}

/// Outbound frames. Each kind is one contract; the payload is the
/// authoritative post-mutation state.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutgoingMessage {
    TracksList { tracks: Vec<DisplayTrack> },
    Mode {
        mode: RoomModeView,
        current: Option<Track>,
        conductor_session_id: Option<String>,
        can_take_master_control: bool,
        fallback_playlist_name: Option<String>,
    },
    SessionMode { follower_mode: FollowerModeView },
    SessionsList { sessions: Vec<SessionSummary> },
    History { events: Vec<HistoryEvent> },
    PlayHistory { entries: Vec<PlayHistoryEntry> },
    PlayAirhorn { name: String },
    ProminentMessage { text: String },
    PlaybackError { uri: String },
    PlayTrack { track: Track },
    LoginSuccess { session_id: String },
    LoginError { reason: String },
    Pong,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoomModeView {
    Playing,
    Paused,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FollowerModeView {
    Follow,
    Paused,
}
