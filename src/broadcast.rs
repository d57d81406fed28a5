//! Single source of truth for outbound messages. Every function here
//! composes a message from post-mutation state; callers never hand-build
//! an `OutgoingMessage` elsewhere.

use crate::config::Config;
use crate::room::{PlaybackMode, Room};
use crate::session::{FollowerMode, Session};
use crate::transport::messages::{FollowerModeView, OutgoingMessage, RoomModeView};

pub fn tracks_list(room: &Room) -> OutgoingMessage {
    OutgoingMessage::TracksList { tracks: room.queue.display() }
}

/// `can_take_master_control` requires both an allow-listed email and a
/// held provider access token, matching `commands::take_master_control`'s
/// own enforcement — a listener-only allow-listed session must not be
/// told it can take control.
pub fn mode_for(room: &Room, config: &Config, recipient: Option<&Session>) -> OutgoingMessage {
    let mode = match room.state.mode {
        PlaybackMode::Playing => RoomModeView::Playing,
        PlaybackMode::Paused => RoomModeView::Paused,
    };
    let can_take_master_control = recipient
        .map(|s| s.email().map(|e| config.is_allow_listed(e)).unwrap_or(false) && s.has_access_token())
        .unwrap_or(false);

    OutgoingMessage::Mode {
        mode,
        current: room.state.current.clone(),
        conductor_session_id: room.state.conductor_session_id.clone(),
        can_take_master_control,
        fallback_playlist_name: room.queue.fallback_playlist_name().map(str::to_string),
    }
}

pub fn session_mode(follower_mode: FollowerMode) -> OutgoingMessage {
    let view = match follower_mode {
        FollowerMode::Follow => FollowerModeView::Follow,
        FollowerMode::Paused => FollowerModeView::Paused,
    };
    OutgoingMessage::SessionMode { follower_mode: view }
}

pub fn sessions_list(room: &Room) -> OutgoingMessage {
    OutgoingMessage::SessionsList { sessions: room.sessions.directory() }
}

pub fn history(room: &Room) -> OutgoingMessage {
    OutgoingMessage::History { events: room.history.recent_events() }
}

pub fn play_history(room: &Room) -> OutgoingMessage {
    OutgoingMessage::PlayHistory { entries: room.history.recent_plays() }
}

/// Broadcasts the four state-of-the-room messages to every session. Each
/// recipient gets its own `mode` payload since `canTakeMasterControl` is
/// recipient-specific.
pub fn broadcast_room_state(room: &Room, config: &Config) {
    let tracks = tracks_list(room);
    let sessions = sessions_list(room);
    let history_msg = history(room);
    let play_history_msg = play_history(room);

    for session in room.sessions.iter() {
        session.send(tracks.clone());
        session.send(mode_for(room, config, Some(session)));
        session.send(sessions.clone());
        session.send(history_msg.clone());
        session.send(play_history_msg.clone());
    }
}

pub fn broadcast_playback_error(room: &Room, uri: String) {
    room.sessions.broadcast(OutgoingMessage::PlaybackError { uri });
}

pub fn broadcast_airhorn(room: &Room, name: String) {
    room.sessions.broadcast(OutgoingMessage::PlayAirhorn { name });
}

pub fn send_prominent_message(room: &Room, session_id: &str, text: String) {
    if let Ok(session) = room.sessions.get(session_id) {
        session.send(OutgoingMessage::ProminentMessage { text });
    }
}
