//! Single periodic task that polls the conductor's real playback and
//! produces mutations: track-end, drift, and playback-failure detection,
//! grace windows, and the "set-and-start" operation.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broadcast;
use crate::config::Config;
use crate::history::HistoryEventKind;
use crate::metrics::Metrics;
use crate::persistence::Persistence;
use crate::provider::{PlaybackSnapshot, ProviderGateway};
use crate::queue::Track;
use crate::session::{FollowerMode, Identity};

use super::{PlaybackMode, Room, GRACE_WINDOW, PLAYBACK_FAILURE_WINDOW};

pub type SharedRoom = Arc<tokio::sync::Mutex<Room>>;

/// A follower's session-id and access token, captured while the room
/// guard is held so the provider calls below never need it.
struct FollowerTarget {
    session_id: String,
    access_token: String,
}

enum PostTickAction {
    None,
    Broadcast,
    SetAndStart { uri: String, position_ms: Option<u64>, followers: Vec<FollowerTarget>, failed_uri: Option<String> },
    CommandConductor { conductor_session_id: String, access_token: String, uri: String },
}

/// Owns the background task and lets callers restart it — e.g. after a
/// conductor transfer, or when master_play resumes playback.
pub struct ReconciliationLoop {
    handle: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Default for ReconciliationLoop {
    fn default() -> Self {
        Self { handle: AsyncMutex::new(None) }
    }
}

impl ReconciliationLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stop(&self) {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }

    /// Aborts any running loop and, if the room's mode is `Playing`,
    /// starts a fresh one.
    pub async fn restart(
        &self,
        shared: SharedRoom,
        provider: ProviderGateway,
        config: Arc<Config>,
        persistence: Arc<Persistence>,
        metrics: Arc<Metrics>,
    ) {
        let mut guard = self.handle.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
        }

        let is_playing = { shared.lock().await.state.mode == PlaybackMode::Playing };
        if !is_playing {
            return;
        }

        let interval = config.poll_interval;
        let new_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                tick(&shared, &provider, &config, &persistence, &metrics).await;
            }
        });

        *guard = Some(new_handle);
    }
}

pub async fn tick(shared: &SharedRoom, provider: &ProviderGateway, config: &Config, persistence: &Persistence, metrics: &Metrics) {
    metrics.record_reconciliation_tick();

    let conductor = {
        let room = shared.lock().await;
        if room.state.mode != PlaybackMode::Playing {
            return;
        }
        let Some(conductor_id) = room.state.conductor_session_id.clone() else { return };
        let Ok(session) = room.sessions.get(&conductor_id) else { return };
        match &session.identity {
            Some(Identity::Provider { access_token, .. }) => Some((conductor_id, access_token.clone())),
            _ => None,
        }
    };
    let Some((conductor_id, access_token)) = conductor else { return };

    let snapshot = match provider.current_playback(&access_token).await {
        Ok(Some(s)) => s,
        Ok(None) => {
            if config.debug {
                debug!("reconciliation tick: provider reports no active content");
            }
            return;
        }
        Err(err) => {
            if config.debug {
                warn!(%err, "reconciliation tick: transient provider error, retrying next tick");
            }
            return;
        }
    };

    let action = {
        let mut room = shared.lock().await;
        decide(&mut room, &snapshot, config, &conductor_id, &access_token)
    };

    apply(shared, provider, config, persistence, action).await;
}

fn decide(room: &mut Room, snapshot: &PlaybackSnapshot, config: &Config, conductor_id: &str, conductor_token: &str) -> PostTickAction {
    if let Some(expected) = room.state.expected_uri.clone() {
        let matches = snapshot.item.as_ref().map(|i| i.uri == expected).unwrap_or(false);

        if matches && snapshot.is_playing {
            if let Some(track) = room.state.current.clone() {
                room.queue.consume_next(room.state.current_is_fallback);
                room.state.current_consumed = true;
                room.state.expected_uri = None;
                room.state.expected_deadline = None;
                room.state.last_snapshot = Some(snapshot.clone());
                if !room.state.in_recent_manual_skip() {
                    room.history.append(
                        track.submitter_name.clone().unwrap_or_default(),
                        track.submitter_email.clone().unwrap_or_default(),
                        HistoryEventKind::TrackPlay { uri: track.uri.clone(), name: track.name.clone() },
                    );
                }
            }
            return PostTickAction::Broadcast;
        }

        let deadline_passed = room.state.expected_deadline.map(|d| Instant::now() >= d).unwrap_or(false);
        if deadline_passed {
            room.state.current = None;
            room.state.expected_uri = None;
            room.state.expected_deadline = None;
            let mut action = nominate_next(room, config, conductor_id, conductor_token, true);
            if let PostTickAction::SetAndStart { failed_uri, .. } = &mut action {
                *failed_uri = Some(expected.clone());
            }
            return action;
        }

        // Still within the failure window; wait for the next tick.
        return PostTickAction::None;
    }

    let Some(current) = room.state.current.clone() else {
        return nominate_next(room, config, conductor_id, conductor_token, false);
    };

    let prev = room.state.last_snapshot.clone();
    let observed_uri = snapshot.item.as_ref().map(|i| i.uri.clone());

    let track_ended = match (&prev, &observed_uri) {
        (Some(p), Some(uri)) => {
            let prev_uri = p.item.as_ref().map(|i| i.uri.clone());
            let prev_duration = p.item.as_ref().map(|i| i.duration_ms).unwrap_or(0);
            let prev_near_end = prev_duration > 0 && (p.progress_ms as f64) > 0.9 * prev_duration as f64;
            let same_uri_reset = prev_uri.as_deref() == Some(uri.as_str()) && snapshot.progress_ms == 0 && p.progress_ms > 0;
            let changed_near_end = prev_uri.as_deref() != Some(uri.as_str()) && prev_near_end;
            (same_uri_reset && prev_near_end) || changed_near_end
        }
        _ => false,
    };

    room.state.last_snapshot = Some(snapshot.clone());

    if track_ended {
        room.history.record_play(current.clone(), current.submitter_name.clone().unwrap_or_default());
        room.state.current = None;
        return nominate_next(room, config, conductor_id, conductor_token, false);
    }

    if let Some(uri) = &observed_uri {
        if *uri != current.uri && !room.state.in_grace_window() {
            if let Some(spliced) = room.queue.remove(uri) {
                room.history.record_play(current.clone(), current.submitter_name.clone().unwrap_or_default());
                if !room.state.in_recent_manual_skip() {
                    room.history.append(
                        spliced.submitter_name.clone().unwrap_or_default(),
                        spliced.submitter_email.clone().unwrap_or_default(),
                        HistoryEventKind::TrackPlay { uri: spliced.uri.clone(), name: spliced.name.clone() },
                    );
                }
                room.state.current = Some(spliced);
                room.state.current_is_fallback = false;
                room.state.current_consumed = true;
                return PostTickAction::Broadcast;
            }
            return PostTickAction::CommandConductor {
                conductor_session_id: conductor_id.to_string(),
                access_token: conductor_token.to_string(),
                uri: current.uri.clone(),
            };
        }
    }

    let prev_is_playing = prev.as_ref().map(|p| p.is_playing).unwrap_or(true);
    let duration_ms = current.duration_ms.unwrap_or(0);
    let at_full_progress = duration_ms > 0 && snapshot.progress_ms >= duration_ms;

    if prev_is_playing && !snapshot.is_playing && !room.state.in_grace_window() && !at_full_progress {
        room.state.mode = PlaybackMode::Paused;
        room.state.current = Some(current);
        return PostTickAction::Broadcast;
    }

    room.state.current = Some(current);
    PostTickAction::None
}

/// Peeks the next track and, if present, performs set-and-start:
/// assigns current, starts failure tracking, and returns the action that
/// commands playback on every follower outside the room guard.
fn nominate_next(room: &mut Room, config: &Config, conductor_id: &str, conductor_token: &str, after_failure: bool) -> PostTickAction {
    let Some((track, is_fallback)) = room.queue.peek_next() else {
        room.state.mode = PlaybackMode::Paused;
        room.state.current = None;
        return PostTickAction::Broadcast;
    };

    if is_fallback {
        room.history.append(
            "Fallback".into(),
            crate::queue::FALLBACK_SUBMITTER.into(),
            HistoryEventKind::FallbackPlay { uri: track.uri.clone(), name: track.name.clone() },
        );
    } else {
        room.history.append(
            track.submitter_name.clone().unwrap_or_default(),
            track.submitter_email.clone().unwrap_or_default(),
            HistoryEventKind::TrackAdded { uri: track.uri.clone(), name: track.name.clone() },
        );
    }

    room.state.current = Some(track.clone());
    room.state.current_is_fallback = is_fallback;
    room.state.current_consumed = false;
    room.state.expected_uri = Some(track.uri.clone());
    room.state.expected_deadline = Some(Instant::now() + PLAYBACK_FAILURE_WINDOW);
    room.state.last_commanded_change = Some(Instant::now());
    room.state.last_snapshot = None;

    let followers: Vec<FollowerTarget> = room
        .sessions
        .iter()
        .filter(|s| s.follower_mode == FollowerMode::Follow)
        .filter_map(|s| match &s.identity {
            Some(Identity::Provider { access_token, .. }) => Some(FollowerTarget { session_id: s.session_id.clone(), access_token: access_token.clone() }),
            _ => None,
        })
        .collect();

    let _ = (config, conductor_id, conductor_token, after_failure);
    PostTickAction::SetAndStart { uri: track.uri, position_ms: None, followers, failed_uri: None }
}

async fn apply(shared: &SharedRoom, provider: &ProviderGateway, config: &Config, persistence: &Persistence, action: PostTickAction) {
    match action {
        PostTickAction::None => {}
        PostTickAction::Broadcast => {
            let room = shared.lock().await;
            broadcast::broadcast_room_state(&room, config);
            persist_room(&room, persistence).await;
        }
        PostTickAction::SetAndStart { uri, position_ms, followers, failed_uri } => {
            for follower in &followers {
                let result = provider.play(&follower.access_token, vec![uri.clone()], position_ms).await;
                if let Err(err) = result {
                    warn!(session_id = %follower.session_id, %err, "set-and-start: follower playback command failed");
                    if matches!(err, crate::error::AppError::ProviderNoActiveDevice) {
                        let room = shared.lock().await;
                        broadcast::send_prominent_message(&room, &follower.session_id, "Activate your Spotify player to follow along.".into());
                    }
                }
            }
            let room = shared.lock().await;
            if let Some(failed_uri) = failed_uri {
                broadcast::broadcast_playback_error(&room, failed_uri);
            }
            broadcast::broadcast_room_state(&room, config);
            persist_room(&room, persistence).await;
        }
        PostTickAction::CommandConductor { conductor_session_id, access_token, uri } => {
            if let Err(err) = provider.play(&access_token, vec![uri], None).await {
                warn!(session_id = %conductor_session_id, %err, "drift correction: failed to command conductor playback");
            }
            let room = shared.lock().await;
            broadcast::broadcast_room_state(&room, config);
        }
    }
}

async fn persist_room(room: &Room, persistence: &Persistence) {
    let tracks: Vec<Track> = room.queue.user_queue().to_vec();
    if let Err(err) = persistence.save_queue(&tracks).await {
        warn!(%err, "failed to persist queue after reconciliation tick");
    }
    if let Err(err) = persistence.save_history(&room.history.all_events()).await {
        warn!(%err, "failed to persist history after reconciliation tick");
    }
}
