//! Implementations of every inbound message/HTTP call the transport edge
//! dispatches. Each function performs its mutation under the room guard,
//! releases it before any provider I/O, and re-acquires it to broadcast.

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::broadcast;
use crate::error::{AppError, Result};
use crate::history::HistoryEventKind;
use crate::provider::ReferenceKind;
use crate::queue::Track;
use crate::session::{FollowerMode, Identity};
use crate::transport::messages::OutgoingMessage;
use crate::AppState;

use super::PlaybackMode;

pub async fn handle_login(state: &AppState, session_id: &str, tx: mpsc::UnboundedSender<OutgoingMessage>) -> Result<()> {
    {
        let room = state.room.lock().await;
        room.sessions.validate_login(session_id)?;
    }

    let email = {
        let room = state.room.lock().await;
        room.sessions.get(session_id)?.email().map(str::to_string)
    };

    let mut first_attach = false;
    let mut conductor_transferred = false;

    if let Some(email) = &email {
        let mut room = state.room.lock().await;
        let had_transport = room.sessions.get(session_id).map(|s| s.is_transport_open()).unwrap_or(false);
        first_attach = !had_transport;

        let outcome = room.sessions.deduplicate_by_email(session_id, email);
        if let Some(evicted) = &outcome.evicted_session_id {
            if room.state.conductor_session_id.as_deref() == Some(evicted.as_str()) {
                let new_has_token = room.sessions.get(session_id).map(|s| s.has_access_token()).unwrap_or(false);
                if new_has_token {
                    room.state.conductor_session_id = Some(session_id.to_string());
                    conductor_transferred = true;
                }
            }
        }
    }

    {
        let mut room = state.room.lock().await;
        room.sessions.attach_transport(session_id, tx)?;
    }

    assign_conductor_if_needed(state).await;

    if conductor_transferred && state.room.lock().await.state.mode == PlaybackMode::Playing {
        state.reconciliation.restart(state.room.clone(), state.provider.clone(), state.config.clone(), state.persistence.clone(), state.metrics.clone()).await;
    }

    if first_attach {
        let mut room = state.room.lock().await;
        room.history.append(
            email.clone().unwrap_or_default(),
            email.unwrap_or_default(),
            HistoryEventKind::UserConnected,
        );
        if let Ok(session) = room.sessions.get(session_id) {
            session.send(OutgoingMessage::LoginSuccess { session_id: session_id.to_string() });
            session.send(broadcast::tracks_list(&room));
            session.send(broadcast::mode_for(&room, &state.config, Some(session)));
            session.send(broadcast::sessions_list(&room));
            session.send(broadcast::history(&room));
            session.send(broadcast::play_history(&room));
        }
        broadcast::broadcast_room_state(&room, &state.config);
    }

    Ok(())
}

/// Assigns the first provider-capable session as conductor if none is
/// set, then adopts that session's observed playback as the room's
/// initial state.
pub async fn assign_conductor_if_needed(state: &AppState) {
    let candidate = {
        let room = state.room.lock().await;
        if room.state.conductor_session_id.is_some() {
            return;
        }
        room.sessions.first_provider_capable().map(|s| s.session_id.clone())
    };

    let Some(session_id) = candidate else { return };

    let token = {
        let room = state.room.lock().await;
        match room.sessions.get(&session_id).ok().and_then(|s| s.identity.clone()) {
            Some(Identity::Provider { access_token, .. }) => Some(access_token),
            _ => None,
        }
    };
    let Some(token) = token else { return };

    let snapshot = state.provider.current_playback(&token).await.ok().flatten();

    let mut room = state.room.lock().await;
    room.state.conductor_session_id = Some(session_id);
    if let Some(snapshot) = snapshot {
        room.state.mode = if snapshot.is_playing { PlaybackMode::Playing } else { PlaybackMode::Paused };
    }
    broadcast::broadcast_room_state(&room, &state.config);
}

pub async fn heartbeat(state: &AppState, session_id: &str) -> Result<()> {
    let mut room = state.room.lock().await;
    room.sessions.on_heartbeat(session_id)?;
    if let Ok(session) = room.sessions.get(session_id) {
        session.send(OutgoingMessage::Pong);
    }
    Ok(())
}

pub async fn send_tracks_list(state: &AppState, session_id: &str) -> Result<()> {
    let room = state.room.lock().await;
    let msg = broadcast::tracks_list(&room);
    room.sessions.get(session_id)?.send(msg);
    Ok(())
}

pub async fn send_sessions_list(state: &AppState, session_id: &str) -> Result<()> {
    let room = state.room.lock().await;
    let msg = broadcast::sessions_list(&room);
    room.sessions.get(session_id)?.send(msg);
    Ok(())
}

pub async fn send_play_history(state: &AppState, session_id: &str) -> Result<()> {
    let room = state.room.lock().await;
    let msg = broadcast::play_history(&room);
    room.sessions.get(session_id)?.send(msg);
    Ok(())
}

/// Creates a listener-only session. Used by `POST listener-login`.
pub async fn listener_login(state: &AppState, name: String, email: String) -> String {
    let mut room = state.room.lock().await;
    room.sessions.create_listener(name, email)
}

pub async fn is_logged_in(state: &AppState, session_id: &str) -> bool {
    let room = state.room.lock().await;
    room.sessions.get(session_id).map(|s| s.identity.is_some()).unwrap_or(false)
}

/// `POST submit-track`. Parses via the provider gateway; a playlist
/// replaces the fallback queue, a track is fair-inserted.
pub async fn submit_track(state: &AppState, session_id: &str, input: &str) -> Result<()> {
    let parsed = state.provider.parse(input).ok_or_else(|| AppError::InvalidInput { message: "unrecognised track or playlist reference".into() })?;
    if !parsed.kind.is_admissible() {
        return Err(AppError::InvalidInput { message: "only tracks and playlists may be queued".into() });
    }

    let conductor_token = {
        let room = state.room.lock().await;
        room.state
            .conductor_session_id
            .as_ref()
            .and_then(|id| room.sessions.get(id).ok())
            .and_then(|s| match &s.identity {
                Some(Identity::Provider { access_token, .. }) => Some(access_token.clone()),
                _ => None,
            })
    };
    let Some(conductor_token) = conductor_token else {
        return Err(AppError::ProviderNoActiveDevice);
    };

    match parsed.kind {
        ReferenceKind::Playlist => {
            let info = state.provider.playlist_info(&conductor_token, &parsed.id).await?;
            let tracks = state.provider.playlist_tracks(&conductor_token, &parsed.id).await?;
            let tracks: Vec<Track> = tracks
                .into_iter()
                .map(|t| Track::new_fallback(t.uri, t.name, t.artist, t.album, t.album_art_url))
                .collect();

            let mut room = state.room.lock().await;
            room.queue.refill_fallback(tracks, Some(info.name));
            broadcast::broadcast_room_state(&room, &state.config);
            Ok(())
        }
        ReferenceKind::Track => {
            let (email, name) = {
                let room = state.room.lock().await;
                let session = room.sessions.get(session_id)?;
                let identity = session.identity.as_ref().ok_or(AppError::UnauthorizedSession)?;
                (identity.email().to_string(), identity.display_name().to_string())
            };

            let info = state.provider.track_info(&conductor_token, &parsed.id).await?;
            let track = Track::new_user_submission(parsed.uri, info.name, info.artist, info.album, info.album_art_url, email, name);

            let mut room = state.room.lock().await;
            if !room.queue.add(track.clone()) {
                return Err(AppError::DuplicateTrack { uri: track.uri });
            }
            room.history.append(
                track.submitter_name.clone().unwrap_or_default(),
                track.submitter_email.clone().unwrap_or_default(),
                HistoryEventKind::TrackAdded { uri: track.uri.clone(), name: track.name.clone() },
            );
            broadcast::broadcast_room_state(&room, &state.config);
            Ok(())
        }
        _ => Err(AppError::InvalidInput { message: "unsupported reference kind".into() }),
    }
}

pub async fn remove_track(state: &AppState, uri: &str) -> Result<()> {
    let mut room = state.room.lock().await;
    room.queue.remove(uri).ok_or_else(|| AppError::TrackNotFound { uri: uri.to_string() })?;
    broadcast::broadcast_room_state(&room, &state.config);
    Ok(())
}

pub async fn delay_track(state: &AppState, uri: &str) {
    let mut room = state.room.lock().await;
    room.queue.delay_track(uri);
    broadcast::broadcast_room_state(&room, &state.config);
}

pub async fn jam(state: &AppState, session_id: &str, uri: &str, unjam: bool) -> Result<()> {
    let mut room = state.room.lock().await;
    let (email, name) = {
        let session = room.sessions.get(session_id)?;
        let identity = session.identity.as_ref().ok_or(AppError::UnauthorizedSession)?;
        (identity.email().to_string(), identity.display_name().to_string())
    };

    let is_current = room.state.current.as_ref().map(|t| t.uri == uri).unwrap_or(false);

    if is_current {
        if let Some(current) = room.state.current.as_mut() {
            if unjam {
                current.unjam(&email);
            } else {
                current.jam(&email);
            }
        }
    } else if !room.queue.jam_in_place(uri, &email, unjam) && !unjam {
        // Not currently playing and not in the user queue: a jam on a
        // fallback track promotes it. An unjam on an unqueued track is a no-op.
        room.queue.promote_fallback(uri, &email, &name);
    }

    room.history.append(
        name,
        email,
        if unjam { HistoryEventKind::Unjam { uri: uri.to_string() } } else { HistoryEventKind::Jam { uri: uri.to_string() } },
    );
    broadcast::broadcast_room_state(&room, &state.config);
    Ok(())
}

fn require_conductor(room: &super::Room, session_id: &str) -> Result<()> {
    if room.state.conductor_session_id.as_deref() != Some(session_id) {
        return Err(AppError::NotConductor);
    }
    Ok(())
}

pub async fn master_play(state: &AppState, session_id: &str) -> Result<()> {
    {
        let room = state.room.lock().await;
        require_conductor(&room, session_id)?;
    }

    let was_playing = {
        let mut room = state.room.lock().await;
        let was_playing = room.state.mode == PlaybackMode::Playing;
        room.state.mode = PlaybackMode::Playing;
        was_playing
    };

    if !was_playing {
        state.reconciliation.restart(state.room.clone(), state.provider.clone(), state.config.clone(), state.persistence.clone(), state.metrics.clone()).await;
    }

    let room = state.room.lock().await;
    broadcast::broadcast_room_state(&room, &state.config);
    Ok(())
}

pub async fn master_pause(state: &AppState, session_id: &str) -> Result<()> {
    {
        let room = state.room.lock().await;
        require_conductor(&room, session_id)?;
    }

    {
        let mut room = state.room.lock().await;
        room.state.mode = PlaybackMode::Paused;
    }
    state.reconciliation.stop().await;

    let conductor_token = {
        let room = state.room.lock().await;
        room.state
            .conductor_session_id
            .as_ref()
            .and_then(|id| room.sessions.get(id).ok())
            .and_then(|s| match &s.identity {
                Some(Identity::Provider { access_token, .. }) => Some(access_token.clone()),
                _ => None,
            })
    };
    if let Some(token) = conductor_token {
        let _ = state.provider.pause(&token).await;
    }

    let room = state.room.lock().await;
    broadcast::broadcast_room_state(&room, &state.config);
    Ok(())
}

pub async fn master_skip(state: &AppState, session_id: &str) -> Result<()> {
    {
        let room = state.room.lock().await;
        require_conductor(&room, session_id)?;
    }

    let mut room = state.room.lock().await;
    if let Some(current) = room.state.current.take() {
        room.history.record_play(current.clone(), current.submitter_name.clone().unwrap_or_default());
        room.history.append(
            current.submitter_name.clone().unwrap_or_default(),
            current.submitter_email.clone().unwrap_or_default(),
            HistoryEventKind::TrackSkip { uri: current.uri.clone(), name: current.name.clone() },
        );
    }
    room.state.last_manual_skip = Some(std::time::Instant::now());
    room.state.expected_uri = None;
    room.state.expected_deadline = None;
    broadcast::broadcast_room_state(&room, &state.config);
    Ok(())
}

/// Forces fallback-head playback, bypassing the queue's usual
/// user-queue-first priority: a pending user submission must never
/// silently win over an explicit "start fallback" command.
pub async fn start_fallback(state: &AppState) -> Result<()> {
    let (track, conductor_token, followers) = {
        let mut room = state.room.lock().await;
        let track = room.queue.peek_fallback().ok_or_else(|| AppError::TrackNotFound { uri: "fallback queue is empty".into() })?;
        let conductor_id = room.state.conductor_session_id.clone().ok_or(AppError::ProviderNoActiveDevice)?;
        let conductor_token = match room.sessions.get(&conductor_id).ok().and_then(|s| s.identity.clone()) {
            Some(Identity::Provider { access_token, .. }) => access_token,
            _ => return Err(AppError::ProviderNoActiveDevice),
        };

        room.state.mode = PlaybackMode::Playing;
        room.state.current = Some(track.clone());
        room.state.current_is_fallback = true;
        room.state.current_consumed = false;
        room.state.expected_uri = Some(track.uri.clone());
        room.state.expected_deadline = Some(std::time::Instant::now() + super::PLAYBACK_FAILURE_WINDOW);
        room.state.last_commanded_change = Some(std::time::Instant::now());
        room.state.last_snapshot = None;
        room.history.append(
            "Fallback".into(),
            crate::queue::FALLBACK_SUBMITTER.into(),
            HistoryEventKind::FallbackPlay { uri: track.uri.clone(), name: track.name.clone() },
        );

        let followers: Vec<(String, String)> = room
            .sessions
            .iter()
            .filter(|s| s.follower_mode == FollowerMode::Follow && s.session_id != conductor_id)
            .filter_map(|s| match &s.identity {
                Some(Identity::Provider { access_token, .. }) => Some((s.session_id.clone(), access_token.clone())),
                _ => None,
            })
            .collect();

        (track, conductor_token, followers)
    };

    if let Err(err) = state.provider.play(&conductor_token, vec![track.uri.clone()], None).await {
        warn!(%err, "start_fallback: failed to command conductor playback");
    }
    for (session_id, token) in followers {
        if let Err(err) = state.provider.play(&token, vec![track.uri.clone()], None).await {
            warn!(session_id = %session_id, %err, "start_fallback: follower playback command failed");
        }
    }

    {
        let room = state.room.lock().await;
        broadcast::broadcast_room_state(&room, &state.config);
    }

    state.reconciliation.restart(state.room.clone(), state.provider.clone(), state.config.clone(), state.persistence.clone(), state.metrics.clone()).await;
    Ok(())
}

pub async fn session_play(state: &AppState, session_id: &str) -> Result<()> {
    let (current_uri, token) = {
        let mut room = state.room.lock().await;
        room.sessions.get_mut(session_id)?.follower_mode = FollowerMode::Follow;
        let session = room.sessions.get(session_id)?;
        let token = match &session.identity {
            Some(Identity::Provider { access_token, .. }) => Some(access_token.clone()),
            _ => None,
        };
        (room.state.current.as_ref().map(|t| t.uri.clone()), token)
    };

    if let (Some(uri), Some(token)) = (current_uri, token) {
        let _ = state.provider.play(&token, vec![uri], None).await;
    }

    let room = state.room.lock().await;
    if let Ok(session) = room.sessions.get(session_id) {
        session.send(broadcast::session_mode(session.follower_mode));
    }
    Ok(())
}

pub async fn session_pause(state: &AppState, session_id: &str) -> Result<()> {
    let mut room = state.room.lock().await;
    room.sessions.get_mut(session_id)?.follower_mode = FollowerMode::Paused;
    if let Ok(session) = room.sessions.get(session_id) {
        session.send(broadcast::session_mode(session.follower_mode));
    }
    Ok(())
}

pub async fn airhorn(state: &AppState, session_id: &str, name: String) -> Result<()> {
    let mut room = state.room.lock().await;
    let (email, display_name) = {
        let session = room.sessions.get(session_id)?;
        let identity = session.identity.as_ref().ok_or(AppError::UnauthorizedSession)?;
        (identity.email().to_string(), identity.display_name().to_string())
    };
    room.history.append(display_name, email, HistoryEventKind::Airhorn { name: name.clone() });
    broadcast::broadcast_airhorn(&room, name);
    Ok(())
}

pub async fn take_master_control(state: &AppState, session_id: &str) -> Result<()> {
    let can_take = {
        let room = state.room.lock().await;
        let session = room.sessions.get(session_id)?;
        let email = session.email().ok_or(AppError::UnauthorizedSession)?;
        state.config.is_allow_listed(email) && session.has_access_token()
    };
    if !can_take {
        return Err(AppError::NotAllowListed);
    }

    let was_playing = {
        let mut room = state.room.lock().await;
        room.state.conductor_session_id = Some(session_id.to_string());
        room.state.mode == PlaybackMode::Playing
    };

    if was_playing {
        state.reconciliation.restart(state.room.clone(), state.provider.clone(), state.config.clone(), state.persistence.clone(), state.metrics.clone()).await;
    }

    let room = state.room.lock().await;
    broadcast::broadcast_room_state(&room, &state.config);
    Ok(())
}

pub async fn history_message(state: &AppState, session_id: &str, text: String) -> Result<()> {
    let mut room = state.room.lock().await;
    let (email, name) = {
        let session = room.sessions.get(session_id)?;
        let identity = session.identity.as_ref().ok_or(AppError::UnauthorizedSession)?;
        (identity.email().to_string(), identity.display_name().to_string())
    };
    room.history.append(name, email, HistoryEventKind::Message { text });
    let msg = broadcast::history(&room);
    room.sessions.broadcast(msg);
    Ok(())
}

/// `POST master-random-liked`, conductor-only.
pub async fn master_random_liked(state: &AppState, session_id: &str) -> Result<usize> {
    let token = {
        let room = state.room.lock().await;
        require_conductor(&room, session_id)?;
        let session = room.sessions.get(session_id)?;
        match &session.identity {
            Some(Identity::Provider { access_token, .. }) => access_token.clone(),
            _ => return Err(AppError::UnauthorizedSession),
        }
    };

    let picked = state.provider.random_liked(&token, 10).await?;
    let tracks: Vec<Track> = picked
        .into_iter()
        .map(|t| Track::new_fallback(t.uri, t.name, t.artist, t.album, t.album_art_url))
        .collect();
    let added = tracks.len();

    let mut room = state.room.lock().await;
    room.queue.extend_fallback(tracks);
    broadcast::broadcast_room_state(&room, &state.config);
    Ok(added)
}

pub async fn heartbeat_sweep(state: &AppState) {
    let stale = {
        let room = state.room.lock().await;
        room.sessions.stale_session_ids(chrono::Duration::from_std(state.config.heartbeat_timeout).unwrap())
    };

    if stale.is_empty() {
        return;
    }

    let mut room = state.room.lock().await;
    for session_id in &stale {
        if let Some(session) = room.sessions.remove(session_id) {
            let email = session.email().unwrap_or_default().to_string();
            let name = session.identity.as_ref().map(|i| i.display_name().to_string()).unwrap_or_default();
            room.history.append(name, email, HistoryEventKind::UserDisconnected);
            info!(session_id = %session_id, "evicted stale session");
        }
    }
    broadcast::broadcast_room_state(&room, &state.config);
}
