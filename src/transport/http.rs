//! One-shot HTTP endpoints that sit alongside the persistent channel:
//! track submission, listener login, the OAuth handshake, and the
//! conductor-only random-liked shortcut.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::room::commands;
use crate::session::Identity;
use crate::AppState;

const OAUTH_SCOPES: &[&str] = &[
    "user-read-email",
    "user-read-playback-state",
    "user-modify-playback-state",
    "user-library-read",
    "playlist-read-private",
];

/// Sounds the `airhorn` message may reference. Clients render these as
/// buttons; the server only validates and relays the name.
const AIRHORN_NAMES: &[&str] = &["classic", "siren", "trombone", "applause"];

#[derive(Deserialize)]
pub struct SubmitTrackRequest {
    pub session_id: String,
    pub input: String,
}

pub async fn submit_track(State(state): State<Arc<AppState>>, Json(req): Json<SubmitTrackRequest>) -> Result<impl IntoResponse> {
    commands::submit_track(&state, &req.session_id, &req.input).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct ListenerLoginRequest {
    pub name: String,
    pub email: String,
}

#[derive(Serialize)]
pub struct ListenerLoginResponse {
    pub session_id: String,
}

pub async fn listener_login(State(state): State<Arc<AppState>>, Json(req): Json<ListenerLoginRequest>) -> impl IntoResponse {
    let session_id = commands::listener_login(&state, req.name, req.email.to_lowercase()).await;
    Json(ListenerLoginResponse { session_id })
}

#[derive(Serialize)]
pub struct SessionStatusResponse {
    pub logged_in: bool,
}

pub async fn session_status(State(state): State<Arc<AppState>>, Path(session_id): Path<String>) -> impl IntoResponse {
    let logged_in = commands::is_logged_in(&state, &session_id).await;
    Json(SessionStatusResponse { logged_in })
}

#[derive(Deserialize)]
pub struct MasterRandomLikedRequest {
    pub session_id: String,
}

#[derive(Serialize)]
pub struct MasterRandomLikedResponse {
    pub added: usize,
}

pub async fn master_random_liked(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MasterRandomLikedRequest>,
) -> Result<impl IntoResponse> {
    let added = commands::master_random_liked(&state, &req.session_id).await?;
    Ok(Json(MasterRandomLikedResponse { added }))
}

pub async fn airhorns() -> impl IntoResponse {
    Json(serde_json::json!({ "airhorns": AIRHORN_NAMES }))
}

#[derive(Deserialize)]
pub struct LoginQuery {
    /// The listener session to upgrade to a provider identity, created by
    /// an earlier `listener-login` call. A fresh pending session is used
    /// if absent.
    pub session_id: Option<String>,
}

/// `GET /login`: redirects to the provider's OAuth consent screen, using
/// the session id as OAuth `state` so the callback can find it again.
pub async fn login(State(state): State<Arc<AppState>>, Query(query): Query<LoginQuery>) -> impl IntoResponse {
    let session_id = match query.session_id {
        Some(id) => id,
        None => {
            let mut room = state.room.lock().await;
            room.sessions.create_pending()
        }
    };

    let url = state.provider.authorize_url(OAUTH_SCOPES, &session_id);
    Redirect::temporary(&url)
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// `GET /callback`: completes the OAuth handshake, attaches a provider
/// identity to the session named by the `state` parameter, and redirects
/// to the front-end with that session id in the query string.
pub async fn callback(State(state): State<Arc<AppState>>, Query(query): Query<CallbackQuery>) -> Result<impl IntoResponse> {
    let tokens = state.provider.code_grant(&query.code).await?;
    let profile = state.provider.me(&tokens.access_token).await?;

    let identity = Identity::Provider {
        display_name: profile.display_name,
        email: profile.email,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token.unwrap_or_default(),
        expires_at: chrono::Utc::now() + chrono::Duration::seconds(tokens.expires_in as i64),
    };

    let mut room = state.room.lock().await;
    let session_id = if room.sessions.get(&query.state).is_ok() { query.state } else { room.sessions.create_pending() };
    room.sessions.set_provider_identity(&session_id, identity)?;
    drop(room);

    commands::assign_conductor_if_needed(&state).await;
    Ok(Redirect::temporary(&format!("/?session_id={session_id}")))
}
