/// Centralised error taxonomy for the room coordinator.
///
/// One enum serves three call sites: HTTP responses, targeted websocket
/// error frames, and internal `Result` plumbing inside the room mutation
/// section.

use std::fmt;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppError {
    // Input validation, never mutates server state.
    InvalidInput { message: String },

    // Session / identity.
    UnauthorizedSession,
    SessionNotFound { session_id: String },
    NotConductor,
    NotAllowListed,

    // Provider gateway.
    ProviderNoActiveDevice,
    ProviderUnauthorized,
    ProviderNotFound,
    ProviderForbidden,
    ProviderTransient { message: String },
    ProviderTimeout,

    // Queue / playback.
    DuplicateTrack { uri: String },
    TrackNotFound { uri: String },
    PlaybackFailure { uri: String },

    // Persistence / transport, logged and swallowed at the call site.
    PersistenceError { message: String },
    TransportWriteError,

    // Config / startup.
    ConfigError { message: String },

    // Catch-all.
    Internal { message: String },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InvalidInput { message } => write!(f, "invalid input: {message}"),
            AppError::UnauthorizedSession => write!(f, "session has neither a provider nor a listener identity"),
            AppError::SessionNotFound { session_id } => write!(f, "session not found: {session_id}"),
            AppError::NotConductor => write!(f, "only the conductor session may issue this command"),
            AppError::NotAllowListed => write!(f, "session is not allow-listed for master control"),
            AppError::ProviderNoActiveDevice => write!(f, "provider reports no active playback device"),
            AppError::ProviderUnauthorized => write!(f, "provider rejected the access token"),
            AppError::ProviderNotFound => write!(f, "provider resource not found"),
            AppError::ProviderForbidden => write!(f, "provider resource is not readable"),
            AppError::ProviderTransient { message } => write!(f, "transient provider error: {message}"),
            AppError::ProviderTimeout => write!(f, "provider call timed out"),
            AppError::DuplicateTrack { uri } => write!(f, "track already queued: {uri}"),
            AppError::TrackNotFound { uri } => write!(f, "track not found: {uri}"),
            AppError::PlaybackFailure { uri } => write!(f, "playback of {uri} was not confirmed in time"),
            AppError::PersistenceError { message } => write!(f, "persistence error: {message}"),
            AppError::TransportWriteError => write!(f, "failed to write to a transport handle"),
            AppError::ConfigError { message } => write!(f, "configuration error: {message}"),
            AppError::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            AppError::UnauthorizedSession => StatusCode::UNAUTHORIZED,
            AppError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::NotConductor | AppError::NotAllowListed => StatusCode::FORBIDDEN,
            AppError::ProviderNoActiveDevice => StatusCode::CONFLICT,
            AppError::ProviderUnauthorized => StatusCode::UNAUTHORIZED,
            AppError::ProviderNotFound | AppError::TrackNotFound { .. } => StatusCode::NOT_FOUND,
            AppError::ProviderForbidden => StatusCode::FORBIDDEN,
            AppError::ProviderTransient { .. } | AppError::ProviderTimeout => StatusCode::BAD_GATEWAY,
            AppError::DuplicateTrack { .. } => StatusCode::CONFLICT,
            AppError::PlaybackFailure { .. } => StatusCode::CONFLICT,
            AppError::PersistenceError { .. }
            | AppError::TransportWriteError
            | AppError::ConfigError { .. }
            | AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

impl AppError {
    /// Coarse outcome label for provider-call metrics; deliberately by
    /// failure kind rather than by method, matching the flat
    /// `provider_calls_by_outcome` counter shape.
    pub fn metric_label(&self) -> &'static str {
        match self {
            AppError::ProviderNoActiveDevice => "no_active_device",
            AppError::ProviderUnauthorized => "unauthorized",
            AppError::ProviderNotFound => "not_found",
            AppError::ProviderForbidden => "forbidden",
            AppError::ProviderTimeout => "timeout",
            AppError::ProviderTransient { .. } => "transient",
            _ => "error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::PersistenceError { message: err.to_string() }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::PersistenceError { message: err.to_string() }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::ProviderTimeout
        } else if let Some(status) = err.status() {
            match status {
                reqwest::StatusCode::UNAUTHORIZED => AppError::ProviderUnauthorized,
                reqwest::StatusCode::NOT_FOUND => AppError::ProviderNotFound,
                reqwest::StatusCode::FORBIDDEN => AppError::ProviderForbidden,
                _ => AppError::ProviderTransient { message: err.to_string() },
            }
        } else {
            AppError::ProviderTransient { message: err.to_string() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_no_active_device_maps_to_conflict() {
        let resp = AppError::ProviderNoActiveDevice.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_input_maps_to_bad_request() {
        let resp = AppError::InvalidInput { message: "empty uri".into() }.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn display_includes_context() {
        let err = AppError::TrackNotFound { uri: "spotify:track:abc".into() };
        assert!(err.to_string().contains("spotify:track:abc"));
    }
}
