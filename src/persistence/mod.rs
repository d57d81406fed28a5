//! Serialises queue, conductor-capable sessions, and history to disk and
//! reloads them on startup. Writes go through a temp file + rename so a
//! crash mid-write never leaves a corrupt file behind.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::error::Result;
use crate::history::HistoryEvent;
use crate::provider::ProviderGateway;
use crate::queue::Track;
use crate::room::Room;
use crate::session::{Identity, PersistedSession};

pub struct Persistence {
    data_dir: PathBuf,
}

impl Persistence {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    fn queue_path(&self) -> PathBuf {
        self.data_dir.join("queue.json")
    }

    fn sessions_path(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    async fn write_json(&self, path: &Path, value: &impl serde::Serialize) -> Result<()> {
        fs::create_dir_all(&self.data_dir).await?;
        let tmp_path = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(value)?;
        fs::write(&tmp_path, body).await?;
        fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned + Default>(&self, path: &Path) -> T {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => T::default(),
        }
    }

    pub async fn save_queue(&self, queue: &[Track]) -> Result<()> {
        self.write_json(&self.queue_path(), &queue).await
    }

    pub async fn save_sessions(&self, sessions: &[PersistedSession]) -> Result<()> {
        self.write_json(&self.sessions_path(), &sessions).await
    }

    pub async fn save_history(&self, events: &[HistoryEvent]) -> Result<()> {
        self.write_json(&self.history_path(), &events).await
    }

    /// Loads sessions, then queue (backfilling missing album art via the
    /// conductor's credentials), then history, into `room`. Sessions whose
    /// credential refresh fails are dropped.
    pub async fn load_into(&self, room: &mut Room, provider: &ProviderGateway) {
        let sessions: Vec<PersistedSession> = self.read_json(&self.sessions_path()).await;
        let mut restored = Vec::with_capacity(sessions.len());

        for mut session in sessions {
            if let Identity::Provider { refresh_token, access_token, expires_at, .. } = &mut session.identity {
                match provider.refresh(refresh_token).await {
                    Ok(tokens) => {
                        *access_token = tokens.access_token;
                        if let Some(new_refresh) = tokens.refresh_token {
                            *refresh_token = new_refresh;
                        }
                        *expires_at = chrono::Utc::now() + chrono::Duration::seconds(tokens.expires_in as i64);
                        restored.push(session);
                    }
                    Err(err) => {
                        warn!(session_id = %session.session_id, error = %err, "dropping session: credential refresh failed on load");
                    }
                }
            } else {
                restored.push(session);
            }
        }
        room.sessions.restore(restored);

        let mut tracks: Vec<Track> = self.read_json(&self.queue_path()).await;
        if let Some(conductor) = room.sessions.first_provider_capable() {
            if let Identity::Provider { access_token, .. } = conductor.identity.as_ref().unwrap() {
                for track in tracks.iter_mut() {
                    if track.album_art_url.is_none() {
                        let id = track.uri.rsplit(':').next().unwrap_or_default();
                        if let Ok(info) = provider.track_info(access_token, id).await {
                            track.album_art_url = info.album_art_url;
                        }
                    }
                }
            }
        }
        room.queue.replace_user_queue(tracks);

        let events: Vec<HistoryEvent> = self.read_json(&self.history_path()).await;
        room.history.restore_events(events);

        info!(data_dir = %self.data_dir.display(), "loaded persisted room state");
    }

    /// Refreshes every provider-capable session's credentials in place and
    /// re-persists the session file. Run every 30 minutes and once after
    /// startup load.
    pub async fn refresh_all_credentials(&self, room: &mut Room, provider: &ProviderGateway) {
        let mut drop_ids = Vec::new();

        for session in room.sessions.iter_mut() {
            if let Some(Identity::Provider { refresh_token, access_token, expires_at, .. }) = session.identity.as_mut() {
                match provider.refresh(refresh_token).await {
                    Ok(tokens) => {
                        *access_token = tokens.access_token;
                        if let Some(new_refresh) = tokens.refresh_token {
                            *refresh_token = new_refresh;
                        }
                        *expires_at = chrono::Utc::now() + chrono::Duration::seconds(tokens.expires_in as i64);
                    }
                    Err(_) => drop_ids.push(session.session_id.clone()),
                }
            }
        }

        for id in drop_ids {
            session_drop_identity(room, &id);
        }

        if let Err(err) = self.save_sessions(&room.sessions.persistable()).await {
            warn!(error = %err, "failed to persist sessions after credential refresh");
        }
    }
}

fn session_drop_identity(room: &mut Room, session_id: &str) {
    if let Ok(session) = room.sessions.get_mut(session_id) {
        session.identity = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn round_trips_queue() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());

        let track = Track::new_user_submission(
            "spotify:track:abc".into(),
            "Song".into(),
            "Artist".into(),
            "Album".into(),
            None,
            "e@x.com".into(),
            "Name".into(),
        );
        persistence.save_queue(&[track.clone()]).await.unwrap();

        let loaded: Vec<Track> = persistence.read_json(&persistence.queue_path()).await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].uri, track.uri);
    }

    #[tokio::test]
    async fn missing_files_default_to_empty() {
        let dir = tempdir().unwrap();
        let persistence = Persistence::new(dir.path());
        let loaded: Vec<Track> = persistence.read_json(&persistence.queue_path()).await;
        assert!(loaded.is_empty());
    }
}
