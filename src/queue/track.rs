use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The sentinel submitter email carried by every fallback-origin track.
pub const FALLBACK_SUBMITTER: &str = "fallback@system";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    /// Canonical `provider:track:<id>`, the identity key.
    pub uri: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub album_art_url: Option<String>,
    pub submitter_email: Option<String>,
    pub submitter_name: Option<String>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub jam_counts: HashMap<String, u32>,
    pub progress_ms: Option<u64>,
    pub duration_ms: Option<u64>,
}

impl Track {
    pub fn new_user_submission(
        uri: String,
        name: String,
        artist: String,
        album: String,
        album_art_url: Option<String>,
        submitter_email: String,
        submitter_name: String,
    ) -> Self {
        Self {
            uri,
            name,
            artist,
            album,
            album_art_url,
            submitter_email: Some(submitter_email),
            submitter_name: Some(submitter_name),
            submitted_at: Utc::now(),
            jam_counts: HashMap::new(),
            progress_ms: None,
            duration_ms: None,
        }
    }

    pub fn new_fallback(
        uri: String,
        name: String,
        artist: String,
        album: String,
        album_art_url: Option<String>,
    ) -> Self {
        Self {
            uri,
            name,
            artist,
            album,
            album_art_url,
            submitter_email: Some(FALLBACK_SUBMITTER.to_string()),
            submitter_name: None,
            submitted_at: Utc::now(),
            jam_counts: HashMap::new(),
            progress_ms: None,
            duration_ms: None,
        }
    }

    pub fn is_fallback_origin(&self) -> bool {
        self.submitter_email.as_deref() == Some(FALLBACK_SUBMITTER)
    }

    pub fn jam(&mut self, actor_email: &str) {
        *self.jam_counts.entry(actor_email.to_lowercase()).or_insert(0) += 1;
    }

    pub fn unjam(&mut self, actor_email: &str) {
        if let Some(count) = self.jam_counts.get_mut(&actor_email.to_lowercase()) {
            if *count > 0 {
                *count -= 1;
            }
        }
    }
}

/// A Track as shown to clients, annotated with display-only bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisplayTrack {
    #[serde(flatten)]
    pub track: Track,
    pub is_fallback: bool,
    pub fallback_playlist_name: Option<String>,
}
