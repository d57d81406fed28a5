//! Append-only event history and completed-play history, both ring-trimmed.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::Track;

const HISTORY_CAP: usize = 500;
const PLAY_HISTORY_CAP: usize = 100;
const BROADCAST_WINDOW: usize = 100;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryEventKind {
    TrackAdded { uri: String, name: String },
    TrackPlay { uri: String, name: String },
    TrackSkip { uri: String, name: String },
    FallbackPlay { uri: String, name: String },
    Jam { uri: String },
    Unjam { uri: String },
    Airhorn { name: String },
    Message { text: String },
    UserConnected,
    UserDisconnected,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor_display_name: String,
    pub actor_email: String,
    pub event: HistoryEventKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub track: Track,
    pub started_by: String,
}

#[derive(Debug, Default)]
pub struct History {
    events: VecDeque<HistoryEvent>,
    plays: VecDeque<PlayHistoryEntry>,
    next_sequence: u64,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, actor_display_name: String, actor_email: String, event: HistoryEventKind) -> HistoryEvent {
        let record = HistoryEvent {
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            actor_display_name,
            actor_email,
            event,
        };
        self.next_sequence += 1;
        self.events.push_back(record.clone());
        while self.events.len() > HISTORY_CAP {
            self.events.pop_front();
        }
        record
    }

    pub fn record_play(&mut self, track: Track, started_by: String) {
        self.plays.push_back(PlayHistoryEntry { timestamp: Utc::now(), track, started_by });
        while self.plays.len() > PLAY_HISTORY_CAP {
            self.plays.pop_front();
        }
    }

    /// The last 100 events, newest last, matching broadcast contract.
    pub fn recent_events(&self) -> Vec<HistoryEvent> {
        self.events.iter().rev().take(BROADCAST_WINDOW).rev().cloned().collect()
    }

    pub fn recent_plays(&self) -> Vec<PlayHistoryEntry> {
        self.plays.iter().cloned().collect()
    }

    pub fn all_events(&self) -> Vec<HistoryEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn restore_events(&mut self, events: Vec<HistoryEvent>) {
        self.next_sequence = events.iter().map(|e| e.sequence + 1).max().unwrap_or(0);
        self.events = events.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> Track {
        Track {
            uri: "spotify:track:abc".into(),
            name: "Song".into(),
            artist: "Artist".into(),
            album: "Album".into(),
            album_art_url: None,
            submitter_email: None,
            submitter_name: None,
            submitted_at: Utc::now(),
            jam_counts: Default::default(),
            progress_ms: None,
            duration_ms: None,
        }
    }

    #[test]
    fn history_never_exceeds_cap() {
        let mut h = History::new();
        for i in 0..600 {
            h.append("Actor".into(), "a@x.com".into(), HistoryEventKind::Message { text: format!("msg {i}") });
        }
        assert_eq!(h.all_events().len(), HISTORY_CAP);
    }

    #[test]
    fn play_history_never_exceeds_cap() {
        let mut h = History::new();
        for _ in 0..150 {
            h.record_play(track(), "Actor".into());
        }
        assert_eq!(h.recent_plays().len(), PLAY_HISTORY_CAP);
    }

    #[test]
    fn recent_events_is_at_most_broadcast_window() {
        let mut h = History::new();
        for i in 0..250 {
            h.append("Actor".into(), "a@x.com".into(), HistoryEventKind::Message { text: format!("msg {i}") });
        }
        assert_eq!(h.recent_events().len(), BROADCAST_WINDOW);
    }
}
