pub mod track;

use std::collections::{HashMap, VecDeque};

use rand::seq::SliceRandom;
use rand::thread_rng;

pub use track::{DisplayTrack, Track, FALLBACK_SUBMITTER};

/// Display composition pads the user queue with fallback entries up to
/// this many total slots.
const DISPLAY_LENGTH: usize = 10;

#[derive(Debug, Default)]
pub struct Queue {
    user_queue: Vec<Track>,
    fallback_queue: VecDeque<Track>,
    fallback_playlist_name: Option<String>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_queue(&self) -> &[Track] {
        &self.user_queue
    }

    pub fn fallback_queue(&self) -> impl Iterator<Item = &Track> {
        self.fallback_queue.iter()
    }

    pub fn set_fallback_playlist_name(&mut self, name: Option<String>) {
        self.fallback_playlist_name = name;
    }

    pub fn fallback_playlist_name(&self) -> Option<&str> {
        self.fallback_playlist_name.as_deref()
    }

    pub fn contains_uri(&self, uri: &str) -> bool {
        self.user_queue.iter().any(|t| t.uri == uri)
    }

    /// Inserts `track` into the user queue using the round-robin fair
    /// insertion algorithm. Returns `false` (no-op) if the URI is already
    /// queued.
    pub fn add(&mut self, track: Track) -> bool {
        if self.contains_uri(&track.uri) {
            return false;
        }

        let Some(email) = track.submitter_email.clone() else {
            self.user_queue.push(track);
            return true;
        };

        let idx = self.fair_insertion_index(&email);
        self.user_queue.insert(idx, track);
        true
    }

    fn fair_insertion_index(&self, email: &str) -> usize {
        let mut join_order: Vec<String> = Vec::new();
        let mut user_counts: HashMap<String, u32> = HashMap::new();
        let mut last_user_idx: i64 = -1;

        for (i, t) in self.user_queue.iter().enumerate() {
            let Some(e) = &t.submitter_email else { continue };
            if !join_order.contains(e) {
                join_order.push(e.clone());
            }
            *user_counts.entry(e.clone()).or_insert(0) += 1;
            if e == email {
                last_user_idx = i as i64;
            }
        }

        let this_user_count = *user_counts.get(email).unwrap_or(&0);
        let new_round = this_user_count + 1;

        let mut rounds_seen: HashMap<String, u32> = HashMap::new();
        let mut boundary_idx: i64 = -1;

        for (i, t) in self.user_queue.iter().enumerate() {
            let Some(e) = &t.submitter_email else { continue };
            let seen = rounds_seen.entry(e.clone()).or_insert(0);
            *seen += 1;
            if join_order.contains(e) && *seen <= new_round {
                boundary_idx = i as i64;
            }
        }

        let candidate = std::cmp::max(last_user_idx + 1, boundary_idx + 1);
        candidate.max(0) as usize
    }

    pub fn remove(&mut self, uri: &str) -> Option<Track> {
        let idx = self.user_queue.iter().position(|t| t.uri == uri)?;
        Some(self.user_queue.remove(idx))
    }

    pub fn remove_fallback(&mut self, uri: &str) -> Option<Track> {
        let idx = self.fallback_queue.iter().position(|t| t.uri == uri)?;
        self.fallback_queue.remove(idx)
    }

    /// Applies a jam/unjam to a track already in the user queue. Returns
    /// `false` if no such track is queued.
    pub fn jam_in_place(&mut self, uri: &str, actor_email: &str, unjam: bool) -> bool {
        let Some(t) = self.user_queue.iter_mut().find(|t| t.uri == uri) else { return false };
        if unjam {
            t.unjam(actor_email);
        } else {
            t.jam(actor_email);
        }
        true
    }

    /// Swaps a user-queue entry with its immediate successor. A no-op at
    /// the tail.
    pub fn delay_track(&mut self, uri: &str) {
        if let Some(idx) = self.user_queue.iter().position(|t| t.uri == uri) {
            if idx + 1 < self.user_queue.len() {
                self.user_queue.swap(idx, idx + 1);
            }
        }
    }

    /// Returns the head of whichever tier would play next, without
    /// removing it. User queue takes priority over fallback.
    pub fn peek_next(&self) -> Option<(Track, bool)> {
        if let Some(t) = self.user_queue.first() {
            return Some((t.clone(), false));
        }
        self.fallback_queue.front().map(|t| (t.clone(), true))
    }

    /// Peeks the fallback queue's head directly, ignoring whatever is in
    /// the user queue. Used by `start_fallback`, which must force fallback
    /// playback even when user-submitted tracks are pending.
    pub fn peek_fallback(&self) -> Option<Track> {
        self.fallback_queue.front().cloned()
    }

    /// Removes the head of the chosen tier. Must only be called after the
    /// provider confirms playback of the peeked track.
    pub fn consume_next(&mut self, is_fallback: bool) -> Option<Track> {
        if is_fallback {
            self.fallback_queue.pop_front()
        } else if self.user_queue.is_empty() {
            None
        } else {
            Some(self.user_queue.remove(0))
        }
    }

    /// Appends `tracks` to the tail of the fallback queue, tagging each
    /// as fallback-origin. Unlike `refill_fallback`, existing fallback
    /// contents and the fallback playlist name are left untouched.
    pub fn extend_fallback(&mut self, tracks: Vec<Track>) {
        for mut t in tracks {
            t.submitter_email = Some(FALLBACK_SUBMITTER.to_string());
            self.fallback_queue.push_back(t);
        }
    }

    /// Replaces the fallback queue with a freshly shuffled copy of
    /// `tracks`, tagging each as fallback-origin.
    pub fn refill_fallback(&mut self, mut tracks: Vec<Track>, playlist_name: Option<String>) {
        let mut rng = thread_rng();
        tracks.shuffle(&mut rng);
        for t in tracks.iter_mut() {
            t.submitter_email = Some(FALLBACK_SUBMITTER.to_string());
        }
        self.fallback_queue = tracks.into_iter().collect();
        self.fallback_playlist_name = playlist_name;
    }

    pub fn fallback_is_empty(&self) -> bool {
        self.fallback_queue.is_empty()
    }

    /// Promotes a fallback track into the user queue as a jam by `actor_email`.
    /// No-op if `uri` is the currently playing track (callers must check that
    /// before invoking this).
    pub fn promote_fallback(&mut self, uri: &str, actor_email: &str, actor_name: &str) -> Option<Track> {
        let mut track = self.remove_fallback(uri)?;
        track.submitter_email = Some(actor_email.to_lowercase());
        track.submitter_name = Some(actor_name.to_string());
        track.jam(actor_email);
        let idx = self.fair_insertion_index(actor_email);
        self.user_queue.insert(idx, track.clone());
        Some(track)
    }

    /// The user queue first, padded with fallback entries up to
    /// `DISPLAY_LENGTH` total.
    pub fn display(&self) -> Vec<DisplayTrack> {
        let mut out: Vec<DisplayTrack> = self
            .user_queue
            .iter()
            .map(|t| DisplayTrack { track: t.clone(), is_fallback: false, fallback_playlist_name: None })
            .collect();

        if out.len() < DISPLAY_LENGTH {
            let remaining = DISPLAY_LENGTH - out.len();
            for t in self.fallback_queue.iter().take(remaining) {
                out.push(DisplayTrack {
                    track: t.clone(),
                    is_fallback: true,
                    fallback_playlist_name: self.fallback_playlist_name.clone(),
                });
            }
        }

        out
    }

    pub fn replace_user_queue(&mut self, tracks: Vec<Track>) {
        self.user_queue = tracks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn track(uri: &str, email: &str) -> Track {
        Track {
            uri: uri.to_string(),
            name: uri.to_string(),
            artist: "artist".into(),
            album: "album".into(),
            album_art_url: None,
            submitter_email: Some(email.to_string()),
            submitter_name: Some(email.to_string()),
            submitted_at: Utc::now(),
            jam_counts: HashMap::new(),
            progress_ms: None,
            duration_ms: None,
        }
    }

    #[test]
    fn fair_insertion_regression() {
        let mut q = Queue::new();
        q.add(track("A1", "u1"));
        q.add(track("B1", "u2"));
        q.add(track("A2", "u1"));
        q.add(track("B2", "u2"));
        q.add(track("A3", "u1"));
        q.add(track("C1", "u3"));

        let uris: Vec<_> = q.user_queue().iter().map(|t| t.uri.clone()).collect();
        assert_eq!(uris, vec!["A1", "B1", "C1", "A2", "B2", "A3"]);

        q.add(track("C2", "u3"));
        let uris: Vec<_> = q.user_queue().iter().map(|t| t.uri.clone()).collect();
        assert_eq!(uris, vec!["A1", "B1", "C1", "A2", "B2", "C2", "A3"]);
    }

    #[test]
    fn five_then_one() {
        let mut q = Queue::new();
        for uri in ["A", "B", "C", "D", "E"] {
            q.add(track(uri, "u1"));
        }
        q.add(track("F", "u2"));

        let uris: Vec<_> = q.user_queue().iter().map(|t| t.uri.clone()).collect();
        assert_eq!(uris, vec!["A", "F", "B", "C", "D", "E"]);
    }

    #[test]
    fn duplicate_uri_is_rejected() {
        let mut q = Queue::new();
        assert!(q.add(track("A", "u1")));
        assert!(!q.add(track("A", "u2")));
        assert_eq!(q.user_queue().len(), 1);
    }

    #[test]
    fn delay_track_is_noop_at_tail() {
        let mut q = Queue::new();
        q.add(track("A", "u1"));
        q.add(track("B", "u1"));
        q.delay_track("B");
        let uris: Vec<_> = q.user_queue().iter().map(|t| t.uri.clone()).collect();
        assert_eq!(uris, vec!["A", "B"]);

        q.delay_track("A");
        let uris: Vec<_> = q.user_queue().iter().map(|t| t.uri.clone()).collect();
        assert_eq!(uris, vec!["B", "A"]);
    }

    #[test]
    fn consume_removes_former_head() {
        let mut q = Queue::new();
        q.add(track("A", "u1"));
        q.add(track("B", "u1"));
        let consumed = q.consume_next(false).unwrap();
        assert_eq!(consumed.uri, "A");
        assert_eq!(q.user_queue().len(), 1);
    }

    #[test]
    fn peek_is_stable_without_mutation() {
        let mut q = Queue::new();
        q.add(track("A", "u1"));
        let first = q.peek_next();
        let second = q.peek_next();
        assert_eq!(first.map(|(t, _)| t.uri), second.map(|(t, _)| t.uri));
    }

    #[test]
    fn display_pads_with_fallback_up_to_ten() {
        let mut q = Queue::new();
        q.add(track("U1", "u1"));
        q.add(track("U2", "u2"));
        q.refill_fallback(
            (0..20).map(|i| Track::new_fallback(format!("F{i}"), format!("F{i}"), "a".into(), "al".into(), None)).collect(),
            Some("Daily Mix".into()),
        );

        let display = q.display();
        assert_eq!(display.len(), 10);
        assert_eq!(display.iter().filter(|d| !d.is_fallback).count(), 2);
        assert_eq!(display.iter().filter(|d| d.is_fallback).count(), 8);
    }

    #[test]
    fn promote_fallback_moves_track_into_user_queue() {
        let mut q = Queue::new();
        q.refill_fallback(vec![Track::new_fallback("K".into(), "K".into(), "a".into(), "al".into(), None)], None);
        q.add(track("X", "u1"));
        q.add(track("Y", "u2"));

        let promoted = q.promote_fallback("K", "actor@example.com", "Actor").unwrap();
        assert_eq!(promoted.jam_counts.get("actor@example.com"), Some(&1));
        assert!(q.fallback_queue().next().is_none());
        assert!(q.user_queue().iter().any(|t| t.uri == "K"));
    }
}
