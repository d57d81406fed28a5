use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Track,
    Playlist,
    Album,
    Artist,
    Episode,
    Show,
}

impl ReferenceKind {
    /// Only tracks and playlists are admissible for playback/queue use.
    pub fn is_admissible(&self) -> bool {
        matches!(self, ReferenceKind::Track | ReferenceKind::Playlist)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParsedReference {
    pub kind: ReferenceKind,
    pub uri: String,
    pub id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackInfo {
    pub name: String,
    pub artist: String,
    pub album: String,
    pub album_art_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaylistInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub owner: String,
    pub track_count: u32,
    pub image_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaylistTrack {
    pub uri: String,
    pub id: String,
    pub name: String,
    pub artist: String,
    pub album: String,
    pub album_art_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlaybackItem {
    pub uri: String,
    pub id: String,
    pub duration_ms: u64,
    pub item_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub item: Option<PlaybackItem>,
    pub progress_ms: u64,
    pub is_playing: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub display_name: String,
    pub email: String,
}
