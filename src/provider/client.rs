//! Typed adapter for the external music provider. The exact REST shape
//! and OAuth handshake are treated as a black box; this module only
//! encodes the operations the rest of the system depends on.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::error::{AppError, Result};
use crate::metrics::Metrics;
use crate::provider::types::{
    ParsedReference, PlaybackSnapshot, PlaylistInfo, PlaylistTrack, ProviderProfile, ReferenceKind, RefreshedTokens, TrackInfo,
};

const API_BASE: &str = "https://api.spotify.com/v1";
const AUTH_BASE: &str = "https://accounts.spotify.com";
const CALL_TIMEOUT: Duration = Duration::from_secs(5);
const PLAYLIST_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct ProviderGateway {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    metrics: Arc<Metrics>,
}

impl ProviderGateway {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String, metrics: Arc<Metrics>) -> Self {
        let http = Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("reqwest client builds with static configuration");
        Self { http, client_id, client_secret, redirect_uri, metrics }
    }

    /// Records the outcome-by-kind of a provider call: "ok" on success,
    /// a failure label derived from the `AppError` variant otherwise.
    fn record_outcome<T>(&self, result: &Result<T>) {
        let label = match result {
            Ok(_) => "ok",
            Err(err) => err.metric_label(),
        };
        self.metrics.record_provider_outcome(label);
    }

    /// Accepts provider URLs, URIs, and bare 22-character ids (treated as
    /// track references).
    pub fn parse(&self, input: &str) -> Option<ParsedReference> {
        let bare_id = Regex::new(r"^[A-Za-z0-9]{22}$").expect("static pattern");

        if bare_id.is_match(input) {
            return Some(ParsedReference {
                kind: ReferenceKind::Track,
                uri: format!("spotify:track:{input}"),
                id: input.to_string(),
            });
        }

        if let Some(rest) = input.strip_prefix("spotify:") {
            let mut parts = rest.splitn(2, ':');
            let kind = parts.next()?;
            let id = parts.next()?;
            return Some(ParsedReference { kind: parse_kind(kind)?, uri: input.to_string(), id: id.to_string() });
        }

        if let Ok(url) = Url::parse(input) {
            if url.host_str() == Some("open.spotify.com") {
                let mut segments = url.path_segments()?;
                let kind = segments.next()?;
                let id = segments.next()?;
                let kind = parse_kind(kind)?;
                return Some(ParsedReference { kind, uri: format!("spotify:{}:{}", kind_str(kind), id), id: id.to_string() });
            }
        }

        None
    }

    pub async fn track_info(&self, access_token: &str, id: &str) -> Result<TrackInfo> {
        let result = self.track_info_impl(access_token, id).await;
        self.record_outcome(&result);
        result
    }

    async fn track_info_impl(&self, access_token: &str, id: &str) -> Result<TrackInfo> {
        let url = format!("{API_BASE}/tracks/{id}");
        let resp = self.http.get(url).bearer_auth(access_token).send().await?;
        let resp = map_status(resp).await?;
        let body: Value = resp.json().await?;

        let artists = body["artists"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v["name"].as_str()).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();

        Ok(TrackInfo {
            name: body["name"].as_str().unwrap_or_default().to_string(),
            artist: artists,
            album: body["album"]["name"].as_str().unwrap_or_default().to_string(),
            album_art_url: body["album"]["images"][0]["url"].as_str().map(str::to_string),
        })
    }

    pub async fn playlist_info(&self, access_token: &str, id: &str) -> Result<PlaylistInfo> {
        let result = self.playlist_info_impl(access_token, id).await;
        self.record_outcome(&result);
        result
    }

    async fn playlist_info_impl(&self, access_token: &str, id: &str) -> Result<PlaylistInfo> {
        let url = format!("{API_BASE}/playlists/{id}");
        let resp = self.http.get(url).bearer_auth(access_token).send().await?;
        let resp = map_status(resp).await?;
        let body: Value = resp.json().await?;

        Ok(PlaylistInfo {
            id: id.to_string(),
            name: body["name"].as_str().unwrap_or_default().to_string(),
            description: body["description"].as_str().unwrap_or_default().to_string(),
            owner: body["owner"]["display_name"].as_str().unwrap_or_default().to_string(),
            track_count: body["tracks"]["total"].as_u64().unwrap_or(0) as u32,
            image_url: body["images"][0]["url"].as_str().map(str::to_string),
        })
    }

    /// Paginates until fewer than a page of tracks is returned.
    pub async fn playlist_tracks(&self, access_token: &str, id: &str) -> Result<Vec<PlaylistTrack>> {
        let result = self.playlist_tracks_impl(access_token, id).await;
        self.record_outcome(&result);
        result
    }

    async fn playlist_tracks_impl(&self, access_token: &str, id: &str) -> Result<Vec<PlaylistTrack>> {
        let mut out = Vec::new();
        let mut offset = 0u32;

        loop {
            let url = format!("{API_BASE}/playlists/{id}/tracks?limit={PLAYLIST_PAGE_SIZE}&offset={offset}");
            let resp = self.http.get(url).bearer_auth(access_token).send().await?;
            let resp = map_status(resp).await?;
            let body: Value = resp.json().await?;

            let items = body["items"].as_array().cloned().unwrap_or_default();
            let page_len = items.len();

            for item in items {
                let track = &item["track"];
                let Some(uri) = track["uri"].as_str() else { continue };
                let artists = track["artists"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v["name"].as_str()).collect::<Vec<_>>().join(", "))
                    .unwrap_or_default();

                out.push(PlaylistTrack {
                    uri: uri.to_string(),
                    id: track["id"].as_str().unwrap_or_default().to_string(),
                    name: track["name"].as_str().unwrap_or_default().to_string(),
                    artist: artists,
                    album: track["album"]["name"].as_str().unwrap_or_default().to_string(),
                    album_art_url: track["album"]["images"][0]["url"].as_str().map(str::to_string),
                });
            }

            if page_len < PLAYLIST_PAGE_SIZE as usize {
                break;
            }
            offset += PLAYLIST_PAGE_SIZE;
        }

        Ok(out)
    }

    pub async fn play(&self, access_token: &str, uris: Vec<String>, position_ms: Option<u64>) -> Result<()> {
        let result = self.play_impl(access_token, uris, position_ms).await;
        self.record_outcome(&result);
        result
    }

    async fn play_impl(&self, access_token: &str, uris: Vec<String>, position_ms: Option<u64>) -> Result<()> {
        let mut body = serde_json::json!({ "uris": uris });
        if let Some(pos) = position_ms {
            body["position_ms"] = serde_json::json!(pos);
        }

        let resp = self
            .http
            .put(format!("{API_BASE}/me/player/play"))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::ProviderNoActiveDevice);
        }
        map_status(resp).await?;
        Ok(())
    }

    pub async fn pause(&self, access_token: &str) -> Result<()> {
        let result = self.pause_impl(access_token).await;
        self.record_outcome(&result);
        result
    }

    async fn pause_impl(&self, access_token: &str) -> Result<()> {
        let resp = self.http.put(format!("{API_BASE}/me/player/pause")).bearer_auth(access_token).send().await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::ProviderNoActiveDevice);
        }
        map_status(resp).await?;
        Ok(())
    }

    pub async fn current_playback(&self, access_token: &str) -> Result<Option<PlaybackSnapshot>> {
        let result = self.current_playback_impl(access_token).await;
        self.record_outcome(&result);
        result
    }

    async fn current_playback_impl(&self, access_token: &str) -> Result<Option<PlaybackSnapshot>> {
        let resp = self.http.get(format!("{API_BASE}/me/player")).bearer_auth(access_token).send().await?;

        if resp.status() == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let resp = map_status(resp).await?;
        let body: Value = resp.json().await?;

        let item = body["item"].as_object().map(|_| crate::provider::types::PlaybackItem {
            uri: body["item"]["uri"].as_str().unwrap_or_default().to_string(),
            id: body["item"]["id"].as_str().unwrap_or_default().to_string(),
            duration_ms: body["item"]["duration_ms"].as_u64().unwrap_or(0),
            item_type: body["item"]["type"].as_str().unwrap_or_default().to_string(),
        });

        Ok(Some(PlaybackSnapshot {
            item,
            progress_ms: body["progress_ms"].as_u64().unwrap_or(0),
            is_playing: body["is_playing"].as_bool().unwrap_or(false),
        }))
    }

    pub async fn me(&self, access_token: &str) -> Result<ProviderProfile> {
        let result = self.me_impl(access_token).await;
        self.record_outcome(&result);
        result
    }

    async fn me_impl(&self, access_token: &str) -> Result<ProviderProfile> {
        let resp = self.http.get(format!("{API_BASE}/me")).bearer_auth(access_token).send().await?;
        let resp = map_status(resp).await?;
        let body: Value = resp.json().await?;

        Ok(ProviderProfile {
            display_name: body["display_name"].as_str().unwrap_or_default().to_string(),
            email: body["email"].as_str().unwrap_or_default().to_lowercase(),
        })
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let result = self.refresh_impl(refresh_token).await;
        self.record_outcome(&result);
        result
    }

    async fn refresh_impl(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let resp = self
            .http
            .post(format!("{AUTH_BASE}/api/token"))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await?;

        let resp = map_status(resp).await?;
        let body: Value = resp.json().await?;

        Ok(RefreshedTokens {
            access_token: body["access_token"].as_str().unwrap_or_default().to_string(),
            expires_in: body["expires_in"].as_u64().unwrap_or(3600),
            refresh_token: body["refresh_token"].as_str().map(str::to_string),
        })
    }

    /// Picks `n` tracks from up to 50 most-recently-liked songs.
    pub async fn random_liked(&self, access_token: &str, n: usize) -> Result<Vec<PlaylistTrack>> {
        let result = self.random_liked_impl(access_token, n).await;
        self.record_outcome(&result);
        result
    }

    async fn random_liked_impl(&self, access_token: &str, n: usize) -> Result<Vec<PlaylistTrack>> {
        let resp = self
            .http
            .get(format!("{API_BASE}/me/tracks?limit=50"))
            .bearer_auth(access_token)
            .send()
            .await?;
        let resp = map_status(resp).await?;
        let body: Value = resp.json().await?;

        let mut tracks: Vec<PlaylistTrack> = body["items"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| {
                let track = &item["track"];
                let uri = track["uri"].as_str()?;
                Some(PlaylistTrack {
                    uri: uri.to_string(),
                    id: track["id"].as_str().unwrap_or_default().to_string(),
                    name: track["name"].as_str().unwrap_or_default().to_string(),
                    artist: track["artists"][0]["name"].as_str().unwrap_or_default().to_string(),
                    album: track["album"]["name"].as_str().unwrap_or_default().to_string(),
                    album_art_url: track["album"]["images"][0]["url"].as_str().map(str::to_string),
                })
            })
            .collect();

        use rand::seq::SliceRandom;
        tracks.shuffle(&mut rand::thread_rng());
        tracks.truncate(n);
        Ok(tracks)
    }

    pub fn authorize_url(&self, scopes: &[&str], state: &str) -> String {
        let scope = scopes.join(" ");
        format!(
            "{AUTH_BASE}/authorize?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}",
            self.client_id,
            urlencoding_lite(&self.redirect_uri),
            urlencoding_lite(&scope),
            urlencoding_lite(state),
        )
    }

    pub async fn code_grant(&self, code: &str) -> Result<RefreshedTokens> {
        let result = self.code_grant_impl(code).await;
        self.record_outcome(&result);
        result
    }

    async fn code_grant_impl(&self, code: &str) -> Result<RefreshedTokens> {
        let resp = self
            .http
            .post(format!("{AUTH_BASE}/api/token"))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        let resp = map_status(resp).await?;
        let body: Value = resp.json().await?;

        Ok(RefreshedTokens {
            access_token: body["access_token"].as_str().unwrap_or_default().to_string(),
            expires_in: body["expires_in"].as_u64().unwrap_or(3600),
            refresh_token: body["refresh_token"].as_str().map(str::to_string),
        })
    }
}

async fn map_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    match status {
        reqwest::StatusCode::UNAUTHORIZED => Err(AppError::ProviderUnauthorized),
        reqwest::StatusCode::NOT_FOUND => Err(AppError::ProviderNotFound),
        reqwest::StatusCode::FORBIDDEN => Err(AppError::ProviderForbidden),
        _ if status.is_server_error() => {
            warn!(%status, "transient provider error");
            Err(AppError::ProviderTransient { message: status.to_string() })
        }
        _ => Err(AppError::ProviderTransient { message: status.to_string() }),
    }
}

fn parse_kind(s: &str) -> Option<ReferenceKind> {
    match s {
        "track" => Some(ReferenceKind::Track),
        "playlist" => Some(ReferenceKind::Playlist),
        "album" => Some(ReferenceKind::Album),
        "artist" => Some(ReferenceKind::Artist),
        "episode" => Some(ReferenceKind::Episode),
        "show" => Some(ReferenceKind::Show),
        _ => None,
    }
}

fn kind_str(kind: ReferenceKind) -> &'static str {
    match kind {
        ReferenceKind::Track => "track",
        ReferenceKind::Playlist => "playlist",
        ReferenceKind::Album => "album",
        ReferenceKind::Artist => "artist",
        ReferenceKind::Episode => "episode",
        ReferenceKind::Show => "show",
    }
}

fn urlencoding_lite(input: &str) -> String {
    input.replace(' ', "%20").replace(':', "%3A").replace('/', "%2F")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> ProviderGateway {
        ProviderGateway::new("id".into(), "secret".into(), "http://localhost/callback".into(), Arc::new(Metrics::new()))
    }

    #[test]
    fn parses_bare_id_as_track() {
        let g = gateway();
        let parsed = g.parse("4uLU6hMCjMI75M1A2tKUQC").unwrap();
        assert_eq!(parsed.kind, ReferenceKind::Track);
        assert_eq!(parsed.uri, "spotify:track:4uLU6hMCjMI75M1A2tKUQC");
    }

    #[test]
    fn parses_uri() {
        let g = gateway();
        let parsed = g.parse("spotify:playlist:37i9dQZF1DXcBWIGoYBM5M").unwrap();
        assert_eq!(parsed.kind, ReferenceKind::Playlist);
        assert_eq!(parsed.id, "37i9dQZF1DXcBWIGoYBM5M");
    }

    #[test]
    fn parses_open_url() {
        let g = gateway();
        let parsed = g.parse("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc").unwrap();
        assert_eq!(parsed.kind, ReferenceKind::Track);
        assert_eq!(parsed.id, "4uLU6hMCjMI75M1A2tKUQC");
    }

    #[test]
    fn rejects_album_and_artist_admissibility() {
        assert!(!ReferenceKind::Album.is_admissible());
        assert!(!ReferenceKind::Artist.is_admissible());
        assert!(ReferenceKind::Track.is_admissible());
        assert!(ReferenceKind::Playlist.is_admissible());
    }

    #[test]
    fn rejects_garbage_input() {
        let g = gateway();
        assert!(g.parse("not a reference").is_none());
    }
}
