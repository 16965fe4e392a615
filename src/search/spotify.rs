//! # Spotify Web API Client
//!
//! A [`CatalogApi`] over `reqwest`, plus the write calls used for exporting
//! results: playlist creation, adding tracks, saving to the listener's library.
//!
//! ## Authorization
//!
//! Every call carries the current bearer token from a shared [`TokenManager`].
//! A 401 triggers exactly one refresh and one retry of the same request. A
//! second 401 surfaces as [`CatalogError::Unauthorized`].
//!
//! Refreshes are single-flight: concurrent callers that saw the same stale
//! token wait on one refresh instead of each starting their own. A caller that
//! arrives after the token already changed reuses the new one.

use super::catalog::{ArtistSummary, CatalogApi, TimeRange, Track};
use super::window::RecommendationQuery;
use crate::error::CatalogError;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";
pub const DEFAULT_ACCOUNTS_URL: &str = "https://accounts.spotify.com/api/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
/// Largest batch accepted by the add-to-playlist endpoint.
const PLAYLIST_BATCH: usize = 100;
/// Largest batch accepted by the save-to-library endpoint.
const LIBRARY_BATCH: usize = 50;

/// A freshly issued access token. Some providers rotate the refresh token too.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<TokenGrant, CatalogError>;
}

#[derive(Debug, Deserialize)]
struct RefreshFailure {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

async fn read_grant(response: Response) -> Result<TokenGrant, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<TokenGrant>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<RefreshFailure>(&body)
        .map(|f| {
            format!(
                "{} - {}",
                f.error.unwrap_or_default(),
                f.error_description.unwrap_or_default()
            )
        })
        .unwrap_or(body);
    Err(CatalogError::Status {
        status: status.as_u16(),
        body: detail,
    })
}

/// Refreshes through a relay function that holds the client secret.
///
/// Sends `{"refresh_token": ...}` with the app session JWT as bearer and
/// expects `{"access_token": ..., "refresh_token"?: ...}` back.
pub struct RelayRefresher {
    http: reqwest::Client,
    url: String,
    session_jwt: String,
    refresh_token: Mutex<String>,
}

impl RelayRefresher {
    pub fn new(url: impl Into<String>, session_jwt: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            session_jwt: session_jwt.into(),
            refresh_token: Mutex::new(refresh_token.into()),
        }
    }
}

#[async_trait]
impl TokenRefresher for RelayRefresher {
    async fn refresh(&self) -> Result<TokenGrant, CatalogError> {
        let mut refresh_token = self.refresh_token.lock().await;
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.session_jwt)
            .json(&serde_json::json!({ "refresh_token": refresh_token.as_str() }))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let grant = read_grant(response).await?;
        if let Some(rotated) = &grant.refresh_token {
            *refresh_token = rotated.clone();
        }
        Ok(grant)
    }
}

/// Refreshes directly against the accounts service with client credentials.
pub struct OAuthRefresher {
    http: reqwest::Client,
    url: String,
    client_id: String,
    client_secret: String,
    refresh_token: Mutex<String>,
}

impl OAuthRefresher {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: DEFAULT_ACCOUNTS_URL.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: Mutex::new(refresh_token.into()),
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self) -> Result<TokenGrant, CatalogError> {
        let mut refresh_token = self.refresh_token.lock().await;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let response = self
            .http
            .post(&self.url)
            .form(&form)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let grant = read_grant(response).await?;
        if let Some(rotated) = &grant.refresh_token {
            *refresh_token = rotated.clone();
        }
        Ok(grant)
    }
}

/// The bearer token shared by every request of one client.
pub struct TokenManager {
    current: RwLock<String>,
    refresh_gate: Mutex<()>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    refreshes: AtomicU64,
}

impl TokenManager {
    pub fn new(access_token: impl Into<String>, refresher: Option<Arc<dyn TokenRefresher>>) -> Self {
        Self {
            current: RwLock::new(access_token.into()),
            refresh_gate: Mutex::new(()),
            refresher,
            refreshes: AtomicU64::new(0),
        }
    }

    pub async fn current(&self) -> String {
        self.current.read().await.clone()
    }

    /// Number of refreshes actually performed.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Replace `stale` with a fresh token, or return the token another caller
    /// already installed.
    pub async fn refresh_after(&self, stale: &str) -> Result<String, CatalogError> {
        let _gate = self.refresh_gate.lock().await;

        {
            let current = self.current.read().await;
            if current.as_str() != stale {
                debug!("Token already refreshed by another request");
                return Ok(current.clone());
            }
        }

        let Some(refresher) = &self.refresher else {
            warn!("Access token rejected and no refresh credentials configured");
            return Err(CatalogError::Unauthorized);
        };

        let grant = match refresher.refresh().await {
            Ok(grant) => grant,
            Err(CatalogError::Status { status, body }) => {
                warn!("Token refresh rejected ({status}): {body}");
                return Err(CatalogError::Unauthorized);
            }
            Err(err) => {
                warn!("Token refresh failed: {err}");
                return Err(CatalogError::Refresh(err.to_string()));
            }
        };

        self.refreshes.fetch_add(1, Ordering::SeqCst);
        info!("Refreshed catalog access token");
        *self.current.write().await = grant.access_token.clone();
        Ok(grant.access_token)
    }
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct Album {
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: Option<String>,
    name: String,
    #[serde(default)]
    artists: Vec<Named>,
    #[serde(default)]
    album: Option<Album>,
    #[serde(default)]
    preview_url: Option<String>,
}

impl TrackObject {
    /// Local files have no id and cannot be recommended or saved.
    fn into_track(self) -> Option<Track> {
        Some(Track {
            id: self.id?,
            name: self.name,
            artist: self
                .artists
                .into_iter()
                .next()
                .map(|a| a.name)
                .unwrap_or_default(),
            artwork_url: self
                .album
                .and_then(|album| album.images.into_iter().next())
                .map(|image| image.url),
            preview_url: self.preview_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RecommendationsPage {
    #[serde(default)]
    tracks: Vec<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct Paging<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TrackRef {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    spotify: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistObject {
    id: String,
    #[serde(default)]
    external_urls: Option<ExternalUrls>,
}

/// A playlist created for an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Playlist {
    pub id: String,
    pub url: Option<String>,
}

#[derive(Serialize)]
struct NewPlaylist<'a> {
    name: &'a str,
    public: bool,
}

pub struct SpotifyClient {
    http: reqwest::Client,
    api_base: String,
    market: Option<String>,
    tokens: Arc<TokenManager>,
}

impl SpotifyClient {
    pub fn new(api_base: impl Into<String>, tokens: Arc<TokenManager>) -> Result<Self, CatalogError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_http_client(api_base, tokens, http))
    }

    /// Use a preconfigured `reqwest::Client` (proxies, TLS roots, timeouts).
    pub fn with_http_client(api_base: impl Into<String>, tokens: Arc<TokenManager>, http: reqwest::Client) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            market: None,
            tokens,
        }
    }

    /// Market sent with recommendation queries that do not set their own.
    #[must_use]
    pub fn with_market(mut self, market: Option<String>) -> Self {
        self.market = market;
        self
    }

    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Send with the current token; on 401 refresh once and resend.
    async fn send<F>(&self, build: F) -> Result<Response, CatalogError>
    where
        F: Fn(&str) -> RequestBuilder + Send + Sync,
    {
        let token = self.tokens.current().await;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check(response).await;
        }

        debug!("Catalog returned 401, refreshing token");
        let fresh = self.tokens.refresh_after(&token).await?;
        let response = build(&fresh).send().await?;
        check(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(String, String)]) -> Result<T, CatalogError> {
        let url = self.url(path);
        let response = self
            .send(|token| self.http.get(&url).bearer_auth(token).query(query))
            .await?;
        Ok(response.json::<T>().await?)
    }

    pub async fn create_playlist(&self, user_id: &str, name: &str, public: bool) -> Result<Playlist, CatalogError> {
        let url = self.url(&format!("users/{user_id}/playlists"));
        let body = NewPlaylist { name, public };
        let response = self
            .send(|token| self.http.post(&url).bearer_auth(token).json(&body))
            .await?;
        let created: PlaylistObject = response.json().await?;
        info!("Created playlist `{name}` ({})", created.id);
        Ok(Playlist {
            id: created.id,
            url: created.external_urls.and_then(|urls| urls.spotify),
        })
    }

    pub async fn add_tracks(&self, playlist_id: &str, tracks: &[Track]) -> Result<(), CatalogError> {
        let url = self.url(&format!("playlists/{playlist_id}/tracks"));
        for batch in tracks.chunks(PLAYLIST_BATCH) {
            let uris: Vec<String> = batch.iter().map(Track::uri).collect();
            let body = serde_json::json!({ "uris": uris });
            self.send(|token| self.http.post(&url).bearer_auth(token).json(&body))
                .await?;
            debug!("Added {} tracks to playlist {playlist_id}", batch.len());
        }
        Ok(())
    }

    /// Save tracks to the listener's library ("liked songs").
    pub async fn save_to_library(&self, tracks: &[Track]) -> Result<(), CatalogError> {
        let url = self.url("me/tracks");
        for batch in tracks.chunks(LIBRARY_BATCH) {
            let ids = batch
                .iter()
                .map(|track| track.id.as_str())
                .collect::<Vec<_>>()
                .join(",");
            self.send(|token| self.http.put(&url).bearer_auth(token).query(&[("ids", &ids)]))
                .await?;
            debug!("Saved {} tracks to library", batch.len());
        }
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, CatalogError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(CatalogError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    Err(CatalogError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl CatalogApi for SpotifyClient {
    async fn recommendations(&self, query: &RecommendationQuery) -> Result<Vec<Track>, CatalogError> {
        let mut pairs = query.to_query_pairs();
        if query.market.is_none() {
            if let Some(market) = &self.market {
                pairs.push(("market".to_string(), market.clone()));
            }
        }
        let page: RecommendationsPage = self.get_json("recommendations", &pairs).await?;
        Ok(page.tracks.into_iter().filter_map(TrackObject::into_track).collect())
    }

    async fn top_artists(&self, limit: usize, offset: usize) -> Result<Vec<ArtistSummary>, CatalogError> {
        let pairs = paging(limit, offset);
        let page: Paging<ArtistSummary> = self.get_json("me/top/artists", &pairs).await?;
        Ok(page.items)
    }

    async fn top_tracks(&self, limit: usize, offset: usize, range: TimeRange) -> Result<Vec<String>, CatalogError> {
        let mut pairs = paging(limit, offset);
        pairs.push(("time_range".to_string(), range.as_str().to_string()));
        let page: Paging<TrackRef> = self.get_json("me/top/tracks", &pairs).await?;
        Ok(page.items.into_iter().filter_map(|track| track.id).collect())
    }
}

fn paging(limit: usize, offset: usize) -> Vec<(String, String)> {
    vec![
        ("limit".to_string(), limit.to_string()),
        ("offset".to_string(), offset.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingRefresher {
        calls: AtomicUsize,
        outcome: fn(usize) -> Result<TokenGrant, CatalogError>,
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self) -> Result<TokenGrant, CatalogError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            (self.outcome)(n)
        }
    }

    fn grant(n: usize) -> Result<TokenGrant, CatalogError> {
        Ok(TokenGrant {
            access_token: format!("fresh-{n}"),
            refresh_token: None,
        })
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_are_single_flight() {
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            outcome: grant,
        });
        let tokens = Arc::new(TokenManager::new("stale", Some(refresher.clone() as Arc<dyn TokenRefresher>)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tokens = Arc::clone(&tokens);
            handles.push(tokio::spawn(async move { tokens.refresh_after("stale").await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "fresh-0");
        }

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(tokens.refresh_count(), 1);
        assert_eq!(tokens.current().await, "fresh-0");
    }

    #[tokio::test]
    async fn test_refresh_without_credentials_is_unauthorized() {
        let tokens = TokenManager::new("stale", None);
        assert!(matches!(
            tokens.refresh_after("stale").await,
            Err(CatalogError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn test_rejected_refresh_is_unauthorized() {
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            outcome: |_| {
                Err(CatalogError::Status {
                    status: 400,
                    body: "invalid_grant".into(),
                })
            },
        });
        let tokens = TokenManager::new("stale", Some(refresher as Arc<dyn TokenRefresher>));
        assert!(matches!(
            tokens.refresh_after("stale").await,
            Err(CatalogError::Unauthorized)
        ));
        assert_eq!(tokens.current().await, "stale");
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint_is_refresh_failure() {
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            outcome: |_| Err(CatalogError::Transport("connection refused".into())),
        });
        let tokens = TokenManager::new("stale", Some(refresher as Arc<dyn TokenRefresher>));
        let err = tokens.refresh_after("stale").await.unwrap_err();

        assert!(matches!(err, CatalogError::Refresh(ref message) if message.contains("connection refused")));
        assert_eq!(tokens.refresh_count(), 0);
    }

    #[test]
    fn test_parse_recommendations_page() {
        let body = r#"{
            "tracks": [
                {
                    "id": "abc",
                    "name": "Song",
                    "artists": [{"name": "First"}, {"name": "Second"}],
                    "album": {"images": [{"url": "https://img/large"}, {"url": "https://img/small"}]},
                    "preview_url": null
                },
                {"id": null, "name": "Local file", "artists": []}
            ]
        }"#;
        let page: RecommendationsPage = serde_json::from_str(body).unwrap();
        let tracks: Vec<Track> = page.tracks.into_iter().filter_map(TrackObject::into_track).collect();

        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].artist, "First");
        assert_eq!(tracks[0].artwork_url.as_deref(), Some("https://img/large"));
        assert_eq!(tracks[0].preview_url, None);
    }

    #[test]
    fn test_parse_top_artists() {
        let body = r#"{"items": [{"id": "a1", "name": "A", "genres": ["jazz", "bebop"]}], "total": 1}"#;
        let page: Paging<ArtistSummary> = serde_json::from_str(body).unwrap();
        assert_eq!(page.items[0].genres, vec!["jazz", "bebop"]);
    }

    #[test]
    fn test_url_joining() {
        let tokens = Arc::new(TokenManager::new("t", None));
        let client = SpotifyClient::new("http://localhost:9/v1/", tokens).unwrap();
        assert_eq!(client.url("/me/tracks"), "http://localhost:9/v1/me/tracks");
    }
}
