/// Plex Media Server collaborators.
///
///   - `PlexClient` — item metadata over HTTP (`GET /library/metadata/{key}`).
///   - `PlexNotifications` — play-state notifications over the server's
///     websocket.  Owns the transport; the Reconnect Supervisor drives it.
///
/// ```text
///   PlexNotifications::subscribe()
///         │
///         └── reader_task  ← reads JSON frames from the websocket
///                              ├── PlaySessionStateNotification → event channel
///                              └── close / error → Subscription resolves
/// ```
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use plexfm_proto::protocol::{MetadataResponse, NotificationFrame, PlaybackEvent, TrackMetadata};
use plexfm_proto::session::MetadataFetcher;
use plexfm_proto::supervisor::{NotificationSource, Subscription};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

const PRODUCT: &str = "plexfm";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum PlexError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {path}")]
    Status { status: u16, path: String },

    #[error("no metadata for item {0}")]
    NoMetadata(String),

    #[error("invalid server url {0:?}")]
    InvalidUrl(String),

    #[error("invalid token: {0}")]
    InvalidToken(#[from] reqwest::header::InvalidHeaderValue),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

// ── HTTP client ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct PlexClient {
    server_url: String,
    token: String,
    http: reqwest::Client,
}

impl PlexClient {
    pub fn new(server_url: &str, token: &str) -> Result<Self, PlexError> {
        let server_url = server_url.trim_end_matches('/').to_string();
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            return Err(PlexError::InvalidUrl(server_url));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut token_value = HeaderValue::from_str(token)?;
        token_value.set_sensitive(true);
        headers.insert("x-plex-token", token_value);
        headers.insert("x-plex-product", HeaderValue::from_static(PRODUCT));
        headers.insert("x-plex-client-identifier", HeaderValue::from_static(PRODUCT));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            server_url,
            token: token.to_string(),
            http,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Cheap reachability probe.
    pub async fn check_identity(&self) -> Result<(), PlexError> {
        self.get("/identity").await?;
        Ok(())
    }

    pub fn notifications_url(&self) -> String {
        let ws_base = if let Some(rest) = self.server_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.server_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.server_url.clone()
        };
        format!(
            "{}/:/websockets/notifications?X-Plex-Token={}",
            ws_base, self.token
        )
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, PlexError> {
        let resp = self
            .http
            .get(format!("{}{}", self.server_url, path))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(PlexError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl MetadataFetcher for PlexClient {
    async fn fetch(&self, item_id: &str) -> anyhow::Result<TrackMetadata> {
        let resp = self.get(&format!("/library/metadata/{}", item_id)).await?;
        let body: MetadataResponse = resp.json().await.map_err(PlexError::from)?;
        let track = body
            .into_track()
            .ok_or_else(|| PlexError::NoMetadata(item_id.to_string()))?;
        debug!(
            "plex: item={} is {} - {} ({} ms, library {:?})",
            item_id, track.artist, track.title, track.duration_ms, track.library_section
        );
        Ok(track)
    }
}

// ── notifications ─────────────────────────────────────────────────────────────

pub struct PlexNotifications {
    server_url: String,
    token: String,
    client: PlexClient,
}

impl PlexNotifications {
    pub fn new(server_url: &str, token: &str) -> Result<Self, PlexError> {
        Ok(Self {
            server_url: server_url.to_string(),
            token: token.to_string(),
            client: PlexClient::new(server_url, token)?,
        })
    }
}

#[async_trait]
impl NotificationSource for PlexNotifications {
    async fn reconnect(&mut self) -> anyhow::Result<()> {
        let client = PlexClient::new(&self.server_url, &self.token)?;
        client
            .check_identity()
            .await
            .with_context(|| format!("plex server {} unreachable", client.server_url()))?;
        info!("plex: server {} reachable again", client.server_url());
        self.client = client;
        Ok(())
    }

    async fn subscribe(
        &mut self,
        events: mpsc::Sender<PlaybackEvent>,
    ) -> anyhow::Result<Subscription> {
        let (ws, _) = tokio_tungstenite::connect_async(self.client.notifications_url())
            .await
            .map_err(PlexError::from)
            .with_context(|| {
                format!("opening notification socket on {}", self.client.server_url())
            })?;
        info!("plex: notification socket open on {}", self.client.server_url());

        let (closed_tx, subscription) = Subscription::channel();
        tokio::spawn(reader_task(ws, events, closed_tx));
        Ok(subscription)
    }
}

/// Frames that are not play-state notifications yield nothing.
pub fn parse_notification(text: &str) -> Vec<PlaybackEvent> {
    match serde_json::from_str::<NotificationFrame>(text) {
        Ok(frame) => frame.container.into_events(),
        Err(e) => {
            debug!("plex: skipping frame: {}", e);
            Vec::new()
        }
    }
}

async fn reader_task<S>(
    mut ws: WebSocketStream<S>,
    events: mpsc::Sender<PlaybackEvent>,
    closed: oneshot::Sender<anyhow::Error>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reason = 'read: loop {
        match ws.next().await {
            None => break anyhow::anyhow!("notification socket closed"),
            Some(Err(e)) => {
                break anyhow::Error::new(e).context("notification socket read error");
            }
            Some(Ok(Message::Close(frame))) => {
                break anyhow::anyhow!("server closed notification socket: {:?}", frame);
            }
            Some(Ok(Message::Text(text))) => {
                for event in parse_notification(&text) {
                    debug!(
                        "plex: session={} item={} state={} offset={}ms",
                        event.session_key, event.rating_key, event.state, event.view_offset_ms
                    );
                    if events.send(event).await.is_err() {
                        break 'read anyhow::anyhow!("event consumer gone");
                    }
                }
            }
            Some(Ok(_)) => {}
        }
    };
    debug!("plex reader: task exiting");
    let _ = closed.send(reason);
}
