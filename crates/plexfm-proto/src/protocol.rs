use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State/type tag Plex uses for an actively playing session.
pub const STATE_PLAYING: &str = "playing";

// ── Domain types ──────────────────────────────────────────────────────────────

/// One "now playing" notification for a media session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub session_key: String,
    /// Raw playback position in milliseconds.
    pub view_offset_ms: i64,
    pub state: String,
    /// Plex item identifier (`ratingKey`).
    pub rating_key: String,
    /// Library section label when the notification carries one. Plex
    /// websocket notifications usually do not; the metadata label is used then.
    pub library_section: Option<String>,
    /// Container type of the notification, e.g. "playing".
    pub event_type: String,
}

impl PlaybackEvent {
    pub fn is_actively_playing(&self) -> bool {
        self.state == STATE_PLAYING && self.event_type == STATE_PLAYING
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub album: String,
    pub artist: String,
    pub title: String,
    pub duration_ms: i64,
    pub index: i64,
    pub library_section: String,
}

/// What gets sent to the tracking service, for both now-playing and scrobble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrobbleCandidate {
    pub album: String,
    pub artist: String,
    pub track: String,
    pub duration_secs: i64,
    pub track_number: i64,
    pub started_at: DateTime<Utc>,
}

impl ScrobbleCandidate {
    /// Builds a candidate, normalizing artist and track titles.
    pub fn new(metadata: &TrackMetadata, duration_secs: i64, started_at: DateTime<Utc>) -> Self {
        Self {
            album: metadata.album.clone(),
            artist: normalize_title(&metadata.artist),
            track: normalize_title(&metadata.title),
            duration_secs,
            track_number: metadata.index,
            started_at,
        }
    }
}

/// Replaces typographic apostrophes and hyphens with their ASCII forms so
/// titles match the tracking service's canonical metadata.
pub fn normalize_title(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201B}' | '\u{02BC}' | '\u{2032}' => '\'',
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2212}' => '-',
            other => other,
        })
        .collect()
}

// ── Plex wire format ──────────────────────────────────────────────────────────

/// Top-level websocket frame from `/:/websockets/notifications`.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationFrame {
    #[serde(rename = "NotificationContainer")]
    pub container: NotificationContainer,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationContainer {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "PlaySessionStateNotification", default)]
    pub play_session_state: Vec<PlaySessionStateNotification>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaySessionStateNotification {
    #[serde(default)]
    pub session_key: String,
    #[serde(default)]
    pub rating_key: String,
    #[serde(default)]
    pub view_offset: i64,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub library_section_title: Option<String>,
}

impl NotificationContainer {
    pub fn into_events(self) -> Vec<PlaybackEvent> {
        let kind = self.kind;
        self.play_session_state
            .into_iter()
            .map(|n| PlaybackEvent {
                session_key: n.session_key,
                view_offset_ms: n.view_offset,
                state: n.state,
                rating_key: n.rating_key,
                library_section: n.library_section_title,
                event_type: kind.clone(),
            })
            .collect()
    }
}

/// Response body of `GET /library/metadata/{ratingKey}`.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataResponse {
    #[serde(rename = "MediaContainer")]
    pub container: MediaContainer,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaContainer {
    #[serde(default)]
    pub library_section_title: Option<String>,
    #[serde(rename = "Metadata", default)]
    pub metadata: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataItem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub parent_title: String,
    #[serde(default)]
    pub grandparent_title: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub library_section_title: Option<String>,
}

impl MetadataResponse {
    /// First metadata item as a `TrackMetadata`, or `None` if the list is empty.
    pub fn into_track(self) -> Option<TrackMetadata> {
        let container_section = self.container.library_section_title;
        let item = self.container.metadata.into_iter().next()?;
        Some(TrackMetadata {
            album: item.parent_title,
            artist: item.grandparent_title,
            title: item.title,
            duration_ms: item.duration,
            index: item.index,
            library_section: item
                .library_section_title
                .or(container_section)
                .unwrap_or_default(),
        })
    }
}
