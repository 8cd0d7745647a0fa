//! Session Tracker — turns a noisy stream of Plex "playing" notifications into
//! now-playing announcements and scrobbles.
//!
//! Per event, in this order:
//!
//! ```text
//!   filter (state/type, metadata, library)
//!     └── track boundary?  (offset < 3 s and a track was already eligible)
//!           ├── flush pending scrobble (one attempt, cleared either way)
//!           └── reset last_scrobbled_id + session_started_at
//!     └── eligibility      (dur > 30 s and (cur >= dur/2 or cur >= 240 s))
//!           └── queue candidate as pending, remember item id
//!     └── now-playing      (only when the item id changed)
//! ```
//!
//! The tracker is owned by a single task and takes `&mut self` per event, so
//! the whole sequence is observed atomically without a lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::protocol::{PlaybackEvent, ScrobbleCandidate, TrackMetadata};

/// Offsets below this mark the start of a new track run.
pub const BOUNDARY_OFFSET_MS: i64 = 3000;
/// Tracks this long or shorter never scrobble.
pub const MIN_SCROBBLE_DURATION_SECS: i64 = 30;
/// Playing this long makes a track eligible even before the halfway point.
pub const MAX_WAIT_SECS: i64 = 4 * 60;

// ── collaborator seams ────────────────────────────────────────────────────────

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    async fn fetch(&self, item_id: &str) -> anyhow::Result<TrackMetadata>;
}

#[async_trait]
pub trait ScrobbleSubmitter: Send + Sync {
    async fn now_playing(&self, candidate: &ScrobbleCandidate) -> anyhow::Result<()>;
    async fn scrobble(&self, candidate: &ScrobbleCandidate) -> anyhow::Result<()>;
}

// ── state ─────────────────────────────────────────────────────────────────────

/// Mutable playback state. Lives as long as the process; only fields are reset.
///
/// `pending_scrobble` is only ever `Some` while `last_scrobbled_id` is non-empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    /// Item already marked eligible in the current track run ("" = none).
    pub last_scrobbled_id: String,
    /// Item last announced as now playing.
    pub now_playing_id: String,
    pub session_started_at: Option<DateTime<Utc>>,
    pub pending_scrobble: Option<ScrobbleCandidate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotPlaying,
    MetadataUnavailable,
    OtherLibrary,
}

/// Which transitions a retained event caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transitions {
    pub boundary: bool,
    pub flushed: bool,
    pub eligible: bool,
    pub announced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    Handled(Transitions),
}

// ── pure rules ────────────────────────────────────────────────────────────────

/// Milliseconds to whole seconds, half away from zero.
pub fn rounded_secs(ms: i64) -> i64 {
    (ms as f64 / 1000.0).round() as i64
}

pub fn is_track_boundary(view_offset_ms: i64, last_scrobbled_id: &str) -> bool {
    view_offset_ms < BOUNDARY_OFFSET_MS && !last_scrobbled_id.is_empty()
}

/// Half played, or four minutes in, whichever comes first. Short tracks never qualify.
pub fn is_eligible(current_secs: i64, duration_secs: i64) -> bool {
    duration_secs > MIN_SCROBBLE_DURATION_SECS
        && (current_secs as f64 >= duration_secs as f64 * 0.5 || current_secs >= MAX_WAIT_SECS)
}

// ── tracker ───────────────────────────────────────────────────────────────────

pub struct SessionTracker<F, S> {
    fetcher: F,
    submitter: S,
    music_library: String,
    state: SessionState,
}

impl<F, S> SessionTracker<F, S>
where
    F: MetadataFetcher,
    S: ScrobbleSubmitter,
{
    pub fn new(fetcher: F, submitter: S, music_library: impl Into<String>) -> Self {
        Self {
            fetcher,
            submitter,
            music_library: music_library.into(),
            state: SessionState::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Consume events until every sender is dropped, then hand the tracker back.
    pub async fn run(mut self, mut events: mpsc::Receiver<PlaybackEvent>) -> Self {
        info!("tracker: waiting for playback events (library {:?})", self.music_library);
        while let Some(event) = events.recv().await {
            self.handle(&event).await;
        }
        info!("tracker: event channel closed");
        self
    }

    pub async fn handle(&mut self, event: &PlaybackEvent) -> Outcome {
        if !event.is_actively_playing() {
            debug!(
                "tracker: ignoring item={} state={} type={}",
                event.rating_key, event.state, event.event_type
            );
            return Outcome::Skipped(SkipReason::NotPlaying);
        }

        let metadata = match self.fetcher.fetch(&event.rating_key).await {
            Ok(m) => m,
            Err(e) => {
                error!("tracker: error getting metadata for item={}: {:#}", event.rating_key, e);
                return Outcome::Skipped(SkipReason::MetadataUnavailable);
            }
        };

        let section = event
            .library_section
            .as_deref()
            .unwrap_or(metadata.library_section.as_str());
        if section != self.music_library {
            debug!("tracker: ignoring item={} from library {:?}", event.rating_key, section);
            return Outcome::Skipped(SkipReason::OtherLibrary);
        }

        let now = Utc::now();
        let mut transitions = Transitions::default();

        if is_track_boundary(event.view_offset_ms, &self.state.last_scrobbled_id) {
            debug!(
                "tracker: new track run at item={} offset={}ms",
                event.rating_key, event.view_offset_ms
            );
            transitions.boundary = true;
            transitions.flushed = self.flush_pending().await;
            self.state.last_scrobbled_id.clear();
            self.state.session_started_at = Some(now);
        }
        let started_at = *self.state.session_started_at.get_or_insert(now);

        let current_secs = rounded_secs(event.view_offset_ms);
        let duration_secs = rounded_secs(metadata.duration_ms);
        let candidate = ScrobbleCandidate::new(&metadata, duration_secs, started_at);

        if self.state.last_scrobbled_id.is_empty() && is_eligible(current_secs, duration_secs) {
            info!(
                "tracker: {} - {} eligible at {}s of {}s, scrobble deferred to next track",
                candidate.artist, candidate.track, current_secs, duration_secs
            );
            self.state.pending_scrobble = Some(candidate.clone());
            self.state.last_scrobbled_id = event.rating_key.clone();
            transitions.eligible = true;
        } else {
            debug!(
                "tracker: not scrobbling: current {}s, duration/2 {:.2}s",
                current_secs,
                duration_secs as f64 / 2.0
            );
        }

        if event.rating_key != self.state.now_playing_id {
            match self.submitter.now_playing(&candidate).await {
                Ok(()) => info!("tracker: now playing {} - {}", candidate.artist, candidate.track),
                Err(e) => error!("tracker: error setting now playing on track: {:#}", e),
            }
            self.state.now_playing_id = event.rating_key.clone();
            transitions.announced = true;
        }

        Outcome::Handled(transitions)
    }

    /// Submit the pending scrobble once. The slot is cleared whatever the result.
    async fn flush_pending(&mut self) -> bool {
        let Some(candidate) = self.state.pending_scrobble.take() else {
            return false;
        };
        match self.submitter.scrobble(&candidate).await {
            Ok(()) => info!(
                "tracker: scrobbled {} - {} (started {})",
                candidate.artist, candidate.track, candidate.started_at
            ),
            Err(e) => error!(
                "tracker: scrobble of {} - {} failed, dropping it: {:#}",
                candidate.artist, candidate.track, e
            ),
        }
        true
    }
}
