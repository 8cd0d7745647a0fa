#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use plexfm_proto::protocol::{PlaybackEvent, ScrobbleCandidate, TrackMetadata};
use plexfm_proto::session::{MetadataFetcher, ScrobbleSubmitter};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub const LIBRARY: &str = "Music";

pub fn track(title: &str, duration_secs: i64) -> TrackMetadata {
    TrackMetadata {
        album: format!("{title} (album)"),
        artist: "Artist".to_string(),
        title: title.to_string(),
        duration_ms: duration_secs * 1000,
        index: 1,
        library_section: LIBRARY.to_string(),
    }
}

pub fn playing(item: &str, offset_ms: i64) -> PlaybackEvent {
    PlaybackEvent {
        session_key: "1".to_string(),
        view_offset_ms: offset_ms,
        state: "playing".to_string(),
        rating_key: item.to_string(),
        library_section: None,
        event_type: "playing".to_string(),
    }
}

/// Metadata by item id. Unknown items and items in `failing` return errors.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    tracks: Arc<Mutex<HashMap<String, TrackMetadata>>>,
    failing: Arc<Mutex<HashSet<String>>>,
}

impl FakeFetcher {
    pub fn with(self, item: &str, metadata: TrackMetadata) -> Self {
        self.tracks.lock().unwrap().insert(item.to_string(), metadata);
        self
    }

    pub fn fail(&self, item: &str) {
        self.failing.lock().unwrap().insert(item.to_string());
    }
}

#[async_trait]
impl MetadataFetcher for FakeFetcher {
    async fn fetch(&self, item_id: &str) -> Result<TrackMetadata> {
        if self.failing.lock().unwrap().contains(item_id) {
            return Err(anyhow!("metadata request for {item_id} failed"));
        }
        self.tracks
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .ok_or_else(|| anyhow!("no metadata for {item_id}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    NowPlaying(ScrobbleCandidate),
    Scrobble(ScrobbleCandidate),
}

/// Records every call; can be told to fail them.
#[derive(Clone, Default)]
pub struct RecordingSubmitter {
    calls: Arc<Mutex<Vec<Call>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingSubmitter {
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn scrobbles(&self) -> Vec<ScrobbleCandidate> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Scrobble(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn now_playing(&self) -> Vec<ScrobbleCandidate> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::NowPlaying(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if *self.fail.lock().unwrap() {
            Err(anyhow!("service unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ScrobbleSubmitter for RecordingSubmitter {
    async fn now_playing(&self, candidate: &ScrobbleCandidate) -> Result<()> {
        self.record(Call::NowPlaying(candidate.clone()))
    }

    async fn scrobble(&self, candidate: &ScrobbleCandidate) -> Result<()> {
        self.record(Call::Scrobble(candidate.clone()))
    }
}
