//! Last.fm API client: request signing and the two scrobble operations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use plexfm_proto::protocol::ScrobbleCandidate;
use plexfm_proto::session::ScrobbleSubmitter;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub const API_URL: &str = "https://ws.audioscrobbler.com/2.0/";

#[derive(Debug, Error)]
pub enum LastFmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error payload returned by the service itself.
    #[error("last.fm error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("login: invalid api key")]
    InvalidApiKey,

    #[error("invalid response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("session file error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub shared_secret: String,
}

/// Parameter set of one API call, kept sorted by name for signing.
pub type Params = BTreeMap<&'static str, String>;

/// `name1value1name2value2...secret`, names in byte order.
pub fn signature_base(params: &Params, shared_secret: &str) -> String {
    let mut base = String::new();
    for (name, value) in params {
        base.push_str(name);
        base.push_str(value);
    }
    base.push_str(shared_secret);
    base
}

/// Lowercase hex MD5 of [`signature_base`].
pub fn sign(params: &Params, shared_secret: &str) -> String {
    format!("{:x}", md5::compute(signature_base(params, shared_secret)))
}

/// Turn a response body into JSON, surfacing service-level errors.
pub fn parse_response(status: reqwest::StatusCode, body: &str) -> Result<Value, LastFmError> {
    let parsed: Result<Value, _> = serde_json::from_str(body);
    if let Ok(value) = &parsed {
        if let Some(code) = value.get("error").and_then(Value::as_i64) {
            return Err(LastFmError::Api {
                code,
                message: value["message"].as_str().unwrap_or_default().to_string(),
            });
        }
    }
    if !status.is_success() {
        return Err(LastFmError::Status {
            status: status.as_u16(),
            body: body.to_string(),
        });
    }
    Ok(parsed?)
}

pub struct LastFm {
    http: reqwest::Client,
    credentials: Credentials,
    session_key: String,
    api_url: String,
}

impl LastFm {
    pub fn new(credentials: Credentials, session_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            session_key,
            api_url: API_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn track_params(&self, method: &str, candidate: &ScrobbleCandidate) -> Params {
        let mut params = Params::new();
        params.insert("album", candidate.album.clone());
        params.insert("artist", candidate.artist.clone());
        params.insert("api_key", self.credentials.api_key.clone());
        params.insert("method", method.to_string());
        params.insert("duration", candidate.duration_secs.to_string());
        params.insert("sk", self.session_key.clone());
        params.insert("track", candidate.track.clone());
        params.insert("trackNumber", candidate.track_number.to_string());
        params
    }

    /// Signed form POST. `api_sig` covers everything except `format`.
    async fn call(&self, mut params: Params) -> Result<Value, LastFmError> {
        let api_sig = sign(&params, &self.credentials.shared_secret);
        params.insert("api_sig", api_sig);
        params.insert("format", "json".to_string());

        let resp = self.http.post(&self.api_url).form(&params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        parse_response(status, &body)
    }
}

#[async_trait]
impl ScrobbleSubmitter for LastFm {
    async fn now_playing(&self, candidate: &ScrobbleCandidate) -> anyhow::Result<()> {
        self.call(self.track_params("track.updateNowPlaying", candidate))
            .await?;
        Ok(())
    }

    async fn scrobble(&self, candidate: &ScrobbleCandidate) -> anyhow::Result<()> {
        let mut params = self.track_params("track.scrobble", candidate);
        params.insert("timestamp", candidate.started_at.timestamp().to_string());
        let resp = self.call(params).await?;

        let attrs = &resp["scrobbles"]["@attr"];
        debug!(
            "lastfm: scrobble accepted={} ignored={}",
            attrs["accepted"], attrs["ignored"]
        );
        Ok(())
    }
}
