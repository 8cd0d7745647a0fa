//! Last.fm session token: stored in `<user>_lastfm_session` files, obtained
//! once through the interactive web authorization flow.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::lastfm::{parse_response, sign, Credentials, LastFmError, Params, API_URL};

pub const SESSION_FILE_SUFFIX: &str = "_lastfm_session";
const AUTHORIZE_URL: &str = "https://www.last.fm/api/auth/";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session: WebSession,
}

#[derive(Debug, Deserialize)]
struct WebSession {
    name: String,
    key: String,
}

pub fn session_file_name(user: &str) -> String {
    format!("{}{}", user, SESSION_FILE_SUFFIX)
}

/// The session file for `user`, or the first one in `dir` when `user` is empty.
pub fn find_session_file(dir: &Path, user: &str) -> std::io::Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|name| {
                    if user.is_empty() {
                        name.ends_with(SESSION_FILE_SUFFIX)
                    } else {
                        name == session_file_name(user)
                    }
                })
                .unwrap_or(false)
        })
        .collect();
    matches.sort();
    if matches.len() > 1 {
        warn!(
            "auth: {} session files found, using {:?}; pass a last.fm user to choose",
            matches.len(),
            matches[0]
        );
    }
    Ok(matches.into_iter().next())
}

pub fn load_session(dir: &Path, user: &str) -> std::io::Result<Option<String>> {
    let Some(path) = find_session_file(dir, user)? else {
        return Ok(None);
    };
    let key = std::fs::read_to_string(&path)?.trim().to_string();
    if key.is_empty() {
        warn!("auth: ignoring empty session file {:?}", path);
        return Ok(None);
    }
    debug!("auth: using session file {:?}", path);
    Ok(Some(key))
}

pub async fn save_session(dir: &Path, user: &str, key: &str) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(session_file_name(user));
    tokio::fs::write(&path, key).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(path)
}

/// Stored session key, or an interactive login when there is none.
pub async fn session_key(
    credentials: &Credentials,
    dir: &Path,
    user: &str,
) -> Result<String, LastFmError> {
    if let Some(key) = load_session(dir, user)? {
        return Ok(key);
    }
    info!("auth: no stored last.fm session, starting login");
    login(credentials, dir).await
}

/// Web authorization flow: fetch a token, have the user approve it in a
/// browser, exchange it for a session key and store that.
pub async fn login(credentials: &Credentials, dir: &Path) -> Result<String, LastFmError> {
    let http = reqwest::Client::new();

    info!("auth: getting auth token");
    let resp = http
        .get(API_URL)
        .query(&[
            ("method", "auth.gettoken"),
            ("api_key", credentials.api_key.as_str()),
            ("format", "json"),
        ])
        .send()
        .await?;
    if resp.status() == reqwest::StatusCode::FORBIDDEN {
        return Err(LastFmError::InvalidApiKey);
    }
    let status = resp.status();
    let body = resp.text().await?;
    let token: TokenResponse = serde_json::from_value(parse_response(status, &body)?)?;
    info!("auth: got auth token");

    println!(
        "Please open {}?api_key={}&token={} in your browser and press enter after you're done",
        AUTHORIZE_URL, credentials.api_key, token.token
    );
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

    info!("auth: fetching session");
    let mut params = Params::new();
    params.insert("api_key", credentials.api_key.clone());
    params.insert("method", "auth.getSession".to_string());
    params.insert("token", token.token);
    let api_sig = sign(&params, &credentials.shared_secret);
    params.insert("api_sig", api_sig);
    params.insert("format", "json".to_string());

    let resp = http.get(API_URL).query(&params).send().await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        warn!("auth: getSession failed: {}", body);
    }
    let session: SessionResponse = serde_json::from_value(parse_response(status, &body)?)?;
    info!("auth: got session for {}", session.session.name);

    let path = save_session(dir, &session.session.name, &session.session.key).await?;
    info!("auth: session stored in {:?}", path);
    Ok(session.session.key)
}
