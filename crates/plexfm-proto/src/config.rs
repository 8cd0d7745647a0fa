use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub plex: PlexConfig,
    #[serde(default)]
    pub lastfm: LastFmConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlexConfig {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub token: String,
    /// Title of the Plex library whose plays are scrobbled.
    #[serde(default = "default_music_library")]
    pub music_library: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastFmConfig {
    /// Picks the `<user>_lastfm_session` file. Empty means "the only one there is".
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub shared_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub verbose: bool,
}

impl Default for PlexConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            token: String::new(),
            music_library: default_music_library(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl DaemonConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

fn default_server_url() -> String {
    "http://localhost:32400".to_string()
}

fn default_music_library() -> String {
    "Music".to_string()
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_event_buffer() -> usize {
    64
}

impl Config {
    /// Reads `path`, writing a default config there first if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Checks the credentials the daemon cannot start without.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.plex.token.trim().is_empty() {
            anyhow::bail!("please supply a plex token (config plex.token, --token or PLEX_TOKEN)");
        }
        if self.lastfm.api_key.trim().is_empty() {
            anyhow::bail!("please supply a last.fm api key (config lastfm.api_key or LASTFM_API_KEY)");
        }
        if self.lastfm.shared_secret.trim().is_empty() {
            anyhow::bail!(
                "please supply a last.fm shared secret (config lastfm.shared_secret or LASTFM_SHARED_SECRET)"
            );
        }
        if self.daemon.event_buffer == 0 {
            anyhow::bail!("daemon.event_buffer must be at least 1");
        }
        Ok(())
    }
}
