use std::path::PathBuf;

use clap::Parser;
use plexfm_proto::config::Config;

/// Scrobble what a Plex server is playing to Last.fm.
///
/// Flags override `config.toml`.
#[derive(Parser, Debug, Default)]
#[command(name = "plexfm", version)]
pub struct Cli {
    /// Path to config.toml (defaults to the platform config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Plex server url, e.g. http://localhost:32400
    #[arg(short, long)]
    pub server: Option<String>,

    /// Plex token
    #[arg(short, long, env = "PLEX_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Title of the Plex music library
    #[arg(short, long)]
    pub music_library: Option<String>,

    /// Last.fm user whose stored session to use, not required if only one is logged in
    #[arg(short = 'u', long)]
    pub lastfm_user: Option<String>,

    /// Last.fm API key
    #[arg(long, env = "LASTFM_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Last.fm shared secret
    #[arg(long, env = "LASTFM_SHARED_SECRET", hide_env_values = true)]
    pub shared_secret: Option<String>,

    /// Debug logging for plexfm itself
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn apply(&self, config: &mut Config) {
        if let Some(server) = &self.server {
            config.plex.server_url = server.clone();
        }
        if let Some(token) = &self.token {
            config.plex.token = token.clone();
        }
        if let Some(library) = &self.music_library {
            config.plex.music_library = library.clone();
        }
        if let Some(user) = &self.lastfm_user {
            config.lastfm.user = user.clone();
        }
        if let Some(key) = &self.api_key {
            config.lastfm.api_key = key.clone();
        }
        if let Some(secret) = &self.shared_secret {
            config.lastfm.shared_secret = secret.clone();
        }
        if self.verbose {
            config.log.verbose = true;
        }
    }
}
