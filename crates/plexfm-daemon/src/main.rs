mod auth;
mod cli;
mod lastfm;
mod plex;
#[cfg(test)]
mod test_http;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use plexfm_proto::config::Config;
use plexfm_proto::platform;
use plexfm_proto::protocol::PlaybackEvent;
use plexfm_proto::session::SessionTracker;
use plexfm_proto::supervisor::ReconnectSupervisor;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::Cli;
use crate::lastfm::{Credentials, LastFm};
use crate::plex::{PlexClient, PlexNotifications};

/// stderr + append-mode log file, filtered by `RUST_LOG` when set.
fn init_logging(verbose: bool) -> anyhow::Result<PathBuf> {
    let log_path = platform::log_path();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let default_filter = if verbose {
        "info,plexfm_daemon=debug,plexfm_proto=debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "{},hyper=warn,hyper_util=warn,reqwest=warn,tungstenite=warn,tokio_tungstenite=warn",
            default_filter
        ))
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false),
        )
        .with(filter)
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)
        .with_context(|| format!("loading config {:?}", config_path))?;
    cli.apply(&mut config);

    let log_path = init_logging(config.log.verbose)?;
    info!("Log file: {:?}", log_path);
    info!("Config loaded from: {:?}", config_path);

    config.validate()?;

    let credentials = Credentials {
        api_key: config.lastfm.api_key.clone(),
        shared_secret: config.lastfm.shared_secret.clone(),
    };
    let session_key = auth::session_key(&credentials, &platform::session_dir(), &config.lastfm.user)
        .await
        .context("error logging in to last.fm")?;
    info!("logged in to last.fm");

    let lastfm = LastFm::new(credentials, session_key);
    let plex = PlexClient::new(&config.plex.server_url, &config.plex.token)?;
    let notifications = PlexNotifications::new(&config.plex.server_url, &config.plex.token)?;

    // Every notification funnels into the one tracker task.
    let (event_tx, event_rx) = mpsc::channel::<PlaybackEvent>(config.daemon.event_buffer);
    let tracker = SessionTracker::new(plex, lastfm, config.plex.music_library.clone());
    let supervisor =
        ReconnectSupervisor::new(notifications, event_tx, config.daemon.reconnect_delay());

    info!(
        "scrobbling plays from library {:?} on {}",
        config.plex.music_library, config.plex.server_url
    );
    let tracker_task = tokio::spawn(tracker.run(event_rx));
    let supervisor_task = tokio::spawn(supervisor.run());

    wait_for_shutdown(tracker_task, supervisor_task, tokio::signal::ctrl_c()).await
}

/// Blocks until `shutdown` resolves. Neither task is meant to finish, so one
/// ending (or panicking) first is an error and the process exits non-zero.
async fn wait_for_shutdown<T>(
    tracker: JoinHandle<T>,
    supervisor: JoinHandle<()>,
    shutdown: impl Future<Output = std::io::Result<()>>,
) -> anyhow::Result<()> {
    tokio::select! {
        result = supervisor => {
            result.context("supervisor task failed")?;
            Err(anyhow::anyhow!("supervisor stopped unexpectedly"))
        }
        result = tracker => {
            result.context("tracker task failed")?;
            Err(anyhow::anyhow!("tracker stopped: event channel closed"))
        }
        result = shutdown => {
            result?;
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}
