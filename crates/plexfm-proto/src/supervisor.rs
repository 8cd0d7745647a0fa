//! Reconnect Supervisor — keeps the notification subscription alive.
//!
//! ```text
//!   Subscribed ──(subscription closed)──► Disconnected ──► Reconnecting
//!        ▲                                                   │    ▲
//!        └───────────(reconnect ok + resubscribe ok)─────────┘    │
//!                                              (attempt failed, wait delay)
//! ```
//!
//! There is no terminal state. The delay between attempts is fixed and the
//! number of attempts is unbounded. The event sender handed to every
//! subscription is the same one, so whatever consumes events (the Session
//! Tracker) keeps its state across reconnects.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::protocol::PlaybackEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Subscribed,
    Disconnected,
    Reconnecting,
}

/// A live notification stream. Resolves once the transport is gone.
pub struct Subscription {
    closed: oneshot::Receiver<anyhow::Error>,
}

impl Subscription {
    /// Returns the subscription plus the sender the transport task uses to
    /// report why it stopped. Dropping the sender counts as a disconnect too.
    pub fn channel() -> (oneshot::Sender<anyhow::Error>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { closed: rx })
    }

    /// Wait until the transport ends and return the reason.
    pub async fn closed(self) -> anyhow::Error {
        match self.closed.await {
            Ok(reason) => reason,
            Err(_) => anyhow::anyhow!("notification task ended without a reason"),
        }
    }
}

#[async_trait]
pub trait NotificationSource: Send {
    /// Re-establish the underlying server connection.
    async fn reconnect(&mut self) -> anyhow::Result<()>;

    /// Start delivering events into `events`.
    async fn subscribe(
        &mut self,
        events: mpsc::Sender<PlaybackEvent>,
    ) -> anyhow::Result<Subscription>;
}

pub struct ReconnectSupervisor<N> {
    source: N,
    events: mpsc::Sender<PlaybackEvent>,
    delay: Duration,
    state_tx: watch::Sender<SupervisorState>,
    reconnects: u64,
}

impl<N: NotificationSource> ReconnectSupervisor<N> {
    pub fn new(source: N, events: mpsc::Sender<PlaybackEvent>, delay: Duration) -> Self {
        let (state_tx, _) = watch::channel(SupervisorState::Disconnected);
        Self {
            source,
            events,
            delay,
            state_tx,
            reconnects: 0,
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Runs until the process is killed or the task is aborted.
    pub async fn run(mut self) {
        loop {
            match self.source.subscribe(self.events.clone()).await {
                Ok(subscription) => {
                    self.set_state(SupervisorState::Subscribed);
                    info!("supervisor: subscribed to notifications");
                    let reason = subscription.closed().await;
                    warn!("supervisor: notifications disconnected: {:#}", reason);
                }
                Err(e) => warn!("supervisor: subscribe failed: {:#}", e),
            }

            self.set_state(SupervisorState::Disconnected);
            self.set_state(SupervisorState::Reconnecting);
            self.reconnect_until_ok().await;
        }
    }

    async fn reconnect_until_ok(&mut self) {
        let mut attempt = 0u64;
        loop {
            tokio::time::sleep(self.delay).await;
            attempt += 1;
            match self.source.reconnect().await {
                Ok(()) => {
                    self.reconnects += 1;
                    info!(
                        "supervisor: reconnected after {} attempt(s) ({} reconnects so far)",
                        attempt, self.reconnects
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        "supervisor: reconnect attempt {} failed, retrying in {:?}: {:#}",
                        attempt, self.delay, e
                    );
                }
            }
        }
    }

    fn set_state(&self, state: SupervisorState) {
        debug!("supervisor: -> {:?}", state);
        self.state_tx.send_replace(state);
    }
}
