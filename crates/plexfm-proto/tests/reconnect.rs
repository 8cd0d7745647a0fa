mod common;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::fakes::{playing, track, FakeFetcher, RecordingSubmitter, LIBRARY};
use plexfm_proto::protocol::PlaybackEvent;
use plexfm_proto::session::SessionTracker;
use plexfm_proto::supervisor::{
    NotificationSource, ReconnectSupervisor, Subscription, SupervisorState,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

const DELAY: Duration = Duration::from_secs(5);

/// Hands each live subscription to the test so it can push events and
/// cut the connection.
type LiveSubscription = (mpsc::Sender<PlaybackEvent>, oneshot::Sender<anyhow::Error>);

struct FakeSource {
    reconnect_failures_left: u32,
    subscribe_failures_left: u32,
    attempts: Arc<Mutex<Vec<Instant>>>,
    live: mpsc::UnboundedSender<LiveSubscription>,
}

impl FakeSource {
    fn new(
        reconnect_failures: u32,
        subscribe_failures: u32,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<LiveSubscription>,
        Arc<Mutex<Vec<Instant>>>,
    ) {
        let (live, live_rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let source = Self {
            reconnect_failures_left: reconnect_failures,
            subscribe_failures_left: subscribe_failures,
            attempts: attempts.clone(),
            live,
        };
        (source, live_rx, attempts)
    }
}

#[async_trait]
impl NotificationSource for FakeSource {
    async fn reconnect(&mut self) -> Result<()> {
        self.attempts.lock().unwrap().push(Instant::now());
        if self.reconnect_failures_left > 0 {
            self.reconnect_failures_left -= 1;
            return Err(anyhow!("connection refused"));
        }
        Ok(())
    }

    async fn subscribe(&mut self, events: mpsc::Sender<PlaybackEvent>) -> Result<Subscription> {
        if self.subscribe_failures_left > 0 {
            self.subscribe_failures_left -= 1;
            return Err(anyhow!("websocket handshake failed"));
        }
        let (close, subscription) = Subscription::channel();
        self.live
            .send((events, close))
            .map_err(|_| anyhow!("test dropped the receiver"))?;
        Ok(subscription)
    }
}

async fn wait_until(state: &mut watch::Receiver<SupervisorState>, want: SupervisorState) {
    state
        .wait_for(|s| *s == want)
        .await
        .expect("supervisor dropped its state channel");
}

fn assert_about(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(100),
        "expected ~{expected:?}, got {actual:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_failures_and_keeps_tracker_state() {
    let fetcher = FakeFetcher::default()
        .with("a", track("A", 200))
        .with("b", track("B", 180));
    let submitter = RecordingSubmitter::default();
    let (event_tx, event_rx) = mpsc::channel(16);
    let tracker_task =
        tokio::spawn(SessionTracker::new(fetcher, submitter.clone(), LIBRARY).run(event_rx));

    let (source, mut live, attempts) = FakeSource::new(2, 0);
    let supervisor = ReconnectSupervisor::new(source, event_tx, DELAY);
    let mut state = supervisor.state();
    let supervisor_task = tokio::spawn(supervisor.run());

    let (events1, close1) = live.recv().await.expect("first subscription");
    wait_until(&mut state, SupervisorState::Subscribed).await;
    events1.send(playing("a", 0)).await.unwrap();
    events1.send(playing("a", 100_000)).await.unwrap();
    drop(events1);

    let disconnected_at = Instant::now();
    close1.send(anyhow!("connection reset by peer")).unwrap();

    let (events2, _close2) = live.recv().await.expect("second subscription");
    wait_until(&mut state, SupervisorState::Subscribed).await;

    let attempts = attempts.lock().unwrap().clone();
    assert_eq!(attempts.len(), 3, "two failures then a success");
    assert_about(attempts[0] - disconnected_at, DELAY);
    assert_about(attempts[1] - attempts[0], DELAY);
    assert_about(attempts[2] - attempts[1], DELAY);

    // Same tracker instance: the pending scrobble from before the drop is
    // flushed by the first event after it.
    events2.send(playing("b", 500)).await.unwrap();
    drop(events2);

    supervisor_task.abort();
    let _ = supervisor_task.await;
    let tracker = tracker_task.await.expect("tracker task");

    let scrobbles = submitter.scrobbles();
    assert_eq!(scrobbles.len(), 1);
    assert_eq!(scrobbles[0].track, "A");
    assert_eq!(tracker.state().now_playing_id, "b");
    assert!(tracker.state().pending_scrobble.is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_initial_subscribe_goes_through_reconnect() {
    let (event_tx, _event_rx) = mpsc::channel(4);
    let (source, mut live, attempts) = FakeSource::new(0, 1);
    let supervisor = ReconnectSupervisor::new(source, event_tx, DELAY);
    let mut state = supervisor.state();
    let started = Instant::now();
    let supervisor_task = tokio::spawn(supervisor.run());

    let _subscription = live.recv().await.expect("subscription after reconnect");
    wait_until(&mut state, SupervisorState::Subscribed).await;

    let attempts = attempts.lock().unwrap().clone();
    assert_eq!(attempts.len(), 1);
    assert_about(attempts[0] - started, DELAY);

    supervisor_task.abort();
}

#[tokio::test(start_paused = true)]
async fn dropped_transport_is_treated_as_disconnect() {
    let (event_tx, _event_rx) = mpsc::channel(4);
    let (source, mut live, attempts) = FakeSource::new(0, 0);
    let supervisor = ReconnectSupervisor::new(source, event_tx, DELAY);
    let mut state = supervisor.state();
    let supervisor_task = tokio::spawn(supervisor.run());

    let (_events, close) = live.recv().await.expect("first subscription");
    wait_until(&mut state, SupervisorState::Subscribed).await;
    drop(close);

    let _second = live.recv().await.expect("resubscribed");
    assert_eq!(attempts.lock().unwrap().len(), 1);

    supervisor_task.abort();
}
