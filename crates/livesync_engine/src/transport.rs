//! Transport layer abstraction for live content.

use crate::error::{LiveError, LiveResult};
use async_trait::async_trait;
use livesync_protocol::{PushEvent, RootEntity, SessionCredential, TopicDescriptor};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A content transport handles network communication with the content server.
///
/// This trait abstracts the network layer, allowing for different implementations
/// (HTTP + WebSocket, long polling, mock for testing, etc.).
#[async_trait]
pub trait ContentTransport: Send + Sync + 'static {
    /// Fetches the full current state of a topic.
    async fn fetch_snapshot(
        &self,
        topic: &TopicDescriptor,
        credential: &SessionCredential,
    ) -> LiveResult<RootEntity>;

    /// Opens a persistent push subscription for a topic.
    ///
    /// The transport must stop delivering once the returned stream is
    /// cancelled or dropped.
    async fn open_push_stream(
        &self,
        topic: &TopicDescriptor,
        credential: &SessionCredential,
    ) -> LiveResult<PushStream>;

    /// Tells the server the topic is no longer wanted.
    async fn unsubscribe(
        &self,
        topic: &TopicDescriptor,
        credential: &SessionCredential,
    ) -> LiveResult<()>;
}

/// Receiving end of a push subscription.
#[derive(Debug)]
pub struct PushStream {
    rx: mpsc::Receiver<PushEvent>,
}

impl PushStream {
    /// Creates a bounded push channel. The transport keeps the sender.
    pub fn channel(capacity: usize) -> (mpsc::Sender<PushEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Waits for the next event. `None` means the transport went away.
    pub async fn next(&mut self) -> Option<PushEvent> {
        self.rx.recv().await
    }

    /// Cancels the subscription. The sender observes a closed channel.
    pub fn cancel(mut self) {
        self.rx.close();
    }
}

struct OpenRecord {
    topic: TopicDescriptor,
    credential: SessionCredential,
    at: Instant,
    sender: mpsc::Sender<PushEvent>,
}

/// A scriptable transport for testing.
pub struct MockTransport {
    snapshot: Mutex<Option<LiveResult<RootEntity>>>,
    queued_snapshots: Mutex<VecDeque<LiveResult<RootEntity>>>,
    snapshot_delay: Mutex<Option<Duration>>,
    fetches: Mutex<u32>,
    failing_opens: Mutex<u32>,
    failed_opens: Mutex<Vec<Instant>>,
    peak_live_streams: Mutex<usize>,
    fail_all_opens: Mutex<bool>,
    open_error: Mutex<Option<LiveError>>,
    opens: Mutex<Vec<OpenRecord>>,
    unsubscribes: Mutex<Vec<TopicDescriptor>>,
    fail_unsubscribes: Mutex<bool>,
    push_buffer: usize,
}

impl MockTransport {
    /// Creates a new mock transport with no snapshot configured.
    pub fn new() -> Self {
        Self {
            snapshot: Mutex::new(None),
            queued_snapshots: Mutex::new(VecDeque::new()),
            snapshot_delay: Mutex::new(None),
            fetches: Mutex::new(0),
            failing_opens: Mutex::new(0),
            failed_opens: Mutex::new(Vec::new()),
            peak_live_streams: Mutex::new(0),
            fail_all_opens: Mutex::new(false),
            open_error: Mutex::new(None),
            opens: Mutex::new(Vec::new()),
            unsubscribes: Mutex::new(Vec::new()),
            fail_unsubscribes: Mutex::new(false),
            push_buffer: 64,
        }
    }

    /// Creates a mock that serves `root` for every fetch.
    pub fn with_snapshot(root: RootEntity) -> Self {
        let transport = Self::new();
        transport.set_snapshot(root);
        transport
    }

    /// Sets the snapshot served once the queue is empty.
    pub fn set_snapshot(&self, root: RootEntity) {
        *self.snapshot.lock() = Some(Ok(root));
    }

    /// Makes every fetch fail once the queue is empty.
    pub fn set_snapshot_error(&self, error: LiveError) {
        *self.snapshot.lock() = Some(Err(error));
    }

    /// Queues a one-shot fetch result, served before the standing snapshot.
    pub fn queue_snapshot(&self, result: LiveResult<RootEntity>) {
        self.queued_snapshots.lock().push_back(result);
    }

    /// Delays every fetch.
    pub fn set_snapshot_delay(&self, delay: Duration) {
        *self.snapshot_delay.lock() = Some(delay);
    }

    /// Makes the next `count` opens fail with a retryable error.
    pub fn fail_next_opens(&self, count: u32) {
        *self.failing_opens.lock() = count;
    }

    /// Makes every open fail with a retryable error.
    pub fn fail_all_opens(&self, fail: bool) {
        *self.fail_all_opens.lock() = fail;
    }

    /// Makes every open fail with `error`, or restores normal opens.
    pub fn reject_opens(&self, error: Option<LiveError>) {
        *self.open_error.lock() = error;
    }

    /// Makes server unsubscribe notifications fail.
    pub fn fail_unsubscribes(&self, fail: bool) {
        *self.fail_unsubscribes.lock() = fail;
    }

    /// Number of snapshot fetches so far.
    pub fn fetch_count(&self) -> u32 {
        *self.fetches.lock()
    }

    /// Number of push subscriptions requested, failed ones included.
    pub fn open_count(&self) -> usize {
        self.failed_opens.lock().len() + self.opens.lock().len()
    }

    /// Topic of each successful push subscription.
    pub fn open_topics(&self) -> Vec<TopicDescriptor> {
        self.opens
            .lock()
            .iter()
            .map(|open| open.topic.clone())
            .collect()
    }

    /// When each push subscription was requested, failed ones included.
    pub fn open_times(&self) -> Vec<Instant> {
        let mut times: Vec<Instant> = self.opens.lock().iter().map(|open| open.at).collect();
        times.extend(self.failed_opens.lock().iter().copied());
        times.sort();
        times
    }

    /// Credential used by each successful push subscription.
    pub fn open_credentials(&self) -> Vec<SessionCredential> {
        self.opens
            .lock()
            .iter()
            .map(|open| open.credential.clone())
            .collect()
    }

    /// Number of push subscriptions the engine still holds.
    pub fn live_streams(&self) -> usize {
        self.opens
            .lock()
            .iter()
            .filter(|open| !open.sender.is_closed())
            .count()
    }

    /// Most push subscriptions that were live at the same time.
    pub fn peak_live_streams(&self) -> usize {
        *self.peak_live_streams.lock()
    }

    /// Topics the engine unsubscribed from, in order.
    pub fn unsubscribes(&self) -> Vec<TopicDescriptor> {
        self.unsubscribes.lock().clone()
    }

    /// Delivers an event on the most recent live push subscription.
    ///
    /// Returns false if no subscription is live.
    pub async fn push(&self, event: PushEvent) -> bool {
        let sender = self
            .opens
            .lock()
            .iter()
            .rev()
            .find(|open| !open.sender.is_closed())
            .map(|open| open.sender.clone());
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Drops every live push subscription, as a lost connection would.
    pub fn disconnect(&self) {
        let mut opens = self.opens.lock();
        for open in opens.iter_mut() {
            // Swap in a closed sender so counters keep the history.
            let (closed, _) = mpsc::channel(1);
            drop(std::mem::replace(&mut open.sender, closed));
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentTransport for MockTransport {
    async fn fetch_snapshot(
        &self,
        _topic: &TopicDescriptor,
        _credential: &SessionCredential,
    ) -> LiveResult<RootEntity> {
        *self.fetches.lock() += 1;
        let delay = *self.snapshot_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(result) = self.queued_snapshots.lock().pop_front() {
            return result;
        }
        self.snapshot
            .lock()
            .clone()
            .unwrap_or_else(|| Err(LiveError::transport_fatal("no mock snapshot set")))
    }

    async fn open_push_stream(
        &self,
        topic: &TopicDescriptor,
        credential: &SessionCredential,
    ) -> LiveResult<PushStream> {
        let failing = {
            let mut remaining = self.failing_opens.lock();
            if *remaining > 0 {
                *remaining -= 1;
                true
            } else {
                *self.fail_all_opens.lock()
            }
        };
        let rejection = self.open_error.lock().clone();
        if failing || rejection.is_some() {
            self.failed_opens.lock().push(Instant::now());
            return Err(rejection
                .unwrap_or_else(|| LiveError::transport_retryable("push subscription refused")));
        }

        let (sender, stream) = PushStream::channel(self.push_buffer);
        let live = {
            let mut opens = self.opens.lock();
            opens.push(OpenRecord {
                topic: topic.clone(),
                credential: credential.clone(),
                at: Instant::now(),
                sender,
            });
            opens.iter().filter(|open| !open.sender.is_closed()).count()
        };
        let mut peak = self.peak_live_streams.lock();
        *peak = (*peak).max(live);
        Ok(stream)
    }

    async fn unsubscribe(
        &self,
        topic: &TopicDescriptor,
        _credential: &SessionCredential,
    ) -> LiveResult<()> {
        if *self.fail_unsubscribes.lock() {
            return Err(LiveError::transport_retryable("unsubscribe refused"));
        }
        self.unsubscribes.lock().push(topic.clone());
        Ok(())
    }
}
