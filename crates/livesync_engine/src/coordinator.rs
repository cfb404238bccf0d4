//! Per-topic orchestration: snapshot, push stream, reconnection and output.
//!
//! Each started topic runs one worker task. The worker is the only writer of
//! the topic's store after seeding: push deltas, refresh merges and
//! credential swaps all reach the store through it, so updates are applied
//! and published strictly in arrival order.

use crate::config::CoordinatorConfig;
use crate::error::{LiveError, LiveResult};
use crate::reconnect::{ReconnectState, ReconnectionController, RetryState};
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use crate::store::{DeltaStore, EntityWatch};
use crate::stream::{ContentStream, ContentUpdate, OutputChannel, StopReason};
use crate::transport::{ContentTransport, PushStream};
use livesync_protocol::{
    Delta, DeltaDecoder, EntityId, JsonDeltaDecoder, PushEvent, RootEntity, SessionCredential,
    TopicDescriptor,
};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Counters for one coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveStats {
    /// Deltas that changed the store.
    pub deltas_applied: u64,
    /// Deltas that changed nothing (no-ops and unknown targets).
    pub deltas_ignored: u64,
    /// Push payloads that failed to decode.
    pub decode_failures: u64,
    /// Successful push re-subscriptions.
    pub reconnects: u64,
    /// Refresh snapshots merged.
    pub refreshes: u64,
}

enum Command {
    Merge(RootEntity),
    Resubscribe,
}

struct Session {
    output: Arc<OutputChannel>,
    handle: SubscriptionHandle,
    commands: mpsc::Sender<Command>,
    worker: JoinHandle<()>,
}

struct Shared<T: ContentTransport> {
    topic: TopicDescriptor,
    credential: Arc<RwLock<SessionCredential>>,
    transport: Arc<T>,
    decoder: Arc<dyn DeltaDecoder>,
    config: CoordinatorConfig,
    store: Arc<DeltaStore>,
    registry: Arc<SubscriptionRegistry>,
    reconnect: Mutex<ReconnectionController>,
    stats: RwLock<LiveStats>,
}

impl<T: ContentTransport> Shared<T> {
    fn credential(&self) -> SessionCredential {
        self.credential.read().clone()
    }

    async fn fetch_snapshot(&self) -> LiveResult<RootEntity> {
        let credential = self.credential();
        let fetch = self.transport.fetch_snapshot(&self.topic, &credential);
        match tokio::time::timeout(self.config.snapshot_timeout, fetch).await {
            Ok(result) => result,
            Err(_) => Err(LiveError::Timeout),
        }
    }

    async fn open_push(&self) -> LiveResult<PushStream> {
        self.reconnect.lock().on_connecting();
        let credential = self.credential();
        match self.transport.open_push_stream(&self.topic, &credential).await {
            Ok(stream) => {
                self.reconnect.lock().on_connected();
                Ok(stream)
            }
            Err(e) => {
                self.reconnect.lock().on_disconnected();
                Err(e)
            }
        }
    }

    /// Applies a delta and publishes the new root if anything changed.
    fn apply(&self, output: &OutputChannel, delta: Delta) {
        match self.store.apply(delta) {
            Some(root) => {
                self.stats.write().deltas_applied += 1;
                output.emit(Ok(ContentUpdate::Updated(root)));
            }
            None => self.stats.write().deltas_ignored += 1,
        }
    }

    /// Tears a session down: store, registry, then consumers.
    ///
    /// Consumers see `Disconnected`, then `error` if given, then the end of
    /// the stream.
    fn finish(
        &self,
        output: &OutputChannel,
        handle: &SubscriptionHandle,
        reason: StopReason,
        error: Option<LiveError>,
    ) {
        self.reconnect.lock().disable();
        self.store.clear();
        self.registry.unsubscribe(handle);

        output.emit(Ok(ContentUpdate::Disconnected));
        if let Some(error) = error {
            output.emit(Err(error));
        }
        output.close(reason);
    }

    /// Ends a session on an error that makes the topic unreliable.
    fn fail(&self, output: &OutputChannel, handle: &SubscriptionHandle, error: LiveError) {
        warn!(topic = %self.topic, error = %error, "stopping topic on terminal error");
        self.finish(output, handle, StopReason::Other(error.to_string()), Some(error));
    }
}

/// Orchestrates one topic: fetches the snapshot, keeps the push stream
/// alive, feeds deltas to the store and publishes the result.
pub struct ContentStreamCoordinator<T: ContentTransport> {
    shared: Arc<Shared<T>>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl<T: ContentTransport> ContentStreamCoordinator<T> {
    /// Creates a coordinator that decodes push payloads as JSON.
    pub fn new(
        topic: TopicDescriptor,
        credential: SessionCredential,
        transport: Arc<T>,
        config: CoordinatorConfig,
    ) -> Self {
        Self::with_decoder(
            topic,
            credential,
            transport,
            config,
            Arc::new(JsonDeltaDecoder),
        )
    }

    /// Creates a coordinator with a custom payload decoder.
    pub fn with_decoder(
        topic: TopicDescriptor,
        credential: SessionCredential,
        transport: Arc<T>,
        config: CoordinatorConfig,
        decoder: Arc<dyn DeltaDecoder>,
    ) -> Self {
        let credential = Arc::new(RwLock::new(credential));
        let registry = Arc::new(SubscriptionRegistry::new(server_teardown(
            Arc::clone(&transport),
            Arc::clone(&credential),
        )));

        Self {
            shared: Arc::new(Shared {
                store: Arc::new(DeltaStore::new(topic.clone())),
                reconnect: Mutex::new(ReconnectionController::new(config.reconnect.clone())),
                topic,
                credential,
                transport,
                decoder,
                config,
                registry,
                stats: RwLock::new(LiveStats::default()),
            }),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Starts the topic and returns a stream of its updates.
    ///
    /// Calling `start` on a running topic only adds a consumer. If the
    /// snapshot cannot be fetched the returned stream yields that error and
    /// ends.
    pub async fn start(&self) -> ContentStream {
        let mut session = self.session.lock().await;
        if let Some(active) = session.as_ref().filter(|s| !s.output.is_closed()) {
            return active.output.subscribe();
        }
        if let Some(stale) = session.take() {
            stale.worker.abort();
            let _ = stale.worker.await;
        }

        let shared = &self.shared;
        let output = Arc::new(OutputChannel::new());
        let stream = output.subscribe();
        info!(topic = %shared.topic, "starting topic");

        let root = match shared.fetch_snapshot().await {
            Ok(root) => root,
            Err(e) => {
                warn!(topic = %shared.topic, error = %e, "snapshot fetch failed");
                let reason = StopReason::Other(e.to_string());
                output.emit(Err(e));
                output.close(reason);
                return stream;
            }
        };

        shared.store.seed(root);
        *shared.reconnect.lock() = ReconnectionController::new(shared.config.reconnect.clone());
        let handle = shared
            .registry
            .register(shared.topic.clone(), shared.credential());
        output.emit(Ok(ContentUpdate::Connected(handle.clone())));

        let push = match shared.open_push().await {
            Ok(push) => Some(push),
            Err(e) if e.is_retryable() => {
                warn!(topic = %shared.topic, error = %e, "push subscription failed");
                None
            }
            Err(e) => {
                shared.fail(&output, &handle, e);
                return stream;
            }
        };
        if let Some(root) = shared.store.root() {
            output.emit(Ok(ContentUpdate::Updated(root)));
        }

        let (commands, command_rx) = mpsc::channel(shared.config.command_buffer);
        let worker = tokio::spawn(run_worker(
            Arc::clone(shared),
            Arc::clone(&output),
            handle.clone(),
            push,
            command_rx,
        ));
        *session = Some(Session {
            output,
            handle,
            commands,
            worker,
        });
        stream
    }

    /// Stops the topic.
    ///
    /// Reconnection is switched off, the push subscription is cancelled,
    /// the store is cleared and every consumer sees `Disconnected` before
    /// its stream ends. No-op if the topic is not running.
    pub async fn stop(&self, reason: StopReason) {
        let mut session = self.session.lock().await;
        let Some(active) = session.take() else {
            return;
        };

        self.shared.reconnect.lock().disable();
        active.worker.abort();
        let _ = active.worker.await;

        if !active.output.is_closed() {
            info!(topic = %self.shared.topic, reason = %reason, "stopping topic");
            self.shared
                .finish(&active.output, &active.handle, reason, None);
        }
    }

    /// Fetches a fresh snapshot and merges it into the running topic.
    ///
    /// The push stream is left alone. Returns `Ok` without fetching if the
    /// topic is not running.
    pub async fn refresh(&self) -> LiveResult<()> {
        let Some(commands) = self.active_commands().await else {
            return Ok(());
        };

        let root = self.shared.fetch_snapshot().await?;
        if commands.send(Command::Merge(root)).await.is_err() {
            debug!(topic = %self.shared.topic, "topic stopped during refresh");
        }
        Ok(())
    }

    /// Replaces the session credential and re-subscribes the push stream
    /// with it. The old subscription is cancelled before the new one opens.
    pub async fn reconnect_with_credential(&self, credential: SessionCredential) {
        *self.shared.credential.write() = credential;
        if let Some(commands) = self.active_commands().await {
            info!(topic = %self.shared.topic, "re-subscribing with new credential");
            if commands.send(Command::Resubscribe).await.is_err() {
                debug!(topic = %self.shared.topic, "topic stopped during re-subscribe");
            }
        }
    }

    /// Registers a subscription whose lifetime follows this topic's.
    pub async fn register_dependent(&self, topic: TopicDescriptor) -> LiveResult<SubscriptionHandle> {
        let session = self.session.lock().await;
        let Some(active) = session.as_ref().filter(|s| !s.output.is_closed()) else {
            return Err(LiveError::NotActive);
        };

        let registry = &self.shared.registry;
        let child = registry.register(topic, self.shared.credential());
        if let Err(e) = registry.associate(&active.handle, &child) {
            registry.unsubscribe(&child);
            return Err(e);
        }
        Ok(child)
    }

    /// Subscribes to one entity of the running topic.
    pub fn subscribe_entity(&self, id: &EntityId) -> Option<EntityWatch> {
        self.shared.store.subscribe_entity(id)
    }

    /// Topic this coordinator drives.
    pub fn topic(&self) -> &TopicDescriptor {
        &self.shared.topic
    }

    /// The topic's store.
    pub fn store(&self) -> &Arc<DeltaStore> {
        &self.shared.store
    }

    /// The topic's subscription registry.
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.shared.registry
    }

    /// Returns true while the topic is running.
    pub fn is_active(&self) -> bool {
        self.shared
            .output
            .lock()
            .as_ref()
            .is_some_and(|output| !output.is_closed())
    }

    /// Current reconnection state.
    pub fn reconnect_state(&self) -> ReconnectState {
        self.shared.reconnect.lock().state()
    }

    /// Current retry counters.
    pub fn retry_state(&self) -> RetryState {
        self.shared.reconnect.lock().retry_state()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> LiveStats {
        self.shared.stats.read().clone()
    }

    async fn active_commands(&self) -> Option<mpsc::Sender<Command>> {
        self.session
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.output.is_closed())
            .map(|s| s.commands.clone())
    }
}

/// Builds the registry teardown that tells the server about unsubscribes.
fn server_teardown<T: ContentTransport>(
    transport: Arc<T>,
    credential: Arc<RwLock<SessionCredential>>,
) -> crate::registry::Teardown {
    Arc::new(move |handle: &SubscriptionHandle| {
        let topic = handle.topic().clone();
        let credential = credential.read().clone();
        let transport = Arc::clone(&transport);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = transport.unsubscribe(&topic, &credential).await {
                        warn!(topic = %topic, error = %e, "unsubscribe notification failed");
                    }
                });
            }
            Err(_) => warn!(topic = %topic, "no runtime for unsubscribe notification"),
        }
    })
}

enum Step {
    Command(Option<Command>),
    Push(Option<PushEvent>),
    Reconnect,
}

enum Flow {
    Continue,
    Finished,
}

async fn run_worker<T: ContentTransport>(
    shared: Arc<Shared<T>>,
    output: Arc<OutputChannel>,
    handle: SubscriptionHandle,
    mut push: Option<PushStream>,
    mut commands: mpsc::Receiver<Command>,
) {
    loop {
        let step = match push.as_mut() {
            Some(stream) => tokio::select! {
                command = commands.recv() => Step::Command(command),
                event = stream.next() => Step::Push(event),
            },
            None => Step::Reconnect,
        };

        let flow = match step {
            Step::Command(command) => {
                handle_command(&shared, &output, &handle, &mut push, command).await
            }
            Step::Push(Some(PushEvent::Message(payload))) => {
                handle_payload(&shared, &output, &handle, &payload)
            }
            Step::Push(Some(PushEvent::Connected)) => {
                shared.reconnect.lock().on_connected();
                Flow::Continue
            }
            Step::Push(Some(PushEvent::Disconnected { reason })) => {
                info!(topic = %shared.topic, reason = ?reason, "push stream lost");
                drop_push(&shared, &mut push);
                Flow::Continue
            }
            Step::Push(None) => {
                info!(topic = %shared.topic, "push stream ended");
                drop_push(&shared, &mut push);
                Flow::Continue
            }
            Step::Reconnect => {
                reconnect(&shared, &output, &handle, &mut push, &mut commands).await
            }
        };

        if let Flow::Finished = flow {
            return;
        }
    }
}

fn drop_push<T: ContentTransport>(shared: &Shared<T>, push: &mut Option<PushStream>) {
    if let Some(stream) = push.take() {
        stream.cancel();
    }
    shared.reconnect.lock().on_disconnected();
}

fn handle_payload<T: ContentTransport>(
    shared: &Shared<T>,
    output: &OutputChannel,
    handle: &SubscriptionHandle,
    payload: &[u8],
) -> Flow {
    let delta = match shared.decoder.decode(payload) {
        Ok(delta) => delta,
        Err(e) => {
            shared.stats.write().decode_failures += 1;
            warn!(topic = %shared.topic, error = %e, "dropping undecodable push payload");
            return Flow::Continue;
        }
    };

    if let Delta::SessionExpired { reason } = delta {
        info!(topic = %shared.topic, reason = ?reason, "session expired");
        if let Some(root) = shared.store.root() {
            output.emit(Ok(ContentUpdate::Updated(root)));
        }
        shared.finish(output, handle, StopReason::SessionExpired, None);
        return Flow::Finished;
    }

    shared.apply(output, delta);
    Flow::Continue
}

async fn handle_command<T: ContentTransport>(
    shared: &Shared<T>,
    output: &OutputChannel,
    handle: &SubscriptionHandle,
    push: &mut Option<PushStream>,
    command: Option<Command>,
) -> Flow {
    match command {
        Some(Command::Merge(root)) => {
            shared.stats.write().refreshes += 1;
            shared.apply(output, Delta::Replace { root });
            Flow::Continue
        }
        Some(Command::Resubscribe) => {
            if let Some(stream) = push.take() {
                stream.cancel();
            }
            match shared.open_push().await {
                Ok(stream) => *push = Some(stream),
                Err(e) if e.is_retryable() => {
                    warn!(topic = %shared.topic, error = %e, "re-subscribe failed");
                }
                Err(e) => {
                    shared.fail(output, handle, e);
                    return Flow::Finished;
                }
            }
            Flow::Continue
        }
        None => {
            // The coordinator was dropped without a stop.
            shared.finish(output, handle, StopReason::Requested, None);
            Flow::Finished
        }
    }
}

/// Waits out the next backoff delay, then re-subscribes once.
async fn reconnect<T: ContentTransport>(
    shared: &Shared<T>,
    output: &OutputChannel,
    handle: &SubscriptionHandle,
    push: &mut Option<PushStream>,
    commands: &mut mpsc::Receiver<Command>,
) -> Flow {
    let (delay, attempt) = {
        let mut controller = shared.reconnect.lock();
        (controller.next_delay(), controller.attempt())
    };

    let Some(delay) = delay else {
        shared.fail(output, handle, LiveError::MaxRetriesExceeded { attempts: attempt });
        return Flow::Finished;
    };

    info!(
        topic = %shared.topic,
        attempt,
        delay_ms = delay.as_millis() as u64,
        "scheduling push re-subscribe"
    );
    if let Flow::Finished = wait_serving_commands(shared, output, handle, delay, commands).await {
        return Flow::Finished;
    }

    match shared.open_push().await {
        Ok(stream) => {
            shared.stats.write().reconnects += 1;
            info!(topic = %shared.topic, attempt, "push stream restored");
            *push = Some(stream);
        }
        Err(e) if e.is_retryable() => {
            debug!(topic = %shared.topic, attempt, error = %e, "re-subscribe attempt failed");
        }
        Err(e) => {
            shared.fail(output, handle, e);
            return Flow::Finished;
        }
    }
    Flow::Continue
}

/// Sleeps for `delay` while still merging refreshes. A re-subscribe request
/// cuts the wait short.
async fn wait_serving_commands<T: ContentTransport>(
    shared: &Shared<T>,
    output: &OutputChannel,
    handle: &SubscriptionHandle,
    delay: Duration,
    commands: &mut mpsc::Receiver<Command>,
) -> Flow {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return Flow::Continue,
            command = commands.recv() => match command {
                Some(Command::Merge(root)) => {
                    shared.stats.write().refreshes += 1;
                    shared.apply(output, Delta::Replace { root });
                }
                Some(Command::Resubscribe) => return Flow::Continue,
                None => {
                    shared.finish(output, handle, StopReason::Requested, None);
                    return Flow::Finished;
                }
            },
        }
    }
}
