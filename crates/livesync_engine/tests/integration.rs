//! Integration tests for the coordinator against a scripted transport.

use bytes::Bytes;
use livesync_engine::{
    ConnectionState, ContentStream, ContentStreamCoordinator, ContentUpdate, CoordinatorConfig,
    LiveError, MockTransport, ReconnectConfig, ReconnectState, StopReason,
};
use livesync_protocol::{
    CborDeltaDecoder, Delta, EntityId, FieldSet, PushEvent, RootEntity, SessionCredential,
};
use livesync_testkit::{
    cbor_payload, credential, event_topic, garbage_message, match_event, odds, push_message,
    sample_event, EventBuilder, MarketBuilder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("livesync_engine=debug")
        .try_init();
}

fn coordinator(
    transport: &Arc<MockTransport>,
    config: CoordinatorConfig,
) -> ContentStreamCoordinator<MockTransport> {
    init_tracing();
    ContentStreamCoordinator::new(event_topic(), credential(), Arc::clone(transport), config)
}

/// Starts the topic and consumes the initial `Connected` + `Updated` pair.
async fn started(
    transport: &Arc<MockTransport>,
    config: CoordinatorConfig,
) -> (ContentStreamCoordinator<MockTransport>, ContentStream) {
    let coordinator = coordinator(transport, config);
    let mut stream = coordinator.start().await;
    assert_eq!(next_state(&mut stream).await, ConnectionState::Connected);
    assert_eq!(next_state(&mut stream).await, ConnectionState::Updated);
    (coordinator, stream)
}

async fn next_state(stream: &mut ContentStream) -> ConnectionState {
    stream.recv().await.unwrap().unwrap().state()
}

async fn next_root(stream: &mut ContentStream) -> RootEntity {
    match stream.recv().await {
        Some(Ok(ContentUpdate::Updated(root))) => root,
        other => panic!("expected an update, got {other:?}"),
    }
}

/// Lets the worker and spawned notifications run.
async fn settle() {
    tokio::time::sleep(ms(1)).await;
}

fn outcome_odds(root: &RootEntity, market: usize, outcome: usize) -> livesync_protocol::Odds {
    root.as_event().unwrap().markets[market].outcomes[outcome].odds
}

#[tokio::test(start_paused = true)]
async fn odds_update_reaches_consumers_and_store() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    transport
        .push(push_message(&Delta::odds("O1", odds(2, 1))))
        .await;
    let root = next_root(&mut stream).await;
    assert_eq!(outcome_odds(&root, 0, 0), odds(2, 1));

    let o1 = coordinator.store().get(&EntityId::from("O1")).unwrap();
    assert_eq!(o1.as_outcome().unwrap().odds, odds(2, 1));

    // Unknown id: nothing changes, nothing is published.
    transport
        .push(push_message(&Delta::odds("O9", odds(7, 1))))
        .await;
    settle().await;
    assert!(stream.try_recv().is_none());
    assert_eq!(coordinator.store().root(), Some(root));
    assert!(coordinator.is_active());
}

#[tokio::test(start_paused = true)]
async fn backoff_schedule_then_terminal_error() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let config = CoordinatorConfig::new().with_reconnect(ReconnectConfig::new(3));
    let (coordinator, mut stream) = started(&transport, config).await;

    transport.fail_all_opens(true);
    let lost_at = Instant::now();
    transport.disconnect();

    assert_eq!(stream.recv().await, Some(Ok(ContentUpdate::Disconnected)));
    assert_eq!(
        stream.recv().await,
        Some(Err(LiveError::MaxRetriesExceeded { attempts: 3 }))
    );
    assert_eq!(stream.recv().await, None);

    // First entry is the initial subscription.
    let retries: Vec<Duration> = transport.open_times()[1..]
        .iter()
        .map(|at| *at - lost_at)
        .collect();
    assert_eq!(retries, vec![ms(200), ms(600), ms(1400)]);

    assert!(!coordinator.is_active());
    assert!(!coordinator.store().is_seeded());
    settle().await;
    assert_eq!(transport.unsubscribes(), vec![event_topic()]);
}

#[tokio::test(start_paused = true)]
async fn transient_loss_is_invisible_and_resets_backoff() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    let first_loss = Instant::now();
    transport.disconnect();
    tokio::time::sleep(ms(250)).await;
    assert_eq!(transport.live_streams(), 1);
    assert_eq!(transport.open_times()[1] - first_loss, ms(200));
    assert_eq!(coordinator.reconnect_state(), ReconnectState::Connected);

    let second_loss = Instant::now();
    transport.disconnect();
    tokio::time::sleep(ms(250)).await;
    assert_eq!(transport.open_times()[2] - second_loss, ms(200));

    // The stream resumes on the new subscription without any lifecycle noise.
    transport
        .push(push_message(&Delta::odds("O1", odds(5, 2))))
        .await;
    let root = next_root(&mut stream).await;
    assert_eq!(outcome_odds(&root, 0, 0), odds(5, 2));
    assert_eq!(coordinator.stats().reconnects, 2);
    assert_eq!(transport.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_is_terminal() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    coordinator.stop(StopReason::Requested).await;

    assert_eq!(stream.recv().await, Some(Ok(ContentUpdate::Disconnected)));
    assert_eq!(stream.recv().await, None);
    assert_eq!(stream.close_reason(), Some(StopReason::Requested));

    assert!(!coordinator.is_active());
    assert!(coordinator.store().is_empty());
    assert_eq!(coordinator.reconnect_state(), ReconnectState::Disabled);
    assert_eq!(transport.live_streams(), 0);
    assert!(!transport.push(push_message(&Delta::odds("O1", odds(2, 1)))).await);

    // Nothing reconnects later.
    tokio::time::sleep(ms(60_000)).await;
    assert_eq!(transport.open_count(), 1);
    assert_eq!(transport.unsubscribes(), vec![event_topic()]);

    // A second stop changes nothing.
    coordinator.stop(StopReason::Requested).await;
    settle().await;
    assert_eq!(transport.unsubscribes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_during_backoff_cancels_the_retry() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    transport.disconnect();
    tokio::time::sleep(ms(50)).await;
    coordinator.stop(StopReason::Requested).await;

    assert_eq!(stream.recv().await, Some(Ok(ContentUpdate::Disconnected)));
    assert_eq!(stream.recv().await, None);
    tokio::time::sleep(ms(10_000)).await;
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn new_credential_keeps_a_single_subscription() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    coordinator
        .reconnect_with_credential(SessionCredential::new("renewed"))
        .await;
    settle().await;

    assert_eq!(transport.live_streams(), 1);
    assert_eq!(transport.peak_live_streams(), 1);
    let used: Vec<String> = transport
        .open_credentials()
        .iter()
        .map(|c| c.expose().to_string())
        .collect();
    assert_eq!(used, vec!["test-session", "renewed"]);
    assert_eq!(transport.fetch_count(), 1);

    transport
        .push(push_message(&Delta::availability("O1", false)))
        .await;
    let root = next_root(&mut stream).await;
    assert!(!root.as_event().unwrap().markets[0].outcomes[0].tradable);
}

#[tokio::test(start_paused = true)]
async fn refresh_merges_without_touching_the_push_stream() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    let refreshed = EventBuilder::new("E1")
        .teams("Lions", "Tigers")
        .market(MarketBuilder::new("M1").outcome("O1", 4, 1))
        .market(MarketBuilder::new("M2").outcome("O2", 1, 3))
        .build();
    transport.set_snapshot(refreshed.clone());

    coordinator.refresh().await.unwrap();
    let root = next_root(&mut stream).await;
    assert_eq!(root, coordinator.store().root().unwrap());
    assert!(coordinator.store().contains(&EntityId::from("O2")));
    assert_eq!(transport.open_count(), 1);
    assert_eq!(transport.fetch_count(), 2);

    // Refreshing with unchanged content publishes nothing.
    coordinator.refresh().await.unwrap();
    settle().await;
    assert!(stream.try_recv().is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_reports_and_keeps_running() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    transport.queue_snapshot(Err(LiveError::transport_retryable("503")));
    let result = coordinator.refresh().await;
    assert!(matches!(result, Err(LiveError::Transport { .. })));

    assert!(coordinator.is_active());
    transport
        .push(push_message(&Delta::odds("O1", odds(9, 2))))
        .await;
    assert_eq!(outcome_odds(&next_root(&mut stream).await, 0, 0), odds(9, 2));
}

#[tokio::test(start_paused = true)]
async fn refresh_when_idle_does_nothing() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let coordinator = coordinator(&transport, CoordinatorConfig::default());

    coordinator.refresh().await.unwrap();
    assert_eq!(transport.fetch_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn session_expiry_publishes_then_stops() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    transport
        .push(push_message(&Delta::SessionExpired {
            reason: Some("logged out elsewhere".into()),
        }))
        .await;

    let root = next_root(&mut stream).await;
    assert_eq!(root, sample_event());
    assert_eq!(stream.recv().await, Some(Ok(ContentUpdate::Disconnected)));
    assert_eq!(stream.recv().await, None);
    assert_eq!(stream.close_reason(), Some(StopReason::SessionExpired));

    assert!(!coordinator.is_active());
    assert_eq!(coordinator.reconnect_state(), ReconnectState::Disabled);
    settle().await;
    assert_eq!(transport.live_streams(), 0);
    assert_eq!(transport.unsubscribes(), vec![event_topic()]);
}

#[tokio::test(start_paused = true)]
async fn undecodable_payloads_are_dropped() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    transport.push(garbage_message()).await;
    transport
        .push(PushEvent::Message(Bytes::from_static(
            br#"{"type":"update","id":"O1","fields":{"odds":{"numerator":1,"denominator":0}}}"#,
        )))
        .await;
    transport
        .push(push_message(&Delta::odds("O1", odds(6, 1))))
        .await;

    assert_eq!(outcome_odds(&next_root(&mut stream).await, 0, 0), odds(6, 1));
    assert_eq!(coordinator.stats().decode_failures, 2);
    assert!(coordinator.is_active());
}

#[tokio::test(start_paused = true)]
async fn second_start_adds_a_primed_consumer() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut first) = started(&transport, CoordinatorConfig::default()).await;

    transport
        .push(push_message(&Delta::odds("O1", odds(2, 1))))
        .await;
    next_root(&mut first).await;

    let mut second = coordinator.start().await;
    assert_eq!(next_state(&mut second).await, ConnectionState::Connected);
    assert_eq!(outcome_odds(&next_root(&mut second).await, 0, 0), odds(2, 1));
    assert_eq!(transport.fetch_count(), 1);
    assert_eq!(transport.open_count(), 1);

    coordinator.stop(StopReason::Requested).await;
    assert_eq!(first.recv().await, Some(Ok(ContentUpdate::Disconnected)));
    assert_eq!(second.recv().await, Some(Ok(ContentUpdate::Disconnected)));
}

#[tokio::test(start_paused = true)]
async fn slow_consumer_sees_latest_payload() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (_coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    for n in 2..=6 {
        transport
            .push(push_message(&Delta::odds("O1", odds(n, 1))))
            .await;
    }
    settle().await;

    assert_eq!(stream.pending(), 1);
    assert_eq!(outcome_odds(&next_root(&mut stream).await, 0, 0), odds(6, 1));
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop_fetches_again() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, _stream) = started(&transport, CoordinatorConfig::default()).await;
    coordinator.stop(StopReason::Requested).await;

    let mut stream = coordinator.start().await;
    assert_eq!(next_state(&mut stream).await, ConnectionState::Connected);
    assert_eq!(next_root(&mut stream).await, sample_event());
    assert_eq!(transport.fetch_count(), 2);
    assert_eq!(transport.live_streams(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_snapshot_fails_the_stream_once() {
    let transport = Arc::new(MockTransport::new());
    transport.set_snapshot_error(LiveError::transport_fatal("404"));
    let coordinator = coordinator(&transport, CoordinatorConfig::default());

    let mut stream = coordinator.start().await;
    assert_eq!(
        stream.recv().await,
        Some(Err(LiveError::transport_fatal("404")))
    );
    assert_eq!(stream.recv().await, None);
    assert!(!coordinator.is_active());
    assert_eq!(transport.open_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn initial_push_failure_retries_in_background() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    transport.fail_next_opens(1);
    let (coordinator, _stream) = started(&transport, CoordinatorConfig::default()).await;
    let started_at = Instant::now();

    tokio::time::sleep(ms(250)).await;
    assert_eq!(transport.live_streams(), 1);
    assert_eq!(transport.open_times()[1] - started_at, ms(200));
    assert_eq!(coordinator.reconnect_state(), ReconnectState::Connected);
}

#[tokio::test(start_paused = true)]
async fn fatal_open_error_ends_the_topic_without_retrying() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    let forbidden = LiveError::transport_fatal("forbidden");
    transport.reject_opens(Some(forbidden.clone()));
    transport.disconnect();

    assert_eq!(stream.recv().await, Some(Ok(ContentUpdate::Disconnected)));
    assert_eq!(stream.recv().await, Some(Err(forbidden.clone())));
    assert_eq!(stream.recv().await, None);
    assert_eq!(
        stream.close_reason(),
        Some(StopReason::Other(forbidden.to_string()))
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.open_count(), 2);
    assert!(!coordinator.is_active());
    assert!(!coordinator.store().is_seeded());
    assert_eq!(coordinator.reconnect_state(), ReconnectState::Disabled);
}

#[tokio::test(start_paused = true)]
async fn fatal_initial_open_fails_the_start() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    let forbidden = LiveError::transport_fatal("forbidden");
    transport.reject_opens(Some(forbidden.clone()));
    let coordinator = coordinator(&transport, CoordinatorConfig::default());

    let mut stream = coordinator.start().await;
    assert_eq!(next_state(&mut stream).await, ConnectionState::Connected);
    assert_eq!(stream.recv().await, Some(Ok(ContentUpdate::Disconnected)));
    assert_eq!(stream.recv().await, Some(Err(forbidden)));
    assert_eq!(stream.recv().await, None);

    assert!(!coordinator.is_active());
    assert_eq!(transport.open_count(), 1);
    settle().await;
    assert_eq!(transport.unsubscribes(), vec![event_topic()]);
}

#[tokio::test(start_paused = true)]
async fn dependents_are_torn_down_with_the_topic() {
    let transport = Arc::new(MockTransport::with_snapshot(match_event()));
    let main = livesync_protocol::TopicDescriptor::event_main_market("E1");
    let secondary = livesync_protocol::TopicDescriptor::event_secondary_markets("E1");
    let coordinator = ContentStreamCoordinator::new(
        main.clone(),
        credential(),
        Arc::clone(&transport),
        CoordinatorConfig::default(),
    );
    let _stream = coordinator.start().await;

    let child = coordinator.register_dependent(secondary.clone()).await.unwrap();
    assert_eq!(coordinator.registry().len(), 2);
    assert_eq!(child.topic(), &secondary);

    coordinator.stop(StopReason::Requested).await;
    settle().await;

    let mut unsubscribed = transport.unsubscribes();
    unsubscribed.sort();
    let mut expected = vec![main, secondary];
    expected.sort();
    assert_eq!(unsubscribed, expected);
    assert!(coordinator.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_failures_are_tolerated() {
    let transport = Arc::new(MockTransport::with_snapshot(sample_event()));
    transport.fail_unsubscribes(true);
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    coordinator.stop(StopReason::Requested).await;
    settle().await;

    assert_eq!(stream.recv().await, Some(Ok(ContentUpdate::Disconnected)));
    assert!(transport.unsubscribes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cbor_payloads_with_custom_decoder() {
    let transport = Arc::new(MockTransport::with_snapshot(match_event()));
    let coordinator = ContentStreamCoordinator::with_decoder(
        event_topic(),
        credential(),
        Arc::clone(&transport),
        CoordinatorConfig::default(),
        Arc::new(CborDeltaDecoder),
    );
    let mut stream = coordinator.start().await;
    next_state(&mut stream).await;
    next_state(&mut stream).await;

    let delta = Delta::update("E1", FieldSet::score(1, 0).with_match_time("23'"));
    transport.push(PushEvent::Message(cbor_payload(&delta))).await;

    let root = next_root(&mut stream).await;
    let event = root.as_event().unwrap();
    assert_eq!(event.score.map(|s| (s.home, s.away)), Some((1, 0)));
    assert_eq!(event.match_time.as_deref(), Some("23'"));
}

#[tokio::test(start_paused = true)]
async fn entity_watch_follows_only_its_entity() {
    let transport = Arc::new(MockTransport::with_snapshot(match_event()));
    let (coordinator, mut stream) = started(&transport, CoordinatorConfig::default()).await;

    let mut o2 = coordinator.subscribe_entity(&EntityId::from("O2")).unwrap();
    let o5 = coordinator.subscribe_entity(&EntityId::from("O5")).unwrap();
    assert!(coordinator.subscribe_entity(&EntityId::from("O9")).is_none());

    transport
        .push(push_message(&Delta::odds("O2", odds(3, 1))))
        .await;
    next_root(&mut stream).await;

    assert!(o2.has_changed().unwrap());
    assert_eq!(o2.borrow_and_update().as_outcome().unwrap().odds, odds(3, 1));
    assert!(!o5.has_changed().unwrap());

    transport.push(push_message(&Delta::remove("M2"))).await;
    next_root(&mut stream).await;
    assert!(o5.has_changed().is_err());
}
