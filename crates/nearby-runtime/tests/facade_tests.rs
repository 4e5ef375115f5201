//! Integration tests for the command facade against the recording mock provider
//!
//! Provider notifications are injected by hand; every wait on the event stream
//! is bounded by a timeout.

use std::sync::Arc;

use futures::future::join_all;
use nearby_core::{ConnectionState, Consent, TransferStatus};
use nearby_harness::{ManualClock, MockOperation, MockProvider, ProviderCall};
use nearby_runtime::{
    BytesSource, Direction, EndpointId, EventSubscription, FailureReason, FileSource,
    NearbyBuilder, NearbyConfig, NearbyConnections, NearbyError, NearbyEvent,
};
use tokio::time::{sleep, timeout, Duration};
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn start(config: NearbyConfig) -> (NearbyConnections<MockProvider>, MockProvider, EventSubscription) {
    let (provider, notifications) = MockProvider::new();
    let nearby = NearbyBuilder::new()
        .with_config(config)
        .start(provider.clone(), notifications)
        .expect("Failed to start nearby connections");
    let events = nearby.subscribe();
    (nearby, provider, events)
}

/// Test preset with retention long enough that no record expires mid-test
fn config() -> NearbyConfig {
    NearbyConfig::testing().with_terminal_retention(Duration::from_secs(60))
}

fn peer(id: &str) -> EndpointId {
    EndpointId::new(id)
}

async fn next_event(events: &mut EventSubscription) -> NearbyEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("Timed out waiting for event")
        .expect("Event bus closed")
}

/// Inject an initiation from a throwaway endpoint and wait for it, proving
/// everything injected before it has been processed without publishing
/// anything. The throwaway record is destroyed again afterwards.
async fn expect_quiet(
    nearby: &NearbyConnections<MockProvider>,
    provider: &MockProvider,
    events: &mut EventSubscription,
) {
    provider.initiated("ZZZZ", "sentinel");
    match next_event(events).await {
        NearbyEvent::ConnectionInitiated { endpoint_id, .. } if endpoint_id == peer("ZZZZ") => {}
        other => panic!("Expected no events before the sentinel, got {:?}", other),
    }
    nearby.disconnect(&peer("ZZZZ")).await;
    next_event(events).await;
    nearby.disconnect(&peer("ZZZZ")).await;
}

/// Bring `peer1` to `Connected` through the incoming path
async fn connect_incoming(
    nearby: &NearbyConnections<MockProvider>,
    provider: &MockProvider,
    events: &mut EventSubscription,
) {
    provider.initiated("peer1", "Bob");
    assert!(matches!(
        next_event(events).await,
        NearbyEvent::ConnectionInitiated {
            direction: Direction::Incoming,
            ..
        }
    ));
    nearby.accept_connection(&peer("peer1")).await.unwrap();
    provider.connection_result("peer1", true, None);
    assert!(matches!(
        next_event(events).await,
        NearbyEvent::ConnectionResult { success: true, .. }
    ));
}

fn transfer_bytes(event: NearbyEvent) -> (u64, TransferStatus) {
    match event {
        NearbyEvent::TransferUpdate(transfer) => (transfer.bytes_transferred, transfer.status),
        other => panic!("Expected TransferUpdate, got {:?}", other),
    }
}

// ----------------------------------------------------------------------------
// Connection Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_outgoing_request_reaches_connected() {
    let (nearby, provider, mut events) = start(config());
    nearby.start_discovery().await.unwrap();

    provider.found("peer1", "Bob");
    assert_eq!(
        next_event(&mut events).await,
        NearbyEvent::EndpointDiscovered {
            endpoint_id: peer("peer1"),
            display_name: "Bob".into(),
        }
    );

    nearby
        .request_connection(&peer("peer1"), "Alice")
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        NearbyEvent::ConnectionInitiated {
            endpoint_id: peer("peer1"),
            peer_name: Some("Bob".into()),
            direction: Direction::Outgoing,
        }
    );

    provider.connection_result("peer1", true, None);
    assert_eq!(
        next_event(&mut events).await,
        NearbyEvent::ConnectionResult {
            endpoint_id: peer("peer1"),
            success: true,
            reason: None,
        }
    );

    let connection = nearby.connection(&peer("peer1")).await.unwrap();
    assert_eq!(connection.state, ConnectionState::Connected);
    assert!(provider.calls().contains(&ProviderCall::Connect {
        endpoint_id: peer("peer1"),
        local_name: "Alice".into(),
    }));
}

#[tokio::test]
async fn test_accept_without_pending_connection_is_invalid_state() {
    let (nearby, provider, _events) = start(config());

    let err = nearby.accept_connection(&peer("peer1")).await.unwrap_err();
    assert!(matches!(err, NearbyError::InvalidState { state: None, .. }));
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn test_accept_is_consent_not_completion() {
    let (nearby, provider, mut events) = start(config());
    provider.initiated("peer1", "Bob");
    next_event(&mut events).await;

    nearby.accept_connection(&peer("peer1")).await.unwrap();
    let connection = nearby.connection(&peer("peer1")).await.unwrap();
    assert_eq!(connection.state, ConnectionState::Initiated);
    assert_eq!(connection.consent, Consent::Accepted);
    assert_eq!(connection.peer_name.as_deref(), Some("Bob"));
}

#[tokio::test]
async fn test_failed_accept_restores_pending_consent() {
    let (nearby, provider, mut events) = start(config());
    provider.initiated("peer1", "Bob");
    next_event(&mut events).await;
    provider.fail_next(MockOperation::Accept, "STATUS_OUT_OF_ORDER_API_CALL");

    let err = nearby.accept_connection(&peer("peer1")).await.unwrap_err();
    assert_eq!(
        err,
        NearbyError::TransportFailure {
            reason: "STATUS_OUT_OF_ORDER_API_CALL".into()
        }
    );
    let connection = nearby.connection(&peer("peer1")).await.unwrap();
    assert_eq!(connection.consent, Consent::Pending);
    assert!(nearby.accept_connection(&peer("peer1")).await.is_ok());
}

#[tokio::test]
async fn test_request_to_undiscovered_endpoint() {
    let (nearby, _provider, _events) = start(config());
    let err = nearby
        .request_connection(&peer("peer1"), "Alice")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        NearbyError::EndpointUnknown {
            endpoint_id: peer("peer1")
        }
    );

    let relaxed = config().with_require_discovered_endpoint(false);
    let (nearby, _provider, _events) = start(relaxed);
    assert!(nearby
        .request_connection(&peer("peer1"), "Alice")
        .await
        .is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_exactly_one_succeeds() {
    let config = config().with_require_discovered_endpoint(false);
    let (nearby, provider, _events) = start(config);
    let nearby = Arc::new(nearby);
    let endpoint = peer("peer1");

    let handles = (0..8).map(|_| {
        let nearby = Arc::clone(&nearby);
        let endpoint = endpoint.clone();
        tokio::spawn(async move { nearby.request_connection(&endpoint, "Alice").await })
    });
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("Request task panicked"))
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert_eq!(
            result.as_ref().unwrap_err(),
            &NearbyError::DuplicateConnectionAttempt {
                endpoint_id: endpoint.clone()
            }
        );
    }
    let connects = provider
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ProviderCall::Connect { .. }))
        .count();
    assert_eq!(connects, 1);
}

#[tokio::test]
async fn test_failed_connect_reports_result_and_error() {
    let config = config().with_require_discovered_endpoint(false);
    let (nearby, provider, mut events) = start(config);
    provider.fail_next(MockOperation::Connect, "STATUS_RADIO_ERROR");

    let err = nearby
        .request_connection(&peer("peer1"), "Alice")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        NearbyError::TransportFailure {
            reason: "STATUS_RADIO_ERROR".into()
        }
    );

    assert!(matches!(
        next_event(&mut events).await,
        NearbyEvent::ConnectionInitiated { .. }
    ));
    assert_eq!(
        next_event(&mut events).await,
        NearbyEvent::ConnectionResult {
            endpoint_id: peer("peer1"),
            success: false,
            reason: Some(FailureReason::Transport("STATUS_RADIO_ERROR".into())),
        }
    );

    // A terminal record does not block a new attempt
    assert!(nearby
        .request_connection(&peer("peer1"), "Alice")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_reject_fails_locally_and_tells_provider() {
    let (nearby, provider, mut events) = start(config());
    provider.initiated("peer1", "Bob");
    next_event(&mut events).await;

    nearby.reject_connection(&peer("peer1")).await.unwrap();
    assert_eq!(
        events.try_recv(),
        Some(NearbyEvent::ConnectionResult {
            endpoint_id: peer("peer1"),
            success: false,
            reason: Some(FailureReason::LocallyRejected),
        })
    );
    assert_eq!(
        nearby.connection(&peer("peer1")).await.unwrap().state,
        ConnectionState::Failed
    );

    let reject = ProviderCall::Reject {
        endpoint_id: peer("peer1"),
    };
    timeout(WAIT, async {
        while !provider.calls().contains(&reject) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Provider never saw the reject");

    // The provider's own failure report for the rejected record is stale
    provider.connection_result("peer1", false, Some("STATUS_CONNECTION_REJECTED"));
    expect_quiet(&nearby, &provider, &mut events).await;
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (nearby, provider, mut events) = start(config());
    connect_incoming(&nearby, &provider, &mut events).await;

    nearby.disconnect(&peer("peer1")).await;
    nearby.disconnect(&peer("peer1")).await;
    nearby.disconnect(&peer("peer1")).await;

    assert_eq!(
        events.try_recv(),
        Some(NearbyEvent::Disconnected {
            endpoint_id: peer("peer1")
        })
    );
    assert_eq!(events.try_recv(), None);

    let disconnects = provider
        .calls()
        .into_iter()
        .filter(|call| matches!(call, ProviderCall::Disconnect { .. }))
        .count();
    assert_eq!(disconnects, 1);
    assert!(nearby.connection(&peer("peer1")).await.is_none());
}

#[tokio::test]
async fn test_stale_notifications_after_disconnect_are_dropped() {
    let (nearby, provider, mut events) = start(config());
    connect_incoming(&nearby, &provider, &mut events).await;

    nearby.disconnect(&peer("peer1")).await;
    next_event(&mut events).await;

    provider.connection_result("peer1", true, None);
    provider.disconnected("peer1");
    expect_quiet(&nearby, &provider, &mut events).await;

    assert_eq!(
        nearby.connection(&peer("peer1")).await.unwrap().state,
        ConnectionState::Disconnected
    );
    assert_eq!(nearby.connection_stats().await.stale_notifications_dropped, 2);
}

#[tokio::test]
async fn test_link_loss_reported_by_provider() {
    let (nearby, provider, mut events) = start(config());
    connect_incoming(&nearby, &provider, &mut events).await;

    provider.disconnected("peer1");
    assert_eq!(
        next_event(&mut events).await,
        NearbyEvent::Disconnected {
            endpoint_id: peer("peer1")
        }
    );

    let transitions = nearby.recent_transitions(1).await;
    assert_eq!(transitions[0].to_state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_terminal_records_expire_after_retention() {
    let clock = ManualClock::new_at(1_000);
    let config = NearbyConfig::testing()
        .with_require_discovered_endpoint(false)
        .with_terminal_retention(Duration::from_secs(10));
    let (provider, notifications) = MockProvider::new();
    let nearby = NearbyBuilder::new()
        .with_config(config)
        .with_time_source(clock.clone())
        .start(provider.clone(), notifications)
        .unwrap();

    provider.fail_next(MockOperation::Connect, "STATUS_RADIO_ERROR");
    let _ = nearby.request_connection(&peer("peer1"), "Alice").await;
    assert!(nearby.connection(&peer("peer1")).await.is_some());

    // Several sweeps pass without the clock moving
    sleep(Duration::from_millis(60)).await;
    assert!(nearby.connection(&peer("peer1")).await.is_some());

    clock.advance(Duration::from_secs(11));
    timeout(WAIT, async {
        while nearby.connection(&peer("peer1")).await.is_some() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Terminal record was never swept");
}

// ----------------------------------------------------------------------------
// Advertising and Discovery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_start_commands_are_idempotent() {
    let (nearby, provider, _events) = start(config());

    assert_eq!(assert_ok!(nearby.start_advertising("Alice").await), "Alice");
    assert_eq!(assert_ok!(nearby.start_advertising("Other").await), "Alice");
    assert_ok!(nearby.start_discovery().await);
    assert_ok!(nearby.start_discovery().await);

    assert_eq!(
        provider.calls(),
        vec![
            ProviderCall::Advertise {
                local_name: "Alice".into()
            },
            ProviderCall::Discover,
        ]
    );
    assert!(nearby.is_advertising().await);
    assert!(nearby.is_discovering().await);
}

#[tokio::test]
async fn test_strict_activation_reports_already_active() {
    let (nearby, _provider, _events) = start(config().with_strict_activation(true));

    assert_ok!(nearby.start_discovery().await);
    let err = assert_err!(nearby.start_discovery().await);
    assert!(matches!(err, NearbyError::AlreadyActive { .. }));
}

#[tokio::test]
async fn test_failed_start_leaves_activity_off() {
    let (nearby, provider, _events) = start(config());
    provider.fail_next(MockOperation::Advertise, "STATUS_BLUETOOTH_ERROR");

    assert!(matches!(
        nearby.start_advertising("Alice").await,
        Err(NearbyError::TransportFailure { .. })
    ));
    assert!(!nearby.is_advertising().await);

    // Stopping an inactive activity never reaches the provider
    nearby.stop_advertising().await;
    nearby.stop_discovery().await;
    assert_eq!(provider.calls().len(), 1);
}

#[tokio::test]
async fn test_stop_discovery_clears_registry_but_keeps_connections() {
    let (nearby, provider, mut events) = start(config());
    nearby.start_discovery().await.unwrap();
    provider.found("peer2", "Carol");
    next_event(&mut events).await;
    connect_incoming(&nearby, &provider, &mut events).await;

    nearby.stop_discovery().await;
    assert!(nearby.endpoints().await.is_empty());
    assert!(!nearby.is_discovering().await);
    assert_eq!(
        nearby.connection(&peer("peer1")).await.unwrap().state,
        ConnectionState::Connected
    );

    // Rediscovery announces again
    nearby.start_discovery().await.unwrap();
    provider.found("peer2", "Carol");
    assert!(matches!(
        next_event(&mut events).await,
        NearbyEvent::EndpointDiscovered { .. }
    ));
}

#[tokio::test]
async fn test_sightings_outside_discovery_are_dropped() {
    let (nearby, provider, mut events) = start(config());

    // Before any session
    provider.found("early", "Dave");
    expect_quiet(&nearby, &provider, &mut events).await;
    nearby.start_discovery().await.unwrap();
    provider.found("peer2", "Carol");
    assert_eq!(
        next_event(&mut events).await,
        NearbyEvent::EndpointDiscovered {
            endpoint_id: peer("peer2"),
            display_name: "Carol".into(),
        }
    );

    // After the session ended
    nearby.stop_discovery().await;
    provider.found("late", "Erin");
    expect_quiet(&nearby, &provider, &mut events).await;

    let ids: Vec<EndpointId> = nearby
        .endpoints()
        .await
        .into_iter()
        .map(|endpoint| endpoint.id)
        .collect();
    assert!(!ids.contains(&peer("early")));
    assert!(!ids.contains(&peer("late")));
}

#[tokio::test]
async fn test_failed_discovery_start_drops_sightings() {
    let (nearby, provider, mut events) = start(config());
    provider.fail_next(MockOperation::Discover, "STATUS_BLUETOOTH_ERROR");
    assert_err!(nearby.start_discovery().await);

    provider.found("peer2", "Carol");
    expect_quiet(&nearby, &provider, &mut events).await;
    assert!(nearby.endpoint(&peer("peer2")).await.is_none());
}

// ----------------------------------------------------------------------------
// Payload Transfer
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_send_progress_reaches_success() {
    let (nearby, provider, mut events) = start(config());
    connect_incoming(&nearby, &provider, &mut events).await;

    let source = BytesSource::new(vec![7u8; 1000]);
    let payload_id = nearby
        .send_payload(&peer("peer1"), &source, "file.bin")
        .await
        .unwrap();

    for (bytes, status) in [
        (200, TransferStatus::InProgress),
        (600, TransferStatus::InProgress),
        (1000, TransferStatus::Success),
    ] {
        provider.progress("peer1", &payload_id, bytes, Some(1000), status);
    }

    let mut observed = Vec::new();
    for _ in 0..3 {
        observed.push(transfer_bytes(next_event(&mut events).await));
    }
    assert_eq!(
        observed,
        vec![
            (200, TransferStatus::InProgress),
            (600, TransferStatus::InProgress),
            (1000, TransferStatus::Success),
        ]
    );

    let transfer = nearby.transfer(&peer("peer1"), &payload_id).await.unwrap();
    assert_eq!(transfer.direction, Direction::Outgoing);
    assert_eq!(transfer.name.as_deref(), Some("file.bin"));
    assert_eq!(transfer.total_bytes, Some(1000));

    let sent = provider.sent_payloads();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].payload_id, payload_id);
    assert_eq!(sent[0].bytes.len(), 1000);

    let drained = nearby.drain_completed_transfers().await;
    assert_eq!(drained.len(), 1);
    assert!(nearby.transfers().await.is_empty());
}

#[tokio::test]
async fn test_out_of_order_progress_never_regresses() {
    let (nearby, provider, mut events) = start(config());
    connect_incoming(&nearby, &provider, &mut events).await;
    let payload_id = "incoming-1".into();

    provider.progress("peer1", &payload_id, 600, Some(1000), TransferStatus::InProgress);
    provider.progress("peer1", &payload_id, 400, Some(1000), TransferStatus::InProgress);

    assert_eq!(transfer_bytes(next_event(&mut events).await).0, 600);
    assert_eq!(transfer_bytes(next_event(&mut events).await).0, 600);

    let transfer = nearby.transfer(&peer("peer1"), &payload_id).await.unwrap();
    assert_eq!(transfer.direction, Direction::Incoming);
    assert_eq!(transfer.bytes_transferred, 600);
}

#[tokio::test]
async fn test_send_requires_connected_endpoint() {
    let (nearby, provider, mut events) = start(config());
    let source = BytesSource::new(b"data".to_vec());

    let err = nearby
        .send_payload(&peer("peer1"), &source, "data.bin")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        NearbyError::NoActiveConnection {
            endpoint_id: peer("peer1")
        }
    );

    // Pending is not connected either
    provider.initiated("peer1", "Bob");
    next_event(&mut events).await;
    assert!(matches!(
        nearby.send_payload(&peer("peer1"), &source, "data.bin").await,
        Err(NearbyError::NoActiveConnection { .. })
    ));
}

#[tokio::test]
async fn test_unreadable_source_is_payload_source_error() {
    let (nearby, provider, mut events) = start(config());
    connect_incoming(&nearby, &provider, &mut events).await;

    let source = FileSource::new("/definitely/not/here.bin");
    assert!(matches!(
        nearby.send_payload(&peer("peer1"), &source, "here.bin").await,
        Err(NearbyError::PayloadSourceError { .. })
    ));
    assert!(nearby.transfers().await.is_empty());
}

#[tokio::test]
async fn test_failed_send_leaves_no_transfer() {
    let (nearby, provider, mut events) = start(config());
    connect_incoming(&nearby, &provider, &mut events).await;
    provider.fail_next(MockOperation::Send, "STATUS_ENDPOINT_IO_ERROR");

    let source = BytesSource::new(b"data".to_vec());
    assert!(matches!(
        nearby.send_payload(&peer("peer1"), &source, "data.bin").await,
        Err(NearbyError::TransportFailure { .. })
    ));
    assert!(nearby.transfers().await.is_empty());
}

#[tokio::test]
async fn test_late_progress_for_failed_send_is_dropped() {
    let (nearby, provider, mut events) = start(config());
    connect_incoming(&nearby, &provider, &mut events).await;
    provider.fail_next(MockOperation::Send, "STATUS_ENDPOINT_IO_ERROR");

    let source = BytesSource::new(b"data".to_vec());
    assert_err!(nearby.send_payload(&peer("peer1"), &source, "data.bin").await);
    let payload_id = provider
        .calls()
        .into_iter()
        .find_map(|call| match call {
            ProviderCall::Send { payload_id, .. } => Some(payload_id),
            _ => None,
        })
        .expect("Provider never saw the send");

    provider.progress("peer1", &payload_id, 4, Some(4), TransferStatus::Success);
    expect_quiet(&nearby, &provider, &mut events).await;
    assert!(nearby.transfers().await.is_empty());
    assert_eq!(nearby.transfer_stats().await.updates_dropped, 1);
}

#[tokio::test]
async fn test_drained_transfer_is_not_recreated_by_late_progress() {
    let (nearby, provider, mut events) = start(config());
    connect_incoming(&nearby, &provider, &mut events).await;

    let source = BytesSource::new(vec![1u8; 1000]);
    let payload_id = nearby
        .send_payload(&peer("peer1"), &source, "file.bin")
        .await
        .unwrap();
    provider.progress("peer1", &payload_id, 1000, Some(1000), TransferStatus::Success);
    assert_eq!(
        transfer_bytes(next_event(&mut events).await),
        (1000, TransferStatus::Success)
    );
    assert_eq!(nearby.drain_completed_transfers().await.len(), 1);

    // The same final report delivered twice while the link is still up
    provider.progress("peer1", &payload_id, 1000, Some(1000), TransferStatus::Success);
    expect_quiet(&nearby, &provider, &mut events).await;

    assert!(nearby.transfers().await.is_empty());
    let stats = nearby.transfer_stats().await;
    assert_eq!(stats.transfers_started, 1);
    assert_eq!(stats.transfers_succeeded, 1);
}

#[tokio::test]
async fn test_disconnect_fails_in_flight_transfers() {
    let (nearby, provider, mut events) = start(config());
    connect_incoming(&nearby, &provider, &mut events).await;

    let source = BytesSource::new(vec![0u8; 1000]);
    let payload_id = nearby
        .send_payload(&peer("peer1"), &source, "file.bin")
        .await
        .unwrap();
    provider.progress("peer1", &payload_id, 100, Some(1000), TransferStatus::InProgress);
    next_event(&mut events).await;

    nearby.disconnect(&peer("peer1")).await;
    assert!(matches!(
        events.try_recv(),
        Some(NearbyEvent::Disconnected { .. })
    ));
    assert_eq!(
        transfer_bytes(events.try_recv().unwrap()),
        (100, TransferStatus::Failure)
    );

    // Late progress for the failed transfer is dropped
    provider.progress("peer1", &payload_id, 1000, Some(1000), TransferStatus::Success);
    expect_quiet(&nearby, &provider, &mut events).await;
}

#[tokio::test]
async fn test_progress_without_connection_is_dropped() {
    let (nearby, provider, mut events) = start(config());

    provider.progress("peer9", &"stray".into(), 10, None, TransferStatus::InProgress);
    expect_quiet(&nearby, &provider, &mut events).await;
}

// ----------------------------------------------------------------------------
// Shutdown
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let (nearby, provider, mut events) = start(config());
    nearby.start_advertising("Alice").await.unwrap();
    nearby.start_discovery().await.unwrap();
    connect_incoming(&nearby, &provider, &mut events).await;
    provider.take_calls();

    nearby.shutdown().await;

    assert_eq!(
        provider.calls(),
        vec![
            ProviderCall::StopAdvertise,
            ProviderCall::StopDiscover,
            ProviderCall::Disconnect {
                endpoint_id: peer("peer1")
            },
        ]
    );
    assert!(matches!(
        events.try_recv(),
        Some(NearbyEvent::Disconnected { .. })
    ));
}
