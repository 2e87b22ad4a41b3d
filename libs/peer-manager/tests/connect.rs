//! End-to-end peer negotiation: two managers wired together through
//! in-process signaling, with real ICE agents pairing host candidates
//! over the loopback interface.

use std::sync::Arc;
use std::time::Duration;

use goconnect_ice::IceConn;
use goconnect_model::PeerId;
use goconnect_peer_manager::PeerConnectionManager;
use goconnect_signaling::InProcessHub;
use tokio::sync::mpsc;

struct Endpoint {
    manager: Arc<PeerConnectionManager>,
    connections: mpsc::UnboundedReceiver<(PeerId, IceConn)>,
}

fn endpoint(hub: &Arc<InProcessHub>, id: PeerId) -> Endpoint {
    let signaling = hub.register(id);
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = PeerConnectionManager::new(
        signaling,
        None,
        Arc::new(move |peer, conn| {
            let _ = tx.send((peer, conn));
        }),
    );
    manager.start();

    Endpoint { manager, connections: rx }
}

async fn next_connection(endpoint: &mut Endpoint, within: Duration) -> (PeerId, IceConn) {
    tokio::time::timeout(within, endpoint.connections.recv())
        .await
        .expect("connection within the deadline")
        .expect("sink still open")
}

#[tokio::test(flavor = "multi_thread")]
async fn two_managers_negotiate_a_direct_connection() {
    let _logs = goconnect_logging::test("goconnect_peer_manager=debug");
    let hub = InProcessHub::new();
    let a_id = PeerId::random();
    let b_id = PeerId::random();
    let mut a = endpoint(&hub, a_id);
    let mut b = endpoint(&hub, b_id);

    a.manager.connect(b_id, Duration::from_secs(10)).await.unwrap();

    let (peer_at_a, _) = next_connection(&mut a, Duration::from_secs(10)).await;
    let (peer_at_b, _) = next_connection(&mut b, Duration::from_secs(10)).await;
    assert_eq!(peer_at_a, b_id);
    assert_eq!(peer_at_b, a_id);

    let status = a.manager.get_peer_status(b_id);
    assert!(status.connected);
    assert!(
        matches!(status.connection_state.as_str(), "Connected" | "Completed"),
        "unexpected state {}",
        status.connection_state
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn connecting_to_an_already_connected_peer_conflicts() {
    let _logs = goconnect_logging::test("goconnect_peer_manager=debug");
    let hub = InProcessHub::new();
    let a_id = PeerId::random();
    let b_id = PeerId::random();
    let mut a = endpoint(&hub, a_id);
    let mut b = endpoint(&hub, b_id);

    a.manager.connect(b_id, Duration::from_secs(10)).await.unwrap();
    next_connection(&mut a, Duration::from_secs(10)).await;
    next_connection(&mut b, Duration::from_secs(10)).await;

    let error = a.manager.connect(b_id, Duration::from_secs(5)).await.unwrap_err();
    assert_eq!(error.kind, goconnect_model::ErrorKind::Conflict);

    // The original connection is untouched.
    assert!(a.manager.get_peer_status(b_id).connected);
}

#[tokio::test(flavor = "multi_thread")]
async fn exchanged_probes_yield_latency_on_both_sides() {
    let _logs = goconnect_logging::test("goconnect_peer_manager=debug");
    let hub = InProcessHub::new();
    let a_id = PeerId::random();
    let b_id = PeerId::random();
    let mut a = endpoint(&hub, a_id);
    let mut b = endpoint(&hub, b_id);

    a.manager.connect(b_id, Duration::from_secs(10)).await.unwrap();
    let (_, conn_a) = next_connection(&mut a, Duration::from_secs(10)).await;
    next_connection(&mut b, Duration::from_secs(10)).await;

    // A couple of ping intervals' worth of traffic.
    tokio::time::sleep(Duration::from_secs(4)).await;

    let latency_a = a.manager.get_peer_status(b_id).latency_ms;
    let latency_b = b.manager.get_peer_status(a_id).latency_ms;
    assert!(latency_a.is_some_and(|ms| ms > 0.0), "A measured {latency_a:?}");
    assert!(latency_b.is_some_and(|ms| ms > 0.0), "B measured {latency_b:?}");

    // Runt datagrams are ignored without disturbing the samples.
    conn_a.send(&[0x01]).await.unwrap();
    conn_a.send(&[0xff, 0x00]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(b.manager.get_peer_status(a_id).latency_ms.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn reconnects_after_the_remote_side_goes_away() {
    let _logs = goconnect_logging::test("goconnect_peer_manager=debug");
    let hub = InProcessHub::new();
    let a_id = PeerId::random();
    let b_id = PeerId::random();
    let mut a = endpoint(&hub, a_id);
    let mut b = endpoint(&hub, b_id);

    a.manager.connect(b_id, Duration::from_secs(10)).await.unwrap();
    next_connection(&mut a, Duration::from_secs(10)).await;
    next_connection(&mut b, Duration::from_secs(10)).await;

    // Tear down B's side; A's agent notices the dead path, enters a
    // failure state, and the supervisor re-establishes the connection.
    b.manager.remove_peer(a_id);

    let (peer, _) = next_connection(&mut a, Duration::from_secs(60)).await;
    assert_eq!(peer, b_id);
    next_connection(&mut b, Duration::from_secs(10)).await;
    assert!(a.manager.get_peer_status(b_id).connected);
}
