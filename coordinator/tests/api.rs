//! Drives the coordinator's HTTP API with the same client crate the
//! daemon uses, so both sides of the wire contract are exercised at
//! once.

use std::sync::Arc;

use goconnect_coordinator::{router, AppState};
use goconnect_coordinator_client::{CoordinatorClient, DeviceInfo, DeviceTokenPoll, HeartbeatInfo};
use goconnect_coordinator_store::{NetworkStore as _, NewNetwork};
use goconnect_model::{ErrorKind, FreshnessWindow, JoinPolicy, Platform, Visibility};
use url::Url;

struct Server {
    state: Arc<AppState>,
    client: CoordinatorClient,
    base: String,
}

async fn start() -> Server {
    let state = AppState::new(FreshnessWindow::default(), 1420);
    state
        .networks
        .create(NewNetwork {
            tenant: state.tenant,
            name: "default".to_string(),
            cidr: "100.64.0.0/24".parse().unwrap(),
            visibility: Visibility::Private,
            join_policy: JoinPolicy::Open,
            created_by: state.admin,
        })
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });

    let base = format!("http://{addr}");
    let client = CoordinatorClient::new(Url::parse(&base).unwrap(), "goconnect-daemon", "0.0.0-test").unwrap();

    Server { state, client, base }
}

fn device_info(pubkey_char: char) -> DeviceInfo {
    DeviceInfo {
        name: "laptop".to_string(),
        platform: Platform::Linux,
        pubkey: pubkey_char.to_string().repeat(44),
        hostname: "laptop.lan".to_string(),
        os_version: "6.1".to_string(),
        daemon_ver: "0.0.0-test".to_string(),
    }
}

#[tokio::test]
async fn two_devices_see_each_other_in_their_configs() {
    let server = start().await;

    let a = server.client.register("tok", &device_info('A')).await.unwrap();
    let b = server.client.register("tok", &device_info('B')).await.unwrap();

    server
        .client
        .send_heartbeat(&a.id, "tok", &HeartbeatInfo { daemon_ver: "0.0.1".to_string(), os_version: "6.1".to_string() })
        .await
        .unwrap();

    let config = server.client.get_config(&a.id, "tok").await.unwrap();
    assert_eq!(config.mtu, 1420);
    assert_eq!(config.interface_addresses, vec!["100.64.0.1/24".parse().unwrap()]);
    assert_eq!(config.peers.len(), 1);
    assert_eq!(config.peers[0].public_key, "B".repeat(44));
    assert_eq!(config.peers[0].allowed_ips, vec!["100.64.0.2/32".parse::<ip_network::IpNetwork>().unwrap()]);

    let config_b = server.client.get_config(&b.id, "tok").await.unwrap();
    assert_eq!(config_b.interface_addresses, vec!["100.64.0.2/24".parse().unwrap()]);
    assert_eq!(config_b.peers[0].public_key, "A".repeat(44));
}

#[tokio::test]
async fn register_rejects_malformed_public_key() {
    let server = start().await;

    let mut info = device_info('A');
    info.pubkey = "short".to_string();

    let error = server.client.register("tok", &info).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn config_for_unknown_device_is_not_found() {
    let server = start().await;

    let error = server
        .client
        .get_config(&uuid::Uuid::new_v4().to_string(), "tok")
        .await
        .unwrap_err();
    assert_eq!(error.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn overlapping_network_is_rejected() {
    let server = start().await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/v1/networks", server.base))
        .json(&serde_json::json!({"name": "other", "cidr": "100.64.0.0/25"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);

    let response = http
        .post(format!("{}/v1/networks", server.base))
        .json(&serde_json::json!({"name": "bad", "cidr": "not-a-cidr"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 422);

    let response = http
        .post(format!("{}/v1/networks", server.base))
        .json(&serde_json::json!({"name": "second", "cidr": "100.65.0.0/24"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn signaling_relay_routes_offers_between_sessions() {
    use goconnect_model::PeerId;
    use goconnect_signaling::{CoordinatorSignaling, Signaling as _};
    use std::sync::Arc;

    let server = start().await;
    let ws_base = server.base.replace("http://", "ws://");

    let a_id = PeerId::random();
    let b_id = PeerId::random();
    let a = CoordinatorSignaling::connect(
        Url::parse(&format!("{ws_base}/v1/signaling?peer_id={a_id}")).unwrap(),
        a_id,
    );
    let b = CoordinatorSignaling::connect(
        Url::parse(&format!("{ws_base}/v1/signaling?peer_id={b_id}")).unwrap(),
        b_id,
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    b.on_offer(Arc::new(move |source, ufrag, pwd| {
        let _ = tx.send((source, ufrag, pwd));
    }));

    // Give both websocket sessions a moment to register with the relay.
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    a.send_offer(b_id, "ufrag-a".to_string(), "pwd-a".to_string()).await.unwrap();

    let (source, ufrag, pwd) = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("offer relayed within the deadline")
        .unwrap();
    assert_eq!(source, a_id);
    assert_eq!(ufrag, "ufrag-a");
    assert_eq!(pwd, "pwd-a");
}

#[tokio::test]
async fn relay_stamps_the_authenticated_source_over_forgeries() {
    use goconnect_model::PeerId;
    use goconnect_signaling::{CoordinatorSignaling, Signaling as _};
    use std::sync::Arc;

    let server = start().await;
    let ws_base = server.base.replace("http://", "ws://");

    let a_id = PeerId::random();
    let forged_id = PeerId::random();
    let b_id = PeerId::random();

    // This session authenticates as `a` but declares `forged` as the
    // source inside every envelope it sends.
    let a = CoordinatorSignaling::connect(
        Url::parse(&format!("{ws_base}/v1/signaling?peer_id={a_id}")).unwrap(),
        forged_id,
    );
    let b = CoordinatorSignaling::connect(
        Url::parse(&format!("{ws_base}/v1/signaling?peer_id={b_id}")).unwrap(),
        b_id,
    );

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    b.on_offer(Arc::new(move |source, _ufrag, _pwd| {
        let _ = tx.send(source);
    }));

    tokio::time::sleep(std::time::Duration::from_secs(1)).await;

    a.send_offer(b_id, "ufrag".to_string(), "pwd".to_string()).await.unwrap();

    let source = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("offer relayed within the deadline")
        .unwrap();
    assert_eq!(source, a_id, "the relay must not forward a client-declared source");
    assert_ne!(source, forged_id);
}

#[tokio::test]
async fn device_login_flow_polls_until_approved() {
    let server = start().await;

    let code = server.client.request_device_code().await.unwrap();
    assert_eq!(code.interval, 5);

    assert!(matches!(
        server.client.poll_device_token(&code.device_code).await.unwrap(),
        DeviceTokenPoll::AuthorizationPending
    ));

    let response = reqwest::Client::new()
        .post(format!("{}/v1/auth/device/approve", server.base))
        .json(&serde_json::json!({"user_code": code.user_code}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    match server.client.poll_device_token(&code.device_code).await.unwrap() {
        DeviceTokenPoll::Success(token) => assert!(!token.access_token.is_empty()),
        other => panic!("expected a token, got {other:?}"),
    }

    // The session is consumed with the token.
    let error = server.client.poll_device_token(&code.device_code).await.unwrap_err();
    assert_eq!(error.kind, ErrorKind::Validation);
}
