use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use goconnect_coordinator_store::{InMemoryNetworkStore, InMemoryPeerStore};
use goconnect_ipam::InMemoryIpAllocator;
use goconnect_model::{DeviceId, FreshnessWindow, Platform, TenantId, UserId};
use parking_lot::RwLock;

use crate::auth::DeviceAuth;
use crate::signaling::SignalingRelay;
use crate::{auth, devices, networks, signaling};

/// Everything a handler can reach. One tenant per process: multi-tenant
/// routing belongs to the (out of scope) web tier, while the daemon API
/// only ever sees its own tenant.
pub struct AppState {
    pub tenant: TenantId,
    /// Stand-in owner for resources the daemon API creates; a real
    /// deployment attributes them to the authenticated user.
    pub admin: UserId,
    pub devices: RwLock<HashMap<DeviceId, DeviceRecord>>,
    pub peers: InMemoryPeerStore,
    pub networks: InMemoryNetworkStore,
    pub ipam: InMemoryIpAllocator,
    pub auth: DeviceAuth,
    pub signaling: SignalingRelay,
    pub mtu: u32,
}

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub name: String,
    pub platform: Platform,
    pub pubkey: String,
    pub hostname: String,
    pub os_version: String,
    pub daemon_ver: String,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AppState {
    pub fn new(freshness: FreshnessWindow, mtu: u32) -> Arc<Self> {
        Arc::new(Self {
            tenant: TenantId::random(),
            admin: UserId::random(),
            devices: RwLock::new(HashMap::new()),
            peers: InMemoryPeerStore::new(freshness),
            networks: InMemoryNetworkStore::new(),
            ipam: InMemoryIpAllocator::new(),
            auth: DeviceAuth::default(),
            signaling: SignalingRelay::default(),
            mtu,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "" }))
        .route("/v1/auth/device/code", post(auth::request_code))
        .route("/v1/auth/device/token", post(auth::poll_token))
        .route("/v1/auth/device/approve", post(auth::approve))
        .route("/v1/signaling", get(signaling::connect))
        .route("/v1/devices", post(devices::register))
        .route("/v1/devices/{id}/heartbeat", post(devices::heartbeat))
        .route("/v1/devices/{id}/config", get(devices::config))
        .route("/v1/networks", post(networks::create).get(networks::list))
        .with_state(state)
}
