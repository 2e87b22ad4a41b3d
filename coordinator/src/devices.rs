//! Device registration, heartbeats and config pulls.
//!
//! Registering a device joins it to every network in the tenant: an
//! address is allocated per network and a peer row created, so the
//! device's next config pull already routes to everyone else.

use std::str::FromStr as _;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use goconnect_coordinator_store::{NetworkStore as _, PeerStore as _};
use goconnect_ipam::IpAllocator as _;
use goconnect_model::{
    DeviceId, Error, ErrorKind, InterfaceAddress, Network, Peer, PeerId, Platform, TunnelConfig,
    TunnelPeerConfig, UserId, ENCODED_KEY_LEN,
};
use ip_network::{IpNetwork, Ipv4Network};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::{AppState, DeviceRecord};

/// Keepalive pushed to every peer so NAT bindings survive idle periods.
const PERSISTENT_KEEPALIVE_SECS: u16 = 25;

#[derive(Debug, Deserialize)]
pub(crate) struct RegisterRequest {
    name: String,
    platform: Platform,
    pubkey: String,
    hostname: String,
    os_version: String,
    daemon_ver: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterResponse {
    id: String,
}

pub(crate) async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    if request.pubkey.len() != ENCODED_KEY_LEN {
        return Err(Error::validation(format!("pubkey must be {ENCODED_KEY_LEN} characters")).into());
    }

    let device_id = DeviceId::random();
    let record = DeviceRecord {
        id: device_id,
        name: request.name,
        platform: request.platform,
        pubkey: request.pubkey.clone(),
        hostname: request.hostname,
        os_version: request.os_version,
        daemon_ver: request.daemon_ver,
        last_seen: Some(Utc::now()),
    };

    for network in state.networks.list_by_tenant(state.tenant) {
        join_network(&state, &network, device_id, &request.pubkey)?;
    }

    state.devices.write().insert(device_id, record);
    tracing::info!(device_id = %device_id, "registered device");

    Ok(Json(RegisterResponse { id: device_id.to_string() }))
}

fn join_network(state: &AppState, network: &Network, device_id: DeviceId, pubkey: &str) -> Result<(), ApiError> {
    // The daemon API has no user concept of its own; allocations are
    // keyed by the device.
    let user = UserId::from_uuid(device_id.as_uuid());

    let allocation = state.ipam.get_or_allocate(network.id, user, network.cidr)?;
    let address: std::net::Ipv4Addr = allocation
        .ip
        .parse()
        .map_err(|_| Error::new(ErrorKind::Internal, "allocator produced a malformed address"))?;

    let now = Utc::now();
    let peer = Peer {
        id: PeerId::from_uuid(Uuid::nil()),
        network_id: network.id,
        device_id,
        tenant: state.tenant,
        public_key: pubkey.to_string(),
        preshared_key: None,
        endpoint: None,
        allowed_ips: vec![IpNetwork::V4(Ipv4Network::from(address))],
        persistent_keepalive: PERSISTENT_KEEPALIVE_SECS,
        last_handshake: None,
        rx_bytes: 0,
        tx_bytes: 0,
        active: false,
        created_at: now,
        updated_at: now,
        disabled_at: None,
    };
    peer.validate()?;
    state.peers.create(peer)?;

    Ok(())
}

#[derive(Debug, Deserialize)]
pub(crate) struct HeartbeatRequest {
    daemon_ver: String,
    #[allow(dead_code)]
    os_version: String,
}

pub(crate) async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<HeartbeatRequest>,
) -> Result<StatusCode, ApiError> {
    let device_id = parse_device_id(&id)?;

    let mut devices = state.devices.write();
    let device = devices
        .get_mut(&device_id)
        .ok_or_else(|| Error::not_found(format!("device {id} not found")))?;

    device.last_seen = Some(Utc::now());
    device.daemon_ver = request.daemon_ver;

    Ok(StatusCode::NO_CONTENT)
}

/// Builds the full replacement config for a device: its own address in
/// every joined network plus a peer entry for everyone else there.
pub(crate) async fn config(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TunnelConfig>, ApiError> {
    let device_id = parse_device_id(&id)?;

    if !state.devices.read().contains_key(&device_id) {
        return Err(Error::not_found(format!("device {id} not found")).into());
    }

    let mut interface_addresses = Vec::new();
    let mut peers = Vec::new();

    for network in state.networks.list_by_tenant(state.tenant) {
        let Ok(own) = state.peers.get_by_network_and_device(network.id, device_id) else {
            continue;
        };

        if let Some(IpNetwork::V4(own_address)) = own.allowed_ips.first() {
            interface_addresses.push(
                InterfaceAddress::new(own_address.network_address(), network.cidr.netmask())
                    .map_err(|e| Error::new(ErrorKind::Internal, e.message))?,
            );
        }

        for peer in state.peers.get_by_network_id(network.id) {
            if peer.device_id == device_id {
                continue;
            }
            peers.push(TunnelPeerConfig {
                // Signaling addresses devices, so the device uuid doubles
                // as the peer's rendezvous id.
                peer_id: Some(PeerId::from_uuid(peer.device_id.as_uuid())),
                public_key: peer.public_key,
                preshared_key: peer.preshared_key,
                endpoint: peer.endpoint,
                allowed_ips: peer.allowed_ips,
                persistent_keepalive: peer.persistent_keepalive,
            });
        }
    }

    Ok(Json(TunnelConfig {
        // The device supplies its own private key locally.
        private_key: String::new(),
        interface_addresses,
        dns: Vec::new(),
        mtu: state.mtu,
        peers,
    }))
}

fn parse_device_id(raw: &str) -> Result<DeviceId, ApiError> {
    DeviceId::from_str(raw)
        .map_err(|_| Error::validation(format!("{raw} is not a valid device id")).into())
}
