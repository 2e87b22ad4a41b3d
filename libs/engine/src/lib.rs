//! Daemon engine (C8): the per-device control loop.
//!
//! Two independent tickers drive the steady state, a heartbeat every
//! 30 seconds and a config pull every 60, each firing immediately on
//! startup. Neither loop ever aborts on error: network failures are
//! logged and the next tick retries from scratch, so a flaky coordinator
//! degrades the device instead of killing it.

mod config;
mod uptime;

pub use config::{load, ConfigOverrides, EngineConfig};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use goconnect_coordinator_client::{CoordinatorClient, DeviceInfo, HeartbeatInfo};
use goconnect_identity::Identity;
use goconnect_model::TunnelConfig;
use goconnect_netconfig::NetworkConfigurator;
use goconnect_tunnel::TunnelAdapter;
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Invoked with every successfully pulled config, after the local apply
/// steps have run. The daemon uses this to keep the peer-connection
/// manager's peer set in sync with the coordinator's view.
pub type ConfigListener = Arc<dyn Fn(&TunnelConfig) + Send + Sync>;

/// Tick intervals and per-call deadlines for the two steady-state loops.
/// Injectable so tests can run the loops at speed; production uses the
/// defaults.
#[derive(Debug, Clone)]
pub struct Timing {
    pub heartbeat_interval: Duration,
    pub sync_interval: Duration,
    pub heartbeat_deadline: Duration,
    pub sync_deadline: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            sync_interval: Duration::from_secs(60),
            heartbeat_deadline: Duration::from_secs(5),
            sync_deadline: Duration::from_secs(10),
        }
    }
}

pub struct Engine {
    identity: Arc<Mutex<Identity>>,
    client: Arc<CoordinatorClient>,
    tunnel: Arc<dyn TunnelAdapter>,
    netconfig: Arc<dyn NetworkConfigurator>,
    interface_name: String,
    daemon_version: String,
    timing: Timing,
    wg_active: Arc<AtomicBool>,
    config_listener: Mutex<Option<ConfigListener>>,
    cancellation: CancellationToken,
}

impl Engine {
    pub fn new(
        identity: Arc<Mutex<Identity>>,
        client: Arc<CoordinatorClient>,
        tunnel: Arc<dyn TunnelAdapter>,
        netconfig: Arc<dyn NetworkConfigurator>,
        interface_name: impl Into<String>,
        daemon_version: impl Into<String>,
        timing: Timing,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            client,
            tunnel,
            netconfig,
            interface_name: interface_name.into(),
            daemon_version: daemon_version.into(),
            timing,
            wg_active: Arc::new(AtomicBool::new(false)),
            config_listener: Mutex::new(None),
            cancellation: CancellationToken::new(),
        })
    }

    pub fn set_config_listener(&self, listener: impl Fn(&TunnelConfig) + Send + Sync + 'static) {
        *self.config_listener.lock() = Some(Arc::new(listener));
    }

    /// Whether the most recent tunnel-config application succeeded; the
    /// local control bridge reports this as `wg.active`.
    pub fn wg_active(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.wg_active)
    }

    /// Cancels both loops; `run` returns shortly after.
    pub fn stop(&self) {
        self.cancellation.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Runs the heartbeat and config-sync loops until [`Engine::stop`].
    pub async fn run(self: Arc<Self>) {
        let heartbeat = tokio::spawn(Arc::clone(&self).heartbeat_loop());
        let sync = tokio::spawn(Arc::clone(&self).sync_loop());
        let uptime = tokio::spawn(uptime::run(self.cancellation.clone()));

        let _ = tokio::join!(heartbeat, sync, uptime);
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.timing.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = ticker.tick() => self.heartbeat_tick().await,
            }
        }
    }

    async fn sync_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.timing.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = ticker.tick() => self.sync_tick().await,
            }
        }
    }

    async fn heartbeat_tick(&self) {
        self.refresh_identity();

        let (device_id, token) = {
            let identity = self.identity.lock();
            (
                identity.device_id().map(String::from),
                identity.token().unwrap_or_default().to_string(),
            )
        };

        match device_id {
            None => self.try_register(token).await,
            Some(device_id) => {
                let info = HeartbeatInfo::current(&self.daemon_version);
                let result = tokio::time::timeout(
                    self.timing.heartbeat_deadline,
                    self.client.send_heartbeat(&device_id, &token, &info),
                )
                .await;

                match result {
                    Ok(Ok(())) => tracing::trace!("heartbeat sent"),
                    Ok(Err(error)) => tracing::warn!(%error, "heartbeat failed"),
                    Err(_elapsed) => tracing::warn!("heartbeat timed out"),
                }
            }
        }
    }

    /// First contact with the coordinator: registers this device and
    /// persists the issued id (and device token, if the coordinator
    /// mints one) so every later tick can authenticate.
    async fn try_register(&self, token: String) {
        let pubkey = self.identity.lock().public_key_base64();
        let info = DeviceInfo::from_host(pubkey, &self.daemon_version);

        let result = tokio::time::timeout(
            self.timing.heartbeat_deadline,
            self.client.register(&token, &info),
        )
        .await;

        match result {
            Ok(Ok(response)) => {
                tracing::info!(device_id = %response.id, "registered device with coordinator");
                let token = response.token.unwrap_or(token);
                if let Err(error) = self.identity.lock().set_registration(response.id, token) {
                    tracing::error!(%error, "failed to persist device registration");
                }
            }
            Ok(Err(error)) => tracing::warn!(%error, "device registration failed"),
            Err(_elapsed) => tracing::warn!("device registration timed out"),
        }
    }

    async fn sync_tick(&self) {
        let (device_id, token, private_key) = {
            let identity = self.identity.lock();
            let Some(device_id) = identity.device_id().map(String::from) else {
                tracing::debug!("skipping config sync, device is not registered yet");
                return;
            };
            (
                device_id,
                identity.token().unwrap_or_default().to_string(),
                goconnect_model::base64_encode(identity.private_key().to_bytes()),
            )
        };

        let config = match tokio::time::timeout(
            self.timing.sync_deadline,
            self.client.get_config(&device_id, &token),
        )
        .await
        {
            Ok(Ok(config)) => config,
            Ok(Err(error)) => {
                tracing::warn!(%error, "failed to pull config from coordinator");
                return;
            }
            Err(_elapsed) => {
                tracing::warn!("config pull timed out");
                return;
            }
        };

        self.apply(config, private_key);
    }

    /// Applies a pulled config: tunnel first, then interface, then
    /// routes. A failed step is logged and the remaining steps still
    /// run; the next tick re-applies everything, so stale state
    /// self-heals.
    fn apply(&self, mut config: TunnelConfig, private_key: String) {
        // The coordinator never sees the device's private key; it is
        // injected locally before the config reaches the tunnel driver.
        config.private_key = private_key;

        match self.tunnel.apply_config(&config) {
            Ok(()) => {
                self.wg_active.store(true, Ordering::Relaxed);
                tracing::debug!(peers = config.peers.len(), "applied tunnel config");
            }
            Err(error) => {
                self.wg_active.store(false, Ordering::Relaxed);
                tracing::warn!(%error, "failed to apply tunnel config");
            }
        }

        if let Err(error) = self.netconfig.configure_interface(
            &self.interface_name,
            &config.interface_addresses,
            &config.dns,
            config.mtu,
        ) {
            tracing::warn!(%error, "failed to configure interface");
        }

        if let Err(error) = self.netconfig.add_routes(&self.interface_name, &config.routes()) {
            tracing::warn!(%error, "failed to install routes");
        }

        let listener = self.config_listener.lock().clone();
        if let Some(listener) = listener {
            listener(&config);
        }
    }

    /// Deep-link logins are written by a separate process invocation;
    /// while the device is not fully registered, re-read the identity
    /// file each tick so a fresh token is picked up without a restart.
    fn refresh_identity(&self) {
        let mut identity = self.identity.lock();
        if identity.is_registered() {
            return;
        }
        if let Err(error) = identity.reload() {
            tracing::debug!(%error, "failed to re-read identity file");
        }
    }
}
