//! The GoConnect daemon.
//!
//! `run` is the steady state: identity bootstrap, the engine's two
//! loops, and the local control bridge. `login` drives the interactive
//! device-authorization flow from a terminal, and `status` queries a
//! running daemon over the bridge.

mod deep_link;
mod p2p;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use goconnect_control_bridge as bridge;
use goconnect_coordinator_client::{CoordinatorClient, DeviceTokenPoll};
use goconnect_engine::{ConfigOverrides, Engine, EngineConfig, Timing};
use goconnect_identity::Identity;
use goconnect_netconfig::{NetworkConfigurator, OsConfigurator};
use goconnect_tunnel::{TunnelAdapter, WireGuardAdapter};
use parking_lot::Mutex;
use url::Url;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Cap on the daemon's log directory before startup cleanup kicks in.
const MAX_LOG_SIZE_MB: u32 = 100;

#[derive(Parser)]
#[command(author, version, about = "GoConnect mesh VPN daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Cmd>,

    /// Path to the TOML config file; defaults to `goconnect.toml` in the
    /// user config directory.
    #[arg(short, long, env = "GOCONNECT_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "GOCONNECT_API_URL")]
    coordinator_url: Option<String>,

    #[arg(long, env = "GOCONNECT_INTERFACE")]
    interface_name: Option<String>,

    #[arg(long, env = "GOCONNECT_STUN_URL")]
    stun_url: Option<String>,

    /// File logging directory. Should be writeable by the daemon's user.
    #[arg(short, long, env = "GOCONNECT_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Cmd {
    /// Run the daemon in the foreground.
    Run,
    /// Sign in with the device-authorization flow from a terminal.
    Login {
        /// Coordinator base URL.
        #[arg(long, env = "GOCONNECT_API_URL")]
        server: Option<String>,
    },
    /// Query the running daemon over the local control bridge.
    Status,
}

fn main() {
    match try_main() {
        Ok(()) => {}
        Err(e) => {
            // Print the chain of causes manually so a config mistake
            // doesn't look like a crash.
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    }
}

fn try_main() -> Result<()> {
    // URI-handler invocations pass the deep link as the only argument;
    // handle it before clap gets a chance to reject the scheme.
    if let Some(uri) = std::env::args().nth(1).filter(|arg| arg.starts_with(deep_link::SCHEME)) {
        return deep_link::handle(&uri);
    }

    let cli = Cli::parse();

    match cli.command.clone() {
        Some(Cmd::Login { server }) => login(server.or_else(|| cli.coordinator_url.clone())),
        Some(Cmd::Status) => status(),
        Some(Cmd::Run) | None => run(cli),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => goconnect_identity::config_dir()?.join("goconnect.toml"),
    };
    let overrides = ConfigOverrides {
        coordinator_url: cli.coordinator_url,
        interface_name: cli.interface_name,
        stun_url: cli.stun_url,
        ..Default::default()
    };
    let config = goconnect_engine::load(&config_path, overrides)?;

    let log_dir = match cli.log_dir {
        Some(dir) => dir,
        None => goconnect_identity::cache_dir()?,
    };
    goconnect_logging::cleanup::enforce_size_cap(&[&log_dir], MAX_LOG_SIZE_MB);
    let (file_layer, _log_handle) = goconnect_logging::file::layer(&log_dir, "goconnectd");
    goconnect_logging::setup_global_subscriber(
        &std::env::var("RUST_LOG").unwrap_or_default(),
        file_layer,
        false,
    )?;

    tracing::info!(version = VERSION, config = %config_path.display(), "starting goconnect daemon");

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(run_daemon(config))
}

async fn run_daemon(config: EngineConfig) -> Result<()> {
    let identity = Arc::new(Mutex::new(Identity::load_or_create()?));
    let client = Arc::new(CoordinatorClient::new(
        config.coordinator_url.clone(),
        "goconnect-daemon",
        VERSION,
    )?);

    let tunnel: Arc<dyn TunnelAdapter> = Arc::new(WireGuardAdapter::new(&config.interface_name));
    let netconfig: Arc<dyn NetworkConfigurator> = Arc::new(OsConfigurator);

    let engine = Engine::new(
        Arc::clone(&identity),
        Arc::clone(&client),
        tunnel,
        netconfig,
        &config.interface_name,
        VERSION,
        Timing::default(),
    );

    let listener = bridge::bind(config.local_bridge_port_range)
        .await
        .context("failed to bind the local control bridge")?;
    let addr = listener.local_addr()?;
    write_port_file(addr.port())?;
    tracing::info!(%addr, "local control bridge listening");

    let state = bridge::BridgeState {
        identity: Arc::clone(&identity),
        client,
        wg_active: engine.wg_active(),
        daemon_version: VERSION.to_string(),
    };
    tokio::spawn(bridge::serve(listener, state));

    tokio::spawn(p2p::run(
        Arc::clone(&engine),
        identity,
        config.coordinator_url.clone(),
        config.stun_url.clone(),
    ));

    let engine_task = tokio::spawn(Arc::clone(&engine).run());

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutting down");
    engine.stop();
    let _ = engine_task.await;

    Ok(())
}

/// The bridge port is random per run; `status` (and the local UI) find
/// it through this file.
fn write_port_file(port: u16) -> Result<()> {
    let path = goconnect_identity::cache_dir()?.join("bridge.port");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, port.to_string()).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn status() -> Result<()> {
    let port_file = goconnect_identity::cache_dir()?.join("bridge.port");
    let port: u16 = std::fs::read_to_string(&port_file)
        .with_context(|| format!("daemon does not appear to be running (missing {})", port_file.display()))?
        .trim()
        .parse()
        .context("malformed bridge port file")?;

    let runtime = tokio::runtime::Runtime::new()?;
    let body: serde_json::Value = runtime
        .block_on(async {
            reqwest::get(format!("http://127.0.0.1:{port}/status"))
                .await?
                .json()
                .await
        })
        .context("daemon is not reachable on the local control bridge")?;

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn login(server: Option<String>) -> Result<()> {
    let server = server.context("a coordinator URL is required: pass --server or set GOCONNECT_API_URL")?;
    let server = Url::parse(&server).context("coordinator URL is not valid")?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(login_flow(server))
}

/// Standard device-authorization polling: `authorization_pending` keeps
/// waiting, `slow_down` stretches the interval, anything else ends the
/// flow.
async fn login_flow(server: Url) -> Result<()> {
    let client = CoordinatorClient::new(server.clone(), "goconnect-daemon", VERSION)?;

    let code = client.request_device_code().await.context("failed to start device login")?;
    println!("Open {} and enter code {}", code.verification_uri, code.user_code);

    let mut interval = Duration::from_secs(code.interval.max(1));
    let deadline = tokio::time::Instant::now() + Duration::from_secs(code.expires_in);

    loop {
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "login expired before it was approved"
        );
        tokio::time::sleep(interval).await;

        match client.poll_device_token(&code.device_code).await? {
            DeviceTokenPoll::Success(token) => {
                let mut identity = Identity::load_or_create()?;
                identity.set_login(server.as_str(), token.access_token)?;
                println!("Logged in. The daemon will register on its next heartbeat.");
                return Ok(());
            }
            DeviceTokenPoll::AuthorizationPending => {}
            DeviceTokenPoll::SlowDown => interval += Duration::from_secs(5),
        }
    }
}
