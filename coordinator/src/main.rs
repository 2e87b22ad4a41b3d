use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use goconnect_coordinator::AppState;
use goconnect_coordinator_store::{NetworkStore as _, NewNetwork};
use goconnect_model::{FreshnessWindow, JoinPolicy, Visibility};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(author, version, about = "GoConnect coordination server", long_about = None)]
struct Cli {
    #[arg(long, env = "GOCONNECT_COORD_ADDR", default_value = "127.0.0.1:8080")]
    listen_addr: SocketAddr,

    /// CIDR of the network every registering device joins. Skip network
    /// bootstrap entirely with --no-default-network.
    #[arg(long, env = "GOCONNECT_DEFAULT_NETWORK_CIDR", default_value = "100.64.0.0/24")]
    default_network_cidr: String,

    #[arg(long, default_value_t = false)]
    no_default_network: bool,

    /// MTU advertised in every device config.
    #[arg(long, env = "GOCONNECT_MTU", default_value_t = 1420)]
    mtu: u32,

    /// How recent a peer's handshake must be for it to count as active,
    /// in seconds.
    #[arg(long, env = "GOCONNECT_FRESHNESS_SECS", default_value_t = 180)]
    freshness_secs: i64,

    /// File logging directory; stdout-only when unset.
    #[arg(short, long, env = "GOCONNECT_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Emit stdout logs as JSON (for log collectors).
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn main() {
    match try_main() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(1);
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let (file_layer, _log_handle) = cli
        .log_dir
        .as_deref()
        .map(|dir| goconnect_logging::file::layer(dir, "goconnect-coordinator"))
        .unzip();
    goconnect_logging::setup_global_subscriber(
        &std::env::var("RUST_LOG").unwrap_or_default(),
        file_layer,
        cli.json_logs,
    )?;

    let freshness = FreshnessWindow(chrono::Duration::seconds(cli.freshness_secs));
    let state = AppState::new(freshness, cli.mtu);

    if !cli.no_default_network {
        let cidr = cli
            .default_network_cidr
            .parse()
            .with_context(|| format!("{} is not a valid IPv4 CIDR", cli.default_network_cidr))?;
        let network = state.networks.create(NewNetwork {
            tenant: state.tenant,
            name: "default".to_string(),
            cidr,
            visibility: Visibility::Private,
            join_policy: JoinPolicy::Open,
            created_by: state.admin,
        })?;
        tracing::info!(network_id = %network.id, cidr = %network.cidr, "created default network");
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(cli.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", cli.listen_addr))?;
        tracing::info!(addr = %cli.listen_addr, version = VERSION, "coordinator listening");

        axum::serve(listener, goconnect_coordinator::router(state).into_make_service())
            .await
            .context("http server failed")
    })
}
