//! Structured logging setup for the daemon (C8) and coordinator binaries.
//!
//! Both a stdout layer (human-readable or JSON, depending on the run
//! mode) and an optional rotation-free file layer can be attached to the
//! same global subscriber.

mod ansi;
pub mod cleanup;
pub mod file;
mod format;

use anyhow::{Context, Result};
use tracing::{subscriber::DefaultGuard, Subscriber};
use tracing_log::LogTracer;
use tracing_subscriber::{
    filter::ParseError, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter,
    Layer, Registry,
};

pub use ansi::stdout_supports_ansi;
pub use format::Format;

/// Registers a global subscriber combining a stdout layer with whatever
/// `additional_layer` the caller supplies (typically a [`file::layer`]).
pub fn setup_global_subscriber<L>(
    directives: &str,
    additional_layer: L,
    stdout_json: bool,
) -> Result<()>
where
    L: Layer<Registry> + Send + Sync,
{
    let filter = parse_filter(directives).context("failed to parse log directives")?;

    let subscriber = Registry::default().with(additional_layer).with(match stdout_json {
        true => fmt::layer()
            .json()
            .flatten_event(true)
            .with_ansi(stdout_supports_ansi())
            .with_filter(filter)
            .boxed(),
        false => fmt::layer()
            .with_ansi(stdout_supports_ansi())
            .event_format(Format::new())
            .with_filter(filter)
            .boxed(),
    });

    init(subscriber)
}

pub fn init(subscriber: impl Subscriber + Send + Sync + 'static) -> Result<()> {
    tracing::subscriber::set_global_default(subscriber).context("could not set global default")?;
    LogTracer::init().context("failed to init LogTracer")?;

    Ok(())
}

/// Builds an [`EnvFilter`], silencing some chatty transitive dependencies
/// by default so a plain `debug` directive stays readable. An empty
/// directive string means `info`.
fn parse_filter(directives: &str) -> std::result::Result<EnvFilter, ParseError> {
    const IRRELEVANT_CRATES: &str =
        "rustls=warn,hyper_util=info,h2=info,tungstenite=info,webrtc_ice=info,webrtc_util=info";

    if directives.is_empty() {
        EnvFilter::try_new(format!("info,{IRRELEVANT_CRATES}"))
    } else {
        EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
    }
}

/// Initialises a test-scoped logger writing to the test harness's
/// captured output.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}
