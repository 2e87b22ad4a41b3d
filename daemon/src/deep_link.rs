//! `goconnect://login` deep links.
//!
//! The OS URI handler launches the daemon binary with the link as its
//! only argument; the invocation stores the token and server into the
//! identity file and exits. A running daemon picks the token up on its
//! next heartbeat tick.

use anyhow::{Context as _, Result};
use goconnect_identity::Identity;
use url::Url;

pub const SCHEME: &str = "goconnect://";

pub fn handle(uri: &str) -> Result<()> {
    let (server, token) = parse(uri)?;

    let mut identity = Identity::load_or_create()?;
    identity.set_login(server, token)?;

    println!("Login token stored.");
    Ok(())
}

fn parse(uri: &str) -> Result<(String, String)> {
    let url = Url::parse(uri).context("invalid deep link")?;
    anyhow::ensure!(url.scheme() == "goconnect", "unsupported deep link scheme {}", url.scheme());
    anyhow::ensure!(url.host_str() == Some("login"), "unsupported deep link action");

    let mut server = None;
    let mut token = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "server" => server = Some(value.into_owned()),
            "token" => token = Some(value.into_owned()),
            _ => {}
        }
    }

    Ok((
        server.context("deep link is missing the server parameter")?,
        token.context("deep link is missing the token parameter")?,
    ))
}
