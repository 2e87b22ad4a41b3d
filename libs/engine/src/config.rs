use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde::Deserialize;
use url::Url;

const DEFAULT_INTERFACE_NAME: &str = "goconnect0";
const DEFAULT_PORT_RANGE: (u16, u16) = (12000, 13000);
const DEFAULT_MTU: u32 = 1420;

/// Resolved configuration the engine runs with: file values with any
/// CLI override applied on top. Precedence is file, then the values
/// `clap`'s `env` attribute already folded in from the environment,
/// then an explicit flag; all three collapse to a single
/// [`ConfigOverrides`] the CLI builds before calling [`load`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub coordinator_url: Url,
    pub interface_name: String,
    pub local_bridge_port_range: (u16, u16),
    pub stun_url: Option<String>,
    pub mtu: u32,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    coordinator_url: Option<String>,
    interface_name: Option<String>,
    local_bridge_port_range: Option<[u16; 2]>,
    stun_url: Option<String>,
    mtu: Option<u32>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub coordinator_url: Option<String>,
    pub interface_name: Option<String>,
    pub local_bridge_port_range: Option<(u16, u16)>,
    pub stun_url: Option<String>,
    pub mtu: Option<u32>,
}

/// Loads `path` as TOML, then applies `overrides` on top of it.
pub fn load(path: &Path, overrides: ConfigOverrides) -> Result<EngineConfig> {
    let file = if path.exists() {
        let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?
    } else {
        FileConfig::default()
    };

    let coordinator_url = overrides
        .coordinator_url
        .or(file.coordinator_url)
        .context("coordinator_url is required (config file or --coordinator-url)")?;
    let coordinator_url = Url::parse(&coordinator_url).context("coordinator_url is not a valid URL")?;

    Ok(EngineConfig {
        coordinator_url,
        interface_name: overrides.interface_name.or(file.interface_name).unwrap_or_else(|| DEFAULT_INTERFACE_NAME.to_string()),
        local_bridge_port_range: overrides
            .local_bridge_port_range
            .or(file.local_bridge_port_range.map(|[a, b]| (a, b)))
            .unwrap_or(DEFAULT_PORT_RANGE),
        stun_url: overrides.stun_url.or(file.stun_url),
        mtu: overrides.mtu.or(file.mtu).unwrap_or(DEFAULT_MTU),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn missing_file_falls_back_to_overrides_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let config = load(
            &path,
            ConfigOverrides { coordinator_url: Some("https://coord.example/".into()), ..Default::default() },
        )
        .unwrap();

        assert_eq!(config.interface_name, DEFAULT_INTERFACE_NAME);
        assert_eq!(config.local_bridge_port_range, DEFAULT_PORT_RANGE);
        assert_eq!(config.mtu, DEFAULT_MTU);
    }

    #[test]
    fn override_wins_over_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("goconnect.toml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, r#"coordinator_url = "https://from-file.example/""#).unwrap();
        writeln!(file, r#"interface_name = "from-file0""#).unwrap();

        let config = load(
            &path,
            ConfigOverrides { interface_name: Some("from-flag0".into()), ..Default::default() },
        )
        .unwrap();

        assert_eq!(config.coordinator_url.as_str(), "https://from-file.example/");
        assert_eq!(config.interface_name, "from-flag0");
    }

    #[test]
    fn missing_coordinator_url_everywhere_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(load(&path, ConfigOverrides::default()).is_err());
    }
}
