//! Device identity bootstrap and persistence (C1).
//!
//! A device generates its curve25519 keypair exactly once and persists it,
//! together with whatever the coordinator hands back during registration,
//! as a single JSON record in the user's config directory. The record is
//! never destroyed by normal daemon operation, only replaced in place.

mod known_dirs;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use atomicwrites::{AtomicFile, OverwriteBehavior};
use goconnect_model::{encode_public_key, PublicKey, StaticSecret};
use serde::{Deserialize, Serialize};

pub use known_dirs::{cache_dir, config_dir};

const FILE_NAME: &str = "identity.json";

/// The persisted shape of `identity.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    private_key: String,
    public_key: String,
    device_id: Option<String>,
    token: Option<String>,
    server: Option<String>,
}

/// A device's identity: its keypair plus whatever the coordinator has
/// issued it so far. Deliberately not `Debug`: the private key must
/// never end up in a log line.
#[derive(Clone)]
pub struct Identity {
    path: PathBuf,
    private_key: StaticSecret,
    public_key: PublicKey,
    device_id: Option<String>,
    token: Option<String>,
    server: Option<String>,
}

impl Identity {
    /// Loads the identity from `<config_dir>/identity.json`, generating a
    /// fresh keypair and persisting it if no record exists yet.
    pub fn load_or_create() -> Result<Self> {
        let dir = config_dir().context("failed to resolve identity config directory")?;
        Self::load_or_create_at(&dir.join(FILE_NAME))
    }

    pub fn load_or_create_at(path: &Path) -> Result<Self> {
        if let Some(record) = try_read(path)? {
            return Self::from_record(path.to_path_buf(), record);
        }

        let private_key = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let public_key = PublicKey::from(&private_key);
        let record = Record {
            private_key: goconnect_model::base64_encode(private_key.to_bytes()),
            public_key: encode_public_key(&public_key),
            device_id: None,
            token: None,
            server: None,
        };

        write_record(path, &record)?;
        tracing::info!(public_key = %record.public_key, "generated new device identity");

        Self::from_record(path.to_path_buf(), record)
    }

    fn from_record(path: PathBuf, record: Record) -> Result<Self> {
        let private_bytes = goconnect_model::base64_decode(&record.private_key)
            .context("identity file has a malformed private key")?;
        let private_key = StaticSecret::from(
            <[u8; 32]>::try_from(private_bytes.as_slice())
                .map_err(|_| anyhow::anyhow!("private key must be 32 bytes"))?,
        );

        Ok(Self {
            path,
            public_key: PublicKey::from(&private_key),
            private_key,
            device_id: record.device_id,
            token: record.token,
            server: record.server,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn public_key_base64(&self) -> String {
        encode_public_key(&self.public_key)
    }

    pub fn private_key(&self) -> &StaticSecret {
        &self.private_key
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    /// True once the daemon has a usable device id and token.
    pub fn is_registered(&self) -> bool {
        self.device_id.is_some() && self.token.is_some()
    }

    /// Re-reads the record from disk, picking up changes made by another
    /// process invocation (a deep-link login writes the token and server
    /// into the same file). Keeps the current state if the file has
    /// disappeared.
    pub fn reload(&mut self) -> Result<()> {
        if let Some(record) = try_read(&self.path)? {
            *self = Self::from_record(self.path.clone(), record)?;
        }
        Ok(())
    }

    /// Persists the device id and token returned by `Register`.
    pub fn set_registration(&mut self, device_id: impl Into<String>, token: impl Into<String>) -> Result<()> {
        self.device_id = Some(device_id.into());
        self.token = Some(token.into());
        self.persist()
    }

    /// Persists a token/server pair ingested from a deep link (S5).
    pub fn set_login(&mut self, server: impl Into<String>, token: impl Into<String>) -> Result<()> {
        self.server = Some(server.into());
        self.token = Some(token.into());
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let record = Record {
            private_key: goconnect_model::base64_encode(self.private_key.to_bytes()),
            public_key: encode_public_key(&self.public_key),
            device_id: self.device_id.clone(),
            token: self.token.clone(),
            server: self.server.clone(),
        };
        write_record(&self.path, &record)
    }
}

fn try_read(path: &Path) -> Result<Option<Record>> {
    match fs::read_to_string(path) {
        Ok(content) => {
            let record = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(Some(record))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

fn write_record(path: &Path, record: &Record) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let content = serde_json::to_string_pretty(record).context("failed to serialize identity")?;

    let file = AtomicFile::new(path, OverwriteBehavior::AllowOverwrite);
    file.write(|f| std::io::Write::write_all(f, content.as_bytes()))
        .context("failed to atomically write identity file")?;

    set_permissions(path)
}

#[cfg(unix)]
fn set_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);

        let created = Identity::load_or_create_at(&path).unwrap();
        let reloaded = Identity::load_or_create_at(&path).unwrap();

        assert_eq!(created.public_key_base64(), reloaded.public_key_base64());
        assert!(!created.is_registered());
    }

    #[test]
    fn registration_persists_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);

        let mut identity = Identity::load_or_create_at(&path).unwrap();
        identity.set_registration("dev-1", "tok.abc").unwrap();

        let reloaded = Identity::load_or_create_at(&path).unwrap();
        assert_eq!(reloaded.device_id(), Some("dev-1"));
        assert_eq!(reloaded.token(), Some("tok.abc"));
        assert!(reloaded.is_registered());
    }

    #[test]
    fn deep_link_login_sets_server_and_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);

        let mut identity = Identity::load_or_create_at(&path).unwrap();
        identity
            .set_login("https://srv.example/", "tok.abc")
            .unwrap();

        assert_eq!(identity.server(), Some("https://srv.example/"));
        assert_eq!(identity.token(), Some("tok.abc"));
    }
}
