use std::io::Write as _;
use std::process::Command;

use goconnect_model::{Error, ErrorKind, Result};

use crate::config::render_setconf;
use goconnect_model::TunnelConfig;

/// Shells out to `wg setconf <interface> <path>`, which is itself an
/// atomic whole-device replace, exactly the "set replace, not merge"
/// contract `ApplyConfig` needs. `wg_binary` differs per platform
/// (`"wg"` vs `"wg.exe"`); everything else is shared.
pub fn apply_via_wg_setconf(wg_binary: &str, interface: &str, config: &TunnelConfig) -> Result<()> {
    let rendered = render_setconf(config);

    let mut file = tempfile::NamedTempFile::new()
        .map_err(|e| Error::new(ErrorKind::Internal, format!("failed to create temporary wg config: {e}")))?;
    file.write_all(rendered.as_bytes())
        .map_err(|e| Error::new(ErrorKind::Internal, format!("failed to write temporary wg config: {e}")))?;

    let output = Command::new(wg_binary)
        .arg("setconf")
        .arg(interface)
        .arg(file.path())
        .output()
        .map_err(|e| Error::new(ErrorKind::Internal, format!("failed to run {wg_binary} setconf: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::new(ErrorKind::Internal, format!("{wg_binary} setconf failed: {}", stderr.trim())));
    }

    Ok(())
}
