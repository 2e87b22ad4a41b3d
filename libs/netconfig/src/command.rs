use std::process::{Command, Output};

use goconnect_model::{Error, ErrorKind, Result};

/// Runs `program args...` and swallows a failure whose stderr looks like
/// "this is already configured", the idempotency contract every
/// platform module needs for `ConfigureInterface`/`AddRoutes`.
pub fn run_idempotent(program: &str, args: &[&str]) -> Result<()> {
    let output = invoke(program, args)?;
    if output.status.success() || stderr_means_already_exists(&output) {
        return Ok(());
    }

    Err(command_error(program, args, &output))
}

/// Runs the command but never fails the caller; used for the
/// best-effort DNS step, which depends on whichever resolver service
/// happens to be installed.
pub fn run_best_effort(program: &str, args: &[&str]) {
    match invoke(program, args) {
        Ok(output) if output.status.success() => {}
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(program, args = ?args, stderr = %stderr.trim(), "best-effort DNS command failed");
        }
        Err(error) => tracing::warn!(program, %error, "best-effort DNS command could not run"),
    }
}

fn invoke(program: &str, args: &[&str]) -> Result<Output> {
    Command::new(program)
        .args(args)
        .output()
        .map_err(|e| Error::new(ErrorKind::Internal, format!("failed to run {program}: {e}")))
}

fn stderr_means_already_exists(output: &Output) -> bool {
    let stderr = String::from_utf8_lossy(&output.stderr).to_lowercase();
    stderr.contains("file exists") || stderr.contains("already exists") || stderr.contains("object already exists")
}

fn command_error(program: &str, args: &[&str], output: &Output) -> Error {
    let stderr = String::from_utf8_lossy(&output.stderr);
    Error::new(
        ErrorKind::Internal,
        format!("{program} {} failed: {}", args.join(" "), stderr.trim()),
    )
}
