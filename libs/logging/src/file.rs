//! File-based log appender.
//!
//! Log files are never rotated for the duration of the process: once
//! opened, a file stays open until the process exits or something else
//! removes it from disk, in which case a fresh one is created on next
//! write. A `latest` symlink always points at the current file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, io};

use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::Layer;

/// Timestamp embedded in each log file's name.
pub const TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

/// How many lines to buffer in the channel feeding the background writer
/// thread. The daemon and coordinator are not chatty loggers; this only
/// needs to absorb bursts, not sustained high throughput.
const MAX_BUFFERED_LINES: usize = 1024;

/// Builds a file-logging layer rooted at `log_dir`.
pub fn layer<T>(
    log_dir: &Path,
    file_base_name: &'static str,
) -> (Box<dyn Layer<T> + Send + Sync + 'static>, Handle)
where
    T: Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let (appender, guard) = new_appender(log_dir.to_path_buf(), file_base_name, "log");
    let layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(appender)
        .event_format(crate::Format::new())
        .boxed();

    let handle = Handle {
        _guard: Arc::new(guard),
    };

    (layer, handle)
}

fn new_appender(
    directory: PathBuf,
    file_base_name: &'static str,
    file_extension: &'static str,
) -> (NonBlocking, WorkerGuard) {
    let appender = Appender {
        directory,
        current: None,
        file_extension,
        file_base_name,
    };

    tracing_appender::non_blocking::NonBlockingBuilder::default()
        .buffered_lines_limit(MAX_BUFFERED_LINES)
        .finish(appender)
}

/// Keeps the file writer's [`WorkerGuard`] alive. Drop this only once no
/// more messages need to reach the log file.
#[must_use]
#[derive(Clone, Debug)]
pub struct Handle {
    _guard: Arc<WorkerGuard>,
}

#[derive(Debug)]
struct Appender {
    directory: PathBuf,
    file_base_name: &'static str,
    file_extension: &'static str,
    current: Option<(fs::File, String)>,
}

impl Appender {
    fn with_current_file<R>(
        &mut self,
        cb: impl Fn(&mut fs::File) -> io::Result<R>,
    ) -> io::Result<R> {
        let needs_new = match &self.current {
            None => true,
            Some((_, filename)) => !self.directory.join(filename).exists(),
        };

        if needs_new {
            let (mut file, name) = self.create_new_writer()?;
            let ret = cb(&mut file);
            self.current = Some((file, name));
            return ret;
        }

        let (file, _) = self.current.as_mut().expect("just checked Some above");
        cb(file)
    }

    fn create_new_writer(&self) -> io::Result<(fs::File, String)> {
        let date = chrono::Utc::now().format(TIME_FORMAT);
        let filename = format!("{}.{date}.{}", self.file_base_name, self.file_extension);
        let path = self.directory.join(&filename);
        let latest = self.directory.join("latest");

        let mut open_options = fs::OpenOptions::new();
        open_options.append(true).create(true);

        let file = match open_options.open(&path) {
            Ok(file) => file,
            Err(_) => {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                open_options.open(&path)?
            }
        };
        Self::set_permissions(&file)?;

        let _ = fs::remove_file(&latest);
        if let Err(error) = symlink_latest(&path, &latest) {
            tracing::debug!(%error, "failed to create `latest` symlink to log file");
        }

        Ok((file, filename))
    }

    /// Makes the logs group-readable so a companion process running as a
    /// different user in the same group can collect them for export.
    #[cfg(target_os = "linux")]
    fn set_permissions(f: &fs::File) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        f.set_permissions(fs::Permissions::from_mode(0o640))
    }

    #[cfg(not(target_os = "linux"))]
    #[allow(clippy::unnecessary_wraps)]
    fn set_permissions(_f: &fs::File) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn symlink_latest(path: &Path, latest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(path, latest)
}

#[cfg(windows)]
fn symlink_latest(path: &Path, latest: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(path, latest)
}

impl io::Write for Appender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_current_file(|f| f.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_current_file(|f| f.flush())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    use super::*;

    #[test]
    fn deleting_log_file_creates_new_one() {
        let dir = tempfile::tempdir().unwrap();

        let (layer, _handle) = layer(dir.path(), "goconnectd");

        let _guard = tracing_subscriber::registry()
            .with(layer)
            .with(tracing_subscriber::EnvFilter::from("info"))
            .set_default();

        tracing::info!("this is a test");
        std::thread::sleep(Duration::from_millis(1000));

        for entry in std::fs::read_dir(dir.path()).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }

        tracing::info!("write after delete");
        std::thread::sleep(Duration::from_millis(1000));

        let content = std::fs::read_to_string(dir.path().join("latest")).unwrap();
        assert!(content.contains("write after delete"));
    }
}
