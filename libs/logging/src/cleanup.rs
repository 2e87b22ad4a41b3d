//! Enforces a size cap on the daemon's log directory so a long-running
//! device never fills its disk with logs.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Files modified more recently than this are never deleted, so we don't
/// pull a file out from under the active appender.
const MIN_AGE: Duration = Duration::from_secs(300);

struct LogFile {
    path: PathBuf,
    len: u64,
    mtime: SystemTime,
    dir_idx: usize,
}

/// Deletes the oldest `.log` files under `log_dirs` until their combined
/// size drops below `max_size_mb`, keeping at least one file per
/// directory. Best-effort: returns the number of bytes deleted and never
/// fails.
pub fn enforce_size_cap(log_dirs: &[&Path], max_size_mb: u32) -> u64 {
    let max_bytes = u64::from(max_size_mb) * 1024 * 1024;
    let now = SystemTime::now();

    let mut files = collect_log_files(log_dirs, now);
    files.sort_by_key(|f| f.mtime);

    let total_size = files.iter().map(|f| f.len).sum::<u64>();
    if total_size <= max_bytes {
        return 0;
    }

    let mut files_per_dir = BTreeMap::new();
    for file in &files {
        *files_per_dir.entry(file.dir_idx).or_insert(0usize) += 1;
    }

    let mut deleted_bytes = 0u64;
    let mut current_size = total_size;

    for file in &files {
        if current_size <= max_bytes {
            break;
        }

        match now.duration_since(file.mtime) {
            Ok(age) if age >= MIN_AGE => {}
            // Too recent, or mtime is in the future.
            _ => continue,
        }

        let remaining = files_per_dir.get_mut(&file.dir_idx).expect("every file was counted");
        if *remaining <= 1 {
            continue;
        }

        match fs::remove_file(&file.path) {
            Ok(()) => {
                *remaining -= 1;
                deleted_bytes += file.len;
                current_size -= file.len;
            }
            Err(error) => {
                tracing::debug!(path = %file.path.display(), %error, "failed to delete old log file");
            }
        }
    }

    if current_size > max_bytes {
        tracing::debug!(
            current_size_mb = current_size / 1024 / 1024,
            max_size_mb,
            "log size still over cap after cleanup; remaining files are recent or last in their directory"
        );
    }

    deleted_bytes
}

fn collect_log_files(log_dirs: &[&Path], now: SystemTime) -> Vec<LogFile> {
    let mut files = Vec::new();

    for (dir_idx, dir) in log_dirs.iter().enumerate() {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(error) => {
                tracing::debug!(dir = %dir.display(), %error, "skipping unreadable log directory");
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            // Only plain `.log` files; this skips the `latest` symlink.
            if path.extension().is_none_or(|e| e != "log") {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }

            files.push(LogFile {
                path,
                len: meta.len(),
                mtime: meta.modified().unwrap_or(now),
                dir_idx,
            });
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;
    use tempfile::TempDir;

    #[test]
    fn no_deletion_when_under_cap() {
        let dir = TempDir::new().unwrap();
        create_log_file(dir.path(), "test1.log", 1024);

        assert_eq!(enforce_size_cap(&[dir.path()], 1), 0);
        assert!(dir.path().join("test1.log").exists());
    }

    #[test]
    fn deletes_oldest_first_when_over_cap() {
        let dir = TempDir::new().unwrap();
        let old = create_old_log_file(dir.path(), "old.log", 600 * 1024);
        let new = create_log_file(dir.path(), "new.log", 600 * 1024);

        let deleted = enforce_size_cap(&[dir.path()], 1);

        assert_eq!(deleted, 600 * 1024);
        assert!(!old.exists());
        assert!(new.exists());
    }

    #[test]
    fn recent_files_are_protected() {
        let dir = TempDir::new().unwrap();
        create_log_file(dir.path(), "file1.log", 600 * 1024);
        create_log_file(dir.path(), "file2.log", 600 * 1024);

        assert_eq!(enforce_size_cap(&[dir.path()], 1), 0);
    }

    #[test]
    fn keeps_at_least_one_file_per_directory() {
        let dir = TempDir::new().unwrap();
        let only = create_old_log_file(dir.path(), "only.log", 2 * 1024 * 1024);

        assert_eq!(enforce_size_cap(&[dir.path()], 1), 0);
        assert!(only.exists());
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let missing = Path::new("/nonexistent/path/that/does/not/exist");
        assert_eq!(enforce_size_cap(&[missing], 100), 0);
    }

    #[test]
    fn spans_multiple_directories() {
        let dir1 = TempDir::new().unwrap();
        let dir2 = TempDir::new().unwrap();

        create_old_log_file(dir1.path(), "old1.log", 400 * 1024);
        create_old_log_file(dir2.path(), "old2.log", 400 * 1024);
        let new1 = create_log_file(dir1.path(), "new1.log", 400 * 1024);
        let new2 = create_log_file(dir2.path(), "new2.log", 400 * 1024);

        let deleted = enforce_size_cap(&[dir1.path(), dir2.path()], 1);

        assert!(deleted >= 400 * 1024);
        assert!(new1.exists());
        assert!(new2.exists());
    }

    #[test]
    fn ignores_files_without_log_extension() {
        let dir = TempDir::new().unwrap();
        create_old_log_file(dir.path(), "test.log", 600 * 1024);
        let txt = create_file(dir.path(), "test.txt", 600 * 1024, Some(Duration::from_secs(600)));

        assert_eq!(enforce_size_cap(&[dir.path()], 1), 0);
        assert!(txt.exists());
    }

    fn create_log_file(dir: &Path, name: &str, size_bytes: usize) -> PathBuf {
        create_file(dir, name, size_bytes, None)
    }

    fn create_old_log_file(dir: &Path, name: &str, size_bytes: usize) -> PathBuf {
        create_file(dir, name, size_bytes, Some(Duration::from_secs(600)))
    }

    fn create_file(dir: &Path, name: &str, size_bytes: usize, age: Option<Duration>) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(&vec![b'x'; size_bytes]).unwrap();
        if let Some(age) = age {
            let old_time = SystemTime::now() - age;
            filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old_time)).unwrap();
        }
        path
    }
}
