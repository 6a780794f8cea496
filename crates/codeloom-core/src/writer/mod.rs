//! Atomic per-file writes (C4): an in-process exclusive lock paired with an
//! on-disk PID lock file, write-to-temp, optional fsync, atomic rename, and
//! an optional ad-hoc backup.

mod lock;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::process::is_process_alive;
use lock::LockMap;

const WRITER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::writer");
const LOCK_RETRY_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MODE: u32 = 0o644;

/// Configuration for an [`AtomicWriter`].
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Whether to `fsync` the temp file before renaming.
    pub use_fsync: bool,
    /// How long to wait for the on-disk lock before giving up.
    pub lock_timeout: Duration,
    /// Suffix appended to `path` to form the temp file name.
    pub temp_suffix: String,
    /// Whether to copy the original to a `.bak.<timestamp>` sibling before
    /// overwriting it.
    pub backup_original: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            use_fsync: false,
            lock_timeout: Duration::from_secs(5),
            temp_suffix: ".morfx.tmp".to_string(),
            backup_original: true,
        }
    }
}

/// Failure modes of [`AtomicWriter::write_file`].
#[derive(Debug, Error)]
pub enum WriteError {
    /// The on-disk lock could not be acquired before `lock_timeout`.
    #[error("timed out waiting for lock on '{path}'")]
    LockTimeout {
        /// Target path.
        path: PathBuf,
    },
    /// Creating, reading, or removing the lock file failed.
    #[error("lock file I/O failed for '{path}': {source}")]
    LockFileIO {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Creating the temp file failed.
    #[error("failed to create temp file for '{path}': {source}")]
    TempCreate {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing content to the temp file failed.
    #[error("failed to write content for '{path}': {source}")]
    WriteIO {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `fsync` on the temp file failed.
    #[error("fsync failed for '{path}': {source}")]
    Fsync {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The atomic rename of the temp file over `path` failed.
    #[error("atomic rename failed for '{path}': {source}")]
    Rename {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Writing the pre-modification backup failed.
    #[error("backup write failed for '{path}': {source}")]
    BackupIO {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Outcome of a successful [`AtomicWriter::write_file`] call.
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    /// Path of the ad-hoc backup created, if `backup_original` was set and
    /// `path` previously existed.
    pub backup_path: Option<PathBuf>,
}

/// Serializes writes to arbitrary paths behind an in-process lock map and
/// an on-disk PID lock file, so that concurrent writers (in this process or
/// another) never observe a torn file.
#[derive(Debug, Default)]
pub struct AtomicWriter {
    config: WriterConfig,
    locks: LockMap,
}

impl AtomicWriter {
    /// Builds a writer with the given configuration.
    #[must_use]
    pub fn new(config: WriterConfig) -> Self {
        Self {
            config,
            locks: LockMap::new(),
        }
    }

    /// The configuration this writer was built with.
    #[must_use]
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    fn lock_path(&self, path: &Path) -> PathBuf {
        let mut s = path.as_os_str().to_os_string();
        s.push(".lock");
        PathBuf::from(s)
    }

    fn temp_path(&self, path: &Path) -> PathBuf {
        let mut s = path.as_os_str().to_os_string();
        s.push(&self.config.temp_suffix);
        PathBuf::from(s)
    }

    fn backup_path(&self, path: &Path) -> PathBuf {
        let stamp = backup_timestamp();
        let mut s = path.as_os_str().to_os_string();
        s.push(format!(".bak.{stamp}"));
        PathBuf::from(s)
    }

    /// Atomically writes `content` to `path`, using this writer's
    /// configured `backup_original` default.
    pub fn write_file(&self, path: &Path, content: &str) -> Result<WriteReport, WriteError> {
        self.write_file_with_backup(path, content, self.config.backup_original)
    }

    /// Atomically writes `content` to `path`, overriding whether an ad-hoc
    /// backup is taken for this call. Used by the File Processor (C6) to
    /// suppress ad-hoc backups when a Transaction Manager is already
    /// backing the file up.
    pub fn write_file_with_backup(
        &self,
        path: &Path,
        content: &str,
        backup: bool,
    ) -> Result<WriteReport, WriteError> {
        let deadline = Instant::now() + self.config.lock_timeout;

        if !self.locks.acquire_until(path, deadline) {
            self.locks.abandon(path);
            return Err(WriteError::LockTimeout {
                path: path.to_path_buf(),
            });
        }

        let result = self.write_file_locked(path, content, backup, deadline);
        self.locks.release(path);
        result
    }

    fn write_file_locked(
        &self,
        path: &Path,
        content: &str,
        backup: bool,
        deadline: Instant,
    ) -> Result<WriteReport, WriteError> {
        let lock_path = self.lock_path(path);
        self.acquire_disk_lock(path, &lock_path, deadline)?;
        let result = self.write_and_rename(path, content, backup);
        self.release_disk_lock(&lock_path);
        result
    }

    fn acquire_disk_lock(
        &self,
        path: &Path,
        lock_path: &Path,
        deadline: Instant,
    ) -> Result<(), WriteError> {
        loop {
            let mut options = OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                options.mode(0o600);
            }
            match options.open(lock_path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id()).map_err(|source| {
                        WriteError::LockFileIO {
                            path: lock_path.to_path_buf(),
                            source,
                        }
                    })?;
                    return Ok(());
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if is_lock_stale(lock_path) {
                        if let Err(source) = fs::remove_file(lock_path) {
                            if source.kind() != io::ErrorKind::NotFound {
                                return Err(WriteError::LockFileIO {
                                    path: lock_path.to_path_buf(),
                                    source,
                                });
                            }
                        }
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(WriteError::LockTimeout {
                            path: path.to_path_buf(),
                        });
                    }
                    std::thread::sleep(LOCK_RETRY_BACKOFF.min(
                        deadline.saturating_duration_since(Instant::now()),
                    ));
                }
                Err(source) => {
                    return Err(WriteError::LockFileIO {
                        path: lock_path.to_path_buf(),
                        source,
                    });
                }
            }
        }
    }

    fn release_disk_lock(&self, lock_path: &Path) {
        if let Err(err) = fs::remove_file(lock_path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(target: WRITER_TARGET, path = %lock_path.display(), error = %err, "failed to remove lock file");
            }
        }
    }

    fn write_and_rename(
        &self,
        path: &Path,
        content: &str,
        backup: bool,
    ) -> Result<WriteReport, WriteError> {
        let mode = existing_mode(path).unwrap_or(DEFAULT_MODE);

        let mut report = WriteReport::default();
        if backup && path.exists() {
            let backup = self.backup_path(path);
            copy_with_mode(path, &backup, mode).map_err(|source| WriteError::BackupIO {
                path: path.to_path_buf(),
                source,
            })?;
            report.backup_path = Some(backup);
        }

        let temp_path = self.temp_path(path);
        if let Err(err) = write_temp(&temp_path, content, mode, self.config.use_fsync) {
            let _ = fs::remove_file(&temp_path);
            return Err(err);
        }

        if let Err(source) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(WriteError::Rename {
                path: path.to_path_buf(),
                source,
            });
        }

        debug!(target: WRITER_TARGET, path = %path.display(), "wrote file atomically");
        Ok(report)
    }
}

fn write_temp(temp_path: &Path, content: &str, mode: u32, fsync: bool) -> Result<(), WriteError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }
    let mut file = options.open(temp_path).map_err(|source| WriteError::TempCreate {
        path: temp_path.to_path_buf(),
        source,
    })?;
    file.write_all(content.as_bytes())
        .map_err(|source| WriteError::WriteIO {
            path: temp_path.to_path_buf(),
            source,
        })?;
    if fsync {
        file.sync_all().map_err(|source| WriteError::Fsync {
            path: temp_path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Writes `content` to `path` directly, preserving the existing file's
/// permission bits (or `0644` for a new file), without locking or atomic
/// rename. Used by the File Processor when transactional safety is
/// disabled and the stronger [`AtomicWriter::write_file`] guarantees are
/// not required.
pub(crate) fn write_plain(path: &Path, content: &str) -> io::Result<()> {
    let mode = existing_mode(path).unwrap_or(DEFAULT_MODE);
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }
    options.open(path)?.write_all(content.as_bytes())
}

fn existing_mode(path: &Path) -> Option<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::metadata(path).ok().map(|m| m.permissions().mode())
    }
    #[cfg(not(unix))]
    {
        fs::metadata(path).ok().map(|_| DEFAULT_MODE)
    }
}

fn copy_with_mode(src: &Path, dst: &Path, mode: u32) -> io::Result<()> {
    let mut content = Vec::new();
    File::open(src)?.read_to_end(&mut content)?;
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }
    #[cfg(not(unix))]
    {
        let _ = mode;
    }
    options.open(dst)?.write_all(&content)
}

fn backup_timestamp() -> String {
    let format = time::format_description::parse("[year][month][day]-[hour][minute][second]")
        .expect("static format description parses");
    time::OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| "00000000-000000".to_string())
}

fn is_lock_stale(lock_path: &Path) -> bool {
    let Ok(contents) = fs::read_to_string(lock_path) else {
        return true;
    };
    let Ok(pid) = contents.trim().parse::<i64>() else {
        return true;
    };
    if pid <= 0 {
        return true;
    }
    !is_process_alive(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn writes_new_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("f.txt");
        let writer = AtomicWriter::new(WriterConfig::default());

        let report = writer.write_file(&path, "hello").expect("write");
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert!(report.backup_path.is_none());
        assert!(!writer.lock_path(&path).exists());
    }

    #[test]
    fn backs_up_existing_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("f.txt");
        fs::write(&path, "original").unwrap();
        let writer = AtomicWriter::new(WriterConfig::default());

        let report = writer.write_file(&path, "updated").expect("write");
        let backup = report.backup_path.expect("backup recorded");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "original");
        assert_eq!(fs::read_to_string(&path).unwrap(), "updated");
    }

    #[test]
    fn stale_lock_is_removed_and_write_succeeds() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("f.txt");
        let lock_path = dir.path().join("f.txt.lock");
        fs::write(&lock_path, "999999999\n").unwrap();

        let writer = AtomicWriter::new(WriterConfig::default());
        writer.write_file(&path, "hello").expect("write succeeds past stale lock");

        assert!(!lock_path.exists());
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn non_numeric_lock_is_treated_as_stale() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("f.txt");
        let lock_path = dir.path().join("f.txt.lock");
        fs::write(&lock_path, "not_a_pid\n").unwrap();

        let writer = AtomicWriter::new(WriterConfig::default());
        writer.write_file(&path, "hello").expect("write succeeds past malformed lock");
        assert!(!lock_path.exists());
    }

    #[test]
    fn live_lock_times_out() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("f.txt");
        let lock_path = dir.path().join("f.txt.lock");
        let mut file = fs::File::create(&lock_path).unwrap();
        writeln!(file, "{}", std::process::id()).unwrap();
        drop(file);

        let mut config = WriterConfig::default();
        config.lock_timeout = Duration::from_millis(100);
        let writer = AtomicWriter::new(config);

        let started = Instant::now();
        let err = writer.write_file(&path, "hello").expect_err("timeout expected");
        assert!(matches!(err, WriteError::LockTimeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!path.exists());
    }

    #[test]
    fn linearizes_sequential_writes_to_same_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("f.txt");
        let writer = AtomicWriter::new(WriterConfig::default());

        writer.write_file(&path, "a").unwrap();
        writer.write_file(&path, "b").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "b");
    }
}
