//! Journaled multi-file transactions (C5): begin/add_operation/
//! complete_operation/commit/rollback with reverse-order undo from backups.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::writer::{AtomicWriter, WriteError};

const TX_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transaction");

/// The kind of change a [`TransactionOperation`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// An existing file's content was changed.
    Modify,
    /// A new file was created.
    Create,
    /// A file was removed.
    Delete,
}

/// A single recorded change within a [`TransactionLog`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionOperation {
    #[serde(rename = "type")]
    kind: OperationKind,
    file_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    backup_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    timestamp: String,
    completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TransactionOperation {
    /// The kind of change this operation records.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// The path this operation applies to.
    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Where the pre-modification content was backed up, if any.
    #[must_use]
    pub fn backup_path(&self) -> Option<&Path> {
        self.backup_path.as_deref()
    }

    /// SHA-256 hex digest of the original content, if captured.
    #[must_use]
    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }

    /// Whether this operation's write has finished (successfully or not).
    #[must_use]
    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Error text recorded against this operation, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Lifecycle state of a [`TransactionLog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Begun, not yet committed or rolled back.
    Pending,
    /// All operations completed without error.
    Committed,
    /// Rolled back, partially or fully.
    RolledBack,
}

/// A persisted record of a multi-file transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionLog {
    id: String,
    started: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed: Option<String>,
    status: TransactionStatus,
    description: String,
    operations: Vec<TransactionOperation>,
}

impl TransactionLog {
    /// Unique transaction identifier (`tx_<unix_seconds>_<pid>`).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Caller-supplied description of the batch this transaction covers.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Operations recorded so far, in append order.
    #[must_use]
    pub fn operations(&self) -> &[TransactionOperation] {
        &self.operations
    }
}

/// Failure modes of the Transaction Manager.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// `begin` was called while a transaction is already pending.
    #[error("a transaction is already pending")]
    TxActive,
    /// An operation requiring a pending transaction found none.
    #[error("no transaction is currently pending")]
    TxMissing,
    /// `complete_operation` found no matching incomplete operation.
    #[error("no incomplete operation found for '{path}'")]
    OperationNotFound {
        /// The path that was searched for.
        path: PathBuf,
    },
    /// Computing a file's checksum failed.
    #[error("failed to checksum '{path}': {source}")]
    ChecksumIO {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `commit` was called with incomplete or errored operations.
    #[error("transaction has incomplete or errored operations")]
    HasFailedOperations,
    /// A `modify` rollback's backup file was missing.
    #[error("backup missing for '{path}'")]
    BackupMissing {
        /// Path whose backup could not be found.
        path: PathBuf,
    },
    /// The log directory could not be created or written to.
    #[error("transaction log directory '{path}' is unusable: {source}")]
    LogDirIO {
        /// Log directory path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Persisting the journal failed.
    #[error("failed to persist journal '{path}': {source}")]
    JournalWriteIO {
        /// Journal file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Serializing the journal failed.
    #[error("failed to serialize journal: {source}")]
    JournalSerialize {
        /// Underlying serde error.
        #[from]
        source: serde_json::Error,
    },
    /// Reading or parsing a journal failed.
    #[error("failed to load journal '{path}': {source}")]
    JournalParse {
        /// Journal file path.
        path: PathBuf,
        /// Human-readable parse/IO failure.
        source: String,
    },
    /// Backing up a `modify` operation's original content failed.
    #[error("failed to create backup for '{path}': {source}")]
    BackupIO {
        /// Path being backed up.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// One or more operations failed to roll back cleanly.
    #[error("{} operation(s) failed to roll back", .failures.len())]
    RollbackFailures {
        /// `(path, reason)` pairs for each operation that could not be
        /// undone cleanly.
        failures: Vec<(PathBuf, String)>,
    },
    /// Restoring a `modify` operation via the Atomic Writer failed.
    #[error("failed to restore '{path}' during rollback: {source}")]
    RestoreWrite {
        /// Path being restored.
        path: PathBuf,
        /// Underlying writer error.
        #[source]
        source: WriteError,
    },
}

/// Configuration for a [`TransactionManager`].
pub struct TransactionManagerConfig {
    /// Directory journals and backups are written under. Created if
    /// missing.
    pub log_dir: PathBuf,
    /// Writer used to restore files during rollback, atomically.
    pub atomic_writer: std::sync::Arc<AtomicWriter>,
}

/// Coordinates a single pending transaction at a time, persisting a JSON
/// journal as operations are recorded.
pub struct TransactionManager {
    log_dir: PathBuf,
    atomic_writer: std::sync::Arc<AtomicWriter>,
    current: Mutex<Option<TransactionLog>>,
}

impl TransactionManager {
    /// Builds a manager rooted at `config.log_dir`, creating the directory
    /// if it does not already exist.
    pub fn new(config: TransactionManagerConfig) -> Result<Self, TransactionError> {
        fs::create_dir_all(&config.log_dir).map_err(|source| TransactionError::LogDirIO {
            path: config.log_dir.clone(),
            source,
        })?;
        Ok(Self {
            log_dir: config.log_dir,
            atomic_writer: config.atomic_writer,
            current: Mutex::new(None),
        })
    }

    /// The directory this manager persists journals and backups under.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    fn journal_path(&self, id: &str) -> PathBuf {
        self.log_dir.join(format!("{id}.json"))
    }

    fn persist(&self, log: &TransactionLog) -> Result<(), TransactionError> {
        let path = self.journal_path(&log.id);
        let file = fs::File::create(&path).map_err(|source| TransactionError::JournalWriteIO {
            path: path.clone(),
            source,
        })?;
        serde_json::to_writer_pretty(file, log)?;
        Ok(())
    }

    /// Begins a new transaction. Fails if one is already pending.
    pub fn begin(&self, description: impl Into<String>) -> Result<TransactionLog, TransactionError> {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            return Err(TransactionError::TxActive);
        }
        let id = format!("tx_{}_{}", unix_seconds(), std::process::id());
        let log = TransactionLog {
            id,
            started: now_iso(),
            completed: None,
            status: TransactionStatus::Pending,
            description: description.into(),
            operations: Vec::new(),
        };
        self.persist(&log)?;
        info!(target: TX_TARGET, id = %log.id, "transaction begun");
        *guard = Some(log.clone());
        Ok(log)
    }

    /// Records a new operation against the pending transaction, taking a
    /// checksum/backup as the operation kind requires. Returns the backup
    /// path recorded for the operation, if any.
    pub fn add_operation(
        &self,
        kind: OperationKind,
        path: &Path,
    ) -> Result<Option<PathBuf>, TransactionError> {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let log = guard.as_mut().ok_or(TransactionError::TxMissing)?;

        let exists = path.exists();
        let checksum = if matches!(kind, OperationKind::Modify | OperationKind::Delete) && exists {
            Some(checksum_of(path).map_err(|source| TransactionError::ChecksumIO {
                path: path.to_path_buf(),
                source,
            })?)
        } else {
            None
        };

        let backup_path = if matches!(kind, OperationKind::Modify) && exists {
            let backup = self.backup_path_for(path, &log.id);
            fs::copy(path, &backup).map_err(|source| TransactionError::BackupIO {
                path: path.to_path_buf(),
                source,
            })?;
            Some(backup)
        } else {
            None
        };

        log.operations.push(TransactionOperation {
            kind,
            file_path: path.to_path_buf(),
            backup_path: backup_path.clone(),
            checksum,
            timestamp: now_iso(),
            completed: false,
            error: None,
        });
        self.persist(log)?;
        Ok(backup_path)
    }

    fn backup_path_for(&self, path: &Path, tx_id: &str) -> PathBuf {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.log_dir
            .join(format!(".morfx-backup-{basename}-{tx_id}-{}", backup_timestamp()))
    }

    /// Marks the first incomplete operation for `path` as finished, with an
    /// optional error string.
    pub fn complete_operation(
        &self,
        path: &Path,
        error: Option<String>,
    ) -> Result<(), TransactionError> {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let log = guard.as_mut().ok_or(TransactionError::TxMissing)?;

        let op = log
            .operations
            .iter_mut()
            .find(|op| !op.completed && op.file_path == path)
            .ok_or_else(|| TransactionError::OperationNotFound {
                path: path.to_path_buf(),
            })?;
        op.completed = true;
        op.error = error;
        self.persist(log)
    }

    /// Commits the pending transaction. Requires every operation to be
    /// completed with no recorded error.
    pub fn commit(&self) -> Result<(), TransactionError> {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let log = guard.as_mut().ok_or(TransactionError::TxMissing)?;

        let all_ok = log
            .operations
            .iter()
            .all(|op| op.completed && op.error.is_none());
        if !all_ok {
            return Err(TransactionError::HasFailedOperations);
        }

        log.status = TransactionStatus::Committed;
        log.completed = Some(now_iso());
        self.persist(log)?;
        info!(target: TX_TARGET, id = %log.id, "transaction committed");
        *guard = None;
        Ok(())
    }

    /// Rolls back the pending transaction in reverse operation order. Marks
    /// the transaction `rolled_back` regardless of per-operation failures,
    /// but returns a composite error describing any operation that could
    /// not be cleanly undone.
    pub fn rollback(&self) -> Result<(), TransactionError> {
        let mut guard = self.current.lock().unwrap_or_else(|e| e.into_inner());
        let log = guard.as_mut().ok_or(TransactionError::TxMissing)?;

        let mut failures = Vec::new();
        for op in log.operations.iter_mut().rev() {
            if !op.completed {
                continue;
            }
            if let Err(reason) = rollback_one(&self.atomic_writer, op) {
                warn!(target: TX_TARGET, path = %op.file_path.display(), error = %reason, "rollback failed for operation");
                op.error = Some(reason.clone());
                failures.push((op.file_path.clone(), reason));
            }
        }

        log.status = TransactionStatus::RolledBack;
        log.completed = Some(now_iso());
        self.persist(log)?;
        info!(target: TX_TARGET, id = %log.id, failures = failures.len(), "transaction rolled back");
        *guard = None;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TransactionError::RollbackFailures { failures })
        }
    }

    /// Loads a previously persisted transaction log by id.
    pub fn load_transaction(&self, id: &str) -> Result<TransactionLog, TransactionError> {
        load_log(&self.journal_path(id))
    }

    /// Returns every journal in `log_dir` whose status is still `pending`,
    /// silently skipping files that fail to parse.
    #[must_use]
    pub fn list_pending(&self) -> Vec<TransactionLog> {
        list_logs(&self.log_dir)
            .into_iter()
            .filter(|log| log.status == TransactionStatus::Pending)
            .collect()
    }

    /// Removes committed/rolled-back journals (and their referenced
    /// backups) older than `older_than`. Leaves unparseable journals
    /// alone.
    pub fn cleanup_old(&self, older_than: Duration) -> usize {
        let Ok(entries) = fs::read_dir(&self.log_dir) else {
            return 0;
        };
        let cutoff = SystemTime::now() - older_than;
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(log) = load_log(&path) else { continue };
            if matches!(log.status, TransactionStatus::Pending) {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            if modified > cutoff {
                continue;
            }
            for op in &log.operations {
                if let Some(backup) = &op.backup_path {
                    let _ = fs::remove_file(backup);
                }
            }
            if fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

fn rollback_one(writer: &AtomicWriter, op: &mut TransactionOperation) -> Result<(), String> {
    match op.kind {
        OperationKind::Modify => {
            let backup = op.backup_path.clone().ok_or("backup path missing")?;
            if !backup.exists() {
                return Err(format!("backup file '{}' missing", backup.display()));
            }
            let content = fs::read_to_string(&backup).map_err(|e| e.to_string())?;
            writer
                .write_file_with_backup(&op.file_path, &content, false)
                .map_err(|e| e.to_string())?;
            Ok(())
        }
        OperationKind::Create => {
            if op.file_path.exists() {
                fs::remove_file(&op.file_path).map_err(|e| e.to_string())?;
            }
            Ok(())
        }
        OperationKind::Delete => Err("delete is unrecoverable".to_string()),
    }
}

fn load_log(path: &Path) -> Result<TransactionLog, TransactionError> {
    let content = fs::read_to_string(path).map_err(|e| TransactionError::JournalParse {
        path: path.to_path_buf(),
        source: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| TransactionError::JournalParse {
        path: path.to_path_buf(),
        source: e.to_string(),
    })
}

fn list_logs(dir: &Path) -> Vec<TransactionLog> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|e| e.path().extension().and_then(|e| e.to_str()) == Some("json"))
        .filter_map(|e| load_log(&e.path()).ok())
        .collect()
}

fn checksum_of(path: &Path) -> Result<String, io::Error> {
    let bytes = fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn now_iso() -> String {
    let format = time::format_description::well_known::Rfc3339;
    time::OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| unix_seconds().to_string())
}

fn backup_timestamp() -> String {
    let format = time::format_description::parse("[year][month][day]-[hour][minute][second]")
        .expect("static format description parses");
    time::OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| "00000000-000000".to_string())
}
