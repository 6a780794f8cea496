//! The File Processor (C6): the orchestrator that ties discovery, providers,
//! the Transaction Manager, and the Atomic Writer into a single batch
//! operation with ACID-like guarantees.
//!
//! `query_files` fans a structural query out across the matched files and
//! merges the matches. `transform_files` does the same for a transform, but
//! wraps the whole batch in a transaction (when safety is enabled) so that
//! either every file ends up coherently modified or the pre-batch state is
//! restored.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Instant, SystemTime};

use crossbeam::channel;
use thiserror::Error;
use tracing::{info, warn};

use crate::confidence::{self, ConfidenceScore};
use crate::config::EngineConfig;
use crate::provider::{AgentQuery, Match, ProviderRegistry, TransformOp};
use crate::safety::{NoopSafetyDelegate, SafetyDelegate};
use crate::transaction::{OperationKind, TransactionError, TransactionManager, TransactionManagerConfig};
use crate::walker::{self, CancellationToken, FileScope, WalkError, WalkResult};
use crate::writer::{self, AtomicWriter};

const PROCESSOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::processor");

/// Failure modes that abort the whole batch call (as opposed to being
/// recorded on an individual file's detail).
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Discovery failed outright (invalid scope).
    #[error("file discovery failed: {0}")]
    Walk(#[from] WalkError),
    /// A transaction-level operation (begin/commit/rollback) failed.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),
    /// The safety delegate rejected the batch before any file was touched.
    #[error("safety delegate rejected the batch: {0}")]
    SafetyRejected(String),
}

/// A structural match reported by [`FileProcessor::query_files`], annotated
/// with the file it was found in.
#[derive(Debug, Clone)]
pub struct FileMatch {
    /// Path the match was found in.
    pub path: PathBuf,
    /// Detected language of the file.
    pub language: String,
    /// File size in bytes, when known.
    pub size: u64,
    /// Last-modified time, when known.
    pub modified: Option<SystemTime>,
    /// Matches the provider reported within this file.
    pub matches: Vec<Match>,
}

/// A transform request for [`FileProcessor::transform_files`]: a discovery
/// scope, the edit to apply, and batch-level options.
#[derive(Debug, Clone)]
pub struct FileTransformOp {
    /// Scope defining which files are discovered.
    pub scope: FileScope,
    /// The edit every matched file's provider applies.
    pub transform: TransformOp,
    /// When true, no files are written; `FileTransformDetail::modified`
    /// reflects whether a change *would* occur.
    pub dry_run: bool,
    /// When true and safety is disabled, an ad-hoc `.bak` sibling is
    /// written alongside each modified file. Ignored when safety is
    /// enabled, since the Transaction Manager's own backup is authoritative
    /// (see `DESIGN.md`).
    pub backup: bool,
    /// Human-readable description recorded on the transaction log.
    pub description: String,
}

/// Per-file outcome of a [`FileProcessor::transform_files`] call.
#[derive(Debug, Clone)]
pub struct FileTransformDetail {
    /// Path of the file this detail describes.
    pub path: PathBuf,
    /// Detected language of the file.
    pub language: String,
    /// Whether the file's on-disk content changed (or would change, for a
    /// dry run).
    pub modified: bool,
    /// Number of sites the provider's transform touched. Zero whenever
    /// `modified` is `false`.
    pub match_count: usize,
    /// Size of the original content, in bytes.
    pub original_size: usize,
    /// Size of the modified content, in bytes. Zero whenever `modified` is
    /// `false`.
    pub modified_size: usize,
    /// Where the pre-modification content was backed up, if any.
    pub backup_path: Option<PathBuf>,
    /// A provider-rendered diff of the change, for display only.
    pub diff: Option<String>,
    /// Set when this file failed at any stage; `modified` is always `false`
    /// when this is set.
    pub error: Option<String>,
    /// The provider's confidence in this file's transform.
    pub confidence: ConfidenceScore,
}

impl FileTransformDetail {
    fn failed(path: PathBuf, language: String, original_size: usize, error: impl Into<String>) -> Self {
        Self {
            path,
            language,
            modified: false,
            match_count: 0,
            original_size,
            modified_size: 0,
            backup_path: None,
            diff: None,
            error: Some(error.into()),
            confidence: ConfidenceScore::zero(),
        }
    }
}

/// Aggregate outcome of a [`FileProcessor::transform_files`] call.
#[derive(Debug, Clone)]
pub struct FileTransformResult {
    /// Total files discovered (including those that failed to stat).
    pub files_scanned: usize,
    /// Number of files actually modified (or that would be, on a dry run).
    pub files_modified: usize,
    /// Sum of `match_count` across every file.
    pub total_matches: usize,
    /// Wall-clock time spent discovering files, in milliseconds.
    pub scan_duration_ms: u64,
    /// Wall-clock time spent transforming and writing files, in
    /// milliseconds.
    pub transform_duration_ms: u64,
    /// Per-file detail, in discovery order.
    pub files: Vec<FileTransformDetail>,
    /// Aggregated batch confidence (C7).
    pub confidence: ConfidenceScore,
    /// The transaction id, when safety was enabled and this was not a dry
    /// run.
    pub transaction_id: Option<String>,
    /// Errors that occurred during discovery (not tied to any file detail).
    pub errors: Vec<String>,
}

/// Configuration for constructing a [`FileProcessor`].
pub struct FileProcessorConfig {
    /// Engine-wide settings (worker count, safety mode, atomic writer and
    /// transaction log configuration).
    pub engine: EngineConfig,
    /// Providers consulted by language. Shared across worker threads, so
    /// callers register every provider before handing this in.
    pub providers: Arc<ProviderRegistry>,
    /// Optional policy hook. Defaults to [`NoopSafetyDelegate`] when absent.
    pub safety_delegate: Option<Arc<dyn SafetyDelegate>>,
}

/// Orchestrates discovery, provider dispatch, transactional safety, and
/// atomic writes for a batch of files (C6).
pub struct FileProcessor {
    config: EngineConfig,
    providers: Arc<ProviderRegistry>,
    atomic_writer: Arc<AtomicWriter>,
    safety_delegate: Arc<dyn SafetyDelegate>,
}

impl FileProcessor {
    /// Builds a processor from `config`. Does not create the transaction log
    /// directory; that happens lazily on first use within a transactional
    /// `transform_files` call.
    #[must_use]
    pub fn new(config: FileProcessorConfig) -> Self {
        let atomic_writer = Arc::new(AtomicWriter::new(config.engine.atomic.clone()));
        Self {
            config: config.engine,
            providers: config.providers,
            atomic_writer,
            safety_delegate: config
                .safety_delegate
                .unwrap_or_else(|| Arc::new(NoopSafetyDelegate)),
        }
    }

    fn worker_count(&self) -> usize {
        self.config.workers.max(1)
    }

    /// Evaluates `query` against every file `scope` discovers, returning
    /// matches grouped by file. Files with no registered provider, or whose
    /// provider reports zero matches, are silently omitted.
    pub fn query_files(
        &self,
        scope: FileScope,
        query: AgentQuery,
        cancel: CancellationToken,
    ) -> Result<Vec<FileMatch>, ProcessError> {
        let rx = walker::walk(scope, cancel)?;
        let (out_tx, out_rx) = channel::bounded::<FileMatch>(self.worker_count().max(1));

        let mut handles = Vec::with_capacity(self.worker_count());
        for _ in 0..self.worker_count() {
            let rx = rx.clone();
            let out_tx = out_tx.clone();
            let providers = Arc::clone(&self.providers);
            let query = query.clone();
            handles.push(thread::spawn(move || {
                query_worker(&rx, &out_tx, &providers, &query);
            }));
        }
        drop(out_tx);

        let matches: Vec<FileMatch> = out_rx.iter().collect();
        for handle in handles {
            let _ = handle.join();
        }
        Ok(matches)
    }

    /// Discovers files via `op.scope`, applies `op.transform` through each
    /// file's provider, and commits (or rolls back) the batch atomically.
    pub fn transform_files(
        &self,
        op: FileTransformOp,
        cancel: CancellationToken,
    ) -> Result<FileTransformResult, ProcessError> {
        let scan_start = Instant::now();
        let rx = walker::walk(op.scope.clone(), cancel.clone())?;
        let all: Vec<WalkResult> = rx.iter().collect();
        let scan_duration_ms = elapsed_ms(scan_start);

        let mut errors: Vec<String> = Vec::new();
        let mut successes: Vec<WalkResult> = Vec::with_capacity(all.len());
        for result in &all {
            if let Some(err) = &result.error {
                errors.push(format!("{}: {err}", result.path.display()));
            }
        }
        successes.extend(all.iter().filter(|r| r.error.is_none()).cloned());

        if let crate::safety::SafetyVerdict::Deny(reason) =
            self.safety_delegate.validate_batch(&op.scope, &all)
        {
            return Err(ProcessError::SafetyRejected(reason));
        }

        let transactional = self.config.safety_enabled && !op.dry_run;
        let tx = if transactional {
            Some(self.begin_transaction(&op.description)?)
        } else {
            None
        };
        let mut guard = RollbackGuard {
            tx: tx.as_ref(),
            armed: tx.is_some(),
        };

        let transform_start = Instant::now();
        let details = self.run_file_workers(&successes, &op, tx.as_ref(), &cancel);
        let transform_duration_ms = elapsed_ms(transform_start);

        let any_failure =
            !errors.is_empty() || details.iter().any(|d| d.error.is_some()) || cancel.is_cancelled();

        let transaction_id = if let Some(tx) = &tx {
            let id = tx.begun_id();
            if any_failure {
                tx.manager.rollback()?;
            } else {
                tx.manager.commit()?;
            }
            guard.armed = false;
            Some(id)
        } else {
            None
        };
        drop(guard);

        let files_modified = details.iter().filter(|d| d.modified).count();
        let total_matches = details.iter().map(|d| d.match_count).sum();
        let confidence = confidence::aggregate(&details);

        Ok(FileTransformResult {
            files_scanned: all.len(),
            files_modified,
            total_matches,
            scan_duration_ms,
            transform_duration_ms,
            files: details,
            confidence,
            transaction_id,
            errors,
        })
    }

    fn begin_transaction(&self, description: &str) -> Result<ActiveTransaction, ProcessError> {
        let manager = Arc::new(TransactionManager::new(TransactionManagerConfig {
            log_dir: self.config.tx_log_dir.clone(),
            atomic_writer: Arc::clone(&self.atomic_writer),
        })?);
        let log = manager.begin(description.to_string())?;
        let id = log.id().to_string();
        info!(target: PROCESSOR_TARGET, transaction_id = %id, "batch transaction begun");
        Ok(ActiveTransaction { manager, id })
    }

    fn run_file_workers(
        &self,
        files: &[WalkResult],
        op: &FileTransformOp,
        tx: Option<&ActiveTransaction>,
        cancel: &CancellationToken,
    ) -> Vec<FileTransformDetail> {
        let (in_tx, in_rx) = channel::bounded::<WalkResult>(files.len().max(1));
        for file in files {
            let _ = in_tx.send(file.clone());
        }
        drop(in_tx);

        let (out_tx, out_rx) = channel::bounded::<FileTransformDetail>(files.len().max(1));
        let mut handles = Vec::with_capacity(self.worker_count());
        for _ in 0..self.worker_count() {
            let in_rx = in_rx.clone();
            let out_tx = out_tx.clone();
            let providers = Arc::clone(&self.providers);
            let writer = Arc::clone(&self.atomic_writer);
            let delegate = Arc::clone(&self.safety_delegate);
            let tx = tx.map(|t| t.manager_handle());
            let safety_enabled = self.config.safety_enabled;
            let transform = op.transform.clone();
            let dry_run = op.dry_run;
            let backup = op.backup;
            let cancel = cancel.clone();
            handles.push(thread::spawn(move || {
                for file in in_rx.iter() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let detail = process_one_file(
                        &file,
                        &transform,
                        dry_run,
                        backup,
                        safety_enabled,
                        &providers,
                        &writer,
                        delegate.as_ref(),
                        tx.as_deref(),
                    );
                    if out_tx.send(detail).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(out_tx);

        let details: Vec<FileTransformDetail> = out_rx.iter().collect();
        for handle in handles {
            let _ = handle.join();
        }
        details
    }
}

/// Holds the transaction this batch is running under, so the deferred
/// rollback guard and the per-file workers can share it without re-exposing
/// `TransactionManager` construction.
struct ActiveTransaction {
    manager: Arc<TransactionManager>,
    id: String,
}

impl ActiveTransaction {
    fn begun_id(&self) -> String {
        self.id.clone()
    }

    fn manager_handle(&self) -> Arc<TransactionManager> {
        Arc::clone(&self.manager)
    }
}

/// Rolls the active transaction back on drop unless disarmed, so that a
/// cancelled or panicking batch never leaves a transaction dangling in the
/// `pending` state. Mirrors spec §4.6 step 6's "deferred rollback".
struct RollbackGuard<'a> {
    tx: Option<&'a ActiveTransaction>,
    armed: bool,
}

impl Drop for RollbackGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(tx) = self.tx {
            if let Err(err) = tx.manager.rollback() {
                warn!(target: PROCESSOR_TARGET, transaction_id = %tx.id, error = %err, "deferred rollback failed");
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn query_worker(
    rx: &channel::Receiver<WalkResult>,
    out_tx: &channel::Sender<FileMatch>,
    providers: &ProviderRegistry,
    query: &AgentQuery,
) {
    for file in rx.iter() {
        if file.error.is_some() {
            continue;
        }
        let Some(provider) = providers.get(&file.language) else {
            continue;
        };
        let Ok(content) = fs::read_to_string(&file.path) else {
            continue;
        };
        let result = provider.query(&content, query);
        if result.error.is_some() || result.matches.is_empty() {
            continue;
        }
        let file_match = FileMatch {
            path: file.path.clone(),
            language: file.language.clone(),
            size: file.info.map_or(0, |i| i.size),
            modified: file.info.and_then(|i| i.modified),
            matches: result.matches,
        };
        if out_tx.send(file_match).is_err() {
            return;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn process_one_file(
    file: &WalkResult,
    transform: &TransformOp,
    dry_run: bool,
    backup_requested: bool,
    safety_enabled: bool,
    providers: &ProviderRegistry,
    writer: &AtomicWriter,
    delegate: &dyn SafetyDelegate,
    tx: Option<&TransactionManager>,
) -> FileTransformDetail {
    let Some(provider) = providers.get(&file.language) else {
        return FileTransformDetail::failed(
            file.path.clone(),
            file.language.clone(),
            0,
            format!("no provider for language: {}", file.language),
        );
    };

    let original = match fs::read_to_string(&file.path) {
        Ok(content) => content,
        Err(err) => {
            return FileTransformDetail::failed(
                file.path.clone(),
                file.language.clone(),
                0,
                format!("failed to read file: {err}"),
            );
        }
    };
    let original_size = original.len();

    let result = provider.transform(&original, transform);
    if let Some(err) = result.error {
        return FileTransformDetail::failed(file.path.clone(), file.language.clone(), original_size, err);
    }

    if result.match_count > 0 {
        if let crate::safety::SafetyVerdict::Deny(reason) =
            delegate.validate_file_change(file, &result.confidence)
        {
            return FileTransformDetail::failed(file.path.clone(), file.language.clone(), original_size, reason);
        }
    }

    if result.modified == original {
        return FileTransformDetail {
            path: file.path.clone(),
            language: file.language.clone(),
            modified: false,
            match_count: 0,
            original_size,
            modified_size: 0,
            backup_path: None,
            diff: None,
            error: None,
            confidence: result.confidence,
        };
    }

    if dry_run {
        return FileTransformDetail {
            path: file.path.clone(),
            language: file.language.clone(),
            modified: true,
            match_count: result.match_count,
            original_size,
            modified_size: result.modified.len(),
            backup_path: None,
            diff: Some(result.diff),
            error: None,
            confidence: result.confidence,
        };
    }

    let backup_path = if safety_enabled {
        let Some(tx) = tx else {
            return FileTransformDetail::failed(
                file.path.clone(),
                file.language.clone(),
                original_size,
                "safety is enabled but no transaction was supplied".to_string(),
            );
        };
        match tx.add_operation(OperationKind::Modify, &file.path) {
            Ok(path) => path,
            Err(err) => {
                return FileTransformDetail::failed(
                    file.path.clone(),
                    file.language.clone(),
                    original_size,
                    err.to_string(),
                );
            }
        }
    } else if backup_requested {
        match adhoc_backup(&file.path) {
            Ok(path) => Some(path),
            Err(err) => {
                return FileTransformDetail::failed(
                    file.path.clone(),
                    file.language.clone(),
                    original_size,
                    format!("failed to write backup: {err}"),
                );
            }
        }
    } else {
        None
    };

    let write_outcome = if safety_enabled {
        writer
            .write_file_with_backup(&file.path, &result.modified, false)
            .map(|_| ())
            .map_err(|err| err.to_string())
    } else {
        writer::write_plain(&file.path, &result.modified).map_err(|err| err.to_string())
    };

    match write_outcome {
        Ok(()) => {
            if safety_enabled {
                if let Some(tx) = tx {
                    if let Err(err) = tx.complete_operation(&file.path, None) {
                        return FileTransformDetail::failed(
                            file.path.clone(),
                            file.language.clone(),
                            original_size,
                            err.to_string(),
                        );
                    }
                }
            }
            FileTransformDetail {
                path: file.path.clone(),
                language: file.language.clone(),
                modified: true,
                match_count: result.match_count,
                original_size,
                modified_size: result.modified.len(),
                backup_path,
                diff: Some(result.diff),
                error: None,
                confidence: result.confidence,
            }
        }
        Err(write_err) => {
            if safety_enabled {
                if let Some(tx) = tx {
                    let _ = tx.complete_operation(&file.path, Some(write_err.clone()));
                }
            }
            FileTransformDetail::failed(file.path.clone(), file.language.clone(), original_size, write_err)
        }
    }
}

fn adhoc_backup(path: &std::path::Path) -> std::io::Result<PathBuf> {
    let stamp = backup_timestamp();
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".bak.{stamp}"));
    let backup = PathBuf::from(name);
    fs::copy(path, &backup)?;
    Ok(backup)
}

fn backup_timestamp() -> String {
    let format = time::format_description::parse("[year][month][day]-[hour][minute][second]")
        .expect("static format description parses");
    time::OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_else(|_| "00000000-000000".to_string())
}
