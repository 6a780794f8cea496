//! Parallel file discovery (C3): glob-filtered directory traversal with a
//! bounded producer/consumer pipeline.
//!
//! A single scanner thread walks the directory tree depth-first and feeds
//! discovered file paths into a bounded channel; a pool of processor
//! workers drains that channel, stats each file, detects its language, and
//! emits [`WalkResult`]s on a second channel that [`walk`] hands back to the
//! caller as a lazy sequence.

mod glob;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, warn};

use crate::catalog;

const WALKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::walker");
const CHANNEL_CAPACITY: usize = 1000;

/// Cooperative cancellation signal shared between a walk's scanner and
/// worker threads.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that starts out not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Inputs to a discovery run.
#[derive(Debug, Clone)]
pub struct FileScope {
    /// Root directory to traverse.
    pub path: PathBuf,
    /// Glob patterns a file must match at least one of (empty = all).
    pub include: Vec<String>,
    /// Glob patterns that exclude a matching entry.
    pub exclude: Vec<String>,
    /// Optional explicit language override, bypassing detection.
    pub language: Option<String>,
    /// Maximum traversal depth below `path`; `0` means unbounded.
    pub max_depth: usize,
    /// Maximum number of files to enqueue; `0` means unbounded.
    pub max_files: usize,
    /// Whether to traverse symlinked directories.
    pub follow_symlinks: bool,
}

impl FileScope {
    /// A scope over `path` with every other field at its permissive
    /// default (no filters, no caps, symlinks not followed).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            include: Vec::new(),
            exclude: Vec::new(),
            language: None,
            max_depth: 0,
            max_files: 0,
            follow_symlinks: false,
        }
    }
}

/// Metadata captured for a discovered file.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileInfo {
    /// Size in bytes.
    pub size: u64,
    /// Last-modified time, when the platform reports one.
    pub modified: Option<SystemTime>,
    /// Unix permission bits, when available.
    pub mode: Option<u32>,
}

/// A single file discovered by [`walk`].
#[derive(Debug, Clone)]
pub struct WalkResult {
    /// Path as discovered (symlinks preserved textually).
    pub path: PathBuf,
    /// Stat metadata, absent when `error` is set.
    pub info: Option<FileInfo>,
    /// Detected (or overridden) language id.
    pub language: String,
    /// Set when this entry failed to stat; does not abort the walk.
    pub error: Option<String>,
}

/// Errors that abort a walk outright, before any results are produced.
#[derive(Debug, Error)]
pub enum WalkError {
    /// `scope.path` is missing, not a directory, or otherwise unusable.
    #[error("scope path '{path}' is invalid: {reason}")]
    ScopeInvalid {
        /// The offending path.
        path: PathBuf,
        /// Human-readable explanation.
        reason: String,
    },
}

fn validate_scope(scope: &FileScope) -> Result<(), WalkError> {
    if scope.path.as_os_str().is_empty() {
        return Err(WalkError::ScopeInvalid {
            path: scope.path.clone(),
            reason: "path is empty".to_string(),
        });
    }
    let metadata = fs::metadata(&scope.path).map_err(|err| WalkError::ScopeInvalid {
        path: scope.path.clone(),
        reason: err.to_string(),
    })?;
    if !metadata.is_dir() {
        return Err(WalkError::ScopeInvalid {
            path: scope.path.clone(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(())
}

fn default_worker_count() -> usize {
    2 * thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn detect_language(scope: &FileScope, path: &Path) -> String {
    if let Some(lang) = &scope.language {
        return lang.clone();
    }
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if ext.is_empty() {
        return catalog::UNKNOWN_LANGUAGE.to_string();
    }
    catalog::lookup_by_extension(ext).0
}

fn file_info(path: &Path) -> Result<FileInfo, std::io::Error> {
    let metadata = fs::metadata(path)?;
    let mode = {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            Some(metadata.mode())
        }
        #[cfg(not(unix))]
        {
            None
        }
    };
    Ok(FileInfo {
        size: metadata.len(),
        modified: metadata.modified().ok(),
        mode,
    })
}

struct ScanState<'a> {
    scope: &'a FileScope,
    cancel: &'a CancellationToken,
    visited: HashSet<PathBuf>,
    enqueued: usize,
}

fn scan(scope: &FileScope, cancel: &CancellationToken, tx: &Sender<PathBuf>) {
    let mut state = ScanState {
        scope,
        cancel,
        visited: HashSet::new(),
        enqueued: 0,
    };
    if scope.follow_symlinks {
        if let Ok(canonical) = fs::canonicalize(&scope.path) {
            state.visited.insert(canonical);
        }
    }
    walk_dir(&mut state, &scope.path, 0, tx);
}

fn limit_reached(state: &ScanState) -> bool {
    state.scope.max_files != 0 && state.enqueued >= state.scope.max_files
}

fn walk_dir(state: &mut ScanState, dir: &Path, depth: usize, tx: &Sender<PathBuf>) {
    if state.cancel.is_cancelled() || limit_reached(state) {
        return;
    }
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(target: WALKER_TARGET, dir = %dir.display(), error = %err, "skipping unreadable directory");
            return;
        }
    };

    for entry in entries {
        if state.cancel.is_cancelled() || limit_reached(state) {
            return;
        }
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let basename = entry.file_name().to_string_lossy().to_string();
        let full_path = path.to_string_lossy().to_string();

        if glob::matches_any(&state.scope.exclude, &full_path, &basename) && !state.scope.exclude.is_empty() {
            continue;
        }

        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_symlink() {
            if !state.scope.follow_symlinks {
                continue;
            }
            let Ok(canonical) = fs::canonicalize(&path) else {
                continue;
            };
            let Ok(target_meta) = fs::metadata(&canonical) else {
                continue;
            };
            if target_meta.is_dir() {
                if state.visited.contains(&canonical) {
                    continue;
                }
                if state.scope.max_depth != 0 && depth + 1 > state.scope.max_depth {
                    continue;
                }
                state.visited.insert(canonical);
                walk_dir(state, &path, depth + 1, tx);
            } else if glob::matches_any(&state.scope.include, &full_path, &basename) {
                enqueue(state, path, tx);
            }
        } else if file_type.is_dir() {
            if state.scope.max_depth != 0 && depth + 1 > state.scope.max_depth {
                continue;
            }
            walk_dir(state, &path, depth + 1, tx);
        } else if file_type.is_file() && glob::matches_any(&state.scope.include, &full_path, &basename) {
            enqueue(state, path, tx);
        }
    }
}

fn enqueue(state: &mut ScanState, path: PathBuf, tx: &Sender<PathBuf>) {
    state.enqueued += 1;
    if tx.send(path).is_err() {
        // Receiver side gone; nothing left to do but stop producing.
        state.cancel.cancel();
    }
}

fn stat_result(scope: &FileScope, path: PathBuf) -> WalkResult {
    let language = detect_language(scope, &path);
    match file_info(&path) {
        Ok(info) => WalkResult {
            path,
            info: Some(info),
            language,
            error: None,
        },
        Err(err) => WalkResult {
            path,
            info: None,
            language,
            error: Some(err.to_string()),
        },
    }
}

/// Streams files under `scope`, applying include/exclude globs, depth and
/// count caps, and symlink-cycle protection. The returned receiver is a
/// lazy sequence: results arrive as worker threads produce them and the
/// channel closes once discovery and processing both finish.
pub fn walk(scope: FileScope, cancel: CancellationToken) -> Result<Receiver<WalkResult>, WalkError> {
    validate_scope(&scope)?;

    let (path_tx, path_rx) = channel::bounded::<PathBuf>(CHANNEL_CAPACITY);
    let (result_tx, result_rx) = channel::bounded::<WalkResult>(CHANNEL_CAPACITY);

    let scanner_scope = scope.clone();
    let scanner_cancel = cancel.clone();
    thread::spawn(move || {
        scan(&scanner_scope, &scanner_cancel, &path_tx);
    });

    let worker_count = default_worker_count();
    debug!(target: WALKER_TARGET, workers = worker_count, path = %scope.path.display(), "starting walk");

    for _ in 0..worker_count {
        let path_rx = path_rx.clone();
        let result_tx = result_tx.clone();
        let worker_scope = scope.clone();
        let worker_cancel = cancel.clone();
        thread::spawn(move || {
            for path in path_rx.iter() {
                if worker_cancel.is_cancelled() {
                    break;
                }
                if result_tx.send(stat_result(&worker_scope, path)).is_err() {
                    break;
                }
            }
        });
    }
    // Drop our own sender so the results channel closes once every worker's
    // clone has also been dropped.
    drop(result_tx);

    Ok(result_rx)
}

/// Runs a walk to completion and returns only the discovered paths
/// (including those that failed to stat).
pub fn fast_scan(scope: FileScope, cancel: CancellationToken) -> Result<Vec<PathBuf>, WalkError> {
    let rx = walk(scope, cancel)?;
    Ok(rx.iter().map(|r| r.path).collect())
}

/// Runs a walk to completion and returns a count of files per detected
/// language.
pub fn language_stats(scope: FileScope, cancel: CancellationToken) -> Result<HashMap<String, usize>, WalkError> {
    let rx = walk(scope, cancel)?;
    let mut stats = HashMap::new();
    for result in rx.iter() {
        *stats.entry(result.language).or_insert(0) += 1;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, content).expect("write file");
        path
    }

    fn collect_paths(scope: FileScope) -> HashSet<PathBuf> {
        fast_scan(scope, CancellationToken::new())
            .expect("walk")
            .into_iter()
            .collect()
    }

    #[test]
    fn rejects_missing_scope_path() {
        let scope = FileScope::new("/this/path/does/not/exist/hopefully");
        let err = walk(scope, CancellationToken::new()).expect_err("missing path rejected");
        assert!(matches!(err, WalkError::ScopeInvalid { .. }));
    }

    #[test]
    fn discovers_files_honoring_include_and_exclude() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "a.rs", "fn a() {}");
        write(dir.path(), "b.txt", "not rust");
        write(dir.path(), "nested/c.rs", "fn c() {}");

        let mut scope = FileScope::new(dir.path());
        scope.include = vec!["**/*.rs".to_string()];
        let paths = collect_paths(scope);

        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&dir.path().join("a.rs")));
        assert!(paths.contains(&dir.path().join("nested/c.rs")));
    }

    #[test]
    fn exclude_glob_wins_over_include() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "keep.rs", "");
        write(dir.path(), "generated.rs", "");

        let mut scope = FileScope::new(dir.path());
        scope.include = vec!["*.rs".to_string()];
        scope.exclude = vec!["generated.rs".to_string()];
        let paths = collect_paths(scope);

        assert_eq!(paths, HashSet::from([dir.path().join("keep.rs")]));
    }

    #[test]
    fn max_depth_limits_traversal() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "l1/l2/l3/leaf.go", "package main");

        let mut scope = FileScope::new(dir.path());
        scope.max_depth = 2;
        let paths = collect_paths(scope);

        assert!(paths.is_empty(), "leaf beyond max_depth must be excluded");
    }

    #[test]
    fn max_files_caps_total_enqueued() {
        let dir = TempDir::new().expect("tempdir");
        for i in 0..5 {
            write(dir.path(), &format!("f{i}.txt"), "");
        }

        let mut scope = FileScope::new(dir.path());
        scope.max_files = 2;
        let paths = collect_paths(scope);

        assert_eq!(paths.len(), 2);
    }

    #[test]
    fn detects_language_by_extension() {
        let dir = TempDir::new().expect("tempdir");
        write(dir.path(), "main.rs", "");
        write(dir.path(), "main.unknownext", "");

        let stats = language_stats(FileScope::new(dir.path()), CancellationToken::new()).expect("walk");
        assert_eq!(stats.get("rust"), Some(&1));
        assert_eq!(stats.get(catalog::UNKNOWN_LANGUAGE), Some(&1));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_terminates_and_visits_each_dir_once() {
        let dir = TempDir::new().expect("tempdir");
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).expect("create sub");
        write(&sub, "inside.rs", "");
        std::os::unix::fs::symlink(dir.path(), sub.join("loop")).expect("create symlink");

        let mut scope = FileScope::new(dir.path());
        scope.follow_symlinks = true;
        scope.include = vec!["**/*.rs".to_string()];

        let paths = collect_paths(scope);
        assert_eq!(paths, HashSet::from([sub.join("inside.rs")]));
    }

    #[test]
    fn cancellation_stops_production() {
        let dir = TempDir::new().expect("tempdir");
        for i in 0..20 {
            write(dir.path(), &format!("f{i}.txt"), "");
        }
        let cancel = CancellationToken::new();
        cancel.cancel();
        let paths = fast_scan(FileScope::new(dir.path()), cancel).expect("walk");
        assert!(paths.len() <= 20);
    }
}
