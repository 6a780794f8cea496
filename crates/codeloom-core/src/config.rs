//! Process-wide engine configuration.
//!
//! [`EngineConfig`] bundles every knob the File Processor (C6) needs to
//! construct its [`crate::writer::AtomicWriter`] and
//! [`crate::transaction::TransactionManager`], plus whether transactional
//! safety is enabled at all. This is the dependency-injected configuration
//! object callers build once per process (or per test).

use std::env;
use std::path::PathBuf;

use crate::writer::WriterConfig;

/// Name of the environment variable that overrides the default worker count.
pub const WORKERS_ENV_VAR: &str = "CODELOOM_WORKERS";

const DEFAULT_WORKERS: usize = 8;
const DEFAULT_TX_LOG_DIR: &str = ".morfx/transactions";

/// Configuration the File Processor is constructed from.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whether batches run inside a Transaction Manager with atomic writes.
    /// When `false`, writes go straight through a plain permission-preserving
    /// write with no journal and no rollback.
    pub safety_enabled: bool,
    /// Configuration for the Atomic Writer used when safety is enabled.
    pub atomic: WriterConfig,
    /// Directory the Transaction Manager persists its journal and backups
    /// under.
    pub tx_log_dir: PathBuf,
    /// Number of concurrent file-workers the File Processor fans out to.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            safety_enabled: true,
            atomic: WriterConfig::default(),
            tx_log_dir: PathBuf::from(DEFAULT_TX_LOG_DIR),
            workers: DEFAULT_WORKERS,
        }
    }
}

impl EngineConfig {
    /// Builds a default configuration, then applies [`WORKERS_ENV_VAR`] if
    /// it is set to a positive integer.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(workers) = workers_override() {
            config.workers = workers;
        }
        config
    }
}

fn workers_override() -> Option<usize> {
    env::var(WORKERS_ENV_VAR)
        .ok()
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
}
