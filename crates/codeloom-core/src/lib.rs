//! Safe, concurrent, multi-file code transformation engine.
//!
//! This crate implements the core pipeline: discover files under a scope
//! (`walker`), dispatch each one to a language-specific [`provider::Provider`]
//! (an external collaborator callers register ahead of time), and commit the
//! results with atomic per-file writes (`writer`) and a journaled,
//! roll-back-capable transaction (`transaction`). The orchestrator
//! (`processor`) ties these together and aggregates confidence (`confidence`)
//! across a batch.
//!
//! Nothing in this crate talks to a network, a database, or a CLI; it is a
//! library other binaries embed. See `codeloom-providers` for reference
//! language providers exercising the full pipeline, and `DESIGN.md` at the
//! workspace root for where each piece is grounded.

pub mod catalog;
pub mod confidence;
pub mod config;
pub mod process;
pub mod processor;
pub mod provider;
pub mod safety;
pub mod transaction;
pub mod walker;
pub mod writer;

pub use confidence::{ConfidenceFactor, ConfidenceLevel, ConfidenceScore};
pub use config::EngineConfig;
pub use processor::{
    FileMatch, FileProcessor, FileProcessorConfig, FileTransformDetail, FileTransformOp,
    FileTransformResult, ProcessError,
};
pub use provider::{AgentQuery, Match, Provider, ProviderRegistry, QueryResult, TransformOp, TransformResult};
pub use safety::{ConfigurableSafetyDelegate, NoopSafetyDelegate, SafetyDelegate, SafetyVerdict};
pub use transaction::{
    OperationKind, TransactionError, TransactionLog, TransactionManager, TransactionManagerConfig,
    TransactionOperation, TransactionStatus,
};
pub use walker::{CancellationToken, FileInfo, FileScope, WalkError, WalkResult};
pub use writer::{AtomicWriter, WriteError, WriteReport, WriterConfig};
