//! Optional safety delegate (C9).
//!
//! The File Processor consults a [`SafetyDelegate`] once per batch and once
//! per file with a nonzero match count, so that callers can plug in policy
//! (size limits, forbidden paths, confidence thresholds) without the
//! processor knowing anything about it. A processor run with no delegate
//! behaves as if [`NoopSafetyDelegate`] were supplied. The core never
//! inspects a delegate's internal state; it only reads the verdict.

use crate::confidence::ConfidenceScore;
use crate::walker::{FileScope, WalkResult};

/// Outcome of a safety check: either the operation may proceed, or it must
/// be blocked with an explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyVerdict {
    /// The operation may proceed.
    Allow,
    /// The operation must not proceed; the caller surfaces this reason
    /// verbatim.
    Deny(String),
}

impl SafetyVerdict {
    /// True when this verdict is [`SafetyVerdict::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, SafetyVerdict::Allow)
    }
}

/// Consulted by the File Processor before a batch and around each file
/// change within it.
///
/// Both methods default to allowing everything, so implementers only need
/// to override the check they care about.
pub trait SafetyDelegate: Send + Sync {
    /// Called once per batch, before any file is touched, with every file
    /// the walk discovered (including files that failed to stat).
    fn validate_batch(&self, _scope: &FileScope, _files: &[WalkResult]) -> SafetyVerdict {
        SafetyVerdict::Allow
    }

    /// Called per file, only when the provider reported at least one
    /// match, with the confidence the provider assigned the change.
    fn validate_file_change(&self, _file: &WalkResult, _confidence: &ConfidenceScore) -> SafetyVerdict {
        SafetyVerdict::Allow
    }
}

/// Allows every operation unconditionally. Used when no delegate is
/// supplied.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSafetyDelegate;

impl SafetyDelegate for NoopSafetyDelegate {}

/// A configurable test double: denies a batch larger than `max_batch_files`
/// and denies individual file changes below `min_confidence`. Exercises the
/// delegate seam in integration tests without requiring a real policy
/// implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigurableSafetyDelegate {
    max_batch_files: Option<usize>,
    min_confidence: Option<f64>,
}

impl ConfigurableSafetyDelegate {
    /// A delegate with no limits configured (equivalent to
    /// [`NoopSafetyDelegate`], but as the configurable type for tests that
    /// want to toggle limits later).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Denies any batch containing more than `max` files.
    #[must_use]
    pub fn with_max_batch_files(mut self, max: usize) -> Self {
        self.max_batch_files = Some(max);
        self
    }

    /// Denies any file change whose confidence score is below `min`.
    #[must_use]
    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = Some(min);
        self
    }
}

impl SafetyDelegate for ConfigurableSafetyDelegate {
    fn validate_batch(&self, _scope: &FileScope, files: &[WalkResult]) -> SafetyVerdict {
        match self.max_batch_files {
            Some(max) if files.len() > max => SafetyVerdict::Deny(format!(
                "batch of {} files exceeds configured maximum of {max}",
                files.len()
            )),
            _ => SafetyVerdict::Allow,
        }
    }

    fn validate_file_change(&self, file: &WalkResult, confidence: &ConfidenceScore) -> SafetyVerdict {
        match self.min_confidence {
            Some(min) if confidence.score() < min => SafetyVerdict::Deny(format!(
                "{} scored {:.2}, below configured minimum confidence {min:.2}",
                file.path.display(),
                confidence.score()
            )),
            _ => SafetyVerdict::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn walk_result(path: &str) -> WalkResult {
        WalkResult {
            path: PathBuf::from(path),
            info: None,
            language: "rust".to_string(),
            error: None,
        }
    }

    #[test]
    fn noop_allows_everything() {
        let delegate = NoopSafetyDelegate;
        let scope = FileScope::new(".");
        let files = vec![walk_result("f.rs")];
        assert!(delegate.validate_batch(&scope, &files).is_allowed());
        assert!(
            delegate
                .validate_file_change(&files[0], &ConfidenceScore::zero())
                .is_allowed()
        );
    }

    #[test]
    fn configurable_denies_oversized_batch() {
        let delegate = ConfigurableSafetyDelegate::new().with_max_batch_files(1);
        let scope = FileScope::new(".");
        let files = vec![walk_result("a.rs"), walk_result("b.rs")];
        let verdict = delegate.validate_batch(&scope, &files);
        assert!(!verdict.is_allowed());
    }

    #[test]
    fn configurable_denies_low_confidence_change() {
        let delegate = ConfigurableSafetyDelegate::new().with_min_confidence(0.9);
        let file = walk_result("f.rs");
        let low = ConfidenceScore::new(0.5, Vec::new());
        let verdict = delegate.validate_file_change(&file, &low);
        match verdict {
            SafetyVerdict::Deny(reason) => assert!(reason.contains("below configured minimum")),
            SafetyVerdict::Allow => panic!("expected deny"),
        }
    }
}
