//! Confidence scoring and batch aggregation.
//!
//! [`ConfidenceScore`] is the shared currency providers report per-file and
//! the File Processor (C6) aggregates per-batch via [`aggregate`] (C7).

use crate::processor::FileTransformDetail;

/// Qualitative bucket a [`ConfidenceScore`] falls into.
///
/// Thresholds are fixed: `>= 0.8` is `High`, `>= 0.5` is `Medium`, anything
/// else is `Low`. [`ConfidenceScore::new`] is the only constructor, so a
/// `ConfidenceScore`'s `level` is always consistent with its `score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceLevel {
    /// Score in `[0.8, 1.0]`.
    High,
    /// Score in `[0.5, 0.8)`.
    Medium,
    /// Score in `[0.0, 0.5)`.
    Low,
}

fn level_for(score: f64) -> ConfidenceLevel {
    if score >= 0.8 {
        ConfidenceLevel::High
    } else if score >= 0.5 {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

/// A single named contribution to a [`ConfidenceScore`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceFactor {
    name: String,
    impact: f64,
    reason: String,
}

impl ConfidenceFactor {
    /// Builds a new factor. `impact` is clamped to `[-1.0, 1.0]`.
    #[must_use]
    pub fn new(name: impl Into<String>, impact: f64, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            impact: impact.clamp(-1.0, 1.0),
            reason: reason.into(),
        }
    }

    /// Short, machine-stable name of the factor (e.g. `"file_errors"`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signed contribution this factor made to the score, in `[-1.0, 1.0]`.
    #[must_use]
    pub fn impact(&self) -> f64 {
        self.impact
    }

    /// Human-readable explanation of why this factor applied.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A confidence value in `[0, 1]` with an explanatory factor trail.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceScore {
    score: f64,
    level: ConfidenceLevel,
    factors: Vec<ConfidenceFactor>,
}

impl ConfidenceScore {
    /// Builds a score, clamping to `[0, 1]` and deriving `level` from the
    /// clamped value so the two can never disagree.
    #[must_use]
    pub fn new(score: f64, factors: Vec<ConfidenceFactor>) -> Self {
        let clamped = score.clamp(0.0, 1.0);
        Self {
            score: clamped,
            level: level_for(clamped),
            factors,
        }
    }

    /// A score of exactly zero with no factors, used as the default for
    /// providers that never report confidence explicitly and for empty
    /// batches.
    #[must_use]
    pub fn zero() -> Self {
        Self::new(0.0, Vec::new())
    }

    /// The clamped score in `[0, 1]`.
    #[must_use]
    pub fn score(&self) -> f64 {
        self.score
    }

    /// The qualitative bucket, always consistent with [`Self::score`].
    #[must_use]
    pub fn level(&self) -> ConfidenceLevel {
        self.level
    }

    /// The ordered factors that produced this score.
    #[must_use]
    pub fn factors(&self) -> &[ConfidenceFactor] {
        &self.factors
    }
}

const LARGE_BATCH_THRESHOLD: usize = 10;

/// Aggregates per-file confidence into a single batch [`ConfidenceScore`],
/// per spec §4.7's exact algorithm.
#[must_use]
pub fn aggregate(details: &[FileTransformDetail]) -> ConfidenceScore {
    if details.is_empty() {
        return ConfidenceScore::zero();
    }

    let modified_ok: Vec<&FileTransformDetail> = details
        .iter()
        .filter(|d| d.modified && d.error.is_none())
        .collect();

    if modified_ok.is_empty() {
        return ConfidenceScore::zero();
    }

    let average: f64 = modified_ok
        .iter()
        .map(|d| d.confidence.score())
        .sum::<f64>()
        / modified_ok.len() as f64;

    let mut factors = Vec::new();
    let mut score = average;

    let any_error = details.iter().any(|d| d.error.is_some());
    if any_error {
        score -= 0.2;
        factors.push(ConfidenceFactor::new(
            "file_errors",
            -0.2,
            "One or more files failed during transformation",
        ));
    }

    let any_low_confidence = modified_ok.iter().any(|d| d.confidence.score() < 0.7);
    if any_low_confidence {
        score -= 0.1;
        factors.push(ConfidenceFactor::new(
            "low_confidence_files",
            -0.1,
            "At least one modified file scored below 0.7 confidence",
        ));
    }

    if modified_ok.len() > LARGE_BATCH_THRESHOLD {
        score -= 0.1;
        factors.push(ConfidenceFactor::new(
            "batch_operation",
            -0.1,
            format!("Large batch operation ({} files)", modified_ok.len()),
        ));
    }

    ConfidenceScore::new(score, factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn detail(modified: bool, error: Option<&str>, confidence: f64) -> FileTransformDetail {
        FileTransformDetail {
            path: PathBuf::from("f.rs"),
            language: "rust".to_string(),
            modified,
            match_count: usize::from(modified),
            original_size: 10,
            modified_size: if modified { 12 } else { 0 },
            backup_path: None,
            diff: None,
            error: error.map(str::to_string),
            confidence: ConfidenceScore::new(confidence, Vec::new()),
        }
    }

    #[test]
    fn empty_batch_is_zero() {
        let score = aggregate(&[]);
        assert_eq!(score.score(), 0.0);
        assert_eq!(score.level(), ConfidenceLevel::Low);
    }

    #[test]
    fn no_successful_modifications_is_zero() {
        let details = vec![detail(false, None, 0.0), detail(false, Some("err"), 0.0)];
        let score = aggregate(&details);
        assert_eq!(score.score(), 0.0);
    }

    #[test]
    fn averages_successful_modifications() {
        let details = vec![detail(true, None, 0.9), detail(true, None, 0.7)];
        let score = aggregate(&details);
        assert!((score.score() - 0.8).abs() < 1e-9);
        assert_eq!(score.level(), ConfidenceLevel::High);
    }

    #[test]
    fn error_anywhere_applies_penalty() {
        let details = vec![detail(true, None, 0.9), detail(false, Some("boom"), 0.0)];
        let score = aggregate(&details);
        assert!((score.score() - 0.7).abs() < 1e-9);
        assert!(score.factors().iter().any(|f| f.name() == "file_errors"));
    }

    #[test]
    fn low_confidence_file_applies_penalty() {
        let details = vec![detail(true, None, 0.6)];
        let score = aggregate(&details);
        assert!((score.score() - 0.5).abs() < 1e-9);
        assert!(
            score
                .factors()
                .iter()
                .any(|f| f.name() == "low_confidence_files")
        );
    }

    #[test]
    fn large_batch_applies_penalty() {
        let details: Vec<_> = (0..11).map(|_| detail(true, None, 0.9)).collect();
        let score = aggregate(&details);
        assert!((score.score() - 0.8).abs() < 1e-9);
        assert!(
            score
                .factors()
                .iter()
                .any(|f| f.name() == "batch_operation")
        );
    }

    #[test]
    fn score_and_level_never_disagree_for_boundary_values() {
        assert_eq!(ConfidenceScore::new(0.8, vec![]).level(), ConfidenceLevel::High);
        assert_eq!(ConfidenceScore::new(0.7999, vec![]).level(), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceScore::new(0.5, vec![]).level(), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceScore::new(0.4999, vec![]).level(), ConfidenceLevel::Low);
    }

    #[test]
    fn clamps_out_of_range_scores() {
        assert_eq!(ConfidenceScore::new(1.5, vec![]).score(), 1.0);
        assert_eq!(ConfidenceScore::new(-0.5, vec![]).score(), 0.0);
    }
}
