//! Black-box tests for properties not already exercised by the per-module
//! `#[cfg(test)]` suites: atomicity of concurrent reads against a writer,
//! and monotonicity of batch confidence aggregation.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use codeloom_core::confidence::{self, ConfidenceScore};
use codeloom_core::processor::FileTransformDetail;
use codeloom_core::writer::{AtomicWriter, WriterConfig};
use tempfile::TempDir;

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
fn concurrent_reads_never_observe_a_torn_write() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("target.txt");
    let writer = Arc::new(AtomicWriter::new(WriterConfig {
        backup_original: false,
        ..WriterConfig::default()
    }));

    let a = "a".repeat(1 << 16);
    let b = "b".repeat(1 << 16);
    fs::write(&path, &a).expect("seed file");

    let writer_handle = Arc::clone(&writer);
    let write_path = path.clone();
    let writer_thread = thread::spawn(move || {
        for _ in 0..20 {
            writer_handle.write_file(&write_path, &a).expect("write a");
            writer_handle.write_file(&write_path, &b).expect("write b");
        }
    });

    let mut readers = Vec::new();
    for _ in 0..4 {
        let read_path = path.clone();
        readers.push(thread::spawn(move || {
            for _ in 0..200 {
                if let Ok(content) = fs::read_to_string(&read_path) {
                    let is_a = content.chars().all(|c| c == 'a') && content.len() == 1 << 16;
                    let is_b = content.chars().all(|c| c == 'b') && content.len() == 1 << 16;
                    assert!(
                        is_a || is_b,
                        "observed a torn write: {} bytes, mixed content",
                        content.len()
                    );
                }
                thread::yield_now();
            }
        }));
    }

    for reader in readers {
        reader.join().expect("reader thread panicked");
    }
    writer_thread.join().expect("writer thread panicked");
}

#[test]
fn adding_a_high_confidence_file_never_decreases_the_batch_score() {
    let base = vec![detail(true, None, 0.9), detail(true, None, 0.85)];
    let before = confidence::aggregate(&base);

    let mut extended = base;
    extended.push(detail(true, None, 0.99));
    let after = confidence::aggregate(&extended);

    assert!(after.score() >= before.score());
}

#[test]
fn adding_an_error_never_increases_the_batch_score() {
    let base = vec![detail(true, None, 0.9), detail(true, None, 0.85)];
    let before = confidence::aggregate(&base);

    let mut extended = base;
    extended.push(detail(false, Some("boom"), 0.0));
    let after = confidence::aggregate(&extended);

    assert!(after.score() <= before.score());
}

#[test]
fn lock_timeout_is_bounded_by_configured_duration() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("f.txt");
    let lock_path = dir.path().join("f.txt.lock");
    fs::write(&lock_path, format!("{}\n", std::process::id())).expect("seed live lock");

    let writer = AtomicWriter::new(WriterConfig {
        lock_timeout: Duration::from_millis(50),
        ..WriterConfig::default()
    });

    let started = std::time::Instant::now();
    let err = writer.write_file(&path, "hello").expect_err("lock is held by a live pid");
    assert!(started.elapsed() <= Duration::from_millis(200));
    assert!(matches!(
        err,
        codeloom_core::writer::WriteError::LockTimeout { .. }
    ));
    assert!(!path.exists());
}
