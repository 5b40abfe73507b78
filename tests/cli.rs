//! End-to-end CLI tests. These only exercise paths that never shell out to
//! an external tool (plain text, unsupported, and noise files) since the
//! compiled binary always uses the real `pdftotext`/`tesseract`/etc. adapters
//! and this suite can't assume those are installed.

use std::{fs, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("process_run").unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_process_plain_text_file() {
    let tmp = tempfile::TempDir::new().unwrap();
    let run_dir = tmp.path().join("run");
    let output_dir = tmp.path().join("out");
    fs::create_dir_all(&run_dir).unwrap();
    fs::write(run_dir.join("one.txt"), "Hello World").unwrap();
    let log_path = tmp.path().join("run.log");

    cmd()
        .arg(&run_dir)
        .arg(&output_dir)
        .arg(&log_path)
        .assert()
        .success();

    // The lone processable input names the catalog after its own stem.
    let catalog = fs::read_to_string(output_dir.join("one.csv")).unwrap();
    assert!(catalog.contains("\"txt\""));
    assert!(catalog.contains("\"OK\""));
    assert!(catalog.contains("\"1.00\""));

    let txt = fs::read_to_string(output_dir.join("txt").join("one.txt")).unwrap();
    assert!(txt.starts_with("# original_file:"));
    assert!(txt.contains("=== [PAGE 1] ==="));
    assert!(txt.contains("Hello World"));

    // Source is deleted on success.
    assert!(!run_dir.join("one.txt").exists());
}

#[test]
fn test_unsupported_file_is_quarantined() {
    let tmp = tempfile::TempDir::new().unwrap();
    let run_dir = tmp.path().join("run");
    let output_dir = tmp.path().join("out");
    fs::create_dir_all(&run_dir).unwrap();
    fs::write(run_dir.join("d.xlsx"), b"not really an xlsx").unwrap();
    let log_path = tmp.path().join("run.log");

    cmd()
        .arg(&run_dir)
        .arg(&output_dir)
        .arg(&log_path)
        .assert()
        .success();

    let manifest = fs::read_to_string(output_dir.join("review_manifest.csv")).unwrap();
    assert!(manifest.contains("d.xlsx"));
    assert!(manifest.contains("unsupported"));

    assert!(output_dir.join("Mandatory Review").join("d.xlsx").exists());
    assert!(!run_dir.join("d.xlsx").exists());
}

#[test]
fn test_noise_file_is_deleted_without_a_catalog_row() {
    let tmp = tempfile::TempDir::new().unwrap();
    let run_dir = tmp.path().join("run");
    let output_dir = tmp.path().join("out");
    fs::create_dir_all(&run_dir).unwrap();
    fs::write(run_dir.join("noise.wav"), b"RIFF....").unwrap();
    fs::write(run_dir.join("keep.txt"), "Some real text content here").unwrap();
    let log_path = tmp.path().join("run.log");

    cmd()
        .arg(&run_dir)
        .arg(&output_dir)
        .arg(&log_path)
        .assert()
        .success();

    assert!(!run_dir.join("noise.wav").exists());
    assert!(!output_dir.join("Mandatory Review").join("noise.wav").exists());

    let catalog = fs::read_to_string(output_dir.join("keep.csv")).unwrap();
    assert_eq!(catalog.lines().count(), 2, "one header line + one data row");
}

#[test]
fn test_multi_file_run_uses_run_name_for_catalog() {
    let tmp = tempfile::TempDir::new().unwrap();
    let run_dir = tmp.path().join("some_run");
    let output_dir = tmp.path().join("out");
    fs::create_dir_all(&run_dir).unwrap();
    fs::write(run_dir.join("a.txt"), "First document body").unwrap();
    fs::write(run_dir.join("b.txt"), "Second document body").unwrap();
    let log_path = tmp.path().join("run.log");

    cmd()
        .arg(&run_dir)
        .arg(&output_dir)
        .arg(&log_path)
        .assert()
        .success();

    assert!(output_dir.join("some_run.csv").exists());
    let combined = fs::read_to_string(output_dir.join("some_run_all_text_001.txt")).unwrap();
    assert!(combined.contains("First document body"));
    assert!(combined.contains("Second document body"));
    assert!(combined.contains("----- DOCUMENT BREAK -----"));
}

#[test]
fn test_missing_run_dir_fails() {
    let tmp = tempfile::TempDir::new().unwrap();
    cmd()
        .arg(tmp.path().join("does-not-exist"))
        .arg(tmp.path().join("out"))
        .arg(tmp.path().join("run.log"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}
