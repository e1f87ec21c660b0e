//! CLI test cases.
//!
//! Tests that need PaddleOCR model weights (or a `tesseract` install) are
//! `#[ignore]`d. Run them with `cargo test -- --ignored` after a first run has
//! downloaded the models, or with `PP_OCR_MODEL_DIR` pointing at a directory
//! that already holds them.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("pp-ocr").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Create a `Command` that uses real models, if configured.
fn cmd_with_models() -> Command {
    let mut cmd = cmd();
    if let Ok(dir) = std::env::var("PP_OCR_MODEL_DIR") {
        cmd.arg("--model-dir").arg(dir);
    }
    cmd
}

#[test]
fn test_help() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--no-angle-cls"))
        .stdout(predicate::str::contains("eric.kidd@elevate.law"));
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_missing_image_argument() {
    cmd().assert().failure().stdout(predicate::str::is_empty());
}

#[test]
fn test_unknown_language() {
    cmd()
        .args(["--lang", "klingon", "tests/fixtures/blank.png"])
        .assert()
        .failure();
}

#[test]
fn test_offline_without_models_fails_cleanly() {
    let model_dir = tempfile::tempdir().unwrap();
    cmd()
        .arg("--offline")
        .arg("--model-dir")
        .arg(model_dir.path())
        .arg("tests/fixtures/hello_world.png")
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("det.onnx"));
}

#[test]
fn test_offline_missing_models_are_reported_before_the_image_is_read() {
    let model_dir = tempfile::tempdir().unwrap();
    cmd()
        .arg("--offline")
        .arg("--model-dir")
        .arg(model_dir.path())
        .arg("/nonexistent/image.png")
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("det.onnx"))
        .stderr(predicate::str::contains("cannot read image").not());
}

#[test]
#[ignore = "Needs PaddleOCR models"]
fn test_nonexistent_path_with_models() {
    cmd_with_models()
        .arg("/nonexistent/image.png")
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("cannot read image"));
}

#[test]
#[ignore = "Needs PaddleOCR models"]
fn test_hello_world() {
    cmd_with_models()
        .arg("tests/fixtures/hello_world.png")
        .assert()
        .success()
        .stdout(predicate::str::contains("HELLO WORLD"));
}

#[test]
#[ignore = "Needs PaddleOCR models"]
fn test_blank_image_prints_nothing() {
    cmd_with_models()
        .arg("tests/fixtures/blank.png")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
#[ignore = "Needs PaddleOCR models"]
fn test_repeat_runs_are_identical() {
    let run = || {
        cmd_with_models()
            .arg("tests/fixtures/hello_world.png")
            .output()
            .unwrap()
    };
    let first = run();
    let second = run();
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
#[ignore = "Needs PaddleOCR models"]
fn test_json_matches_text() {
    let text = cmd_with_models()
        .arg("tests/fixtures/hello_world.png")
        .output()
        .unwrap();
    let json = cmd_with_models()
        .args(["--format", "json", "tests/fixtures/hello_world.png"])
        .output()
        .unwrap();
    assert!(text.status.success() && json.status.success());

    let parsed: Vec<Vec<serde_json::Value>> = serde_json::from_slice(&json.stdout).unwrap();
    let texts = parsed
        .iter()
        .flatten()
        .map(|d| format!("{}\n", d["text"].as_str().unwrap()))
        .collect::<String>();
    assert_eq!(texts, String::from_utf8(text.stdout).unwrap());
}

#[test]
#[ignore = "Needs PaddleOCR models"]
fn test_min_confidence_above_one_prints_nothing() {
    cmd_with_models()
        .args(["--min-confidence", "1.1", "tests/fixtures/hello_world.png"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
#[ignore = "Needs tesseract"]
fn test_tesseract_hello_world() {
    cmd()
        .args(["--engine", "tesseract", "tests/fixtures/hello_world.png"])
        .assert()
        .success()
        .stdout(predicate::str::contains("HELLO WORLD"));
}

#[test]
#[ignore = "Needs tesseract"]
fn test_tesseract_nonexistent_path() {
    cmd()
        .args(["--engine", "tesseract", "/nonexistent/image.png"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("no such file"));
}

#[test]
#[ignore = "Needs tesseract"]
fn test_tesseract_ignores_model_dir_settings() {
    // No cache directory can be found without HOME or XDG_CACHE_HOME.
    cmd()
        .env_remove("HOME")
        .env_remove("XDG_CACHE_HOME")
        .args(["--engine", "tesseract", "tests/fixtures/hello_world.png"])
        .assert()
        .success()
        .stdout(predicate::str::contains("HELLO WORLD"));
}
