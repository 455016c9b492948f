//! Tests that drive the `crag` binary for commands that need no
//! embedding or language model credentials.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/crag.sqlite"

[retrieval]
max_results = 3

[server]
bind = "127.0.0.1:8011"
"#,
        root.display()
    );
    let config_path = config_dir.join("crag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_crag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_crag"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run crag");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_crag(&config, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized"));
    assert!(tmp.path().join("data/crag.sqlite").exists());

    let (_, stderr, ok) = run_crag(&config, &["init"]);
    assert!(ok, "second init failed: {}", stderr);
}

#[test]
fn test_stats_on_empty_index() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_crag(&config, &["stats"]);
    assert!(ok, "stats failed: {}", stderr);
    assert!(stdout.contains("Courses:     0"));
    assert!(stdout.contains("Chunks:      0"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (tmp, _config) = setup_test_env();
    let bad = tmp.path().join("config/bad.toml");
    fs::write(
        &bad,
        format!(
            "[db]\npath = \"{}/x.sqlite\"\n\n[retrieval]\nmax_results = 0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, ok) = run_crag(&bad, &["stats"]);
    assert!(!ok);
    assert!(stderr.contains("max_results"), "stderr: {}", stderr);
}

#[test]
fn test_ask_has_no_session_flag() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, ok) = run_crag(&config, &["ask", "--session", "s1", "hello"]);
    assert!(!ok);
    assert!(stderr.contains("--session"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_crag(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!ok);
    assert!(stderr.contains("failed to read config file"));
}
