use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn digest_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("digest");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let export_dir = root.join("exports").join("acme");
    fs::create_dir_all(&export_dir).unwrap();
    fs::write(
        export_dir.join("messages.jsonl"),
        concat!(
            r#"{"id":"1","channel":"general","thread":"t1","timestamp":"2024-01-02T09:00:00Z","author":"ana","body":"The nightly build is red again."}"#,
            "\n",
            r#"{"id":"2","channel":"general","thread":"t1","timestamp":"2024-01-02T09:05:00Z","author":"bo","body":"Reverted the flaky test."}"#,
            "\n",
            r#"{"id":"3","channel":"general","timestamp":"2024-01-02T09:06:00Z","author":"ci","body":"build passed","kind":"webhook"}"#,
            "\n",
            r#"{"id":"4","channel":"random","timestamp":"2024-01-02T10:00:00Z","author":"cy","body":"not selected"}"#,
            "\n",
        ),
    )
    .unwrap();
    fs::write(
        export_dir.join("forum_posts.jsonl"),
        concat!(
            r#"{"post_id":"10","endpoint":"forum.acme.org","topic":"Install","author":"dee","body":"How do I install on ARM?","created_at":"2024-01-03T08:00:00Z","updated_at":"2024-01-03T08:00:00Z"}"#,
            "\n",
        ),
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/digest.sqlite"

[logging]
level = "warn"

[source]
root = "{root}/exports"

[[tenants]]
id = "acme"
[tenants.chat]
channels = ["general"]
from_date = "2024-01-01"
[[tenants.forums]]
endpoint = "forum.acme.org"
from_date = "2024-01-01"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("digest.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_digest(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = digest_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run digest binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_digest(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data").join("digest.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_digest(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_digest(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let (tmp, _) = setup_test_env();
    let (_, stderr, success) = run_digest(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr={}", stderr);
}

#[test]
fn test_invalid_config_fails() {
    let (_tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(&config_path, format!("{}\n[sync]\nconcurrency = 0\n", content)).unwrap();

    let (_, stderr, success) = run_digest(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("sync.concurrency"), "stderr={}", stderr);
}

#[test]
fn test_sync_messages_writes_conversational_records() {
    let (_tmp, config_path) = setup_test_env();
    run_digest(&config_path, &["init"]);

    let (stdout, stderr, success) = run_digest(&config_path, &["sync", "messages"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents 2"), "stdout={}", stdout);
    assert!(stdout.contains("1 tenant ok, 0 failed"));

    // Cursor moved past the newest stored message; only the webhook
    // record after it is fetched again, and it is still filtered out.
    let (stdout, _, success) = run_digest(&config_path, &["sync", "messages"]);
    assert!(success);
    assert!(stdout.contains("fetched 1"), "stdout={}", stdout);
    assert!(stdout.contains("documents 0"), "stdout={}", stdout);
}

#[test]
fn test_sync_summaries_with_disabled_summarizer_leaves_days_incomplete() {
    let (_tmp, config_path) = setup_test_env();
    run_digest(&config_path, &["init"]);

    let (stdout, stderr, success) = run_digest(&config_path, &["sync", "summaries"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("incomplete from 2024-01-0"), "stdout={}", stdout);

    let (stdout, _, success) = run_digest(&config_path, &["checkpoint", "acme", "--table", "summaries"]);
    assert!(success);
    assert!(stdout.contains("checkpoint:  none"), "stdout={}", stdout);
    assert!(stdout.contains("from date:   2024-01-01"), "stdout={}", stdout);
}

#[test]
fn test_sync_forums_then_checkpoint_shows_cursor() {
    let (_tmp, config_path) = setup_test_env();
    run_digest(&config_path, &["init"]);

    let (stdout, stderr, success) = run_digest(&config_path, &["sync", "forums"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("forum:forum.acme.org"));

    let (stdout, _, success) = run_digest(&config_path, &["checkpoint", "acme", "--table", "forum"]);
    assert!(success);
    assert!(stdout.contains("2024-01-03T08:00:00"), "stdout={}", stdout);
}

#[test]
fn test_unknown_tenant_fails_without_blocking_others() {
    let (_tmp, config_path) = setup_test_env();
    run_digest(&config_path, &["init"]);

    let (stdout, _, success) = run_digest(
        &config_path,
        &["sync", "messages", "--tenant", "ghost", "--tenant", "acme"],
    );
    assert!(!success, "unknown tenant should fail the command");
    assert!(stdout.contains("unknown tenant: 'ghost'"), "stdout={}", stdout);
    assert!(stdout.contains("1 tenant ok, 1 failed"), "stdout={}", stdout);

    let (stdout, _, success) = run_digest(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("messages"), "stdout={}", stdout);
}

#[test]
fn test_stats_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();
    run_digest(&config_path, &["init"]);

    let (stdout, stderr, success) = run_digest(&config_path, &["stats"]);
    assert!(success, "stats failed: stderr={}", stderr);
    assert!(stdout.contains("No rows written yet"));
}

#[test]
fn test_completions_need_no_config() {
    let (tmp, _) = setup_test_env();
    let (stdout, _, success) = run_digest(&tmp.path().join("absent.toml"), &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("digest"));
}
