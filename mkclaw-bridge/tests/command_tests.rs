// ABOUTME: Tests for the one-shot command path against fake CLI scripts.
// ABOUTME: Non-zero exits, non-JSON output, timeouts and missing binaries never surface as errors.
#![cfg(unix)]

mod common;

use mkclaw_bridge::{BridgeConfig, CommandResult, MisskeyCli, PostOptions};
use serde_json::json;
use serial_test::serial;
use tempfile::TempDir;

fn cli_with_script(dir: &TempDir, body: &str) -> MisskeyCli {
    let path = common::write_script(dir.path(), "what", body);
    MisskeyCli::with_binary(path.to_string_lossy().to_string())
}

#[tokio::test]
#[serial]
async fn test_json_output_is_parsed() {
    let dir = TempDir::new().unwrap();
    let cli = cli_with_script(&dir, r#"echo '{"id":"9x","username":"bot"}'"#);

    let result = cli.who_am_i().await;
    assert_eq!(result, CommandResult::Json(json!({"id": "9x", "username": "bot"})));
}

#[tokio::test]
#[serial]
async fn test_non_json_output_is_raw() {
    let dir = TempDir::new().unwrap();
    let cli = cli_with_script(&dir, "echo 'Posted note 9x'");

    let result = cli.post("hello", &PostOptions::default()).await;
    assert_eq!(result, CommandResult::Raw("Posted note 9x\n".to_string()));
    assert!(!result.is_error());
}

#[tokio::test]
#[serial]
async fn test_non_zero_exit_is_error_result() {
    let dir = TempDir::new().unwrap();
    let cli = cli_with_script(&dir, "echo 'token expired' >&2\nexit 2");

    let result = cli.fetch_notifications(10).await;
    match result {
        CommandResult::Error(message) => {
            assert!(message.contains("exit code 2"), "{}", message);
            assert!(message.contains("token expired"), "{}", message);
        }
        other => panic!("expected error result, got {:?}", other),
    }
}

#[tokio::test]
#[serial]
async fn test_timeout_is_error_result() {
    let dir = TempDir::new().unwrap();
    let path = common::write_script(dir.path(), "what", "sleep 5");
    let cli = MisskeyCli::new(BridgeConfig {
        binary: path.to_string_lossy().to_string(),
        command_timeout_secs: 1,
    });

    let started = std::time::Instant::now();
    let result = cli.who_am_i().await;
    assert!(matches!(result, CommandResult::Error(ref m) if m.contains("timed out")));
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
}

#[tokio::test]
async fn test_missing_binary_is_error_result() {
    let cli = MisskeyCli::with_binary("/nonexistent/dir/what");
    assert!(!cli.is_available());

    let result = cli.who_am_i().await;
    assert_eq!(
        result,
        CommandResult::Error("CLI binary '/nonexistent/dir/what' not found".to_string())
    );
}

#[tokio::test]
#[serial]
async fn test_argv_reaches_the_binary() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("argv.log");
    let cli = cli_with_script(
        &dir,
        &format!(
            "for a in \"$@\"; do echo \"$a\" >> '{}'; done\necho '{{}}'",
            log.display()
        ),
    );

    let opts = PostOptions {
        cw: Some("spoiler".to_string()),
        ..Default::default()
    };
    cli.post("hello world", &opts).await;

    let recorded = std::fs::read_to_string(&log).unwrap();
    let lines: Vec<&str> = recorded.lines().collect();
    assert_eq!(lines, vec!["post", "hello world", "--cw", "spoiler"]);
}

#[tokio::test]
async fn test_required_fields_checked_before_spawning() {
    let cli = MisskeyCli::with_binary("/nonexistent/dir/what");

    let result = cli.post("   ", &PostOptions::default()).await;
    assert_eq!(result, CommandResult::Error("text is required".to_string()));

    let result = cli.react("n1", "").await;
    assert_eq!(result, CommandResult::Error("reaction is required".to_string()));
}
