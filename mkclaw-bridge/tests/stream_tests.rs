// ABOUTME: Integration tests for the `what stream` supervisor using fake CLI scripts.
// ABOUTME: Covers start/stop lifecycle, event forwarding, bad output, exit reporting and reconnect backoff.
#![cfg(unix)]

mod common;

use mkclaw_bridge::{
    BridgeEvent, EventFilter, EventKind, MisskeyCli, ReconnectPolicy, StreamOptions,
};
use serial_test::serial;
use std::time::Duration;
use tempfile::TempDir;

fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        multiplier: 2,
        max_attempts,
    }
}

fn cli_with_script(dir: &TempDir, body: &str) -> MisskeyCli {
    let path = common::write_script(dir.path(), "what", body);
    MisskeyCli::with_binary(path.to_string_lossy().to_string())
}

#[tokio::test]
async fn test_start_without_binary_fails_with_error_event() {
    let cli = MisskeyCli::with_binary("/nonexistent/dir/what");
    let mut lifecycle = cli.subscribe(EventFilter::Lifecycle);

    assert!(!cli.start_stream(StreamOptions::default()));
    assert!(!cli.is_running());

    match common::next_event(&mut lifecycle).await {
        BridgeEvent::Error(message) => assert!(message.contains("not found"), "{}", message),
        other => panic!("expected error event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stop_without_stream_is_noop() {
    let cli = MisskeyCli::with_binary("/nonexistent/dir/what");
    cli.stop_stream();
    cli.stop_stream();
    assert!(!cli.is_running());
}

#[tokio::test]
#[serial]
async fn test_stream_lines_stderr_and_exit_are_forwarded() {
    let dir = TempDir::new().unwrap();
    let cli = cli_with_script(
        &dir,
        r#"echo '{"ts":"2024-05-01T12:00:00.000+0900","event":"connected","data":{}}'
echo 'this is not json'
echo 'token refresh soon' >&2
echo '{"event":"mention","data":{"note":{"id":"n2","text":"@bot hi","user":{"id":"u1","username":"alice"}}}}'
exit 3"#,
    );
    let mut stream = cli.subscribe(EventFilter::AnyStream);
    let mut mentions = cli.subscribe(EventFilter::Kind(EventKind::Mention));
    let mut lifecycle = cli.subscribe(EventFilter::Lifecycle);

    assert!(cli.start_stream(StreamOptions::default()));

    let first = common::next_event(&mut stream).await;
    assert_eq!(first.stream_kind(), Some(&EventKind::Connected));
    let second = common::next_event(&mut stream).await;
    assert_eq!(second.stream_kind(), Some(&EventKind::Mention));
    assert_eq!(common::next_event(&mut mentions).await, second);

    let events = common::collect_until(&mut lifecycle, |e| matches!(e, BridgeEvent::Exit(_))).await;
    assert_eq!(
        events,
        vec![
            BridgeEvent::Stderr("token refresh soon\n".to_string()),
            BridgeEvent::Exit(Some(3)),
        ]
    );
    assert!(!cli.is_running());
    assert!(stream.try_recv().is_none());
}

#[tokio::test]
#[serial]
async fn test_second_start_is_rejected() {
    let dir = TempDir::new().unwrap();
    let cli = cli_with_script(&dir, "exec sleep 30");
    let mut lifecycle = cli.subscribe(EventFilter::Lifecycle);

    assert!(cli.start_stream(StreamOptions::default()));
    assert!(!cli.start_stream(StreamOptions::default()));
    assert_eq!(
        common::next_event(&mut lifecycle).await,
        BridgeEvent::Error("stream is already running".to_string())
    );
    assert!(cli.is_running());

    cli.stop_stream();
    assert!(!cli.is_running());
}

#[tokio::test]
#[serial]
async fn test_stop_is_idempotent_and_allows_restart() {
    let dir = TempDir::new().unwrap();
    let cli = cli_with_script(
        &dir,
        r#"echo '{"event":"connected","data":{}}'
exec sleep 30"#,
    );
    let mut stream = cli.subscribe(EventFilter::AnyStream);

    assert!(cli.start_stream(StreamOptions::default()));
    common::next_event(&mut stream).await;

    cli.stop_stream();
    cli.stop_stream();
    assert!(!cli.is_running());

    assert!(cli.start_stream(StreamOptions::default()));
    let event = common::next_event(&mut stream).await;
    assert_eq!(event.stream_kind(), Some(&EventKind::Connected));
    cli.stop_stream();
}

#[tokio::test]
#[serial]
async fn test_exit_triggers_reconnect_with_backoff() {
    let dir = TempDir::new().unwrap();
    let cli = cli_with_script(&dir, "exit 1");
    let mut lifecycle = cli.subscribe(EventFilter::Lifecycle);

    assert!(cli.start_stream(StreamOptions::with_reconnect(fast_policy(0))));

    let events = common::collect_until(&mut lifecycle, |e| {
        matches!(e, BridgeEvent::Reconnecting { attempt: 2, .. })
    })
    .await;
    assert_eq!(
        events,
        vec![
            BridgeEvent::Exit(Some(1)),
            BridgeEvent::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(50)
            },
            BridgeEvent::Reconnected { attempt: 1 },
            BridgeEvent::Exit(Some(1)),
            BridgeEvent::Reconnecting {
                attempt: 2,
                delay: Duration::from_millis(100)
            },
        ]
    );
    assert!(cli.is_running());

    cli.stop_stream();
    assert!(!cli.is_running());
}

#[tokio::test]
#[serial]
async fn test_healthy_output_resets_backoff() {
    let dir = TempDir::new().unwrap();
    let cli = cli_with_script(
        &dir,
        r#"echo '{"event":"connected","data":{}}'
exit 1"#,
    );
    let mut lifecycle = cli.subscribe(EventFilter::Lifecycle);

    assert!(cli.start_stream(StreamOptions::with_reconnect(fast_policy(0))));

    let mut reconnecting = Vec::new();
    while reconnecting.len() < 3 {
        if let BridgeEvent::Reconnecting { attempt, delay } = common::next_event(&mut lifecycle).await {
            reconnecting.push((attempt, delay));
        }
    }
    cli.stop_stream();

    assert!(reconnecting
        .iter()
        .all(|(attempt, delay)| *attempt == 1 && *delay == Duration::from_millis(50)));
}

#[tokio::test]
#[serial]
async fn test_gives_up_after_max_attempts() {
    let dir = TempDir::new().unwrap();
    let cli = cli_with_script(&dir, "exit 1");
    let mut lifecycle = cli.subscribe(EventFilter::Lifecycle);

    assert!(cli.start_stream(StreamOptions::with_reconnect(fast_policy(2))));

    let events = common::collect_until(&mut lifecycle, |e| matches!(e, BridgeEvent::Error(_))).await;
    let reconnects = events
        .iter()
        .filter(|e| matches!(e, BridgeEvent::Reconnected { .. }))
        .count();
    assert_eq!(reconnects, 2);
    assert_eq!(
        events.last(),
        Some(&BridgeEvent::Error(
            "giving up on stream after 2 reconnect attempts".to_string()
        ))
    );
    assert!(!cli.is_running());
}

#[tokio::test]
#[serial]
async fn test_non_utf8_line_is_dropped_and_stream_continues() {
    let dir = TempDir::new().unwrap();
    let cli = cli_with_script(
        &dir,
        r#"printf '\377\376 garbage\n'
echo '{"event":"connected","data":{}}'
echo '{"event":"mention","data":{"note":{"id":"n1","text":"@bot hi","user":{"id":"u1","username":"alice"}}}}'
exit 0"#,
    );
    let mut stream = cli.subscribe(EventFilter::AnyStream);
    let mut lifecycle = cli.subscribe(EventFilter::Lifecycle);

    assert!(cli.start_stream(StreamOptions::default()));

    let first = common::next_event(&mut stream).await;
    assert_eq!(first.stream_kind(), Some(&EventKind::Connected));
    let second = common::next_event(&mut stream).await;
    assert_eq!(second.stream_kind(), Some(&EventKind::Mention));

    let events = common::collect_until(&mut lifecycle, |e| matches!(e, BridgeEvent::Exit(_))).await;
    assert_eq!(events.last(), Some(&BridgeEvent::Exit(Some(0))));
}

#[tokio::test]
#[serial]
async fn test_exit_reported_while_background_child_holds_stderr() {
    let dir = TempDir::new().unwrap();
    // the background sleep keeps the stderr pipe open after the script exits
    let cli = cli_with_script(&dir, "sleep 5 >/dev/null &\nexit 0");
    let mut lifecycle = cli.subscribe(EventFilter::Lifecycle);

    assert!(cli.start_stream(StreamOptions::default()));

    let events = common::collect_until(&mut lifecycle, |e| matches!(e, BridgeEvent::Exit(_))).await;
    assert_eq!(events.last(), Some(&BridgeEvent::Exit(Some(0))));
    assert!(!cli.is_running());
}

#[tokio::test]
#[serial]
async fn test_stop_sends_sigterm_first() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("terminated");
    let cli = cli_with_script(
        &dir,
        &format!(
            r#"trap 'echo term > "{}"; exit 0' TERM
echo '{{"event":"connected","data":{{}}}}'
while true; do sleep 0.1; done"#,
            marker.display()
        ),
    );
    let mut stream = cli.subscribe(EventFilter::AnyStream);

    assert!(cli.start_stream(StreamOptions::default()));
    common::next_event(&mut stream).await;

    cli.stop_stream();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while std::fs::read_to_string(&marker).unwrap_or_default().trim() != "term" {
        assert!(tokio::time::Instant::now() < deadline, "stream process never saw SIGTERM");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
