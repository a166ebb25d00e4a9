// ABOUTME: Shared helpers for bridge integration tests.
// ABOUTME: Writes fake `what` shell scripts and waits on subscriber channels with a deadline.

#![allow(dead_code)]

use mkclaw_bridge::{BridgeEvent, EventReceiver};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Write an executable `/bin/sh` script named `name` into `dir`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    let mut perms = std::fs::metadata(&path).expect("stat script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// Next event, failing the test if none arrives within five seconds
pub async fn next_event(rx: &mut EventReceiver) -> BridgeEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for bridge event")
        .expect("event hub closed")
}

/// Collect events until `stop` matches one (inclusive)
pub async fn collect_until<F>(rx: &mut EventReceiver, stop: F) -> Vec<BridgeEvent>
where
    F: Fn(&BridgeEvent) -> bool,
{
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = stop(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}
