// ABOUTME: One-shot CLI invocations with a bounded timeout and JSON result parsing.
// ABOUTME: Failures come back as CommandResult::Error values, never as Rust errors.

use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as ProcessCommand;

/// Default bound on a single command invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a CLI command
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    /// Stdout parsed as JSON
    Json(Value),
    /// Stdout that wasn't valid JSON
    Raw(String),
    /// Binary missing, spawn failure, non-zero exit, timeout, or bad arguments
    Error(String),
}

impl CommandResult {
    pub fn error(message: impl Into<String>) -> Self {
        CommandResult::Error(message.into())
    }

    /// Parse successful stdout
    pub fn from_stdout(stdout: &[u8]) -> Self {
        let text = String::from_utf8_lossy(stdout);
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => CommandResult::Json(value),
            Err(_) => CommandResult::Raw(text.into_owned()),
        }
    }

    /// True for invocation failures and for JSON objects the CLI tagged with `error`
    pub fn is_error(&self) -> bool {
        self.error_message().is_some()
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            CommandResult::Error(message) => Some(message),
            CommandResult::Json(Value::Object(map)) => map.get("error").map(|e| match e {
                Value::String(s) => s.as_str(),
                _ => "error",
            }),
            _ => None,
        }
    }

    /// JSON form handed to agents: the parsed value, `{"raw": ...}` or `{"error": ...}`
    pub fn to_value(&self) -> Value {
        match self {
            CommandResult::Json(value) => value.clone(),
            CommandResult::Raw(text) => json!({ "raw": text }),
            CommandResult::Error(message) => json!({ "error": message }),
        }
    }

    pub fn to_content(&self) -> String {
        self.to_value().to_string()
    }
}

/// Run `binary args...`, wait at most `timeout`, and classify the outcome.
/// A child that outlives the timeout is killed.
pub async fn run(binary: &str, args: &[String], timeout: Duration) -> CommandResult {
    let subcommand = args.first().map(String::as_str).unwrap_or("");
    tracing::debug!(binary = %binary, ?args, "running CLI command");

    let child = match ProcessCommand::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(binary = %binary, error = %e, "failed to spawn CLI command");
            return CommandResult::error(format!("failed to spawn '{}': {}", binary, e));
        }
    };

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return CommandResult::error(format!("'{} {}' failed: {}", binary, subcommand, e));
        }
        Err(_) => {
            tracing::warn!(binary = %binary, subcommand = %subcommand, "CLI command timed out");
            return CommandResult::error(format!(
                "'{} {}' timed out after {}s",
                binary,
                subcommand,
                timeout.as_secs()
            ));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr.trim();
        let status = match output.status.code() {
            Some(code) => format!("exit code {}", code),
            None => "a signal".to_string(),
        };
        tracing::warn!(
            binary = %binary,
            subcommand = %subcommand,
            status = %status,
            "CLI command failed"
        );
        return if detail.is_empty() {
            CommandResult::error(format!("'{} {}' terminated by {}", binary, subcommand, status))
        } else {
            CommandResult::error(format!(
                "'{} {}' terminated by {}: {}",
                binary, subcommand, status, detail
            ))
        };
    }

    CommandResult::from_stdout(&output.stdout)
}
