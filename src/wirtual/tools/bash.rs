//! Bash command execution tool.
//!
//! Each invocation runs `/bin/bash -c <command>` in a fresh process with a timeout.
//! Stdout becomes the result output, stderr the error; both are kept when the command
//! writes to both.
//!
//! ```rust,no_run
//! use wirtual::tools::{BashTool, Tool};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bash = BashTool::new().with_timeout(10);
//! let result = bash.call(serde_json::json!({"command": "echo hi"})).await?;
//! assert_eq!(result.output.as_deref(), Some("hi"));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::wirtual::message::ToolResult;
use crate::wirtual::tools::{optional_str, Tool, ToolError};

const SHELL_PATH: &str = "/bin/bash";

/// Default per-command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Runs shell commands on behalf of the model.
#[derive(Clone, Debug)]
pub struct BashTool {
    timeout_secs: u64,
    env_vars: HashMap<String, String>,
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

impl BashTool {
    pub fn new() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            env_vars: HashMap::new(),
        }
    }

    /// Set the per-command timeout in seconds.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Add or override an environment variable for executed commands.
    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    /// Execute `cmd` and translate its output into a [`ToolResult`].
    pub async fn execute(&self, cmd: &str) -> Result<ToolResult, ToolError> {
        let start = Instant::now();
        let child = Command::new(SHELL_PATH)
            .arg("-c")
            .arg(cmd)
            .envs(&self.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let timeout = Duration::from_secs(self.timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(ToolError::Timeout(format!(
                    "bash has not returned in {} seconds and must be restarted",
                    self.timeout_secs
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout)
            .trim_end_matches('\n')
            .to_string();
        let stderr = String::from_utf8_lossy(&output.stderr)
            .trim_end_matches('\n')
            .to_string();
        log::debug!(
            "bash exited with {:?} after {} ms",
            output.status.code(),
            start.elapsed().as_millis()
        );

        let mut result = ToolResult::default();
        if !stdout.is_empty() {
            result.output = Some(stdout);
        }
        if !stderr.is_empty() {
            result.error = Some(stderr);
        }
        if result.output.is_none() && result.error.is_none() && !output.status.success() {
            result.error = Some(format!(
                "command exited with status {}",
                output.status.code().unwrap_or(-1)
            ));
        }
        Ok(result)
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &'static str {
        "bash"
    }

    fn to_params(&self) -> Value {
        json!({"type": "bash_20241022", "name": "bash"})
    }

    async fn call(&self, input: Value) -> Result<ToolResult, ToolError> {
        let restart = input
            .get("restart")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if restart {
            return Ok(ToolResult::default().with_system("tool has been restarted."));
        }

        match optional_str(&input, "command") {
            Some(cmd) => self.execute(cmd).await,
            None => Err(ToolError::InvalidInput("no command provided.".to_string())),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stdout_and_stderr_are_split() {
        let bash = BashTool::new();
        let result = bash
            .call(json!({"command": "echo out; echo err >&2"}))
            .await
            .unwrap();
        assert_eq!(result.output.as_deref(), Some("out"));
        assert_eq!(result.error.as_deref(), Some("err"));
    }

    #[tokio::test]
    async fn test_silent_failure_reports_status() {
        let result = BashTool::new().execute("exit 3").await.unwrap();
        assert_eq!(result.error.as_deref(), Some("command exited with status 3"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let bash = BashTool::new().with_timeout(1);
        let err = bash.execute("sleep 5").await.unwrap_err();
        assert!(matches!(err, ToolError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_env_vars_and_restart() {
        let bash = BashTool::new().with_env_var("WIRTUAL_TEST_VAR", "42");
        let result = bash.execute("echo $WIRTUAL_TEST_VAR").await.unwrap();
        assert_eq!(result.output.as_deref(), Some("42"));

        let result = bash.call(json!({"restart": true})).await.unwrap();
        assert_eq!(result.system.as_deref(), Some("tool has been restarted."));

        assert!(bash.call(json!({})).await.is_err());
    }
}
