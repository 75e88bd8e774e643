//! Host-side process execution for proxbot
//!
//! Handles bounded execution of commands on the hypervisor host:
//! - One-shot shell commands (`console <cmd>`)
//! - Container namespace execution (`pct exec <id> -- bash -c <cmd>`)
//!
//! A command that exceeds its timeout is killed; the caller gets `ExecError::Timeout`.

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

/// Captured output of a finished process
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u128,
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs a program with arguments, bounded by a timeout
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, ExecError>;
}

/// `CommandRunner` spawning real processes with `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, ExecError> {
        let start_time = Instant::now();
        debug!("Executing {} {:?} (timeout: {:?})", program, args, timeout);

        // kill_on_drop reaps the child when the timeout drops the future
        let child = AsyncCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(result) => result.map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                warn!("{} killed after {:?}", program, timeout);
                return Err(ExecError::Timeout(timeout));
            }
        };

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }
}

/// Arguments for `bash -c <command>`
pub fn bash_args(command: &str) -> Vec<String> {
    vec!["-c".to_string(), command.to_string()]
}

/// Arguments for `pct exec <vmid> -- bash -c <command>`
pub fn pct_exec_args(vmid: u32, command: &str) -> Vec<String> {
    vec![
        "exec".to_string(),
        vmid.to_string(),
        "--".to_string(),
        "bash".to_string(),
        "-c".to_string(),
        command.to_string(),
    ]
}
