//! Shell commands inside guests and on the host.
//!
//! Every entry point returns a display string: failures, timeouts and
//! rejected input are rendered here and never propagate to the caller.

use crate::api::{ApiError, ControlPlane};
use crate::models::GuestKind;
use crate::safety;
use proxbot_host::execution::{bash_args, pct_exec_args};
use proxbot_host::{CommandRunner, ExecError, ExecOutput};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Longest output handed to the chat transport, in characters.
pub const OUTPUT_LIMIT: usize = 4000;
pub const TRUNCATION_MARKER: &str = "\n\n... (output truncated)";
pub const NO_OUTPUT: &str = "✅ Command executed (no output)";
pub const AGENT_UNAVAILABLE: &str =
    "❌ Error: the QEMU guest agent is not installed or not running in this VM.";

#[derive(Debug, Clone, Copy)]
pub struct ExecPolicy {
    pub timeout: Duration,
    pub agent_polls: u32,
    pub agent_poll_interval: Duration,
}

impl Default for ExecPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            agent_polls: 15,
            agent_poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct GuestCommandExecutor {
    api: Arc<dyn ControlPlane>,
    runner: Arc<dyn CommandRunner>,
    policy: ExecPolicy,
}

impl GuestCommandExecutor {
    pub fn new(api: Arc<dyn ControlPlane>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            api,
            runner,
            policy: ExecPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ExecPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run `command` inside a guest.
    pub async fn execute(&self, kind: GuestKind, id: u32, node: &str, command: &str) -> String {
        if let Err(e) = safety::screen(command) {
            warn!("Blocked command for {} {}: {:?} ({})", kind, id, command, e.reason);
            return format!("⛔ {e}");
        }
        info!("Executing in {} {} on {}: {:?}", kind, id, node, command);

        let output = match kind {
            GuestKind::Container => self.exec_container(id, command).await,
            GuestKind::Vm => {
                let exec = self.exec_vm(node, id, command);
                match tokio::time::timeout(self.policy.timeout, exec).await {
                    Ok(out) => out,
                    Err(_) => self.timeout_message(),
                }
            }
        };
        truncate_output(&output)
    }

    /// One-shot `bash -c` on the hypervisor host, stderr appended.
    pub async fn execute_host(&self, command: &str) -> String {
        if let Err(e) = safety::screen(command) {
            warn!("Blocked host command: {:?} ({})", command, e.reason);
            return format!("⛔ {e}");
        }
        info!("Executing on host: {:?}", command);

        let output = match self.runner.run("bash", &bash_args(command), self.policy.timeout).await {
            Ok(out) => {
                let mut text = out.stdout.trim_end().to_string();
                let stderr = out.stderr.trim();
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str("STDERR:\n");
                    text.push_str(stderr);
                }
                if text.trim().is_empty() {
                    NO_OUTPUT.to_string()
                } else {
                    text
                }
            }
            Err(ExecError::Timeout(_)) => self.timeout_message(),
            Err(e) => format!("❌ Command failed: {e}"),
        };
        truncate_output(&output)
    }

    async fn exec_container(&self, id: u32, command: &str) -> String {
        match self.runner.run("pct", &pct_exec_args(id, command), self.policy.timeout).await {
            Ok(out) => preferred_output(&out),
            Err(ExecError::Timeout(_)) => self.timeout_message(),
            Err(e) => format!("❌ pct exec failed: {e}"),
        }
    }

    async fn exec_vm(&self, node: &str, id: u32, command: &str) -> String {
        match self.run_agent(node, id, command).await {
            Ok(Some(text)) => text,
            Ok(None) => "⏳ Timed out waiting for the command to finish.".to_string(),
            Err(ApiError::AgentUnavailable) => AGENT_UNAVAILABLE.to_string(),
            Err(e) => format!("❌ Command failed: {e}"),
        }
    }

    /// `None` when the agent never reported completion.
    async fn run_agent(
        &self,
        node: &str,
        id: u32,
        command: &str,
    ) -> Result<Option<String>, ApiError> {
        let argv: Vec<String> = std::iter::once("bash".to_string())
            .chain(bash_args(command))
            .collect();
        let pid = self.api.agent_exec(node, id, &argv).await?;

        for _ in 0..self.policy.agent_polls {
            let status = self.api.agent_exec_status(node, id, pid).await?;
            if status.exited {
                let out = status.out_data.unwrap_or_default();
                let err = status.err_data.unwrap_or_default();
                return Ok(Some(pick(out.trim(), err.trim())));
            }
            tokio::time::sleep(self.policy.agent_poll_interval).await;
        }
        Ok(None)
    }

    fn timeout_message(&self) -> String {
        format!("⏳ Command timed out after {} seconds.", self.policy.timeout.as_secs())
    }
}

fn preferred_output(out: &ExecOutput) -> String {
    pick(out.stdout.trim(), out.stderr.trim())
}

fn pick(stdout: &str, stderr: &str) -> String {
    if !stdout.is_empty() {
        stdout.to_string()
    } else if !stderr.is_empty() {
        stderr.to_string()
    } else {
        NO_OUTPUT.to_string()
    }
}

/// Cut to [`OUTPUT_LIMIT`] characters and append the marker.
pub fn truncate_output(text: &str) -> String {
    match text.char_indices().nth(OUTPUT_LIMIT) {
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCluster, FakeRunner};
    use tokio::time::Instant;

    fn executor(
        cluster: FakeCluster,
        runner: FakeRunner) -> (GuestCommandExecutor, Arc<FakeRunner>,
    ) {
        let runner = Arc::new(runner);
        (GuestCommandExecutor::new(Arc::new(cluster), runner.clone()), runner)
    }

    #[test]
    fn test_truncation() {
        let long = "x".repeat(5000);
        let cut = truncate_output(&long);
        assert_eq!(cut.chars().count(), OUTPUT_LIMIT + TRUNCATION_MARKER.chars().count());
        assert!(cut.ends_with(TRUNCATION_MARKER));

        let exact = "y".repeat(OUTPUT_LIMIT);
        assert_eq!(truncate_output(&exact), exact);

        // multi-byte characters are counted, not bytes
        let cyrillic = "ж".repeat(4500);
        assert!(truncate_output(&cyrillic).starts_with(&"ж".repeat(OUTPUT_LIMIT)));
    }

    #[tokio::test]
    async fn test_container_output_preference() {
        let runner = FakeRunner::new()
            .respond("pct exec 101 -- bash -c hostname", "ct101\n", "")
            .respond("pct exec 101 -- bash -c missing", "", "bash: missing: command not found\n")
            .respond("pct exec 101 -- bash -c true", "", "");
        let (exec, runner) = executor(FakeCluster::new(), runner);

        assert_eq!(exec.execute(GuestKind::Container, 101, "pve", "hostname").await, "ct101");
        assert_eq!(
            exec.execute(GuestKind::Container, 101, "pve", "missing").await,
            "bash: missing: command not found"
        );
        assert_eq!(exec.execute(GuestKind::Container, 101, "pve", "true").await, NO_OUTPUT);
        assert_eq!(runner.invocations().len(), 3);
    }

    #[tokio::test]
    async fn test_container_timeout_and_spawn_failure() {
        let runner = FakeRunner::new()
            .time_out("pct exec 101 -- bash -c sleep 60")
            .fail_spawn("pct exec 102 -- bash -c ls");
        let (exec, _) = executor(FakeCluster::new(), runner);

        assert_eq!(
            exec.execute(GuestKind::Container, 101, "pve", "sleep 60").await,
            "⏳ Command timed out after 30 seconds."
        );
        assert!(exec
            .execute(GuestKind::Container, 102, "pve", "ls")
            .await
            .starts_with("❌ pct exec failed"));
    }

    #[tokio::test]
    async fn test_blocked_command_never_runs() {
        let (exec, runner) = executor(FakeCluster::new(), FakeRunner::new());
        let reply = exec.execute(GuestKind::Container, 101, "pve", "rm -rf /").await;
        assert!(reply.contains("rejected"));
        assert!(runner.invocations().is_empty());

        let host = exec.execute_host(":(){ :|:& };:").await;
        assert!(host.contains("fork bomb"));
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vm_agent_output() {
        let cluster = FakeCluster::new()
            .with_vm("pve", 100, "web", "running")
            .with_agent(100, 2, "Linux web 6.8\n", "");
        let (exec, _) = executor(cluster, FakeRunner::new());

        let started = Instant::now();
        assert_eq!(exec.execute(GuestKind::Vm, 100, "pve", "uname -a").await, "Linux web 6.8");
        // two unfinished polls before the exit is seen
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vm_agent_never_finishes() {
        let cluster = FakeCluster::new()
            .with_vm("pve", 100, "web", "running")
            .with_agent(100, u32::MAX, "", "");
        let (exec, _) = executor(cluster, FakeRunner::new());

        assert_eq!(
            exec.execute(GuestKind::Vm, 100, "pve", "sleep 100").await,
            "⏳ Timed out waiting for the command to finish."
        );
    }

    #[tokio::test]
    async fn test_vm_without_agent() {
        let cluster = FakeCluster::new().with_vm("pve", 100, "web", "running");
        let (exec, _) = executor(cluster, FakeRunner::new());

        assert_eq!(exec.execute(GuestKind::Vm, 100, "pve", "ls").await, AGENT_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_host_shell_appends_stderr() {
        let runner = FakeRunner::new().respond(
            "bash -c df -h",
            "Filesystem Size\n",
            "df: /mnt: Stale handle\n",
        );
        let (exec, _) = executor(FakeCluster::new(), runner);

        assert_eq!(
            exec.execute_host("df -h").await,
            "Filesystem Size\nSTDERR:\ndf: /mnt: Stale handle"
        );
    }

    #[tokio::test]
    async fn test_long_output_is_truncated() {
        let big = "a".repeat(5000);
        let runner = FakeRunner::new().respond("pct exec 101 -- bash -c cat big", &big, "");
        let (exec, _) = executor(FakeCluster::new(), runner);

        let out = exec.execute(GuestKind::Container, 101, "pve", "cat big").await;
        assert_eq!(out, format!("{}{}", "a".repeat(OUTPUT_LIMIT), TRUNCATION_MARKER));
    }
}
