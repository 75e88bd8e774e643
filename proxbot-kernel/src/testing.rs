//! In-memory stand-ins for the cluster, host and chat collaborators.

use crate::api::{
    AgentExecStatus, ApiError, ControlPlane, GuestEntry, NodeEntry, PowerCall, StatusCurrent,
};
use crate::models::GuestKind;
use crate::sink::{NotificationSink, SinkError, TextFormat};
use async_trait::async_trait;
use parking_lot::Mutex;
use proxbot_host::{CommandRunner, ExecError, ExecOutput, HostMetrics, SensorReading};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct FakeGuest {
    node: String,
    kind: GuestKind,
    id: u32,
    name: Option<String>,
    status: String,
    template: bool,
    metrics: Value,
    /// Target status and the number of guest listings before it shows.
    pending: Option<(String, u32)>,
}

struct FakeAgent {
    polls_before_exit: u32,
    polled: u32,
    out: String,
    err: String,
}

#[derive(Default)]
struct ClusterState {
    nodes: Vec<String>,
    guests: Vec<FakeGuest>,
    configs: HashMap<u32, Map<String, Value>>,
    agents: HashMap<u32, FakeAgent>,
    power_failures: HashMap<(u32, &'static str), ApiError>,
    ignored_power: HashSet<(u32, &'static str)>,
    settle_after: HashMap<u32, u32>,
    status_failures: HashMap<u32, ApiError>,
    list_failures: HashMap<String, ApiError>,
    nodes_failure: Option<ApiError>,
    calls: Vec<String>,
    status_reads: HashMap<u32, u32>,
}

/// Scriptable `ControlPlane`: power calls change guest status, failures are injected per call.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn edit(self, f: impl FnOnce(&mut ClusterState)) -> Self {
        f(&mut self.state.lock());
        self
    }

    fn add_guest(
        self,
        node: &str,
        kind: GuestKind,
        id: u32,
        name: &str,
        status: &str,
        template: bool,
    ) -> Self {
        self.edit(|s| {
            if !s.nodes.iter().any(|n| n == node) {
                s.nodes.push(node.to_string());
            }
            s.guests.push(FakeGuest {
                node: node.to_string(),
                kind,
                id,
                name: (!name.is_empty()).then(|| name.to_string()),
                status: status.to_string(),
                template,
                metrics: json!({}),
                pending: None,
            });
        })
    }

    pub fn with_vm(self, node: &str, id: u32, name: &str, status: &str) -> Self {
        self.add_guest(node, GuestKind::Vm, id, name, status, false)
    }

    pub fn with_container(self, node: &str, id: u32, name: &str, status: &str) -> Self {
        self.add_guest(node, GuestKind::Container, id, name, status, false)
    }

    pub fn with_template(self, node: &str, id: u32) -> Self {
        self.add_guest(node, GuestKind::Vm, id, "template", "stopped", true)
    }

    /// Extra `status/current` fields for guest `id`.
    pub fn with_status(self, id: u32, metrics: Value) -> Self {
        self.edit(|s| {
            if let Some(g) = s.guests.iter_mut().find(|g| g.id == id) {
                g.metrics = metrics;
            }
        })
    }

    pub fn with_vm_config(self, id: u32, config: Value) -> Self {
        self.edit(|s| {
            if let Value::Object(map) = config {
                s.configs.insert(id, map);
            }
        })
    }

    /// Guest agent that reports completion after `polls_before_exit` unfinished polls.
    pub fn with_agent(self, id: u32, polls_before_exit: u32, out: &str, err: &str) -> Self {
        self.edit(|s| {
            s.agents.insert(
                id,
                FakeAgent {
                    polls_before_exit,
                    polled: 0,
                    out: out.to_string(),
                    err: err.to_string(),
                },
            );
        })
    }

    pub fn fail_power(self, id: u32, endpoint: &'static str, err: ApiError) -> Self {
        self.edit(|s| {
            s.power_failures.insert((id, endpoint), err);
        })
    }

    /// Accept the call without changing the guest's status.
    pub fn ignore_power(self, id: u32, endpoint: &'static str) -> Self {
        self.edit(|s| {
            s.ignored_power.insert((id, endpoint));
        })
    }

    /// Status changes become visible on the `listings`-th guest listing after the call.
    pub fn settle_after(self, id: u32, listings: u32) -> Self {
        self.edit(|s| {
            s.settle_after.insert(id, listings);
        })
    }

    pub fn fail_status(self, id: u32, err: ApiError) -> Self {
        self.edit(|s| {
            s.status_failures.insert(id, err);
        })
    }

    pub fn fail_list(self, node: &str, err: ApiError) -> Self {
        self.edit(|s| {
            s.list_failures.insert(node.to_string(), err);
        })
    }

    pub fn fail_nodes(self, err: ApiError) -> Self {
        self.edit(|s| s.nodes_failure = Some(err))
    }

    /// Power and agent calls in order, e.g. `shutdown qemu/100@pve`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn status_reads(&self, id: u32) -> u32 {
        self.state.lock().status_reads.get(&id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ControlPlane for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeEntry>, ApiError> {
        let s = self.state.lock();
        if let Some(e) = &s.nodes_failure {
            return Err(e.clone());
        }
        Ok(s.nodes
            .iter()
            .map(|n| NodeEntry {
                node: n.clone(),
                status: Some("online".into()),
            })
            .collect())
    }

    async fn list_guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestEntry>, ApiError> {
        let mut s = self.state.lock();
        if let Some(e) = s.list_failures.get(node) {
            return Err(e.clone());
        }
        let mut out = Vec::new();
        for g in s.guests.iter_mut().filter(|g| g.node == node && g.kind == kind) {
            if let Some((target, remaining)) = g.pending.take() {
                if remaining <= 1 {
                    g.status = target;
                } else {
                    g.pending = Some((target, remaining - 1));
                }
            }
            out.push(GuestEntry {
                vmid: g.id,
                name: g.name.clone(),
                status: Some(g.status.clone()),
                template: g.template,
            });
        }
        Ok(out)
    }

    async fn guest_status(
        &self,
        node: &str,
        kind: GuestKind,
        id: u32,
    ) -> Result<StatusCurrent, ApiError> {
        let mut s = self.state.lock();
        *s.status_reads.entry(id).or_default() += 1;
        if let Some(e) = s.status_failures.get(&id) {
            return Err(e.clone());
        }
        let guest = s
            .guests
            .iter()
            .find(|g| g.id == id && g.kind == kind && g.node == node)
            .ok_or(ApiError::NotFound { kind, id })?;

        let mut payload = json!({ "status": guest.status });
        if let (Value::Object(base), Value::Object(extra)) = (&mut payload, &guest.metrics) {
            base.extend(extra.clone());
        }
        serde_json::from_value(payload).map_err(|e| ApiError::Other(e.to_string()))
    }

    async fn vm_config(&self, _node: &str, id: u32) -> Result<Map<String, Value>, ApiError> {
        Ok(self.state.lock().configs.get(&id).cloned().unwrap_or_default())
    }

    async fn power(
        &self,
        node: &str,
        kind: GuestKind,
        id: u32,
        call: PowerCall,
    ) -> Result<(), ApiError> {
        let mut s = self.state.lock();
        let endpoint = call.endpoint();
        s.calls
            .push(format!("{} {}/{}@{}", endpoint, kind.api_segment(), id, node));
        if let Some(e) = s.power_failures.get(&(id, endpoint)) {
            return Err(e.clone());
        }
        if s.ignored_power.contains(&(id, endpoint)) {
            return Ok(());
        }
        let target = match call {
            PowerCall::Start | PowerCall::Reboot { .. } | PowerCall::Reset => "running",
            PowerCall::Shutdown { .. } | PowerCall::Stop => "stopped",
        };
        let lag = s.settle_after.get(&id).copied().unwrap_or(0);
        let guest = s
            .guests
            .iter_mut()
            .find(|g| g.id == id && g.kind == kind)
            .ok_or(ApiError::NotFound { kind, id })?;
        if lag > 0 {
            guest.pending = Some((target.to_string(), lag));
        } else {
            guest.status = target.to_string();
        }
        Ok(())
    }

    async fn agent_exec(&self, node: &str, id: u32, _command: &[String]) -> Result<u64, ApiError> {
        let mut s = self.state.lock();
        s.calls.push(format!("agent-exec qemu/{}@{}", id, node));
        if s.agents.contains_key(&id) {
            Ok(4242)
        } else {
            Err(ApiError::AgentUnavailable)
        }
    }

    async fn agent_exec_status(
        &self,
        _node: &str,
        id: u32,
        _pid: u64,
    ) -> Result<AgentExecStatus, ApiError> {
        let mut s = self.state.lock();
        let agent = s.agents.get_mut(&id).ok_or(ApiError::AgentUnavailable)?;
        agent.polled = agent.polled.saturating_add(1);
        if agent.polled > agent.polls_before_exit {
            Ok(AgentExecStatus {
                exited: true,
                out_data: Some(agent.out.clone()),
                err_data: Some(agent.err.clone()),
                exitcode: Some(0),
            })
        } else {
            Ok(AgentExecStatus::default())
        }
    }
}

enum Scripted {
    Output { stdout: String, stderr: String },
    Timeout,
    SpawnFailure,
}

/// `CommandRunner` answering from a script keyed by the full command line.
#[derive(Default)]
pub struct FakeRunner {
    scripts: HashMap<String, Scripted>,
    invocations: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, command_line: &str, stdout: &str, stderr: &str) -> Self {
        self.scripts.insert(
            command_line.to_string(),
            Scripted::Output {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        );
        self
    }

    pub fn time_out(mut self, command_line: &str) -> Self {
        self.scripts.insert(command_line.to_string(), Scripted::Timeout);
        self
    }

    pub fn fail_spawn(mut self, command_line: &str) -> Self {
        self.scripts.insert(command_line.to_string(), Scripted::SpawnFailure);
        self
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ExecOutput, ExecError> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.invocations.lock().push(line.clone());
        match self.scripts.get(&line) {
            Some(Scripted::Output { stdout, stderr }) => Ok(ExecOutput {
                stdout: stdout.clone(),
                stderr: stderr.clone(),
                exit_code: Some(0),
                execution_time_ms: 1,
            }),
            Some(Scripted::Timeout) => Err(ExecError::Timeout(timeout)),
            Some(Scripted::SpawnFailure) => Err(ExecError::Spawn {
                program: program.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "No such file or directory",
                ),
            }),
            None => Ok(ExecOutput::default()),
        }
    }
}

/// Fixed host readings; temperatures can be made to fail.
pub struct FakeMetrics {
    temperatures: Option<Vec<SensorReading>>,
    cpu: f32,
    ram: f32,
    summary: String,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self {
            temperatures: Some(Vec::new()),
            cpu: 0.0,
            ram: 0.0,
            summary: "Uptime: 1d 2h".into(),
        }
    }

    pub fn temperatures(mut self, readings: Vec<SensorReading>) -> Self {
        self.temperatures = Some(readings);
        self
    }

    pub fn failing_temperatures(mut self) -> Self {
        self.temperatures = None;
        self
    }

    pub fn cpu_usage(mut self, percent: f32) -> Self {
        self.cpu = percent;
        self
    }

    pub fn ram_usage(mut self, percent: f32) -> Self {
        self.ram = percent;
        self
    }

    pub fn summary(mut self, text: &str) -> Self {
        self.summary = text.to_string();
        self
    }
}

impl HostMetrics for FakeMetrics {
    fn cpu_temperatures(&self) -> anyhow::Result<Vec<SensorReading>> {
        self.temperatures
            .clone()
            .ok_or_else(|| anyhow::anyhow!("failed to read sensors"))
    }

    fn cpu_usage_percent(&self) -> anyhow::Result<f32> {
        Ok(self.cpu)
    }

    fn ram_usage_percent(&self) -> anyhow::Result<f32> {
        Ok(self.ram)
    }

    fn host_status_summary(&self) -> anyhow::Result<String> {
        Ok(self.summary.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub recipient: i64,
    pub text: String,
    pub format: TextFormat,
}

/// `NotificationSink` keeping every delivered message.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<SentMessage>>,
    failing: HashSet<i64>,
    panicking: bool,
    attempts: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(mut self, recipient: i64) -> Self {
        self.failing.insert(recipient);
        self
    }

    /// Panic on every send, after counting the attempt.
    pub fn panicking(mut self) -> Self {
        self.panicking = true;
        self
    }

    pub fn messages(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, recipient: i64, text: &str, format: TextFormat) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.panicking {
            panic!("sink crashed while sending to {recipient}");
        }
        if self.failing.contains(&recipient) {
            return Err(SinkError::Rejected {
                recipient,
                description: "Forbidden: bot was blocked by the user".into(),
            });
        }
        self.sent.lock().push(SentMessage {
            recipient,
            text: text.to_string(),
            format,
        });
        Ok(())
    }
}
