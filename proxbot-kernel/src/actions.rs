//! Power actions with graceful-then-forced fallback and convergence polling.
//!
//! One call to [`ActionController::execute`] walks a request through
//! `Requested -> Dispatched -> Polling -> Converged | TimedOut`, or ends in
//! `Failed` when the dispatch phase (fallback included) errors out.

use crate::api::{find_node_by_guest_id, ApiError, PowerCall};
use crate::directory::Directory;
use crate::models::{Action, ActionRequest, GuestKind, GuestRecord, GuestStatus};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timing knobs of the action state machine
#[derive(Debug, Clone, Copy)]
pub struct ActionPolicy {
    pub vm_soft_timeout: Duration,
    pub container_soft_timeout: Duration,
    /// Status checks while waiting for a force-stopped container to go down.
    pub stop_wait_attempts: u32,
    pub stop_wait_interval: Duration,
    pub converge_attempts: u32,
    pub converge_interval: Duration,
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self {
            vm_soft_timeout: Duration::from_secs(30),
            container_soft_timeout: Duration::from_secs(20),
            stop_wait_attempts: 10,
            stop_wait_interval: Duration::from_secs(1),
            converge_attempts: 5,
            converge_interval: Duration::from_secs(2),
        }
    }
}

impl ActionPolicy {
    fn soft_timeout(&self, kind: GuestKind) -> Duration {
        match kind {
            GuestKind::Vm => self.vm_soft_timeout,
            GuestKind::Container => self.container_soft_timeout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    Requested,
    Dispatched,
    Polling,
    Converged,
    TimedOut,
    Failed,
}

/// Which control-plane calls actually carried the action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPath {
    /// `start`: one call, no fallback.
    Direct,
    /// Graceful shutdown or reboot was accepted.
    Soft,
    /// Graceful call failed; hard stop (stop) or reset (VM reboot) was issued.
    Forced,
    /// Container reboot fallback: hard stop, wait, then start.
    ForcedRestart { stop_observed: bool },
}

impl DispatchPath {
    pub fn is_forced(self) -> bool {
        matches!(self, DispatchPath::Forced | DispatchPath::ForcedRestart { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Convergence {
    Converged { polls: u32, record: GuestRecord },
    /// Attempts exhausted; carries whatever the directory last showed.
    TimedOut { last_seen: Option<GuestRecord> },
}

impl Convergence {
    pub fn record(&self) -> Option<&GuestRecord> {
        match self {
            Convergence::Converged { record, .. } => Some(record),
            Convergence::TimedOut { last_seen } => last_seen.as_ref(),
        }
    }
}

/// Why a dispatch failed, as far as the user needs to know
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionFailure {
    AlreadyRunning,
    AlreadyStopped,
    RemoteServerError { status: u16 },
    NotFound,
    Unknown(String),
}

impl From<&ApiError> for ActionFailure {
    fn from(e: &ApiError) -> Self {
        match e {
            ApiError::AlreadyRunning => ActionFailure::AlreadyRunning,
            ApiError::AlreadyStopped => ActionFailure::AlreadyStopped,
            ApiError::ServerError { status, .. } => {
                ActionFailure::RemoteServerError { status: *status }
            }
            ApiError::NotFound { .. } => ActionFailure::NotFound,
            other => ActionFailure::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Completed {
        node: String,
        path: DispatchPath,
        convergence: Convergence,
    },
    Failed(ActionFailure),
}

impl ActionOutcome {
    pub fn state(&self) -> ActionState {
        match self {
            ActionOutcome::Completed {
                convergence: Convergence::Converged { .. },
                ..
            } => ActionState::Converged,
            ActionOutcome::Completed { .. } => ActionState::TimedOut,
            ActionOutcome::Failed(_) => ActionState::Failed,
        }
    }
}

struct Tracker<'a> {
    req: &'a ActionRequest,
    state: ActionState,
}

impl Tracker<'_> {
    fn advance(&mut self, next: ActionState) {
        debug!(
            "{} {} {}: {:?} -> {:?}",
            self.req.kind, self.req.guest_id, self.req.action, self.state, next
        );
        self.state = next;
    }
}

impl fmt::Display for DispatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchPath::Direct => f.write_str("direct"),
            DispatchPath::Soft => f.write_str("graceful"),
            DispatchPath::Forced => f.write_str("forced"),
            DispatchPath::ForcedRestart { stop_observed: true } => f.write_str("forced stop/start"),
            DispatchPath::ForcedRestart { stop_observed: false } => {
                f.write_str("forced stop/start (stop not confirmed)")
            }
        }
    }
}

#[derive(Clone)]
pub struct ActionController {
    directory: Directory,
    policy: ActionPolicy,
}

impl ActionController {
    pub fn new(directory: Directory) -> Self {
        Self {
            directory,
            policy: ActionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ActionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /// Carry out one confirmed request. Never returns an error: every failure
    /// becomes [`ActionOutcome::Failed`], and an unconfirmed end state is
    /// [`Convergence::TimedOut`].
    pub async fn execute(&self, req: ActionRequest) -> ActionOutcome {
        let mut tracker = Tracker {
            req: &req,
            state: ActionState::Requested,
        };

        let node = match &req.node {
            Some(node) => node.clone(),
            None => {
                let api = self.directory.api();
                match find_node_by_guest_id(api.as_ref(), req.kind, req.guest_id).await {
                    Ok(node) => node,
                    Err(e) => return self.fail(&mut tracker, &e),
                }
            }
        };

        let path = match self.dispatch(&node, &req).await {
            Ok(path) => path,
            Err(e) => return self.fail(&mut tracker, &e),
        };
        tracker.advance(ActionState::Dispatched);

        tracker.advance(ActionState::Polling);
        let convergence = self
            .await_convergence(req.kind, req.guest_id, req.action.expected_status())
            .await;
        match &convergence {
            Convergence::Converged { polls, .. } => {
                tracker.advance(ActionState::Converged);
                info!(
                    "{} {} reached {} after {} poll(s)",
                    req.kind,
                    req.guest_id,
                    req.action.expected_status(),
                    polls
                );
            }
            Convergence::TimedOut { .. } => {
                tracker.advance(ActionState::TimedOut);
                warn!(
                    "{} {} did not report {} within {} poll(s)",
                    req.kind,
                    req.guest_id,
                    req.action.expected_status(),
                    self.policy.converge_attempts
                );
            }
        }

        ActionOutcome::Completed {
            node,
            path,
            convergence,
        }
    }

    fn fail(&self, tracker: &mut Tracker<'_>, e: &ApiError) -> ActionOutcome {
        warn!(
            "{} {} {} failed: {}",
            tracker.req.action, tracker.req.kind, tracker.req.guest_id, e
        );
        tracker.advance(ActionState::Failed);
        ActionOutcome::Failed(ActionFailure::from(e))
    }

    async fn dispatch(&self, node: &str, req: &ActionRequest) -> Result<DispatchPath, ApiError> {
        let api = self.directory.api();
        let (kind, id) = (req.kind, req.guest_id);
        let timeout = self.policy.soft_timeout(kind);

        match req.action {
            Action::Start => {
                api.power(node, kind, id, PowerCall::Start).await?;
                info!("{} {} on {}: start issued", kind, id, node);
                Ok(DispatchPath::Direct)
            }
            Action::Stop => match api.power(node, kind, id, PowerCall::Shutdown { timeout }).await {
                Ok(()) => {
                    info!("{} {} on {}: graceful shutdown issued", kind, id, node);
                    Ok(DispatchPath::Soft)
                }
                Err(e) => {
                    warn!("Graceful shutdown of {} {} failed ({}), forcing stop", kind, id, e);
                    api.power(node, kind, id, PowerCall::Stop).await?;
                    Ok(DispatchPath::Forced)
                }
            },
            Action::Reboot => match api.power(node, kind, id, PowerCall::Reboot { timeout }).await {
                Ok(()) => {
                    info!("{} {} on {}: graceful reboot issued", kind, id, node);
                    Ok(DispatchPath::Soft)
                }
                Err(e) if kind == GuestKind::Vm => {
                    warn!("Graceful reboot of VM {} failed ({}), forcing reset", id, e);
                    api.power(node, kind, id, PowerCall::Reset).await?;
                    Ok(DispatchPath::Forced)
                }
                Err(e) => {
                    warn!("Graceful reboot of {} {} failed ({}), forcing stop/start", kind, id, e);
                    self.forced_restart(node, kind, id).await
                }
            },
        }
    }

    /// Hard stop, wait a bounded time for `stopped`, then start no matter what.
    async fn forced_restart(
        &self,
        node: &str,
        kind: GuestKind,
        id: u32,
    ) -> Result<DispatchPath, ApiError> {
        let api = self.directory.api();
        api.power(node, kind, id, PowerCall::Stop).await?;

        let mut stop_observed = false;
        for _ in 0..self.policy.stop_wait_attempts {
            match api.guest_status(node, kind, id).await {
                Ok(status)
                    if GuestStatus::from_platform(status.status.as_deref())
                        == GuestStatus::Stopped =>
                {
                    stop_observed = true;
                    break;
                }
                Ok(_) => {}
                Err(e) => warn!("Status check of {} {} during restart failed: {}", kind, id, e),
            }
            tokio::time::sleep(self.policy.stop_wait_interval).await;
        }
        if !stop_observed {
            warn!("{} {} did not report stopped, starting anyway", kind, id);
        }

        api.power(node, kind, id, PowerCall::Start).await?;
        info!("{} {} on {}: forced restart issued", kind, id, node);
        Ok(DispatchPath::ForcedRestart { stop_observed })
    }

    /// Re-read the directory until the guest shows `expected`, sleeping
    /// before every read.
    pub async fn await_convergence(
        &self,
        kind: GuestKind,
        id: u32,
        expected: GuestStatus,
    ) -> Convergence {
        let mut last_seen = None;
        for poll in 1..=self.policy.converge_attempts {
            tokio::time::sleep(self.policy.converge_interval).await;
            match self.directory.find(kind, id).await {
                Some(record) if record.status == expected => {
                    return Convergence::Converged { polls: poll, record };
                }
                Some(record) => {
                    debug!("{} {} poll {}: still {}", kind, id, poll, record.status);
                    last_seen = Some(record);
                }
                None => debug!("{} {} poll {}: not listed", kind, id, poll),
            }
        }
        Convergence::TimedOut { last_seen }
    }
}
