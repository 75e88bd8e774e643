//! Typed access to the Proxmox VE control plane.

mod client;
mod error;
mod retry;
mod types;

pub use client::ProxmoxClient;
pub use error::ApiError;
pub use retry::{with_retry, RetryPolicy};
pub use types::{
    AgentExecStarted, AgentExecStatus, Envelope, FsUsage, GuestEntry, NodeEntry, StatusCurrent,
};

use crate::models::GuestKind;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// Power-state change sent to a guest.
///
/// The soft variants carry their own shutdown timeout, separate from the
/// overall bound the action controller enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerCall {
    Start,
    Shutdown { timeout: Duration },
    Stop,
    Reboot { timeout: Duration },
    Reset,
}

impl PowerCall {
    /// Last path segment under `/status/`.
    pub fn endpoint(self) -> &'static str {
        match self {
            PowerCall::Start => "start",
            PowerCall::Shutdown { .. } => "shutdown",
            PowerCall::Stop => "stop",
            PowerCall::Reboot { .. } => "reboot",
            PowerCall::Reset => "reset",
        }
    }

    pub fn soft_timeout(self) -> Option<Duration> {
        match self {
            PowerCall::Shutdown { timeout } | PowerCall::Reboot { timeout } => Some(timeout),
            _ => None,
        }
    }
}

/// Operations the bot needs from the cluster.
///
/// `ProxmoxClient` is the production implementation; reads are retried with
/// backoff, writes are sent once.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeEntry>, ApiError>;

    async fn list_guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestEntry>, ApiError>;

    async fn guest_status(
        &self,
        node: &str,
        kind: GuestKind,
        id: u32,
    ) -> Result<StatusCurrent, ApiError>;

    /// Raw VM configuration; only consulted for disk sizes.
    async fn vm_config(&self, node: &str, id: u32) -> Result<Map<String, Value>, ApiError>;

    async fn power(
        &self,
        node: &str,
        kind: GuestKind,
        id: u32,
        call: PowerCall,
    ) -> Result<(), ApiError>;

    /// Start `command` through the QEMU guest agent and return its pid.
    async fn agent_exec(&self, node: &str, id: u32, command: &[String]) -> Result<u64, ApiError>;

    async fn agent_exec_status(
        &self,
        node: &str,
        id: u32,
        pid: u64,
    ) -> Result<AgentExecStatus, ApiError>;
}

/// Resolve which node hosts guest `id` of the given kind.
pub async fn find_node_by_guest_id(
    api: &dyn ControlPlane,
    kind: GuestKind,
    id: u32,
) -> Result<String, ApiError> {
    for node in api.list_nodes().await? {
        let guests = api.list_guests(&node.node, kind).await?;
        if guests.iter().any(|g| g.vmid == id) {
            return Ok(node.node);
        }
    }
    Err(ApiError::NotFound { kind, id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    #[tokio::test]
    async fn test_find_node() {
        let cluster = FakeCluster::new()
            .with_vm("pve1", 100, "web", "running")
            .with_vm("pve2", 200, "db", "stopped")
            .with_container("pve2", 300, "dns", "running");

        assert_eq!(find_node_by_guest_id(&cluster, GuestKind::Vm, 200).await.unwrap(), "pve2");
        assert_eq!(
            find_node_by_guest_id(&cluster, GuestKind::Container, 300).await.unwrap(),
            "pve2"
        );

        let missing = find_node_by_guest_id(&cluster, GuestKind::Container, 100).await;
        assert!(matches!(missing, Err(ApiError::NotFound { id: 100, .. })));
    }

    #[test]
    fn test_power_call_endpoints() {
        let soft = PowerCall::Shutdown { timeout: Duration::from_secs(30) };
        assert_eq!(soft.endpoint(), "shutdown");
        assert_eq!(soft.soft_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(PowerCall::Reset.endpoint(), "reset");
        assert_eq!(PowerCall::Stop.soft_timeout(), None);
    }
}
