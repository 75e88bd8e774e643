use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Guest flavour managed by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    Vm,
    Container,
}

impl GuestKind {
    /// Path segment used by the Proxmox API (`qemu` / `lxc`).
    pub fn api_segment(self) -> &'static str {
        match self {
            GuestKind::Vm => "qemu",
            GuestKind::Container => "lxc",
        }
    }

    /// Prefix used by chat commands and callback payloads.
    pub fn slug(self) -> &'static str {
        match self {
            GuestKind::Vm => "vm",
            GuestKind::Container => "lxc",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GuestKind::Vm => "VM",
            GuestKind::Container => "LXC",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "vm" => Some(GuestKind::Vm),
            "lxc" => Some(GuestKind::Container),
            _ => None,
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestStatus {
    Running,
    Stopped,
    Unknown,
    Error,
}

impl GuestStatus {
    /// Anything the platform reports besides running/stopped is `Unknown`.
    pub fn from_platform(raw: Option<&str>) -> Self {
        match raw {
            Some("running") => GuestStatus::Running,
            Some("stopped") => GuestStatus::Stopped,
            _ => GuestStatus::Unknown,
        }
    }
}

impl fmt::Display for GuestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GuestStatus::Running => "running",
            GuestStatus::Stopped => "stopped",
            GuestStatus::Unknown => "unknown",
            GuestStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Snapshot of one VM or container, recomputed on every directory query.
///
/// Disk fields are `0.0` when nothing could be determined; renderers treat
/// that as "no data".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuestRecord {
    pub id: u32,
    pub kind: GuestKind,
    pub name: String,
    pub status: GuestStatus,
    pub node: String,
    pub uptime_seconds: u64,
    pub cpu_percent: f64,
    pub mem_used_mb: f64,
    pub mem_total_mb: f64,
    pub mem_percent: f64,
    pub disk_used_gb: f64,
    pub disk_total_gb: f64,
}

impl GuestRecord {
    /// Display name used when the platform reports none, e.g. `VM100`.
    pub fn fallback_name(kind: GuestKind, id: u32) -> String {
        format!("{}{}", kind.label(), id)
    }

    /// Entry standing in for a VM whose status could not be read.
    pub fn unavailable(kind: GuestKind, id: u32, node: &str) -> Self {
        Self {
            id,
            kind,
            name: "Error".to_string(),
            status: GuestStatus::Error,
            node: node.to_string(),
            uptime_seconds: 0,
            cpu_percent: 0.0,
            mem_used_mb: 0.0,
            mem_total_mb: 0.0,
            mem_percent: 0.0,
            disk_used_gb: 0.0,
            disk_total_gb: 0.0,
        }
    }
}

/// Power verb a user can confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Reboot,
}

impl Action {
    /// Status the guest must report once the action has taken effect.
    pub fn expected_status(self) -> GuestStatus {
        match self {
            Action::Start | Action::Reboot => GuestStatus::Running,
            Action::Stop => GuestStatus::Stopped,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Reboot => "reboot",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Action::Start),
            "stop" => Ok(Action::Stop),
            "reboot" => Ok(Action::Reboot),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// One confirmed user intent, consumed once by the action controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub kind: GuestKind,
    pub guest_id: u32,
    pub action: Action,
    /// Placement hint from the chat payload; resolved through the API when absent.
    pub node: Option<String>,
}

/// Guest a chat is attached to while console mode is on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveConsoleSession {
    pub kind: GuestKind,
    pub guest_id: u32,
    pub node: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_status() {
        assert_eq!(Action::Start.expected_status(), GuestStatus::Running);
        assert_eq!(Action::Reboot.expected_status(), GuestStatus::Running);
        assert_eq!(Action::Stop.expected_status(), GuestStatus::Stopped);
    }

    #[test]
    fn test_status_from_platform() {
        assert_eq!(GuestStatus::from_platform(Some("running")), GuestStatus::Running);
        assert_eq!(GuestStatus::from_platform(Some("stopped")), GuestStatus::Stopped);
        assert_eq!(GuestStatus::from_platform(Some("paused")), GuestStatus::Unknown);
        assert_eq!(GuestStatus::from_platform(None), GuestStatus::Unknown);
    }

    #[test]
    fn test_fallback_name() {
        assert_eq!(GuestRecord::fallback_name(GuestKind::Vm, 100), "VM100");
        assert_eq!(GuestRecord::fallback_name(GuestKind::Container, 7), "LXC7");
    }

    #[test]
    fn test_kind_slugs() {
        assert_eq!(GuestKind::from_slug("vm"), Some(GuestKind::Vm));
        assert_eq!(GuestKind::from_slug("lxc"), Some(GuestKind::Container));
        assert_eq!(GuestKind::from_slug("qemu"), None);
        assert_eq!(GuestKind::Container.api_segment(), "lxc");
    }
}
