//! Point-in-time inventory of cluster guests.

use crate::api::{ApiError, ControlPlane, GuestEntry, StatusCurrent};
use crate::models::{GuestKind, GuestRecord, GuestStatus};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::{error, warn};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Builds `GuestRecord`s from live control-plane data; nothing is cached.
#[derive(Clone)]
pub struct Directory {
    api: Arc<dyn ControlPlane>,
}

impl Directory {
    pub fn new(api: Arc<dyn ControlPlane>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<dyn ControlPlane> {
        &self.api
    }

    /// Every guest of `kind`, node by node.
    ///
    /// Never fails. A guest whose status cannot be read becomes an `error`
    /// record for VMs and is left out for containers; a failed node or guest
    /// enumeration returns what was collected so far. An empty result
    /// therefore means "no data", not "no guests".
    pub async fn list_guests(&self, kind: GuestKind) -> Vec<GuestRecord> {
        let mut out = Vec::new();
        if let Err(e) = self.collect(kind, &mut out).await {
            error!("Failed to list {} guests: {}", kind, e);
        }
        out
    }

    /// Current record for one guest, if the directory can see it.
    pub async fn find(&self, kind: GuestKind, id: u32) -> Option<GuestRecord> {
        self.list_guests(kind).await.into_iter().find(|g| g.id == id)
    }

    async fn collect(&self, kind: GuestKind, out: &mut Vec<GuestRecord>) -> Result<(), ApiError> {
        for node in self.api.list_nodes().await? {
            for entry in self.api.list_guests(&node.node, kind).await? {
                if kind == GuestKind::Vm && entry.template {
                    continue;
                }
                match self.record_for(&node.node, kind, &entry).await {
                    Ok(record) => out.push(record),
                    Err(e) => {
                        error!("[{} {}] failed to read guest data: {}", kind, entry.vmid, e);
                        if kind == GuestKind::Vm {
                            out.push(GuestRecord::unavailable(kind, entry.vmid, &node.node));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn record_for(
        &self,
        node: &str,
        kind: GuestKind,
        entry: &GuestEntry,
    ) -> Result<GuestRecord, ApiError> {
        let status = self.api.guest_status(node, kind, entry.vmid).await?;
        let (disk_used_gb, disk_total_gb) = match kind {
            GuestKind::Vm => self.vm_disk(node, entry.vmid, &status).await?,
            GuestKind::Container => container_disk(&status),
        };
        let (mem_used_mb, mem_total_mb, mem_percent) = memory(&status);

        Ok(GuestRecord {
            id: entry.vmid,
            kind,
            name: entry
                .name
                .clone()
                .unwrap_or_else(|| GuestRecord::fallback_name(kind, entry.vmid)),
            status: GuestStatus::from_platform(entry.status.as_deref()),
            node: node.to_string(),
            uptime_seconds: status.uptime.max(0.0) as u64,
            cpu_percent: round1(status.cpu * 100.0),
            mem_used_mb,
            mem_total_mb,
            mem_percent,
            disk_used_gb,
            disk_total_gb,
        })
    }

    /// Live figures first; configured sizes when the platform reports no maximum.
    async fn vm_disk(
        &self,
        node: &str,
        id: u32,
        status: &StatusCurrent,
    ) -> Result<(f64, f64), ApiError> {
        let used = human_gb(status.disk);
        let mut total = human_gb(status.maxdisk);
        if total == 0.0 {
            let config = self.api.vm_config(node, id).await?;
            total = configured_disk_gb(&config);
            if total == 0.0 {
                warn!("[VM {}] no disk size in live status or config", id);
            }
        }
        Ok((used.max(0.0), round1(total)))
    }
}

/// Root filesystem plus every extra mount point.
fn container_disk(status: &StatusCurrent) -> (f64, f64) {
    let mut used = 0.0;
    let mut total = 0.0;
    let volumes = status.rootfs.iter().cloned().chain(status.mount_points());
    for fs in volumes {
        used += human_gb(fs.used);
        let t = human_gb(fs.total);
        total += if t > 0.0 { t } else { human_gb(fs.max) };
    }
    (round1(used), if total > 0.0 { round1(total) } else { 0.0 })
}

/// Whole megabytes, as the platform reports bytes.
fn memory(status: &StatusCurrent) -> (f64, f64, f64) {
    let used_mb = (status.mem.max(0.0) as u64 / 1024 / 1024) as f64;
    let total_mb = (status.maxmem.max(0.0) as u64 / 1024 / 1024) as f64;
    let percent = if total_mb > 0.0 {
        round1(used_mb / total_mb * 100.0)
    } else {
        0.0
    };
    (used_mb, total_mb, percent)
}

fn size_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)size=(\d+)([GM]?)B?").expect("static regex"))
}

/// Sum of every `size=<n>[G|M]` declaration in a VM config.
///
/// `M` is divided by 1024; a missing unit means gigabytes.
pub fn configured_disk_gb(config: &Map<String, Value>) -> f64 {
    config
        .values()
        .filter_map(Value::as_str)
        .filter_map(|v| size_pattern().captures(v))
        .filter_map(|caps| {
            let size: f64 = caps.get(1)?.as_str().parse().ok()?;
            let unit = caps.get(2).map(|m| m.as_str().to_ascii_uppercase()).unwrap_or_default();
            Some(if unit == "M" { size / 1024.0 } else { size })
        })
        .sum()
}

pub fn human_gb(bytes: f64) -> f64 {
    round1(bytes / BYTES_PER_GB)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
