//! Host metrics collection for the proxbot kernel
//!
//! Provides the readings the alert monitor and the `/status` command need:
//! - CPU temperature sensors (normalized labels)
//! - Global CPU usage since the previous sample
//! - Memory usage
//! - A formatted host status summary (uptime, load, memory, disks, temperatures)
//!
//! Every call is blocking; callers off-load them with `spawn_blocking`.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Components, Disks, System};
use tracing::debug;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Filesystems that never show up in the disk section of the summary.
const IGNORED_FILESYSTEMS: &[&str] = &[
    "", "squashfs", "tmpfs", "devtmpfs", "overlay", "iso9660", "vfat",
];

/// One temperature sensor reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub chip: String,
    pub label: String,
    pub celsius: f32,
}

/// Host metric source consumed by the kernel
pub trait HostMetrics: Send + Sync {
    fn cpu_temperatures(&self) -> Result<Vec<SensorReading>>;
    fn cpu_usage_percent(&self) -> Result<f32>;
    fn ram_usage_percent(&self) -> Result<f32>;
    fn host_status_summary(&self) -> Result<String>;
}

/// `HostMetrics` backed by the `sysinfo` crate.
///
/// The `System` is kept between calls so CPU usage is measured against the
/// previous sample instead of blocking for a fresh interval.
pub struct SysinfoCollector {
    system: Mutex<System>,
}

impl SysinfoCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }

    fn snapshot(&self) -> Result<HostSnapshot> {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        sys.refresh_cpu_usage();

        let load = System::load_average();
        let disks = Disks::new_with_refreshed_list()
            .list()
            .iter()
            .filter(|d| {
                !is_ignored_mount(
                    &d.file_system().to_string_lossy(),
                    &d.mount_point().to_string_lossy(),
                )
            })
            .map(|d| {
                let total = d.total_space();
                let used = total.saturating_sub(d.available_space());
                DiskUsage {
                    mount_point: d.mount_point().to_string_lossy().to_string(),
                    used_gb: used as f64 / GIB,
                    total_gb: total as f64 / GIB,
                }
            })
            .collect();

        let temperatures = self.cpu_temperatures()?;

        Ok(HostSnapshot {
            uptime_seconds: System::uptime(),
            load_avg: [load.one, load.five, load.fifteen],
            logical_cpus: sys.cpus().len(),
            memory_used_bytes: sys.used_memory(),
            memory_total_bytes: sys.total_memory(),
            disks,
            temperatures,
        })
    }
}

impl Default for SysinfoCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMetrics for SysinfoCollector {
    fn cpu_temperatures(&self) -> Result<Vec<SensorReading>> {
        let components = Components::new_with_refreshed_list();
        let readings: Vec<SensorReading> = components
            .list()
            .iter()
            .filter(|c| c.temperature().is_finite())
            .map(|c| {
                let raw = c.label();
                let chip = raw.split_whitespace().next().unwrap_or(raw).to_string();
                SensorReading {
                    chip,
                    label: normalize_sensor_label(raw),
                    celsius: c.temperature(),
                }
            })
            .collect();
        debug!("Collected {} temperature readings", readings.len());
        Ok(readings)
    }

    fn cpu_usage_percent(&self) -> Result<f32> {
        let mut sys = self.system.lock();
        sys.refresh_cpu_usage();
        let usage = sys.global_cpu_info().cpu_usage();
        if !usage.is_finite() {
            return Err(anyhow!("CPU usage reading is not a number"));
        }
        Ok(usage)
    }

    fn ram_usage_percent(&self) -> Result<f32> {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        Ok(percent(sys.used_memory(), sys.total_memory()))
    }

    fn host_status_summary(&self) -> Result<String> {
        Ok(self.snapshot()?.render())
    }
}

/// Map raw sensor labels to the names shown to users.
pub fn normalize_sensor_label(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.contains("tctl") {
        "CPU".to_string()
    } else if lower.contains("ccd") {
        "CPU (die)".to_string()
    } else if lower.contains("mt7921") {
        "Wi-Fi adapter".to_string()
    } else {
        raw.to_string()
    }
}

fn is_ignored_mount(file_system: &str, mount_point: &str) -> bool {
    IGNORED_FILESYSTEMS.contains(&file_system) || mount_point.starts_with("/boot")
}

fn percent(used: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 100.0) as f32
    }
}

/// Disk usage line for the summary
#[derive(Debug, Clone)]
pub struct DiskUsage {
    pub mount_point: String,
    pub used_gb: f64,
    pub total_gb: f64,
}

/// Point-in-time host readings rendered by `/status`
#[derive(Debug, Clone)]
pub struct HostSnapshot {
    pub uptime_seconds: u64,
    pub load_avg: [f64; 3],
    pub logical_cpus: usize,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disks: Vec<DiskUsage>,
    pub temperatures: Vec<SensorReading>,
}

impl HostSnapshot {
    pub fn render(&self) -> String {
        let days = self.uptime_seconds / 86_400;
        let hours = (self.uptime_seconds % 86_400) / 3_600;

        let cpus = self.logical_cpus.max(1) as f64;
        let load = |l: f64| format!("{:.2} ({}%)", l, ((l / cpus) * 100.0) as u64);

        let ram_pct = percent(self.memory_used_bytes, self.memory_total_bytes);
        let ram_used = (self.memory_used_bytes as f64 / GIB) as u64;
        let ram_total = (self.memory_total_bytes as f64 / GIB) as u64;

        let disks = if self.disks.is_empty() {
            "No data".to_string()
        } else {
            self.disks
                .iter()
                .map(|d| {
                    let icon = if d.mount_point == "/" { "🖥️" } else { "🗄️" };
                    let pct = if d.total_gb > 0.0 { d.used_gb / d.total_gb * 100.0 } else { 0.0 };
                    format!(
                        "{} {}: {:.1}% ({:.1}GB / {:.1}GB)",
                        icon, d.mount_point, pct, d.used_gb, d.total_gb
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let temps = if self.temperatures.is_empty() {
            "🌡️ No sensors found or no permission to read them.".to_string()
        } else {
            self.temperatures
                .iter()
                .map(|t| {
                    let icon = if t.label.contains("CPU") {
                        "🔥"
                    } else if t.label.contains("Wi-Fi") {
                        "📡"
                    } else {
                        "🌡️"
                    };
                    format!("{} {}: {:.1}°C", icon, t.label, t.celsius)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            "⏰ Uptime: {}d {}h\n\
             ⚡ CPU load: 1m: {}, 5m: {}, 15m: {}\n\
             💻 Memory: {}% ({}GB / {}GB)\n\n\
             💽 Disks:\n{}\n\n\
             🌡️ Temperatures:\n{}",
            days,
            hours,
            load(self.load_avg[0]),
            load(self.load_avg[1]),
            load(self.load_avg[2]),
            ram_pct as u64,
            ram_used,
            ram_total,
            disks,
            temps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> HostSnapshot {
        HostSnapshot {
            uptime_seconds: 3 * 86_400 + 5 * 3_600 + 120,
            load_avg: [0.5, 1.0, 2.0],
            logical_cpus: 4,
            memory_used_bytes: 4 * GIB as u64,
            memory_total_bytes: 16 * GIB as u64,
            disks: vec![DiskUsage {
                mount_point: "/".to_string(),
                used_gb: 10.0,
                total_gb: 40.0,
            }],
            temperatures: vec![SensorReading {
                chip: "k10temp".to_string(),
                label: "CPU".to_string(),
                celsius: 51.25,
            }],
        }
    }

    #[test]
    fn test_sensor_label_normalization() {
        assert_eq!(normalize_sensor_label("k10temp Tctl"), "CPU");
        assert_eq!(normalize_sensor_label("k10temp Tccd1"), "CPU (die)");
        assert_eq!(normalize_sensor_label("mt7921_phy0 temp1"), "Wi-Fi adapter");
        assert_eq!(normalize_sensor_label("nvme Composite"), "nvme Composite");
    }

    #[test]
    fn test_ignored_mounts() {
        assert!(is_ignored_mount("tmpfs", "/run"));
        assert!(is_ignored_mount("ext4", "/boot/efi"));
        assert!(!is_ignored_mount("ext4", "/"));
        assert!(!is_ignored_mount("zfs", "/rpool/data"));
    }

    #[test]
    fn test_percent_handles_zero_total() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
    }

    #[test]
    fn test_summary_rendering() {
        let text = snapshot().render();
        assert!(text.contains("Uptime: 3d 5h"));
        assert!(text.contains("1m: 0.50 (12%)"));
        assert!(text.contains("15m: 2.00 (50%)"));
        assert!(text.contains("Memory: 25% (4GB / 16GB)"));
        assert!(text.contains("/: 25.0% (10.0GB / 40.0GB)"));
        assert!(text.contains("CPU: 51.2°C") || text.contains("CPU: 51.3°C"));
    }

    #[test]
    fn test_summary_without_sensors_or_disks() {
        let mut snap = snapshot();
        snap.disks.clear();
        snap.temperatures.clear();
        let text = snap.render();
        assert!(text.contains("Disks:\nNo data"));
        assert!(text.contains("No sensors found"));
    }

    #[test]
    fn test_collector_reads_memory() {
        let collector = SysinfoCollector::new();
        let ram = collector.ram_usage_percent().unwrap();
        assert!((0.0..=100.0).contains(&ram));
    }
}
