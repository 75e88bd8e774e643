use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize)]
pub struct BotHealth {
    pub uptime_seconds: u64,
    pub memory_usage_mb: f32,
    pub api_status: String,
    pub alert_cycles: u64,
    pub alerts_sent: u64,
    pub last_alert_cycle: Option<String>,
}

/// Process-wide counters shown on `/system/health`.
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    api_status: Arc<Mutex<String>>,
    alert_cycles: Arc<AtomicU64>,
    alerts_sent: Arc<AtomicU64>,
    last_alert_cycle: Arc<Mutex<Option<OffsetDateTime>>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            api_status: Arc::new(Mutex::new("connecting".to_string())),
            alert_cycles: Arc::new(AtomicU64::new(0)),
            alerts_sent: Arc::new(AtomicU64::new(0)),
            last_alert_cycle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn mark_api_connected(&self) {
        *self.api_status.lock() = "connected".to_string();
    }

    pub fn mark_api_unreachable(&self) {
        *self.api_status.lock() = "unreachable".to_string();
    }

    /// The API answered but rejected the token.
    pub fn mark_api_unauthorized(&self) {
        *self.api_status.lock() = "unauthorized".to_string();
    }

    pub fn record_alert_cycle(&self) {
        self.alert_cycles.fetch_add(1, Ordering::Relaxed);
        *self.last_alert_cycle.lock() = Some(OffsetDateTime::now_utc());
    }

    pub fn record_alert_sent(&self) {
        self.alerts_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BotHealth {
        BotHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            memory_usage_mb: memory_usage_mb(),
            api_status: self.api_status.lock().clone(),
            alert_cycles: self.alert_cycles.load(Ordering::Relaxed),
            alerts_sent: self.alerts_sent.load(Ordering::Relaxed),
            last_alert_cycle: self.last_alert_cycle.lock().and_then(|t| t.format(&Rfc3339).ok()),
        }
    }
}

/// Resident set size of this process; 0 where `/proc` is unavailable.
fn memory_usage_mb() -> f32 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok())
        })
        .map(|kb| kb as f32 / 1024.0)
        .unwrap_or(0.0)
}
