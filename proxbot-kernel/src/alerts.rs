//! Periodic host health checks with chat alerts.

use crate::config::AlertConf;
use crate::health::HealthTracker;
use crate::sink::{broadcast, NotificationSink, TextFormat};
use proxbot_host::{HostMetrics, SensorReading};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a cycle that died instead of the regular interval.
const CYCLE_FAILURE_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    CpuTemperature,
    CpuUsage,
    RamUsage,
}

impl Metric {
    pub const ALL: [Metric; 3] = [Metric::CpuTemperature, Metric::CpuUsage, Metric::RamUsage];

    fn unit(self) -> &'static str {
        match self {
            Metric::CpuTemperature => "°C",
            Metric::CpuUsage | Metric::RamUsage => "%",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Metric::CpuTemperature => "CPU temperature",
            Metric::CpuUsage => "CPU usage",
            Metric::RamUsage => "RAM usage",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckResult {
    pub metric: Metric,
    pub exceeded: bool,
    pub value: f32,
    pub threshold: f32,
}

impl CheckResult {
    fn evaluate(metric: Metric, value: Option<f32>, threshold: f32) -> Self {
        match value {
            Some(v) => Self {
                metric,
                exceeded: v > threshold,
                value: round1(v),
                threshold,
            },
            None => Self {
                metric,
                exceeded: false,
                value: 0.0,
                threshold,
            },
        }
    }

    /// HTML alert text naming the metric, its value and the threshold.
    pub fn alert_message(&self) -> String {
        let (icon, headline) = match self.metric {
            Metric::CpuTemperature => ("🔥", "OVERHEATING!"),
            Metric::CpuUsage => ("⚡", "HIGH CPU LOAD!"),
            Metric::RamUsage => ("💾", "HIGH MEMORY USAGE!"),
        };
        let unit = self.metric.unit();
        format!(
            "{} <b>{}</b> {}: {}{} (threshold: {}{})",
            icon, headline, self.metric, self.value, unit, self.threshold, unit
        )
    }
}

/// The labelled "CPU" sensor, else the hottest reading, else nothing.
pub fn select_cpu_temperature(readings: &[SensorReading]) -> Option<f32> {
    readings
        .iter()
        .find(|r| r.label == "CPU")
        .map(|r| r.celsius)
        .or_else(|| readings.iter().map(|r| r.celsius).reduce(f32::max))
}

fn round1(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}

pub struct AlertMonitor {
    metrics: Arc<dyn HostMetrics>,
    sink: Arc<dyn NotificationSink>,
    recipients: Vec<i64>,
    thresholds: AlertConf,
    health: Option<HealthTracker>,
}

/// Running monitor; dropping it without `stop` leaves the loop running.
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel the loop and wait for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!("Alert monitor task ended abnormally: {}", e);
        }
        info!("Alert monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl AlertMonitor {
    pub fn new(
        metrics: Arc<dyn HostMetrics>,
        sink: Arc<dyn NotificationSink>,
        recipients: Vec<i64>,
        thresholds: AlertConf,
    ) -> Self {
        Self {
            metrics,
            sink,
            recipients,
            thresholds,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = Some(health);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.thresholds.check_interval_secs)
    }

    pub fn start(self: Arc<Self>) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        info!("Alert monitor started");
        MonitorHandle { cancel, task }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let interval = self.interval();
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let monitor = self.clone();
            let pause = match tokio::spawn(async move { monitor.run_cycle().await }).await {
                Ok(_) => interval,
                Err(e) => {
                    error!("Alert cycle failed: {}. Retrying in {:?}", e, CYCLE_FAILURE_DELAY);
                    CYCLE_FAILURE_DELAY
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        debug!("Alert loop exited");
    }

    /// Run all three checks once and send an alert for each exceeded one.
    /// A failing check is logged and left out of the result.
    pub async fn run_cycle(&self) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(Metric::ALL.len());
        for metric in Metric::ALL {
            match self.check(metric).await {
                Ok(result) => {
                    if result.exceeded {
                        self.alert(&result).await;
                    } else {
                        debug!("{} normal: {}{}", metric, result.value, metric.unit());
                    }
                    results.push(result);
                }
                Err(e) => error!("{} check failed: {:#}", metric, e),
            }
        }
        if let Some(health) = &self.health {
            health.record_alert_cycle();
        }
        results
    }

    async fn check(&self, metric: Metric) -> anyhow::Result<CheckResult> {
        let metrics = self.metrics.clone();
        let value = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<f32>> {
            Ok(match metric {
                Metric::CpuTemperature => select_cpu_temperature(&metrics.cpu_temperatures()?),
                Metric::CpuUsage => Some(metrics.cpu_usage_percent()?),
                Metric::RamUsage => Some(metrics.ram_usage_percent()?),
            })
        })
        .await??;

        let threshold = match metric {
            Metric::CpuTemperature => self.thresholds.cpu_temp_threshold,
            Metric::CpuUsage => self.thresholds.cpu_usage_threshold,
            Metric::RamUsage => self.thresholds.ram_usage_threshold,
        };
        Ok(CheckResult::evaluate(metric, value, threshold))
    }

    async fn alert(&self, result: &CheckResult) {
        let text = result.alert_message();
        let delivered =
            broadcast(self.sink.as_ref(), &self.recipients, &text, TextFormat::Html).await;
        if delivered < self.recipients.len() {
            warn!("Alert delivered to {}/{} recipients", delivered, self.recipients.len());
        }
        if let Some(health) = &self.health {
            health.record_alert_sent();
        }
        info!("Alert sent: {}", text);
    }
}
