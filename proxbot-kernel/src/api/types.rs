//! Wire shapes of the Proxmox VE API responses the kernel reads.
//!
//! The API is loose about numbers: ids and counters arrive as JSON numbers or
//! strings depending on the endpoint, so every numeric field goes through a
//! lenient deserializer.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

/// `{"data": ...}` wrapper around every response
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Entry of `GET /nodes`
#[derive(Debug, Clone, Deserialize)]
pub struct NodeEntry {
    pub node: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Entry of `GET /nodes/{node}/qemu` and `GET /nodes/{node}/lxc`
#[derive(Debug, Clone, Deserialize)]
pub struct GuestEntry {
    #[serde(deserialize_with = "de_u32")]
    pub vmid: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "de_flag")]
    pub template: bool,
}

/// Used/total figures of one container filesystem
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FsUsage {
    #[serde(default, deserialize_with = "de_f64")]
    pub used: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub total: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub max: f64,
}

/// `GET /nodes/{node}/{qemu|lxc}/{vmid}/status/current`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusCurrent {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "de_f64")]
    pub uptime: f64,
    /// Fraction of one host CPU (0.0 - 1.0 per core)
    #[serde(default, deserialize_with = "de_f64")]
    pub cpu: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub mem: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub maxmem: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub disk: f64,
    #[serde(default, deserialize_with = "de_f64")]
    pub maxdisk: f64,
    #[serde(default)]
    pub rootfs: Option<FsUsage>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl StatusCurrent {
    /// Extra container mount points (`mp0`, `mountpoint1`, ...) reported as objects.
    pub fn mount_points(&self) -> Vec<FsUsage> {
        let mut keys: Vec<&String> = self
            .extra
            .keys()
            .filter(|k| k.starts_with("mp") || k.starts_with("mountpoint"))
            .collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|k| match &self.extra[k] {
                v @ Value::Object(_) => serde_json::from_value(v.clone()).ok(),
                _ => None,
            })
            .collect()
    }
}

/// `POST /nodes/{node}/qemu/{vmid}/agent/exec`
#[derive(Debug, Clone, Deserialize)]
pub struct AgentExecStarted {
    #[serde(deserialize_with = "de_u64")]
    pub pid: u64,
}

/// `GET /nodes/{node}/qemu/{vmid}/agent/exec-status`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentExecStatus {
    #[serde(default, deserialize_with = "de_flag")]
    pub exited: bool,
    #[serde(default, rename = "out-data")]
    pub out_data: Option<String>,
    #[serde(default, rename = "err-data")]
    pub err_data: Option<String>,
    #[serde(default)]
    pub exitcode: Option<i64>,
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn de_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(number(&v).unwrap_or(0.0))
}

fn de_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v = Value::deserialize(d)?;
    number(&v)
        .filter(|n| *n >= 0.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid guest id: {v}")))
}

fn de_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let v = Value::deserialize(d)?;
    number(&v)
        .filter(|n| *n >= 0.0)
        .map(|n| n as u64)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid integer: {v}")))
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let v = Value::deserialize(d)?;
    Ok(number(&v).map(|n| n != 0.0).unwrap_or(false))
}
