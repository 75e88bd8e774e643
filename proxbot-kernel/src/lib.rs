//! proxbot - chat-driven remote control for a Proxmox VE cluster
//!
//! The control plane is reached through [`api::ProxmoxClient`]; everything
//! above it ([`directory`], [`actions`], [`console`]) works against the
//! [`api::ControlPlane`] trait. [`alerts`] watches the host in the background
//! and [`http`] is how chat updates come in.

pub mod actions;
pub mod alerts;
pub mod api;
pub mod auth;
pub mod callbacks;
pub mod config;
pub mod console;
pub mod directory;
pub mod dispatch;
pub mod health;
pub mod http;
pub mod logging;
pub mod models;
pub mod render;
pub mod safety;
pub mod session;
pub mod sink;

#[cfg(test)]
mod testing;
