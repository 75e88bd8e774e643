//! Chat replies: text, format and inline buttons.

use crate::actions::{ActionFailure, ActionOutcome, Convergence};
use crate::callbacks::CallbackData;
use crate::models::{Action, GuestKind, GuestRecord, GuestStatus};
use crate::sink::TextFormat;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Button {
    pub text: String,
    pub callback: String,
}

impl Button {
    pub fn new(text: impl Into<String>, callback: &CallbackData) -> Self {
        Self {
            text: text.into(),
            callback: callback.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub text: String,
    pub format: TextFormat,
    /// Rows of inline buttons.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<Vec<Button>>,
}

impl Reply {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Plain,
            buttons: Vec::new(),
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self {
            format: TextFormat::Html,
            ..Self::plain(text)
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            format: TextFormat::Markdown,
            ..Self::plain(text)
        }
    }

    pub fn with_buttons(mut self, buttons: Vec<Vec<Button>>) -> Self {
        self.buttons = buttons;
        self
    }
}

pub fn help_text() -> Reply {
    Reply::html(
        "Hi! This bot manages <b>Proxmox VE</b>.\n\n\
         <b>Commands:</b>\n\
         /status - Host status\n\
         /vm - Virtual machines\n\
         /lxc - Containers\n\
         /console &lt;cmd&gt; - Run a command on the host",
    )
}

/// `—` for zero; leading zero units are dropped (`2h 5m`, `7m`).
pub fn format_uptime(seconds: u64) -> String {
    if seconds == 0 {
        return "—".to_string();
    }
    let d = seconds / 86_400;
    let h = (seconds % 86_400) / 3_600;
    let m = (seconds % 3_600) / 60;
    if d > 0 {
        format!("{d}d {h}h {m}m")
    } else if h > 0 {
        format!("{h}h {m}m")
    } else {
        format!("{m}m")
    }
}

fn status_badge(status: GuestStatus) -> (&'static str, &'static str) {
    match status {
        GuestStatus::Running => ("🟢", "Running"),
        GuestStatus::Stopped => ("🔴", "Stopped"),
        GuestStatus::Unknown => ("⚪", "Unknown"),
        GuestStatus::Error => ("⚠️", "Error"),
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Picker with one button per guest, sorted by id, plus refresh.
pub fn guest_list(kind: GuestKind, guests: &[GuestRecord]) -> Reply {
    if guests.is_empty() {
        return Reply::plain(format!("No {} found.", kind.label()));
    }
    let mut sorted: Vec<&GuestRecord> = guests.iter().collect();
    sorted.sort_by_key(|g| g.id);

    let mut rows: Vec<Vec<Button>> = sorted
        .into_iter()
        .map(|g| {
            let (emoji, text) = status_badge(g.status);
            vec![Button::new(
                format!("{} {} {}{}", g.id, g.name, emoji, text),
                &CallbackData::Select {
                    kind,
                    id: g.id,
                    node: g.node.clone(),
                },
            )]
        })
        .collect();
    rows.push(vec![Button::new("Refresh", &CallbackData::Refresh { kind })]);

    Reply::plain(format!("Select a {}:", kind.label())).with_buttons(rows)
}

pub fn guest_details_text(g: &GuestRecord) -> String {
    let (emoji, status) = status_badge(g.status);
    let mut text = format!(
        "📋 {} {} ({})\n\
         🖥️ Node: {}\n\
         {} Status: {}\n\
         ⏳ Uptime: {}\n\n\
         📈 Metrics:\n\
         💻 CPU: {:.1}%\n\
         🧠 RAM: {:.0} / {:.0} MB ({:.1}%)",
        g.kind.label(),
        g.id,
        g.name,
        g.node,
        emoji,
        status,
        format_uptime(g.uptime_seconds),
        g.cpu_percent,
        g.mem_used_mb,
        g.mem_total_mb,
        g.mem_percent,
    );
    // 0.0 means "no data", not an empty disk
    if g.disk_total_gb > 0.0 && g.disk_used_gb > 0.0 {
        text.push_str(&format!("\n💾 Disk: {:.1} / {:.1} GB", g.disk_used_gb, g.disk_total_gb));
    } else if g.disk_total_gb > 0.0 {
        text.push_str(&format!("\n💾 Disk: {:.1} GB", g.disk_total_gb));
    }
    text
}

pub fn details_buttons(kind: GuestKind, id: u32, node: &str) -> Vec<Vec<Button>> {
    let confirm = |action| CallbackData::Confirm {
        kind,
        action,
        id,
        node: node.to_string(),
    };
    vec![
        vec![Button::new("▶️ Start", &confirm(Action::Start))],
        vec![Button::new("⏹️ Stop", &confirm(Action::Stop))],
        vec![Button::new("🔄 Reboot", &confirm(Action::Reboot))],
        vec![Button::new(
            "💻 Console",
            &CallbackData::Console {
                kind,
                id,
                node: node.to_string(),
            },
        )],
        vec![Button::new(
            "🔄 Refresh details",
            &CallbackData::Select {
                kind,
                id,
                node: node.to_string(),
            },
        )],
        vec![Button::new("Back to list", &CallbackData::Refresh { kind })],
    ]
}

pub fn guest_details(g: &GuestRecord) -> Reply {
    Reply::plain(guest_details_text(g)).with_buttons(details_buttons(g.kind, g.id, &g.node))
}

pub fn guest_not_found(kind: GuestKind, id: u32) -> Reply {
    Reply::plain(format!("{} {} not found.", kind.label(), id))
}

pub fn confirm_prompt(kind: GuestKind, action: Action, id: u32, node: &str) -> Reply {
    Reply::plain(format!("⚠️ Really {} {} {}?", action, kind.label(), id)).with_buttons(vec![vec![
        Button::new(
            "✅ Yes",
            &CallbackData::Act {
                kind,
                action,
                id,
                node: node.to_string(),
            },
        ),
        Button::new(
            "❌ Cancel",
            &CallbackData::Select {
                kind,
                id,
                node: node.to_string(),
            },
        ),
    ]])
}

pub fn action_failure(kind: GuestKind, id: u32, failure: &ActionFailure) -> String {
    match failure {
        ActionFailure::AlreadyRunning => format!("❌ {} is already running", kind.label()),
        ActionFailure::AlreadyStopped => format!("❌ {} is already stopped", kind.label()),
        ActionFailure::RemoteServerError { status } => format!("❌ Proxmox server error ({status})"),
        ActionFailure::NotFound => format!("❌ {} {} was not found on any node", kind.label(), id),
        ActionFailure::Unknown(text) => format!("❌ Error: {text}"),
    }
}

/// Converged actions show the refreshed guest; unconfirmed ones say so.
pub fn action_outcome(kind: GuestKind, id: u32, action: Action, outcome: &ActionOutcome) -> Reply {
    match outcome {
        ActionOutcome::Completed {
            node,
            path,
            convergence: Convergence::Converged { record, .. },
        } => {
            let forced = if path.is_forced() { " (forced)" } else { "" };
            Reply::plain(format!(
                "✅ {} done{}\n\n{}",
                capitalize(action.as_str()),
                forced,
                guest_details_text(record)
            ))
            .with_buttons(details_buttons(kind, id, node))
        }
        ActionOutcome::Completed { node, path, .. } => Reply::plain(format!(
            "✅ {} sent to {} {} ({}). The new state is not confirmed yet.",
            capitalize(action.as_str()),
            kind.label(),
            id,
            path
        ))
        .with_buttons(details_buttons(kind, id, node)),
        ActionOutcome::Failed(failure) => Reply::plain(action_failure(kind, id, failure)),
    }
}

pub fn console_entered(kind: GuestKind, id: u32) -> Reply {
    Reply::markdown(format!(
        "💻 *Console for {} {}*\n\n\
         Every message you send now runs as a command.\nType `exit` to leave.",
        kind.label(),
        id
    ))
}

pub fn console_left() -> Reply {
    Reply::plain("🔌 Console closed. Normal mode restored.")
}

pub fn guest_output(output: &str) -> Reply {
    Reply::markdown(format!("```\n{output}\n```"))
}

pub fn host_output(output: &str) -> Reply {
    Reply::html(format!("<pre><code>{}</code></pre>", escape_html(output)))
}

pub fn host_status(summary: &str) -> Reply {
    Reply::html(format!("📊 <b>Host status:</b>\n{}", escape_html(summary)))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
