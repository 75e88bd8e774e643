//! Routes one chat update to the component that answers it.

use crate::actions::ActionController;
use crate::callbacks::CallbackData;
use crate::console::GuestCommandExecutor;
use crate::directory::Directory;
use crate::models::{ActionRequest, ActiveConsoleSession, GuestKind};
use crate::render::{self, Reply};
use crate::session::SharedSession;
use proxbot_host::HostMetrics;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Deserialize)]
pub struct UserRef {
    pub id: i64,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Normalized chat update as posted by the gateway: a message or a button press.
#[derive(Debug, Clone, Deserialize)]
pub struct Inbound {
    pub chat_id: i64,
    pub user: UserRef,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub callback: Option<String>,
}

pub struct Dispatcher {
    directory: Directory,
    actions: ActionController,
    executor: GuestCommandExecutor,
    metrics: Arc<dyn HostMetrics>,
}

impl Dispatcher {
    pub fn new(
        directory: Directory,
        actions: ActionController,
        executor: GuestCommandExecutor,
        metrics: Arc<dyn HostMetrics>,
    ) -> Self {
        Self {
            directory,
            actions,
            executor,
            metrics,
        }
    }

    /// Reply for `update`, or `None` when the update is ignored.
    ///
    /// The session lock is taken only to read or change console mode, so
    /// other updates from the same chat are served while an action polls.
    pub async fn handle(&self, session: &SharedSession, update: &Inbound) -> Option<Reply> {
        if let Some(raw) = &update.callback {
            return match raw.parse::<CallbackData>() {
                Ok(data) => Some(self.on_callback(session, update.chat_id, data).await),
                Err(e) => {
                    warn!("Chat {}: {}", update.chat_id, e);
                    None
                }
            };
        }

        let text = update.text.as_deref()?.trim();
        if text.starts_with('/') {
            return self.on_command(text).await;
        }

        let console = {
            let mut session = session.lock().await;
            if text.eq_ignore_ascii_case("exit") {
                if let Some(console) = session.active_console.take() {
                    info!(
                        "Chat {} left console of {} {}",
                        session.chat_id, console.kind, console.guest_id
                    );
                    return Some(render::console_left());
                }
            }
            session.active_console.clone()
        };

        match console {
            Some(console) => {
                let output = self
                    .executor
                    .execute(console.kind, console.guest_id, &console.node, text)
                    .await;
                Some(render::guest_output(&output))
            }
            None => {
                debug!("Chat {}: ignoring free text outside console mode", update.chat_id);
                None
            }
        }
    }

    async fn on_command(&self, text: &str) -> Option<Reply> {
        let (head, args) = match text.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (text, ""),
        };
        // `/vm@proxbot` in group chats
        let command = head.split('@').next().unwrap_or(head);

        match command {
            "/start" | "/help" => Some(render::help_text()),
            "/status" => Some(self.host_status().await),
            "/vm" => Some(self.guest_list(GuestKind::Vm).await),
            "/lxc" => Some(self.guest_list(GuestKind::Container).await),
            "/console" if args.is_empty() => Some(Reply::plain("Usage: /console <command>")),
            "/console" => Some(render::host_output(&self.executor.execute_host(args).await)),
            other => {
                debug!("Unknown command {}", other);
                None
            }
        }
    }

    async fn on_callback(
        &self,
        session: &SharedSession,
        chat_id: i64,
        data: CallbackData,
    ) -> Reply {
        match data {
            CallbackData::Refresh { kind } => self.guest_list(kind).await,
            CallbackData::Select { kind, id, .. } => match self.directory.find(kind, id).await {
                Some(record) => render::guest_details(&record),
                None => render::guest_not_found(kind, id),
            },
            CallbackData::Confirm {
                kind,
                action,
                id,
                node,
            } => render::confirm_prompt(kind, action, id, &node),
            CallbackData::Act {
                kind,
                action,
                id,
                node,
            } => {
                info!("Chat {} requested {} on {} {}", chat_id, action, kind, id);
                let outcome = self
                    .actions
                    .execute(ActionRequest {
                        kind,
                        guest_id: id,
                        action,
                        node: Some(node),
                    })
                    .await;
                render::action_outcome(kind, id, action, &outcome)
            }
            CallbackData::Console { kind, id, node } => {
                info!("Chat {} entered console of {} {}", chat_id, kind, id);
                session.lock().await.active_console = Some(ActiveConsoleSession {
                    kind,
                    guest_id: id,
                    node,
                });
                render::console_entered(kind, id)
            }
        }
    }

    async fn guest_list(&self, kind: GuestKind) -> Reply {
        render::guest_list(kind, &self.directory.list_guests(kind).await)
    }

    async fn host_status(&self) -> Reply {
        let metrics = self.metrics.clone();
        match tokio::task::spawn_blocking(move || metrics.host_status_summary()).await {
            Ok(Ok(summary)) => render::host_status(&summary),
            Ok(Err(e)) => {
                error!("Host status failed: {:#}", e);
                Reply::plain(format!("❌ Failed to read host status: {e}"))
            }
            Err(e) => {
                error!("Host status task failed: {}", e);
                Reply::plain("❌ Failed to read host status")
            }
        }
    }
}
