//! Whitelist gate in front of the dispatcher.

use crate::dispatch::Inbound;
use crate::sink::{broadcast, NotificationSink, TextFormat};
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct AccessGate {
    whitelist: Vec<i64>,
    sink: Arc<dyn NotificationSink>,
}

impl AccessGate {
    pub fn new(whitelist: Vec<i64>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { whitelist, sink }
    }

    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.whitelist.contains(&user_id)
    }

    /// `true` when the sender may use the bot. Anyone else is logged and
    /// reported to every whitelisted admin.
    pub async fn check(&self, update: &Inbound) -> bool {
        if self.is_authorized(update.user.id) {
            return true;
        }

        let user = &update.user;
        let request = update.text.as_deref().unwrap_or("callback");
        warn!(
            "Unauthorized access: id={} name={:?} username={:?} request={:?}",
            user.id, user.first_name, user.username, request
        );

        let report = format!(
            "📋 Unauthorized access blocked\nUser: {} (@{}, id {})\nRequest: {}",
            user.first_name.as_deref().unwrap_or("?"),
            user.username.as_deref().unwrap_or("-"),
            user.id,
            request
        );
        broadcast(self.sink.as_ref(), &self.whitelist, &report, TextFormat::Plain).await;
        false
    }
}
