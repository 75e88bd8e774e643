use super::retry::{with_retry, RetryPolicy};
use super::types::{
    AgentExecStarted, AgentExecStatus, Envelope, GuestEntry, NodeEntry, StatusCurrent,
};
use super::{ApiError, ControlPlane, PowerCall};
use crate::config::ProxmoxConf;
use crate::health::HealthTracker;
use crate::models::GuestKind;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

/// Proxmox VE REST client authenticated with an API token.
///
/// The connection is established on first use and verified with
/// `GET /nodes`. A failed attempt leaves the client unconnected so the next
/// call tries again; concurrent first calls share one attempt.
///
/// With a [`HealthTracker`] attached, every finished request updates the
/// reported API status.
pub struct ProxmoxClient {
    conf: ProxmoxConf,
    base_url: String,
    retry: RetryPolicy,
    conn: OnceCell<Connection>,
    health: Option<HealthTracker>,
}

struct Connection {
    http: reqwest::Client,
    base_url: String,
    auth: String,
}

impl Connection {
    fn build(conf: &ProxmoxConf, base_url: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!conf.verify_tls)
            .timeout(conf.request_timeout())
            .build()
            .map_err(|e| ApiError::Connectivity(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: format!("PVEAPIToken={}!{}={}", conf.user, conf.token_name, conf.token_value),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let resp = req.header(AUTHORIZATION, &self.auth).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or_default();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_response(status.as_u16(), &format!("{reason} {body}")));
        }
        let envelope: Envelope<T> = resp.json().await?;
        Ok(envelope.data)
    }
}

impl ProxmoxClient {
    pub fn new(conf: ProxmoxConf) -> Self {
        let base_url = conf.base_url();
        Self {
            conf,
            base_url,
            retry: RetryPolicy::default(),
            conn: OnceCell::new(),
            health: None,
        }
    }

    /// Point the client at an arbitrary API root (e.g. a local test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_health(mut self, health: HealthTracker) -> Self {
        self.health = Some(health);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.conn.initialized()
    }

    /// Connect now instead of on first use.
    pub async fn ensure_connected(&self) -> Result<(), ApiError> {
        let result = self.connection().await.map(|_| ());
        self.observe(&result);
        result
    }

    /// Any answer from the API counts as reachable, even an error status.
    fn observe<T>(&self, result: &Result<T, ApiError>) {
        let Some(health) = &self.health else { return };
        match result {
            Err(ApiError::Connectivity(_) | ApiError::Timeout) => health.mark_api_unreachable(),
            Err(ApiError::Unauthorized) => health.mark_api_unauthorized(),
            _ => health.mark_api_connected(),
        }
    }

    async fn connection(&self) -> Result<&Connection, ApiError> {
        self.conn.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<Connection, ApiError> {
        let conn = Connection::build(&self.conf, &self.base_url)?;
        match conn.send::<Vec<NodeEntry>>(conn.http.get(conn.url("/nodes"))).await {
            Ok(nodes) => {
                info!(
                    "Connected to Proxmox API at {}:{} ({} node(s))",
                    self.conf.host,
                    self.conf.port,
                    nodes.len()
                );
                Ok(conn)
            }
            Err(e) => {
                error!("Failed to connect to Proxmox API at {}: {}", self.base_url, e);
                Err(e)
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let result = with_retry(&self.retry, &format!("GET {path}"), || async move {
            let conn = self.connection().await?;
            debug!("GET {}", path);
            conn.send(conn.http.get(conn.url(path))).await
        })
        .await;
        self.observe(&result);
        result
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, String)],
        timeout: Option<std::time::Duration>,
    ) -> Result<T, ApiError> {
        let result = async {
            let conn = self.connection().await?;
            debug!("POST {}", path);
            let mut req = conn.http.post(conn.url(path)).form(form);
            if let Some(t) = timeout {
                req = req.timeout(t);
            }
            conn.send(req).await
        }
        .await;
        self.observe(&result);
        result
    }
}

#[async_trait]
impl ControlPlane for ProxmoxClient {
    async fn list_nodes(&self) -> Result<Vec<NodeEntry>, ApiError> {
        self.get("/nodes").await
    }

    async fn list_guests(&self, node: &str, kind: GuestKind) -> Result<Vec<GuestEntry>, ApiError> {
        self.get(&format!("/nodes/{}/{}", node, kind.api_segment())).await
    }

    async fn guest_status(
        &self,
        node: &str,
        kind: GuestKind,
        id: u32,
    ) -> Result<StatusCurrent, ApiError> {
        self.get(&format!("/nodes/{}/{}/{}/status/current", node, kind.api_segment(), id))
            .await
    }

    async fn vm_config(&self, node: &str, id: u32) -> Result<Map<String, Value>, ApiError> {
        self.get(&format!("/nodes/{}/qemu/{}/config", node, id)).await
    }

    async fn power(
        &self,
        node: &str,
        kind: GuestKind,
        id: u32,
        call: PowerCall,
    ) -> Result<(), ApiError> {
        let path = format!(
            "/nodes/{}/{}/{}/status/{}",
            node,
            kind.api_segment(),
            id,
            call.endpoint()
        );
        let form: Vec<(&str, String)> = call
            .soft_timeout()
            .map(|t| vec![("timeout", t.as_secs().to_string())])
            .unwrap_or_default();
        let _task: Value = self.post(&path, &form, call.soft_timeout()).await?;
        Ok(())
    }

    async fn agent_exec(&self, node: &str, id: u32, command: &[String]) -> Result<u64, ApiError> {
        let form: Vec<(&str, String)> =
            command.iter().map(|part| ("command", part.clone())).collect();
        let started: AgentExecStarted = self
            .post(&format!("/nodes/{}/qemu/{}/agent/exec", node, id), &form, None)
            .await?;
        Ok(started.pid)
    }

    async fn agent_exec_status(
        &self,
        node: &str,
        id: u32,
        pid: u64,
    ) -> Result<AgentExecStatus, ApiError> {
        self.get(&format!("/nodes/{}/qemu/{}/agent/exec-status?pid={}", node, id, pid))
            .await
    }
}
