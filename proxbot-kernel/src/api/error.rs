use crate::models::GuestKind;

/// Failures surfaced by the control-plane client
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("control plane unreachable: {0}")]
    Connectivity(String),
    #[error("control plane rejected the API token")]
    Unauthorized,
    #[error("{kind} {id} was not found on any node")]
    NotFound { kind: GuestKind, id: u32 },
    #[error("guest is already running")]
    AlreadyRunning,
    #[error("guest is not running")]
    AlreadyStopped,
    #[error("QEMU guest agent is not installed or not running")]
    AgentUnavailable,
    #[error("control plane server error ({status}): {message}")]
    ServerError { status: u16, message: String },
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Classify a failed HTTP response.
    ///
    /// Proxmox reports guest state conflicts as 5xx responses whose text names
    /// the condition, so the text is checked before the status code.
    pub fn from_response(status: u16, text: &str) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("guest agent") {
            ApiError::AgentUnavailable
        } else if lower.contains("already running") {
            ApiError::AlreadyRunning
        } else if lower.contains("not running") {
            ApiError::AlreadyStopped
        } else if status == 401 || status == 403 {
            ApiError::Unauthorized
        } else if status >= 500 {
            ApiError::ServerError {
                status,
                message: text.trim().to_string(),
            }
        } else {
            ApiError::Other(format!("HTTP {}: {}", status, text.trim()))
        }
    }

    /// Whether a read may be attempted again after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::Connectivity(_)
                | ApiError::Timeout
                | ApiError::ServerError { .. }
                | ApiError::Other(_)
        )
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Other(format!("unexpected response body: {e}"))
        } else {
            ApiError::Connectivity(e.to_string())
        }
    }
}
