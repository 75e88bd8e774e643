use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub chat: ChatConf,
    pub proxmox: ProxmoxConf,
    pub alerts: AlertConf,
    pub http: HttpConf,
    pub logging: LogConf,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ChatConf {
    pub bot_token: String,
    /// Chat ids allowed to talk to the bot; also the alert recipients.
    pub whitelist: Vec<i64>,
    pub api_base: String,
}

impl Default for ChatConf {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            whitelist: Vec::new(),
            api_base: "https://api.telegram.org".into(),
        }
    }
}

impl fmt::Debug for ChatConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConf")
            .field("bot_token", &redacted(&self.bot_token))
            .field("whitelist", &self.whitelist)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProxmoxConf {
    pub host: String,
    pub user: String,
    pub token_name: String,
    pub token_value: String,
    pub port: u16,
    pub verify_tls: bool,
    pub request_timeout_secs: u64,
}

impl Default for ProxmoxConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            user: String::new(),
            token_name: String::new(),
            token_value: String::new(),
            port: 8006,
            verify_tls: false,
            request_timeout_secs: 30,
        }
    }
}

impl ProxmoxConf {
    pub fn base_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl fmt::Debug for ProxmoxConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxmoxConf")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("token_name", &self.token_name)
            .field("token_value", &redacted(&self.token_value))
            .field("port", &self.port)
            .field("verify_tls", &self.verify_tls)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConf {
    pub cpu_temp_threshold: f32,
    pub cpu_usage_threshold: f32,
    pub ram_usage_threshold: f32,
    pub check_interval_secs: u64,
}

impl Default for AlertConf {
    fn default() -> Self {
        Self {
            cpu_temp_threshold: 75.0,
            cpu_usage_threshold: 80.0,
            ram_usage_threshold: 80.0,
            check_interval_secs: 300,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
    /// Shared secret expected in `x-api-key`; every protected route is denied while unset.
    pub api_key: Option<String>,
}

impl Default for HttpConf {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            api_key: None,
        }
    }
}

impl fmt::Debug for HttpConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConf")
            .field("bind", &self.bind)
            .field("api_key", &self.api_key.as_deref().map(redacted))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConf {
    pub dir: PathBuf,
    pub max_bytes: u64,
    pub backups: usize,
}

impl Default for LogConf {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            max_bytes: 5 * 1024 * 1024,
            backups: 3,
        }
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

impl BotConfig {
    /// Defaults, then the YAML file named by `PROXBOT_CONFIG` (if present),
    /// then the process environment after `.env` has been loaded.
    pub async fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let path = std::env::var("PROXBOT_CONFIG").unwrap_or_else(|_| "proxbot.yaml".into());
        let mut config = Self::from_file(Path::new(&path)).await?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// A missing file yields the defaults.
    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let txt = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&txt).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from a key lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BOT_TOKEN") {
            self.chat.bot_token = v.trim().to_string();
        }
        if let Some(v) = get("WHITELIST") {
            self.chat.whitelist = parse_whitelist(&v)?;
        }
        if let Some(v) = get("TELEGRAM_API_BASE") {
            self.chat.api_base = v.trim().trim_end_matches('/').to_string();
        }

        if let Some(v) = get("PROXMOX_HOST").or_else(|| get("HOST")) {
            self.proxmox.host = v.trim().to_string();
        }
        if let Some(v) = get("PROXMOX_USER") {
            self.proxmox.user = v.trim().to_string();
        }
        if let Some(v) = get("PROXMOX_TOKEN_NAME") {
            self.proxmox.token_name = v.trim().to_string();
        }
        if let Some(v) = get("PROXMOX_TOKEN_VALUE") {
            self.proxmox.token_value = v.trim().to_string();
        }
        if let Some(v) = get("PROXMOX_PORT") {
            self.proxmox.port = parse_value("PROXMOX_PORT", &v)?;
        }
        if let Some(v) = get("PROXMOX_VERIFY_TLS") {
            self.proxmox.verify_tls = parse_bool("PROXMOX_VERIFY_TLS", &v)?;
        }
        if !self.proxmox.user.is_empty() && !self.proxmox.user.contains('@') {
            self.proxmox.user.push_str("@pam");
        }

        if let Some(v) = get("CPU_TEMP_THRESHOLD") {
            self.alerts.cpu_temp_threshold = parse_value("CPU_TEMP_THRESHOLD", &v)?;
        }
        if let Some(v) = get("CPU_USAGE_THRESHOLD") {
            self.alerts.cpu_usage_threshold = parse_value("CPU_USAGE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("RAM_USAGE_THRESHOLD") {
            self.alerts.ram_usage_threshold = parse_value("RAM_USAGE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("CHECK_INTERVAL") {
            self.alerts.check_interval_secs = parse_value("CHECK_INTERVAL", &v)?;
        }

        if let Some(v) = get("PROXBOT_BIND") {
            self.http.bind = v.trim().to_string();
        }
        if let Some(v) = get("PROXBOT_API_KEY") {
            self.http.api_key = Some(v.trim().to_string());
        }
        if let Some(v) = get("PROXBOT_LOG_DIR") {
            self.logging.dir = PathBuf::from(v.trim());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.chat.bot_token.is_empty() {
            missing.push("BOT_TOKEN");
        }
        if self.chat.whitelist.is_empty() {
            missing.push("WHITELIST");
        }
        if self.proxmox.user.is_empty() {
            missing.push("PROXMOX_USER");
        }
        if self.proxmox.token_name.is_empty() {
            missing.push("PROXMOX_TOKEN_NAME");
        }
        if self.proxmox.token_value.is_empty() {
            missing.push("PROXMOX_TOKEN_VALUE");
        }
        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        // a zero interval would re-run the alert checks back to back
        if self.alerts.check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHECK_INTERVAL",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.alerts.check_interval_secs)
    }
}

fn parse_whitelist(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| ConfigError::InvalidValue {
                key: "WHITELIST",
                value: s.to_string(),
            })
        })
        .collect()
}

fn parse_value<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
        }),
    }
}
