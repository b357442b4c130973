use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

const CONFIG_FILE: &str = "draftboard.toml";

/// Top-level server configuration, loaded from `draftboard.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub log_format: LogFormat,
    pub store: StoreConfig,
    pub limits: LimitsConfig,
    pub persist: PersistConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            log_format: LogFormat::Text,
            store: StoreConfig::default(),
            limits: LimitsConfig::default(),
            persist: PersistConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
}

/// Where game records live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory for the `file` backend.
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Mailbox sizes and allocation bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Per-connection outbound mailbox. A peer that falls this far behind
    /// is evicted.
    pub outbound_buffer: usize,
    /// Capacity of each hub mailbox. Inbound tasks wait here when the hub
    /// is busy.
    pub hub_mailbox_capacity: usize,
    /// Attempts at finding an unused connection or game id.
    pub max_id_attempts: usize,
    pub max_frame_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            hub_mailbox_capacity: 16,
            max_id_attempts: 16,
            max_frame_bytes: 64 * 1024,
        }
    }
}

/// Retry policy for mirroring boards to the store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
        }
    }
}

impl PersistConfig {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.initial_backoff_ms.saturating_mul(factor))
    }
}

impl ServerConfig {
    /// Check the loaded values, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr {:?} is not a valid socket address",
                self.listen_addr
            ));
        }
        if self.limits.outbound_buffer == 0 {
            return Err("limits.outbound_buffer must be > 0".to_string());
        }
        if self.limits.hub_mailbox_capacity == 0 {
            return Err("limits.hub_mailbox_capacity must be > 0".to_string());
        }
        if self.limits.max_id_attempts == 0 {
            return Err("limits.max_id_attempts must be > 0".to_string());
        }
        if self.limits.max_frame_bytes == 0 {
            return Err("limits.max_frame_bytes must be > 0".to_string());
        }
        if self.persist.max_attempts == 0 {
            return Err("persist.max_attempts must be > 0".to_string());
        }
        if self.store.backend == StoreBackend::File && self.store.data_dir.as_os_str().is_empty()
        {
            return Err("store.data_dir must be set for the file backend".to_string());
        }
        Ok(())
    }

    /// Load config from `draftboard.toml` if it exists, then apply env var
    /// overrides. Runs before logging is set up, so anything worth reporting
    /// comes back as notices for the caller to log.
    pub fn load() -> (Self, Vec<ConfigNotice>) {
        let content = std::fs::read_to_string(CONFIG_FILE).ok();
        Self::load_from(content.as_deref(), |key| std::env::var(key).ok())
    }

    fn load_from(
        content: Option<&str>,
        var: impl Fn(&str) -> Option<String>,
    ) -> (Self, Vec<ConfigNotice>) {
        let mut notices = Vec::new();
        let mut config = match content {
            Some(content) => match toml::from_str::<ServerConfig>(content) {
                Ok(cfg) => {
                    notices.push(ConfigNotice::Loaded);
                    cfg
                },
                Err(e) => {
                    notices.push(ConfigNotice::ParseFailed(e.to_string()));
                    ServerConfig::default()
                },
            },
            None => {
                notices.push(ConfigNotice::NotFound);
                ServerConfig::default()
            },
        };
        config.apply_env(var, &mut notices);
        (config, notices)
    }

    fn apply_env(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
        notices: &mut Vec<ConfigNotice>,
    ) {
        if let Some(addr) = var("DRAFTBOARD_LISTEN_ADDR")
            && !addr.is_empty()
        {
            self.listen_addr = addr;
        }
        if let Some(dir) = var("DRAFTBOARD_DATA_DIR")
            && !dir.is_empty()
        {
            self.store.data_dir = PathBuf::from(dir);
        }
        match var("DRAFTBOARD_STORE").as_deref() {
            Some("memory") => self.store.backend = StoreBackend::Memory,
            Some("file") => self.store.backend = StoreBackend::File,
            Some(other) => notices.push(ConfigNotice::IgnoredEnv {
                key: "DRAFTBOARD_STORE",
                value: other.to_string(),
            }),
            None => {},
        }
        match var("DRAFTBOARD_LOG_FORMAT").as_deref() {
            Some("text") => self.log_format = LogFormat::Text,
            Some("json") => self.log_format = LogFormat::Json,
            Some(other) => notices.push(ConfigNotice::IgnoredEnv {
                key: "DRAFTBOARD_LOG_FORMAT",
                value: other.to_string(),
            }),
            None => {},
        }
        if let Some(val) = var("DRAFTBOARD_OUTBOUND_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) => self.limits.outbound_buffer = n,
                Err(_) => notices.push(ConfigNotice::IgnoredEnv {
                    key: "DRAFTBOARD_OUTBOUND_BUFFER",
                    value: val,
                }),
            }
        }
    }
}

/// Outcome of a config load step that should reach the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigNotice {
    Loaded,
    NotFound,
    ParseFailed(String),
    IgnoredEnv { key: &'static str, value: String },
}

impl ConfigNotice {
    pub fn log(&self) {
        match self {
            Self::Loaded => tracing::info!("Loaded configuration from {CONFIG_FILE}"),
            Self::NotFound => tracing::info!("No {CONFIG_FILE} found, using defaults"),
            Self::ParseFailed(e) => {
                tracing::warn!(error = %e, "Failed to parse {CONFIG_FILE}, using defaults");
            },
            Self::IgnoredEnv { key, value } => {
                tracing::warn!(key, value = %value, "Ignoring unrecognised env override");
            },
        }
    }
}
