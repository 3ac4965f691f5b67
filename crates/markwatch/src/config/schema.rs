use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Payloads at or below this many bytes use the synchronous detection path.
pub const DEFAULT_SYNC_THRESHOLD_BYTES: u64 = 5 * 1024 * 1024;

pub const ENV_API_BASE_URL: &str = "MARKWATCH_API_BASE_URL";
pub const ENV_DATA_DIR: &str = "MARKWATCH_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_sync_threshold")]
    pub sync_threshold_bytes: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_batch_width")]
    pub batch_width: usize,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_plans")]
    pub plans: HashMap<String, PlanConfig>,
    #[serde(default = "default_plan_name")]
    pub default_plan: String,
}

/// Per-tier limits as they appear in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanConfig {
    pub local_history_cap: usize,
    pub cloud_fetch_limit: usize,
    #[serde(default)]
    pub features: HashMap<String, bool>,
}

fn default_api_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_sync_threshold() -> u64 {
    DEFAULT_SYNC_THRESHOLD_BYTES
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_session_ttl_secs() -> u64 {
    30 * 60
}

fn default_batch_width() -> usize {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_plan_name() -> String {
    "free".to_string()
}

fn plan(local_history_cap: usize, cloud_fetch_limit: usize, batch: bool) -> PlanConfig {
    let mut features = HashMap::new();
    features.insert("batchDetect".to_string(), batch);
    PlanConfig {
        local_history_cap,
        cloud_fetch_limit,
        features,
    }
}

fn default_plans() -> HashMap<String, PlanConfig> {
    let mut plans = HashMap::new();
    plans.insert("free".to_string(), plan(20, 20, false));
    plans.insert("personal".to_string(), plan(100, 100, true));
    plans.insert("pro".to_string(), plan(500, 300, true));
    plans.insert("enterprise".to_string(), plan(2000, 500, true));
    plans
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            sync_threshold_bytes: default_sync_threshold(),
            poll_interval_ms: default_poll_interval_ms(),
            session_ttl_secs: default_session_ttl_secs(),
            batch_width: default_batch_width(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            data_dir: None,
            plans: default_plans(),
            default_plan: default_plan_name(),
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs as i64)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Resolves the directory used for durable state.
    pub fn resolved_data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(default_data_dir)
    }

    /// Applies `MARKWATCH_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_BASE_URL) {
            if !url.trim().is_empty() {
                log::debug!("Using API base URL from {}", ENV_API_BASE_URL);
                self.api_base_url = url.trim().to_string();
            }
        }
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            if !dir.trim().is_empty() {
                self.data_dir = Some(PathBuf::from(dir.trim()));
            }
        }
    }
}

/// Returns the canonical data directory: `~/.markwatch/data`.
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".markwatch").join("data"))
}
