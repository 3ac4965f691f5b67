use std::path::Path;

use crate::config::schema::ClientConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClientConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = serde_json::from_str(content)?;

    validate_config(&config)?;

    Ok(config)
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub(crate) fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.api_base_url.trim().is_empty() {
        return Err(invalid("apiBaseUrl must not be empty"));
    }
    if config.sync_threshold_bytes == 0 {
        return Err(invalid("syncThresholdBytes must be > 0"));
    }
    if config.poll_interval_ms == 0 {
        return Err(invalid("pollIntervalMs must be > 0"));
    }
    if config.batch_width == 0 {
        return Err(invalid("batchWidth must be > 0"));
    }
    if !config.plans.contains_key(&config.default_plan) {
        return Err(invalid(format!(
            "defaultPlan '{}' is not defined in plans",
            config.default_plan
        )));
    }
    for (name, plan) in &config.plans {
        if plan.local_history_cap == 0 {
            return Err(invalid(format!(
                "plan '{}' must allow at least one history entry",
                name
            )));
        }
    }

    Ok(())
}
