use crate::domain::models::validate_duration;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::session_gateway::GatewaySettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const TIMER_JSON: &str = "timer.json";
const BASE_URL_ENV_KEYS: &[&str] = &["FOCUSBLOCK_API_BASE_URL", "FOCUS_API_BASE_URL"];
const API_TOKEN_ENV_KEYS: &[&str] = &["FOCUSBLOCK_API_TOKEN", "FOCUS_API_TOKEN"];

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigBundle {
    pub app: serde_json::Value,
    pub timer: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
    pub lookup_attempts: u8,
    pub lookup_base_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    pub default_duration_seconds: u64,
    pub tick_interval_ms: u64,
    pub remote: RemoteConfig,
}

impl TimerConfig {
    pub fn validate(&self) -> Result<(), String> {
        validate_duration(self.default_duration_seconds, "timer.defaultDurationSeconds")?;
        if self.tick_interval_ms == 0 {
            return Err("timer.tickIntervalMs must be > 0".to_string());
        }
        if self.remote.request_timeout_ms == 0 {
            return Err("timer.remote.requestTimeoutMs must be > 0".to_string());
        }
        Ok(())
    }

    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            base_url: self.remote.base_url.clone(),
            api_token: self.remote.api_token.clone(),
            request_timeout_ms: self.remote.request_timeout_ms,
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "FocusBlock"
            }),
        ),
        (
            TIMER_JSON,
            serde_json::json!({
                "schema": 1,
                "defaultDurationSeconds": 1500,
                "tickIntervalMs": 1000,
                "remote": {
                    "baseUrl": null,
                    "requestTimeoutMs": 10000,
                    "lookupAttempts": 2,
                    "lookupBaseDelayMs": 200
                }
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    Ok(ConfigBundle {
        app: read_config(&config_dir.join(APP_JSON))?,
        timer: read_config(&config_dir.join(TIMER_JSON))?,
    })
}

/// Reads `timer.json` and applies environment overrides for the remote
/// endpoint through `lookup`.
pub fn load_timer_config_with_lookup<F>(
    config_dir: &Path,
    lookup: F,
) -> Result<TimerConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = read_config(&config_dir.join(TIMER_JSON))?;
    let mut config: TimerConfig = serde_json::from_value(raw).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {TIMER_JSON}: {error}"))
    })?;

    if let Some(base_url) = lookup_value(&lookup, BASE_URL_ENV_KEYS) {
        config.remote.base_url = Some(base_url);
    }
    if let Some(api_token) = lookup_value(&lookup, API_TOKEN_ENV_KEYS) {
        config.remote.api_token = Some(api_token);
    }
    config.remote.base_url = config
        .remote
        .base_url
        .take()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    config.validate().map_err(InfraError::InvalidConfig)?;
    Ok(config)
}

pub fn read_app_name(config_dir: &Path) -> Result<String, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    let name = app
        .get("appName")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("FocusBlock");
    Ok(name.to_string())
}

fn lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
