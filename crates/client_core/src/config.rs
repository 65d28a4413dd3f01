use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::geo_search::GeoSearchOptions;

pub const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub auth_token: Option<String>,
    pub fetch_timeout_ms: u64,
    pub geo_quiet_period_ms: u64,
    pub geo_tolerance_deg: f64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".into(),
            auth_token: None,
            fetch_timeout_ms: 10_000,
            geo_quiet_period_ms: 1_000,
            geo_tolerance_deg: 0.01,
        }
    }
}

impl ClientSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn geo_options(&self) -> GeoSearchOptions {
        GeoSearchOptions {
            quiet_period: Duration::from_millis(self.geo_quiet_period_ms),
            tolerance: self.geo_tolerance_deg,
            fetch_timeout: self.fetch_timeout(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    auth_token: Option<String>,
    fetch_timeout_ms: Option<u64>,
    geo_quiet_period_ms: Option<u64>,
    geo_tolerance_deg: Option<f64>,
}

/// Defaults, then `client.toml` in the working directory when present and
/// readable, then environment overrides.
pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();
    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        if let Ok(file_cfg) = toml::from_str::<FileSettings>(&raw) {
            apply_file(&mut settings, file_cfg);
        }
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Like [`load_settings`] with an explicit file that must exist and parse.
pub fn load_settings_from(path: &Path) -> anyhow::Result<ClientSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let file_cfg = toml::from_str::<FileSettings>(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;

    let mut settings = ClientSettings::default();
    apply_file(&mut settings, file_cfg);
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.api_base_url {
        settings.api_base_url = v;
    }
    if let Some(v) = file_cfg.auth_token {
        settings.auth_token = Some(v);
    }
    if let Some(v) = file_cfg.fetch_timeout_ms {
        settings.fetch_timeout_ms = v;
    }
    if let Some(v) = file_cfg.geo_quiet_period_ms {
        settings.geo_quiet_period_ms = v;
    }
    if let Some(v) = file_cfg.geo_tolerance_deg {
        settings.geo_tolerance_deg = v;
    }
}

fn apply_env(settings: &mut ClientSettings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Some(v) = var("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Some(v) = var("APP__AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }

    if let Some(parsed) = var("APP__FETCH_TIMEOUT_MS").and_then(|v| v.parse::<u64>().ok()) {
        settings.fetch_timeout_ms = parsed;
    }
    if let Some(parsed) = var("APP__GEO_QUIET_PERIOD_MS").and_then(|v| v.parse::<u64>().ok()) {
        settings.geo_quiet_period_ms = parsed;
    }
    if let Some(parsed) = var("APP__GEO_TOLERANCE_DEG").and_then(|v| v.parse::<f64>().ok()) {
        settings.geo_tolerance_deg = parsed;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
