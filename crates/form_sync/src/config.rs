use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{anyhow, Context};
use tracing::warn;

use crate::live::SAVE_DEBOUNCE_TIME;

pub const SETTINGS_FILE: &str = "form_sync.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub save_debounce_ms: u64,
    pub log_filter: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            save_debounce_ms: SAVE_DEBOUNCE_TIME.as_millis() as u64,
            log_filter: "info".into(),
        }
    }
}

impl SyncSettings {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

/// Defaults, then `form_sync.toml` in the working directory, then the
/// environment. A malformed file is logged and skipped.
pub fn load_settings() -> SyncSettings {
    let mut settings = SyncSettings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        if let Err(err) = apply_file_overrides(&mut settings, &raw) {
            warn!(file = SETTINGS_FILE, %err, "ignoring settings file");
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Like [`load_settings`] but reads an explicit file and fails on any error in it.
pub fn load_settings_from(path: &Path) -> anyhow::Result<SyncSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;

    let mut settings = SyncSettings::default();
    apply_file_overrides(&mut settings, &raw)
        .with_context(|| format!("invalid settings file '{}'", path.display()))?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file_overrides(settings: &mut SyncSettings, raw: &str) -> anyhow::Result<()> {
    let file_cfg = toml::from_str::<HashMap<String, toml::Value>>(raw)?;

    if let Some(v) = file_cfg.get("save_debounce_ms") {
        settings.save_debounce_ms = v
            .as_integer()
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| anyhow!("save_debounce_ms must be a non-negative integer"))?;
    }
    if let Some(v) = file_cfg.get("log_filter") {
        settings.log_filter = v
            .as_str()
            .ok_or_else(|| anyhow!("log_filter must be a string"))?
            .to_string();
    }

    Ok(())
}

fn apply_env_overrides(settings: &mut SyncSettings, lookup: impl Fn(&str) -> Option<String>) {
    for key in ["FORM_SYNC_SAVE_DEBOUNCE_MS", "APP__SAVE_DEBOUNCE_MS"] {
        if let Some(v) = lookup(key) {
            match v.trim().parse::<u64>() {
                Ok(parsed) => settings.save_debounce_ms = parsed,
                Err(_) => warn!(key, value = %v, "ignoring non-numeric debounce override"),
            }
        }
    }

    if let Some(v) = lookup("APP__LOG_FILTER") {
        settings.log_filter = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
