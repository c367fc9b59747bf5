use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::client::PollPolicy;
use super::interaction::MachineConfig;
use super::orientation::ValidationPolicy;

const MIN_POLL_ATTEMPTS: u32 = 1;
const MIN_CACHE_CAPACITY: usize = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PreviewSettings {
    pub service_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    pub debounce_ms: u64,
    pub max_retries: u32,
    pub poll_base_ms: u64,
    pub poll_step_ms: u64,
    pub poll_cap_ms: u64,
    pub poll_max_attempts: u32,
    pub hover_debounce_ms: u64,
    pub animation_ms: u64,
    pub cache_capacity: usize,
    pub validation: ValidationPolicy,
    pub prefetch_on_hover: bool,
    pub request_timeout_secs: u64,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            service_url: "http://localhost:8787/api/preview".into(),
            watermark_url: None,
            bearer_token: None,
            debounce_ms: 200,
            max_retries: 3,
            poll_base_ms: 500,
            poll_step_ms: 250,
            poll_cap_ms: 4_000,
            poll_max_attempts: 30,
            hover_debounce_ms: 100,
            animation_ms: 300,
            cache_capacity: 64,
            validation: ValidationPolicy::Lenient,
            prefetch_on_hover: false,
            request_timeout_secs: 30,
        }
    }
}

impl PreviewSettings {
    /// Returns a redacted clone that replaces the token with masked form when non-empty.
    pub fn masked(&self) -> Self {
        let mut cloned = self.clone();
        if let Some(token) = cloned.bearer_token.as_mut() {
            let prefix: String = token.chars().take(2).collect();
            *token = format!("{}****", prefix);
        }
        cloned
    }

    pub fn normalize(mut self) -> Self {
        self.service_url = self.service_url.trim().to_string();
        self.watermark_url = trimmed_or_none(self.watermark_url.take());
        self.bearer_token = trimmed_or_none(self.bearer_token.take());
        self.poll_max_attempts = self.poll_max_attempts.max(MIN_POLL_ATTEMPTS);
        self.poll_cap_ms = self.poll_cap_ms.max(self.poll_base_ms);
        self.cache_capacity = self.cache_capacity.max(MIN_CACHE_CAPACITY);
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            base: Duration::from_millis(self.poll_base_ms),
            step: Duration::from_millis(self.poll_step_ms),
            cap: Duration::from_millis(self.poll_cap_ms),
            max_attempts: self.poll_max_attempts,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            hover_debounce: Duration::from_millis(self.hover_debounce_ms),
            animation: Duration::from_millis(self.animation_ms),
        }
    }
}

fn trimmed_or_none(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn load_preview_settings(path: &Path) -> io::Result<PreviewSettings> {
    let bytes = fs::read(path)?;
    let settings: PreviewSettings = serde_json::from_slice(&bytes)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(settings.normalize())
}

pub fn save_preview_settings(path: &Path, settings: &PreviewSettings) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(settings)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    fs::write(path, json)
}

pub fn default_settings_path(root: &Path) -> PathBuf {
    root.join("canvas_preview_settings.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let settings = PreviewSettings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.poll_policy(), PollPolicy::default());
        assert_eq!(settings.machine_config(), MachineConfig::default());
        assert_eq!(settings.validation, ValidationPolicy::Lenient);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: PreviewSettings = serde_json::from_str(
            r#"{"serviceUrl":"https://gen.example","maxRetries":5,"validation":"strict"}"#,
        )
        .expect("parse");
        assert_eq!(settings.service_url, "https://gen.example");
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.validation, ValidationPolicy::Strict);
        assert_eq!(settings.debounce_ms, 200);
    }

    #[test]
    fn normalize_trims_and_clamps() {
        let settings = PreviewSettings {
            service_url: "  https://gen.example  ".into(),
            watermark_url: Some("   ".into()),
            bearer_token: Some(" secret ".into()),
            poll_max_attempts: 0,
            cache_capacity: 0,
            ..PreviewSettings::default()
        }
        .normalize();
        assert_eq!(settings.service_url, "https://gen.example");
        assert_eq!(settings.watermark_url, None);
        assert_eq!(settings.bearer_token.as_deref(), Some("secret"));
        assert_eq!(settings.poll_max_attempts, 1);
        assert_eq!(settings.cache_capacity, 1);
    }

    #[test]
    fn masked_hides_token() {
        let settings = PreviewSettings {
            bearer_token: Some("sk-abcdef".into()),
            ..PreviewSettings::default()
        };
        assert_eq!(settings.masked().bearer_token.as_deref(), Some("sk****"));
    }

    #[test]
    fn settings_round_trip_through_disk() {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let path = default_settings_path(&temp.path().join("config"));
        let settings = PreviewSettings {
            watermark_url: Some("https://wm.example".into()),
            prefetch_on_hover: true,
            ..PreviewSettings::default()
        };
        save_preview_settings(&path, &settings).expect("save");
        assert_eq!(load_preview_settings(&path).expect("load"), settings);
    }
}
