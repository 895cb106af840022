//! Configuration file model and lookup.
//!
//! `waypoint.yaml` mirrors the layer configs of the workspace crates, so each
//! section deserializes straight into the type its crate consumes.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use action_locator::LocatorConfig;
use action_primitives::ExecutorConfig;
use agent_core::{OpenAiConfig, PipelineConfig};
use cdp_adapter::CdpConfig;
use perceiver_structural::PerceiverOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const LOCAL_CONFIG_PATH: &str = "config/waypoint.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WaypointConfig {
    pub browser: CdpConfig,
    pub llm: LlmSettings,
    pub executor: ExecutorConfig,
    pub locator: LocatorConfig,
    pub perceiver: PerceiverOptions,
    pub recording: RecordingSettings,
    pub inference_log: InferenceLogSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub base_url: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub act_max_retries: u32,
    pub max_tokens: Option<u32>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
            temperature: 0.1,
            act_max_retries: 2,
            max_tokens: None,
        }
    }
}

impl LlmSettings {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            act_max_retries: self.act_max_retries,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Client settings with the key read from `api_key_env`.
    pub fn client_config(&self) -> Result<OpenAiConfig, ConfigError> {
        let key = env::var(&self.api_key_env)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(format!("environment variable {} is not set", self.api_key_env))
            })?;
        Ok(OpenAiConfig {
            api_keys: key.split(',').map(|k| k.trim().to_string()).collect(),
            model: self.model.clone(),
            api_base: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("sessions"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceLogSettings {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for InferenceLogSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("inference_logs"),
        }
    }
}

pub struct LoadedConfig {
    pub config: WaypointConfig,
    /// Where the config was read from, or where `config init` would write it.
    pub path: PathBuf,
    pub from_file: bool,
}

impl WaypointConfig {
    pub fn from_yaml(raw: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })
    }

    /// Applies `WAYPOINT_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("WAYPOINT_HEADLESS") {
            match parse_flag(&raw) {
                Some(flag) => self.browser.headless = flag,
                None => warn!(value = %raw, "ignoring unparseable WAYPOINT_HEADLESS"),
            }
        }
        if let Some(raw) = lookup("WAYPOINT_DISABLE_SANDBOX") {
            match parse_flag(&raw) {
                Some(flag) => self.browser.disable_sandbox = flag,
                None => warn!(value = %raw, "ignoring unparseable WAYPOINT_DISABLE_SANDBOX"),
            }
        }
        if let Some(path) = lookup("WAYPOINT_CHROME").filter(|v| !v.trim().is_empty()) {
            self.browser.executable = PathBuf::from(path.trim());
        }
        if let Some(model) = lookup("WAYPOINT_LLM_MODEL").filter(|v| !v.trim().is_empty()) {
            self.llm.model = model.trim().to_string();
        }
        if let Some(url) = lookup("WAYPOINT_LLM_BASE_URL").filter(|v| !v.trim().is_empty()) {
            self.llm.base_url = url.trim().to_string();
        }
    }

    /// Every problem found, empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.llm.model.trim().is_empty() {
            issues.push("llm.model must not be empty".to_string());
        }
        if !(self.llm.base_url.starts_with("http://") || self.llm.base_url.starts_with("https://"))
        {
            issues.push(format!("llm.base_url is not an http(s) URL: {}", self.llm.base_url));
        }
        if self.llm.api_key_env.trim().is_empty() {
            issues.push("llm.api_key_env must name an environment variable".to_string());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            issues.push(format!(
                "llm.temperature must be within 0..=2, got {}",
                self.llm.temperature
            ));
        }
        if self.locator.budget_ms == 0 {
            issues.push("locator.budget_ms must be positive".to_string());
        }
        if self.executor.typing_delay_min_ms > self.executor.typing_delay_max_ms {
            issues.push("executor.typing_delay_min_ms exceeds typing_delay_max_ms".to_string());
        }
        if self.browser.websocket_url.is_none() && self.browser.executable.as_os_str().is_empty() {
            issues.push(
                "browser.executable is empty and no Chrome was detected; set WAYPOINT_CHROME"
                    .to_string(),
            );
        }
        issues
    }

    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues.join("; ")))
        }
    }
}

/// Explicit path, then `./config/waypoint.yaml`, then the user config dir.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(LOCAL_CONFIG_PATH);
    if local.exists() {
        return local;
    }
    match dirs::config_dir() {
        Some(dir) => dir.join("waypoint").join("config.yaml"),
        None => local,
    }
}

/// Loads the config (defaults when no file exists) and applies env overrides.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let path = resolve_config_path(explicit);
    let (mut config, from_file) = if path.exists() {
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "loaded configuration");
        (WaypointConfig::from_yaml(&raw, &path)?, true)
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        (WaypointConfig::default(), false)
    };
    config.apply_env_overrides();
    Ok(LoadedConfig {
        config,
        path,
        from_file,
    })
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
