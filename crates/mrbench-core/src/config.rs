//! Configuration model and YAML loading.
//!
//! The configuration is an explicit value built once by the caller and handed to the registry,
//! router and orchestrator. Every section is defaulted, so an empty file is valid.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MrbenchError, Result};
use crate::routing::{RoutingConstraints, RoutingPolicy};

pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 3600;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct MrbenchConfig {
    pub general: GeneralConfig,
    pub discovery: DiscoveryConfig,
    pub routing: RoutingConfig,
    /// Per-provider overrides keyed by provider name.
    pub providers: BTreeMap<String, ProviderConfig>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root of the per-run artifact tree.
    pub output_dir: PathBuf,
    /// Per-invocation timeout for prompt runs.
    pub timeout_secs: u64,
    /// Persist redacted prompt previews and raw prompt files.
    pub store_prompts: bool,
    /// Bound for each adapter's `detect()` inside `detect_all`.
    pub detect_timeout_ms: u64,
    /// Worker count for benchmark jobs. Only 1 is implemented; larger values run sequentially.
    pub parallelism: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./out"),
            timeout_secs: 300,
            store_prompts: false,
            detect_timeout_ms: 5000,
            parallelism: 1,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Searched after `PATH`.
    pub extra_paths: Vec<PathBuf>,
    /// Binaries located under one of these directories are reported as trusted.
    pub trusted_paths: Vec<PathBuf>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    pub default_policy: RoutingPolicy,
    pub preference_order: Vec<String>,
    pub constraints: RoutingConstraints,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_policy: RoutingPolicy::Preference,
            preference_order: ["ollama", "claude", "codex", "gemini", "goose", "opencode"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            constraints: RoutingConstraints::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProviderConfig {
    pub enabled: bool,
    /// Explicit binary path; skips the search path.
    pub binary: Option<PathBuf>,
    pub default_model: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: None,
            default_model: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `env_logger` filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl MrbenchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.general.timeout_secs)
    }

    pub fn detect_timeout(&self) -> Duration {
        Duration::from_millis(self.general.detect_timeout_ms)
    }

    pub fn provider(&self, name: &str) -> ProviderConfig {
        self.providers.get(name).cloned().unwrap_or_default()
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.providers.get(name).map_or(true, |p| p.enabled)
    }

    pub fn default_model(&self, name: &str) -> Option<&str> {
        self.providers
            .get(name)
            .and_then(|p| p.default_model.as_deref())
    }

    pub fn validate(&self) -> Result<()> {
        let t = self.general.timeout_secs;
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&t) {
            return Err(MrbenchError::Config(format!(
                "general.timeout_secs must be between {MIN_TIMEOUT_SECS} and {MAX_TIMEOUT_SECS}, got {t}"
            )));
        }
        if self.general.parallelism == 0 {
            return Err(MrbenchError::Config(
                "general.parallelism must be at least 1".into(),
            ));
        }
        if self.general.detect_timeout_ms == 0 {
            return Err(MrbenchError::Config(
                "general.detect_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Serialized form stored as a run's immutable config snapshot.
    pub fn snapshot_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mrbench").join("config.yaml"))
}

pub fn default_db_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("mrbench").join("mrbench.db"))
}

pub fn parse_config(yaml: &str) -> Result<MrbenchConfig> {
    let cfg: MrbenchConfig = if yaml.trim().is_empty() {
        MrbenchConfig::default()
    } else {
        serde_yaml::from_str(yaml)?
    };
    cfg.validate()?;
    Ok(cfg)
}

/// Loads configuration.
///
/// An explicit `path` must exist. Without one, the default location is tried and a missing
/// file yields the defaults.
pub fn load_config(path: Option<&Path>) -> Result<MrbenchConfig> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(MrbenchConfig::default()),
        },
    };

    if !path.exists() {
        if explicit {
            return Err(MrbenchError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), "no config file; using defaults");
        return Ok(MrbenchConfig::default());
    }

    let raw = std::fs::read_to_string(&path)?;
    parse_config(&raw).map_err(|e| match e {
        MrbenchError::Yaml(err) => {
            MrbenchError::Config(format!("failed to parse {}: {err}", path.display()))
        }
        other => other,
    })
}
