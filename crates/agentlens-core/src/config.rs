//! Configuration management for AgentLens
//!
//! Settings are read from `config.toml` (an explicit path, or the first one
//! found walking up from the current directory). String values written as
//! `${VAR}` are taken from the environment. Whatever the file leaves out is
//! resolved later from the runtime context or `AGENTLENS_*` variables.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// AgentLens configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LensConfig {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Model settings used as span defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model provider reported as `gen_ai.system` (openai, gemini, ...)
    pub provider: Option<String>,

    pub model_name: Option<String>,
}

/// Identity of the instrumented application
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// App name stamped on spans when the runtime does not supply one
    pub app_name: Option<String>,

    pub service_name: Option<String>,

    #[serde(default)]
    pub opentelemetry: OpenTelemetryConfig,
}

/// Exporter and metrics switches for the OpenTelemetry pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenTelemetryConfig {
    /// Gates every metric emission; disabled unless set
    pub enable_metrics: Option<bool>,

    pub stdout: Option<StdoutConfig>,

    pub file: Option<FileConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StdoutConfig {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileConfig {
    pub path: String,
}

impl OpenTelemetryConfig {
    pub fn metrics_enabled(&self) -> bool {
        self.enable_metrics.unwrap_or(false)
    }
}

impl ObservabilityConfig {
    /// App name from config, falling back to the service name
    pub fn effective_app_name(&self) -> Option<&str> {
        self.app_name
            .as_deref()
            .or(self.service_name.as_deref())
            .filter(|name| !name.is_empty())
    }
}

impl LensConfig {
    /// Load the nearest `config.toml`.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p.to_path_buf()
        } else {
            // Try to find config.toml in current directory or parent directories
            Self::find_config_file()?
        };

        tracing::debug!("Loading configuration from: {:?}", config_path);

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))
    }

    /// Parse configuration from TOML text and resolve `${VAR}` references
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let mut config: LensConfig = toml::from_str(contents)?;
        config.resolve_env_vars();
        Ok(config)
    }

    /// Find config.toml by searching current directory and parents
    fn find_config_file() -> Result<PathBuf> {
        let mut current = env::current_dir()?;

        loop {
            let config_path = current.join("config.toml");
            if config_path.exists() {
                return Ok(config_path);
            }

            if !current.pop() {
                break;
            }
        }

        Err(anyhow!(
            "config.toml not found. Create one with: cp config.toml.example config.toml"
        ))
    }

    /// Resolve ${VAR_NAME} references to environment variables
    fn resolve_env_vars(&mut self) {
        Self::resolve_field(&mut self.model.provider);
        Self::resolve_field(&mut self.model.model_name);
        Self::resolve_field(&mut self.observability.app_name);
        Self::resolve_field(&mut self.observability.service_name);

        if let Some(ref mut file) = self.observability.opentelemetry.file {
            if let Some(resolved) = Self::resolve_env_var(&file.path) {
                file.path = resolved;
            }
        }
    }

    fn resolve_field(field: &mut Option<String>) {
        if let Some(value) = field.as_deref() {
            *field = Self::resolve_env_var(value);
        }
    }

    /// Resolve a single ${VAR_NAME} reference
    fn resolve_env_var(value: &str) -> Option<String> {
        if value.starts_with("${") && value.ends_with('}') {
            let var_name = &value[2..value.len() - 1];
            env::var(var_name).ok()
        } else {
            Some(value.to_string())
        }
    }

    /// Create test-friendly defaults (stdout export off, metrics on)
    pub fn test_defaults() -> Self {
        Self {
            model: ModelConfig {
                provider: Some("test-provider".to_string()),
                model_name: Some("test-model".to_string()),
            },
            observability: ObservabilityConfig {
                app_name: Some("test-app".to_string()),
                service_name: None,
                opentelemetry: OpenTelemetryConfig {
                    enable_metrics: Some(true),
                    stdout: None,
                    file: None,
                },
            },
        }
    }
}
