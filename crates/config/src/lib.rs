//! Configuration management for the eventpump runtime
//!
//! Configuration is layered with figment: an optional YAML file first, then
//! environment variables prefixed with `EVENTPUMP_` (nested keys separated by
//! `__`, e.g. `EVENTPUMP_GENERAL__TICK_PERIOD=5s`).
//!
//! Components read their own section by dotted path and fall back to the
//! section type's `Default` when the section is absent:
//!
//! ```rust
//! use eventpump_config::{PipelineSettings, PumpConfig};
//!
//! let config = PumpConfig::from_yaml_str(
//!     "general:\n  tick_period: 2s\npipeline:\n  echo:\n    stop_on_errors: false\n",
//! ).unwrap();
//!
//! assert_eq!(config.general().tick_period.as_secs(), 2);
//! let settings: PipelineSettings = config.pipeline("echo").unwrap();
//! assert!(!settings.stop_on_errors);
//! ```

pub mod duration;

pub use duration::{parse_bool, parse_duration};

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "EVENTPUMP_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Process-wide settings consumed by the application governor
#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    /// Interval between `tick` publications
    #[serde(default = "default_tick_period", deserialize_with = "duration::deserialize")]
    pub tick_period: Duration,

    /// How long the exit phase waits for sources to wind down
    #[serde(default = "default_exit_timeout", deserialize_with = "duration::deserialize")]
    pub exit_timeout: Duration,

    /// Enable debug output
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            tick_period: default_tick_period(),
            exit_timeout: default_exit_timeout(),
            verbose: false,
        }
    }
}

impl GeneralConfig {
    /// Validate the general section
    pub fn validate(&self) -> Result<()> {
        if self.tick_period.is_zero() {
            return Err(ConfigError::ValidationError(
                "general.tick_period must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-pipeline settings, read from `pipeline.<id>`
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSettings {
    /// Move the pipeline into the error state on the first stage failure
    #[serde(default = "default_true")]
    pub stop_on_errors: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            stop_on_errors: true,
        }
    }
}

/// Loaded configuration tree
#[derive(Debug, Clone)]
pub struct PumpConfig {
    figment: Figment,
    general: GeneralConfig,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            figment: Figment::new(),
            general: GeneralConfig::default(),
        }
    }
}

impl PumpConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::LoadError(format!(
                    "configuration file '{}' does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(figment)
    }

    /// Build configuration from an inline YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::from_figment(Figment::new().merge(Yaml::string(yaml)))
    }

    /// Build configuration from an already assembled figment
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let general = extract_or_default::<GeneralConfig>(&figment, "general")?;
        general.validate()?;

        Ok(Self { figment, general })
    }

    /// The `general` section
    pub fn general(&self) -> &GeneralConfig {
        &self.general
    }

    /// Mutable access to the `general` section (command-line overrides)
    pub fn general_mut(&mut self) -> &mut GeneralConfig {
        &mut self.general
    }

    /// Extract a section by dotted path, defaulting when it is absent
    pub fn section<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        extract_or_default(&self.figment, path)
    }

    /// Settings for the pipeline with the given id
    pub fn pipeline(&self, pipeline_id: &str) -> Result<PipelineSettings> {
        self.section(&format!("pipeline.{}", pipeline_id))
    }

    /// Settings for one stage of a pipeline, read from `pipeline.<id>.<stage>`
    pub fn stage<T>(&self, pipeline_id: &str, stage_id: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        self.section(&format!("pipeline.{}.{}", pipeline_id, stage_id))
    }
}

fn extract_or_default<T>(figment: &Figment, path: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if figment.find_value(path).is_err() {
        return Ok(T::default());
    }

    figment
        .extract_inner(path)
        .map_err(|e| ConfigError::LoadError(format!("section '{}': {}", path, e)))
}

fn default_tick_period() -> Duration {
    Duration::from_secs(1)
}

fn default_exit_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct FileSection {
        #[serde(default)]
        path: String,
        #[serde(default)]
        post: Option<String>,
    }

    #[test]
    fn test_defaults_when_empty() {
        let config = PumpConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.general().tick_period, Duration::from_secs(1));
        assert_eq!(config.general().exit_timeout, Duration::from_secs(5));
        assert!(!config.general().verbose);
        assert!(config.pipeline("missing").unwrap().stop_on_errors);
    }

    #[test]
    fn test_general_section_parsing() {
        let config = PumpConfig::from_yaml_str(
            "general:\n  tick_period: 500ms\n  exit_timeout: 10\n  verbose: true\n",
        )
        .unwrap();

        assert_eq!(config.general().tick_period, Duration::from_millis(500));
        assert_eq!(config.general().exit_timeout, Duration::from_secs(10));
        assert!(config.general().verbose);
    }

    #[test]
    fn test_zero_tick_period_rejected() {
        let result = PumpConfig::from_yaml_str("general:\n  tick_period: 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_stage_section() {
        let config = PumpConfig::from_yaml_str(
            "pipeline:\n  files:\n    stop_on_errors: true\n    source:\n      path: /tmp/in\n      post: move\n",
        )
        .unwrap();

        let section: FileSection = config.stage("files", "source").unwrap();
        assert_eq!(section.path, "/tmp/in");
        assert_eq!(section.post.as_deref(), Some("move"));

        let missing: FileSection = config.stage("files", "sink").unwrap();
        assert_eq!(missing, FileSection::default());
    }

    #[test]
    fn test_malformed_section_reports_path() {
        let config = PumpConfig::from_yaml_str("pipeline:\n  bad:\n    stop_on_errors: [1, 2]\n")
            .unwrap();
        let err = config.pipeline("bad").unwrap_err();
        assert!(err.to_string().contains("pipeline.bad"));
    }
}
