//! Translator and VM configuration.
//!
//! Settings come from three layers, later ones winning: built-in defaults,
//! an optional `pytron.toml` with `[translator]` and `[vm]` tables, and the
//! `PYTRON_*` environment variables.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::translator::artifact::ArtifactCache;
use crate::vm::VmConfig;

/// Settings for `Translator`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Worklist visits allowed before the dataflow gives up
    pub max_dataflow_iterations: usize,
    /// Run the structural verifier on every emitted chunk
    pub verify: bool,
    /// Translate the methods of a class in parallel
    pub parallel_classes: bool,
    pub artifact_cache_size: usize,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            max_dataflow_iterations: 100_000,
            verify: true,
            parallel_classes: true,
            artifact_cache_size: ArtifactCache::DEFAULT_CAPACITY,
        }
    }
}

impl TranslatorConfig {
    /// Defaults overridden by the environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    pub(crate) fn apply_env(&mut self) {
        env_override("PYTRON_MAX_DATAFLOW_ITERATIONS", &mut self.max_dataflow_iterations);
        env_flag("PYTRON_VERIFY", &mut self.verify);
        env_flag("PYTRON_PARALLEL_CLASSES", &mut self.parallel_classes);
        env_override("PYTRON_ARTIFACT_CACHE_SIZE", &mut self.artifact_cache_size);
    }
}

/// Both configuration sections, as read from `pytron.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub translator: TranslatorConfig,
    pub vm: VmConfig,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read configuration: {}", e),
            Self::Parse(e) => write!(f, "invalid configuration: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(ConfigError::Parse)
    }

    /// Load `path`, then apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env();
        Ok(config)
    }

    /// `pytron.toml` in the working directory if present, defaults otherwise
    pub fn discover() -> Result<Self, ConfigError> {
        let path = Path::new("pytron.toml");
        if path.exists() {
            Self::load(path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            Ok(config)
        }
    }

    fn apply_env(&mut self) {
        self.translator.apply_env();
        self.vm.apply_env();
    }
}

pub(crate) fn env_override<T: FromStr>(var: &str, slot: &mut T) {
    if let Some(value) = std::env::var(var).ok().and_then(|s| s.trim().parse().ok()) {
        *slot = value;
    }
}

pub(crate) fn env_flag(var: &str, slot: &mut bool) {
    if let Ok(value) = std::env::var(var) {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => *slot = true,
            "0" | "false" | "no" | "off" => *slot = false,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TranslatorConfig::default();
        assert!(config.verify);
        assert_eq!(config.max_dataflow_iterations, 100_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [translator]
            verify = false

            [vm]
            max_call_depth = 64
            "#,
        )
        .expect("parses");
        assert!(!config.translator.verify);
        assert!(config.translator.parallel_classes);
        assert_eq!(config.vm.max_call_depth, 64);
        assert_eq!(config.vm.max_value_stack, VmConfig::default().max_value_stack);
    }

    #[test]
    fn test_rejects_bad_toml() {
        assert!(matches!(Config::from_toml_str("[translator]\nverify = 3"), Err(ConfigError::Parse(_))));
    }
}
