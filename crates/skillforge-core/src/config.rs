//! Engine configuration loaded from `skillforge.config.yaml`.

use crate::hints::{DEFAULT_ENCOURAGEMENT, DEFAULT_FALLBACK_HINT};
use crate::matcher::{ClassifierScope, CommandClassifier};
use crate::router::default_command_verbs;
use crate::validator::DEFAULT_PASS_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const CONFIG_FILE: &str = "skillforge.config.yaml";

/// Errors that can occur during config loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("pass-threshold must be within 0..=1, got {0}")]
    ThresholdOutOfRange(f64),
    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Minimum score that counts as a pass (default: 0.7).
    #[serde(default = "default_threshold")]
    pub pass_threshold: f64,

    /// Output synthesizer deadline in milliseconds (default: 10000).
    #[serde(default = "default_synthesizer_timeout")]
    pub synthesizer_timeout_ms: u64,

    /// Judge deadline in milliseconds (default: 30000).
    #[serde(default = "default_judge_timeout")]
    pub judge_timeout_ms: u64,

    /// Model passed to the generative backend.
    #[serde(default = "default_model")]
    pub model: String,

    /// Verbs that make a pattern command-like; empty means the built-in list.
    #[serde(default)]
    pub command_verbs: Vec<String>,

    #[serde(default)]
    pub classifier_scope: ClassifierScope,

    /// Shown after the first failed attempt.
    #[serde(default = "default_encouragement")]
    pub encouragement: String,

    /// Shown when neither the hint ladder nor the judge has a hint.
    #[serde(default = "default_fallback_hint")]
    pub fallback_hint: String,

    /// Start sessions in the workstation layout rather than an empty root.
    #[serde(default = "default_workstation")]
    pub workstation: bool,
}

const fn default_threshold() -> f64 {
    DEFAULT_PASS_THRESHOLD
}

const fn default_synthesizer_timeout() -> u64 {
    10_000
}

const fn default_judge_timeout() -> u64 {
    30_000
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_encouragement() -> String {
    DEFAULT_ENCOURAGEMENT.to_string()
}

fn default_fallback_hint() -> String {
    DEFAULT_FALLBACK_HINT.to_string()
}

const fn default_workstation() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pass_threshold: default_threshold(),
            synthesizer_timeout_ms: default_synthesizer_timeout(),
            judge_timeout_ms: default_judge_timeout(),
            model: default_model(),
            command_verbs: Vec::new(),
            classifier_scope: ClassifierScope::default(),
            encouragement: default_encouragement(),
            fallback_hint: default_fallback_hint(),
            workstation: default_workstation(),
        }
    }
}

impl EngineConfig {
    /// The command-like classifier this configuration describes.
    #[must_use]
    pub fn classifier(&self) -> CommandClassifier {
        let verbs = if self.command_verbs.is_empty() {
            default_command_verbs()
        } else {
            self.command_verbs.iter().cloned().collect()
        };
        CommandClassifier::new(verbs, self.classifier_scope)
    }
}

/// Load engine configuration from `skillforge.config.yaml` in `dir`.
///
/// If the file doesn't exist, returns default configuration.
///
/// # Errors
/// Returns an error if:
/// - The file exists but cannot be read
/// - The YAML is invalid
/// - pass-threshold is outside `0..=1` or a timeout is zero
pub fn load_config(dir: &Path) -> Result<EngineConfig, ConfigError> {
    let config_path = dir.join(CONFIG_FILE);

    let config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        serde_yml::from_str(&content)?
    } else {
        EngineConfig::default()
    };

    validate_config(&config)?;
    Ok(config)
}

/// Validate the configuration.
///
/// # Errors
/// Returns the first violated constraint.
pub fn validate_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.pass_threshold) {
        return Err(ConfigError::ThresholdOutOfRange(config.pass_threshold));
    }
    if config.synthesizer_timeout_ms == 0 {
        return Err(ConfigError::ZeroTimeout("synthesizer-timeout-ms"));
    }
    if config.judge_timeout_ms == 0 {
        return Err(ConfigError::ZeroTimeout("judge-timeout-ms"));
    }
    Ok(())
}

/// CLI override options for configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub model: Option<String>,
    pub pass_threshold: Option<f64>,
    pub synthesizer_timeout_ms: Option<u64>,
    pub judge_timeout_ms: Option<u64>,
    pub workstation: Option<bool>,
}

/// Apply CLI overrides to a configuration.
#[must_use]
pub fn apply_overrides(mut config: EngineConfig, overrides: &ConfigOverrides) -> EngineConfig {
    if let Some(ref model) = overrides.model {
        config.model.clone_from(model);
    }
    if let Some(threshold) = overrides.pass_threshold {
        config.pass_threshold = threshold;
    }
    if let Some(timeout) = overrides.synthesizer_timeout_ms {
        config.synthesizer_timeout_ms = timeout;
    }
    if let Some(timeout) = overrides.judge_timeout_ms {
        config.judge_timeout_ms = timeout;
    }
    if let Some(workstation) = overrides.workstation {
        config.workstation = workstation;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_load_config_default_when_missing() -> TestResult {
        let dir = TempDir::new()?;
        let config = load_config(dir.path())?;
        assert!((config.pass_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.synthesizer_timeout_ms, 10_000);
        assert_eq!(config.judge_timeout_ms, 30_000);
        assert!(config.workstation);
        Ok(())
    }

    #[test]
    fn test_load_config_from_file() -> TestResult {
        let dir = TempDir::new()?;
        let config_content = r"
pass-threshold: 0.8
judge-timeout-ms: 5000
classifier-scope: leading-token
command-verbs: [git, docker]
workstation: false
";
        std::fs::write(dir.path().join(CONFIG_FILE), config_content)?;

        let config = load_config(dir.path())?;
        assert!((config.pass_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.judge_timeout_ms, 5_000);
        assert!(!config.workstation);
        let classifier = config.classifier();
        assert_eq!(classifier.scope(), ClassifierScope::LeadingToken);
        assert!(classifier.is_command_like("git status"));
        assert!(!classifier.is_command_like("ls -la"));
        Ok(())
    }

    #[test]
    fn test_load_config_rejects_out_of_range_threshold() -> TestResult {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join(CONFIG_FILE), "pass-threshold: 1.5\n")?;
        let result = load_config(dir.path());
        assert!(matches!(result, Err(ConfigError::ThresholdOutOfRange(_))));
        Ok(())
    }

    #[test]
    fn test_load_config_rejects_zero_timeout() -> TestResult {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join(CONFIG_FILE), "synthesizer-timeout-ms: 0\n")?;
        let result = load_config(dir.path());
        assert!(matches!(
            result,
            Err(ConfigError::ZeroTimeout("synthesizer-timeout-ms"))
        ));
        Ok(())
    }

    #[test]
    fn test_load_config_unknown_key() -> TestResult {
        let dir = TempDir::new()?;
        std::fs::write(dir.path().join(CONFIG_FILE), "threshold: 0.5\n")?;
        assert!(matches!(load_config(dir.path()), Err(ConfigError::Yaml(_))));
        Ok(())
    }

    #[test]
    fn test_apply_overrides() {
        let overrides = ConfigOverrides {
            model: Some("claude-opus-4-20250514".to_string()),
            pass_threshold: Some(0.9),
            ..Default::default()
        };

        let result = apply_overrides(EngineConfig::default(), &overrides);
        assert_eq!(result.model, "claude-opus-4-20250514");
        assert!((result.pass_threshold - 0.9).abs() < f64::EPSILON);
        // Non-overridden values should remain default
        assert_eq!(result.judge_timeout_ms, 30_000);
    }
}
