use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::language::ConfigError;

/// Engine-wide knobs. Every field has a default, so partial files are fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock budget for one script. Not enforced by the engine; hosts
    /// arm a watchdog with it and trip an [`Interrupt`](crate::Interrupt).
    pub max_execution_seconds: u64,
    /// Maximum number of laws executed per trigger batch.
    pub max_laws_per_action: usize,
    pub detailed_logging: bool,
    pub auto_deactivate_on_error: bool,
    /// Consecutive failures before a law is deactivated.
    pub error_threshold: u32,
    /// Interpreter recursion bound.
    pub max_call_depth: usize,
    /// Tracked executions kept before the history is halved.
    pub history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_execution_seconds: 10,
            max_laws_per_action: 20,
            detailed_logging: true,
            auto_deactivate_on_error: true,
            error_threshold: 5,
            max_call_depth: 64,
            history_limit: 1000,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.max_execution_seconds)
    }

    /// Load from a `.json`, `.yml` or `.yaml` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on I/O or format failure.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yml") || e.eq_ignore_ascii_case("yaml"));
        if is_yaml {
            Ok(serde_yaml::from_str(&input)?)
        } else {
            Ok(serde_json::from_str(&input)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_execution_time(), Duration::from_secs(10));
        assert_eq!(config.max_laws_per_action, 20);
        assert_eq!(config.error_threshold, 5);
    }

    #[test]
    fn partial_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yml");
        std::fs::write(&path, "error_threshold: 2\nauto_deactivate_on_error: false\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.error_threshold, 2);
        assert!(!config.auto_deactivate_on_error);
        assert_eq!(config.history_limit, 1000);
    }

    #[test]
    fn bad_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            EngineConfig::from_file(&path),
            Err(ConfigError::Json(_))
        ));
    }
}
