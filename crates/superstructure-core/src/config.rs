//! Reconciliation settings: the biosphere database name and the cell values
//! read as missing.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ReconcileError;

pub const DEFAULT_BIOSPHERE_DATABASE: &str = "biosphere3";

/// Sentinel values the reconciliation passes read from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    /// Registry database that holds elementary (biosphere) flows.
    pub biosphere_database: String,
    /// Cell values that mean "unknown" when exchange rows are read.
    pub missing_markers: Vec<String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            biosphere_database: DEFAULT_BIOSPHERE_DATABASE.to_string(),
            missing_markers: vec![String::new(), "NaN".to_string(), "nan".to_string()],
        }
    }
}

impl ReconcileConfig {
    /// Parse a YAML document; omitted keys keep their defaults.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Config`] when the YAML is malformed or fails validation.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ReconcileError> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|err| ReconcileError::Config(format!("invalid config yaml: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Config`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ReconcileError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            ReconcileError::Config(format!("failed to read config {}: {err}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// # Errors
    /// Returns [`ReconcileError::Config`] when the biosphere database name is blank.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        if self.biosphere_database.trim().is_empty() {
            return Err(ReconcileError::Config(
                "biosphere_database MUST be a non-empty database name".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_biosphere(&self, database: Option<&str>) -> bool {
        database == Some(self.biosphere_database.as_str())
    }

    #[must_use]
    pub fn is_missing_marker(&self, value: &str) -> bool {
        self.missing_markers.iter().any(|marker| marker == value.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = match ReconcileConfig::from_yaml_str("biosphere_database: biosphere\n") {
            Ok(config) => config,
            Err(err) => panic!("config should parse: {err}"),
        };
        assert_eq!(config.biosphere_database, "biosphere");
        assert_eq!(config.missing_markers, ReconcileConfig::default().missing_markers);
    }

    #[test]
    fn blank_biosphere_database_is_rejected() {
        let result = ReconcileConfig::from_yaml_str("biosphere_database: '  '\n");
        assert!(matches!(result, Err(ReconcileError::Config(_))));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = ReconcileConfig::from_yaml_str("biosfere_database: biosphere3\n");
        assert!(matches!(result, Err(ReconcileError::Config(_))));
    }

    #[test]
    fn missing_markers_match_trimmed_values() {
        let config = ReconcileConfig::default();
        assert!(config.is_missing_marker(" NaN "));
        assert!(config.is_missing_marker(""));
        assert!(!config.is_missing_marker("steel"));
    }
}
