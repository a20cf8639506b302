//! Pipeline configuration.
//!
//! Configuration is a plain value passed into the pipeline; nothing reads it
//! from global state. Every section has defaults, so an empty TOML document
//! is a valid configuration.
//!
//! ```toml
//! [matcher]
//! min_score = 82.0
//! auto_confirm_score = 95.0
//! workers = 4
//!
//! [ledger]
//! fuzzy_threshold = 0.85
//!
//! [merge]
//! source_priority = ["primary", "ops", "hoo"]
//! conflict_priority = ["ops", "hoo", "primary"]
//! conflict_fields = ["URL", "PrincipalOfficerName", "PrincipalOfficerTitle"]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::source::SourcePriority;

/// Candidate generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatcherConfig {
    /// Minimum composite score for a pair to be emitted.
    pub min_score: f64,
    /// Score at or above which a pair is confirmed without review.
    pub auto_confirm_score: f64,
    /// Bonus for a shared organizational-type token.
    pub org_type_bonus: f64,
    /// Bonus for equal parenthetical acronyms.
    pub acronym_bonus: f64,
    /// Scoring threads; 0 or 1 scores on the calling thread.
    pub workers: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            min_score: 82.0,
            auto_confirm_score: 95.0,
            org_type_bonus: 5.0,
            acronym_bonus: 10.0,
            workers: 1,
        }
    }
}

/// Ledger settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    /// Minimum similarity (0–1) for the fuzzy id back-fill fallback.
    pub fuzzy_threshold: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.85,
        }
    }
}

/// Merge settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MergeConfig {
    /// Which side survives a merge.
    pub source_priority: SourcePriority,
    /// Which source's value is suggested for conflict-tracked fields.
    pub conflict_priority: SourcePriority,
    /// Fields whose disagreements are tracked.
    pub conflict_fields: Vec<String>,
    /// Separator for per-source name columns.
    pub name_separator: String,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            source_priority: SourcePriority::survivor_default(),
            conflict_priority: SourcePriority::conflict_default(),
            conflict_fields: vec![
                "URL".to_string(),
                "PrincipalOfficerName".to_string(),
                "PrincipalOfficerTitle".to_string(),
            ],
            name_separator: " | ".to_string(),
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Candidate generation.
    pub matcher: MatcherConfig,
    /// Ledger handling.
    pub ledger: LedgerConfig,
    /// Merging.
    pub merge: MergeConfig,
}

fn check_score(setting: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(setting, format!("{value} is outside [0, 100]")))
    }
}

impl PipelineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Checks thresholds and priority tables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.matcher;
        check_score("matcher.min_score", m.min_score)?;
        check_score("matcher.auto_confirm_score", m.auto_confirm_score)?;
        check_score("matcher.org_type_bonus", m.org_type_bonus)?;
        check_score("matcher.acronym_bonus", m.acronym_bonus)?;
        if m.auto_confirm_score < m.min_score {
            return Err(ConfigError::invalid(
                "matcher.auto_confirm_score",
                format!(
                    "{} is below matcher.min_score ({})",
                    m.auto_confirm_score, m.min_score
                ),
            ));
        }

        let t = self.ledger.fuzzy_threshold;
        if !t.is_finite() || !(0.0..=1.0).contains(&t) || t == 0.0 {
            return Err(ConfigError::invalid(
                "ledger.fuzzy_threshold",
                format!("{t} is outside (0, 1]"),
            ));
        }

        self.merge
            .source_priority
            .validate()
            .map_err(|e| ConfigError::invalid("merge.source_priority", e.to_string()))?;
        self.merge
            .conflict_priority
            .validate()
            .map_err(|e| ConfigError::invalid("merge.conflict_priority", e.to_string()))?;
        if self.merge.conflict_fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "merge.conflict_fields",
                "field names cannot be blank",
            ));
        }
        if self.merge.name_separator.is_empty() {
            return Err(ConfigError::invalid("merge.name_separator", "cannot be empty"));
        }
        Ok(())
    }
}
