//! Conflict-tracked fields.
//!
//! Conflicts are explicit output, not errors. When merged records disagree on
//! a tracked field (a URL, a principal officer), the survivor keeps its own
//! scalar value and carries every observed `(source, value)` pair, from which
//! a `<field>_status` and a `suggested_<field>` column are derived.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::source::{SourceId, SourcePriority};

/// Prefix of a conflicting status value.
pub const CONFLICT_PREFIX: &str = "conflict: ";

/// Output column holding a field's status.
#[must_use]
pub fn status_column(field: &str) -> String {
    format!("{field}_status")
}

/// Output column holding a field's suggested value.
#[must_use]
pub fn suggested_column(field: &str) -> String {
    format!("suggested_{field}")
}

/// One value of a field as seen in one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Source the value came from.
    pub source: SourceId,
    /// Trimmed value as written in the source.
    pub value: String,
}

impl Observation {
    /// Creates an observation.
    #[must_use]
    pub fn new(source: SourceId, value: impl AsRef<str>) -> Self {
        Self {
            source,
            value: value.as_ref().trim().to_string(),
        }
    }
}

/// Comparison form of a tracked value. URLs ignore scheme, `www.` and a
/// trailing slash; everything else ignores case and whitespace runs.
#[must_use]
pub fn comparable(field: &str, value: &str) -> String {
    let folded = value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if !field.to_ascii_lowercase().contains("url") {
        return folded;
    }
    let rest = folded
        .strip_prefix("https://")
        .or_else(|| folded.strip_prefix("http://"))
        .unwrap_or(&folded);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    rest.trim_end_matches('/').to_string()
}

/// Agreement state of a tracked field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictStatus {
    /// Zero or one distinct value.
    Match,
    /// Every observation, in first-seen order.
    Conflict(Vec<Observation>),
}

impl ConflictStatus {
    /// Returns true for a conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => f.write_str("match"),
            Self::Conflict(values) => {
                f.write_str(CONFLICT_PREFIX)?;
                for (idx, obs) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} ({})", obs.value, obs.source)?;
                }
                Ok(())
            }
        }
    }
}

fn conflict_entry() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(.+?) \((primary|ops|hoo)\)(?:, |$)").expect("conflict entry pattern is valid")
    })
}

/// Observations of one tracked field on one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldResolution {
    observations: Vec<Observation>,
}

impl FieldResolution {
    /// Builds a resolution, dropping blank observations.
    #[must_use]
    pub fn from_observations(observations: Vec<Observation>) -> Self {
        Self {
            observations: observations
                .into_iter()
                .filter(|o| !o.value.is_empty())
                .collect(),
        }
    }

    /// Observations in first-seen order.
    #[must_use]
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Adds observations not yet present for the same source and comparable
    /// value.
    pub fn absorb(&mut self, field: &str, others: &[Observation]) {
        for obs in others {
            if obs.value.is_empty() {
                continue;
            }
            let key = comparable(field, &obs.value);
            let seen = self
                .observations
                .iter()
                .any(|o| o.source == obs.source && comparable(field, &o.value) == key);
            if !seen {
                self.observations.push(obs.clone());
            }
        }
    }

    /// `Match` when all observations agree, otherwise a conflict listing
    /// every observation so the full state survives publication.
    #[must_use]
    pub fn status(&self, field: &str) -> ConflictStatus {
        let mut keys = self.observations.iter().map(|o| comparable(field, &o.value));
        let Some(first) = keys.next() else {
            return ConflictStatus::Match;
        };
        if keys.all(|k| k == first) {
            ConflictStatus::Match
        } else {
            ConflictStatus::Conflict(self.observations.clone())
        }
    }

    /// Value from the most trusted source that observed one.
    #[must_use]
    pub fn suggested(&self, priority: &SourcePriority) -> Option<&str> {
        priority.iter().find_map(|source| {
            self.observations
                .iter()
                .find(|o| o.source == source)
                .map(|o| o.value.as_str())
        })
    }

    /// Reconstructs observations from a published status value.
    ///
    /// `match` carries no per-source detail and yields `None`; the record's own
    /// scalar value stands in for it.
    #[must_use]
    pub fn parse_status(status: &str) -> Option<Self> {
        let body = status.trim().strip_prefix(CONFLICT_PREFIX)?;
        let observations: Vec<Observation> = conflict_entry()
            .captures_iter(body)
            .filter_map(|c| {
                let source = c.get(2)?.as_str().parse().ok()?;
                Some(Observation::new(source, c.get(1)?.as_str()))
            })
            .collect();
        (!observations.is_empty()).then(|| Self::from_observations(observations))
    }
}
