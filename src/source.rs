//! Source identifiers and priority tables.
//!
//! Every record originates from exactly one of three agency lists. Loose
//! source tags found in the wild (`"nyc_agencies_export"`, `"ops"`,
//! `"nyc_gov"`, `"hoo"`, …) are parsed once at the boundary into the closed
//! [`SourceId`] enum; everything downstream ranks sources through a
//! [`SourcePriority`] table indexed by that enum.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Origin of an agency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// The internal agency export (`nyc_agencies_export`).
    Primary,
    /// The Office of Operations roster.
    Ops,
    /// The NYC.gov heads-of-organization roster (`nyc_gov`).
    Hoo,
}

impl SourceId {
    /// All sources in declaration order.
    pub const ALL: [Self; 3] = [Self::Primary, Self::Ops, Self::Hoo];

    /// Canonical lowercase tag, as written to output tables.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Ops => "ops",
            Self::Hoo => "hoo",
        }
    }

    /// Record id prefix issued for records created from this source.
    #[must_use]
    pub const fn id_prefix(self) -> &'static str {
        match self {
            Self::Primary => "REC",
            Self::Ops => "OPS",
            Self::Hoo => "HOO",
        }
    }

    /// Output column holding this source's original name(s).
    #[must_use]
    pub const fn name_column(self) -> &'static str {
        match self {
            Self::Primary => "Name - Export",
            Self::Ops => "Name - Ops",
            Self::Hoo => "Name - HOO",
        }
    }

    /// Roster sources list each agency at most once, so two records carrying
    /// a name from the same roster are distinct agencies.
    #[must_use]
    pub const fn is_roster(self) -> bool {
        matches!(self, Self::Ops | Self::Hoo)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for SourceId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        match tag.as_str() {
            "primary" | "export" | "nyc_agencies_export" | "rec" => Ok(Self::Primary),
            "ops" | "ops_roster" | "operations" => Ok(Self::Ops),
            "hoo" | "nyc_gov" | "nyc_gov_hoo" | "gov_roster" => Ok(Self::Hoo),
            _ => Err(ValidationError::UnknownSource { tag: s.to_string() }),
        }
    }
}

/// Ordered source ranking; index 0 is the most trusted source.
///
/// The table is a permutation of [`SourceId::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePriority(Vec<SourceId>);

impl SourcePriority {
    /// Builds a table, rejecting lists that are not a permutation of all
    /// sources.
    pub fn new(order: Vec<SourceId>) -> Result<Self, ValidationError> {
        Self::check(&order)?;
        Ok(Self(order))
    }

    /// Re-checks a table obtained through deserialization.
    pub fn validate(&self) -> Result<(), ValidationError> {
        Self::check(&self.0)
    }

    fn check(order: &[SourceId]) -> Result<(), ValidationError> {
        if order.len() != SourceId::ALL.len() {
            return Err(ValidationError::PriorityLength {
                expected: SourceId::ALL.len(),
                actual: order.len(),
            });
        }
        match SourceId::ALL.into_iter().find(|s| !order.contains(s)) {
            Some(missing) => Err(ValidationError::PriorityMissingSource { missing }),
            None => Ok(()),
        }
    }

    /// Survivor ranking used by the merge engine:
    /// primary export > ops roster > gov roster.
    #[must_use]
    pub fn survivor_default() -> Self {
        Self(vec![SourceId::Primary, SourceId::Ops, SourceId::Hoo])
    }

    /// Suggestion ranking for conflict-tracked fields:
    /// ops roster > gov roster > primary export.
    #[must_use]
    pub fn conflict_default() -> Self {
        Self(vec![SourceId::Ops, SourceId::Hoo, SourceId::Primary])
    }

    /// Rank of a source; lower is more trusted.
    #[must_use]
    pub fn rank(&self, source: SourceId) -> usize {
        self.0
            .iter()
            .position(|s| *s == source)
            .unwrap_or(self.0.len())
    }

    /// Returns true if `a` outranks or ties `b`.
    #[must_use]
    pub fn prefers(&self, a: SourceId, b: SourceId) -> bool {
        self.rank(a) <= self.rank(b)
    }

    /// Sources from most to least trusted.
    pub fn iter(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.0.iter().copied()
    }
}

impl Default for SourcePriority {
    fn default() -> Self {
        Self::survivor_default()
    }
}
