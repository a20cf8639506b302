//! Match ledger entry types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::record::RecordId;

/// Note appended to entries confirmed by the generator's auto-confirm rule.
pub const AUTO_CONFIRMED_NOTE: &str = "auto-confirmed";

/// Note appended to entries inserted through the manual API.
pub const MANUAL_NOTE: &str = "manual entry";

/// Prefix of the note appended by library consolidation.
pub const LIBRARY_NOTE_PREFIX: &str = "library system consolidation";

/// Review state of a match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLabel {
    /// Not yet reviewed.
    #[default]
    Unreviewed,
    /// Same agency; merge.
    Confirmed,
    /// Different agencies; never merge.
    Rejected,
}

impl MatchLabel {
    /// Text written to the ledger's `Label` column.
    #[must_use]
    pub const fn as_ledger_str(self) -> &'static str {
        match self {
            Self::Unreviewed => "",
            Self::Confirmed => "Match",
            Self::Rejected => "NonMatch",
        }
    }

    /// Returns true unless the entry is still unreviewed.
    #[must_use]
    pub const fn is_labeled(self) -> bool {
        !matches!(self, Self::Unreviewed)
    }

    /// Applies a review decision.
    ///
    /// `Unreviewed` may move to either label; labeled entries are terminal.
    /// Re-applying the current label is a no-op.
    pub fn transition(self, to: Self) -> Result<Self, ValidationError> {
        match (self, to) {
            (from, to) if from == to => Ok(from),
            (Self::Unreviewed, to) => Ok(to),
            (from, to) => Err(ValidationError::IllegalLabelTransition { from, to }),
        }
    }
}

// Ledger file spelling is `as_ledger_str`.
impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unreviewed => "Unreviewed",
            Self::Confirmed => "Confirmed",
            Self::Rejected => "Rejected",
        })
    }
}

impl FromStr for MatchLabel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "" | "unreviewed" => Ok(Self::Unreviewed),
            "match" | "confirmed" | "yes" => Ok(Self::Confirmed),
            "nonmatch" | "nomatch" | "rejected" | "no" => Ok(Self::Rejected),
            _ => Err(ValidationError::UnknownLabel {
                value: s.to_string(),
            }),
        }
    }
}

pub(crate) fn fold_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Unordered, case- and whitespace-folded name pair.
///
/// # Examples
///
/// ```
/// use agency_resolve::ledger::PairKey;
///
/// assert_eq!(PairKey::new("DOE", "Department of Education"),
///            PairKey::new(" department  of education", "doe"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey(String, String);

impl PairKey {
    /// Builds the key for two raw names in either order.
    #[must_use]
    pub fn new(a: &str, b: &str) -> Self {
        let (a, b) = (fold_name(a), fold_name(b));
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }
}

/// A proposed or reviewed match between two records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDecision {
    /// Raw name of the source side.
    pub source_name: String,
    /// Raw name of the target side.
    pub target_name: String,
    /// Similarity score in [0, 100].
    pub score: f64,
    /// Review state.
    pub label: MatchLabel,
    /// Record id of the source side, when known.
    pub source_id: Option<RecordId>,
    /// Record id of the target side, when known.
    pub target_id: Option<RecordId>,
    /// `"; "`-separated reasons and review notes.
    pub notes: String,
}

impl MatchDecision {
    /// Creates an unreviewed decision without ids.
    pub fn new(
        source_name: impl Into<String>,
        target_name: impl Into<String>,
        score: f64,
    ) -> Result<Self, ValidationError> {
        let source_name = source_name.into();
        let target_name = target_name.into();
        if source_name.trim().is_empty() || target_name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(ValidationError::ScoreOutOfRange { score });
        }
        Ok(Self {
            source_name,
            target_name,
            score,
            label: MatchLabel::Unreviewed,
            source_id: None,
            target_id: None,
            notes: String::new(),
        })
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: MatchLabel) -> Self {
        self.label = label;
        self
    }

    /// Sets both ids; blank ids are treated as missing.
    pub fn with_ids(mut self, source: Option<RecordId>, target: Option<RecordId>) -> Result<Self, ValidationError> {
        let source = source.filter(|id| !id.is_blank());
        let target = target.filter(|id| !id.is_blank());
        if let (Some(s), Some(t)) = (&source, &target) {
            if s == t {
                return Err(ValidationError::SelfPair);
            }
        }
        self.source_id = source;
        self.target_id = target;
        Ok(self)
    }

    /// Unordered pair key.
    #[must_use]
    pub fn key(&self) -> PairKey {
        PairKey::new(&self.source_name, &self.target_name)
    }

    /// Returns true if both ids are set.
    #[must_use]
    pub const fn has_ids(&self) -> bool {
        self.source_id.is_some() && self.target_id.is_some()
    }

    /// Appends a note unless already present.
    pub fn add_note(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() || self.notes.split("; ").any(|n| n == note) {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push_str("; ");
        }
        self.notes.push_str(note);
    }

    /// Returns true if `note` is one of the entry's notes, or a prefix of one.
    #[must_use]
    pub fn has_note(&self, note: &str) -> bool {
        self.notes.split("; ").any(|n| n.starts_with(note))
    }
}
