//! The match ledger: one decision per unordered name pair.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::ValidationError;
use crate::ledger::types::{fold_name, MatchDecision, MatchLabel, PairKey, MANUAL_NOTE};

/// What happened to an inserted decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New pair.
    Inserted,
    /// The pair was already present; the ledger is unchanged.
    Duplicate,
    /// The pair was present and unreviewed; it took the new entry's label.
    Upgraded,
}

/// Number of entries per label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelCounts {
    /// Unreviewed entries.
    pub unreviewed: usize,
    /// Confirmed entries.
    pub confirmed: usize,
    /// Rejected entries.
    pub rejected: usize,
}

/// Append-only set of match decisions keyed by unordered name pair.
#[derive(Debug, Clone, Default)]
pub struct MatchLedger {
    entries: Vec<MatchDecision>,
    index: HashMap<PairKey, usize>,
}

impl MatchLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a decision.
    ///
    /// A pair already present is left alone, except that a labeled decision
    /// upgrades an unreviewed entry (taking its label and any ids the entry
    /// lacks). Re-inserting an identical set of decisions is a no-op.
    pub fn insert(&mut self, decision: MatchDecision) -> InsertOutcome {
        let key = decision.key();
        let Some(&idx) = self.index.get(&key) else {
            self.index.insert(key, self.entries.len());
            self.entries.push(decision);
            return InsertOutcome::Inserted;
        };

        let existing = &mut self.entries[idx];
        if existing.label.is_labeled() || !decision.label.is_labeled() {
            return InsertOutcome::Duplicate;
        }

        debug!(
            source = %existing.source_name,
            target = %existing.target_name,
            label = %decision.label,
            "upgraded unreviewed ledger entry"
        );
        existing.label = decision.label;
        if existing.source_id.is_none() && existing.target_id.is_none() {
            // Keep ids aligned with the entry's own name orientation.
            let same_orientation = fold_name(&existing.source_name) == fold_name(&decision.source_name);
            let (s, t) = if same_orientation {
                (decision.source_id, decision.target_id)
            } else {
                (decision.target_id, decision.source_id)
            };
            existing.source_id = s;
            existing.target_id = t;
        }
        for note in decision.notes.split("; ") {
            existing.add_note(note);
        }
        InsertOutcome::Upgraded
    }

    /// Inserts a reviewer-supplied pair.
    pub fn insert_manual(
        &mut self,
        source_name: &str,
        target_name: &str,
        score: f64,
        label: MatchLabel,
        notes: &str,
    ) -> Result<InsertOutcome, ValidationError> {
        let mut decision = MatchDecision::new(source_name, target_name, score)?.with_label(label);
        decision.add_note(MANUAL_NOTE);
        decision.add_note(notes);
        Ok(self.insert(decision))
    }

    /// Applies a review decision to an existing pair.
    pub fn set_label(
        &mut self,
        source_name: &str,
        target_name: &str,
        label: MatchLabel,
    ) -> Result<(), ValidationError> {
        let key = PairKey::new(source_name, target_name);
        let idx = *self
            .index
            .get(&key)
            .ok_or_else(|| ValidationError::UnknownPair {
                source_name: source_name.to_string(),
                target_name: target_name.to_string(),
            })?;
        let entry = &mut self.entries[idx];
        entry.label = entry.label.transition(label)?;
        Ok(())
    }

    /// Looks up a pair in either order.
    #[must_use]
    pub fn get(&self, a: &str, b: &str) -> Option<&MatchDecision> {
        self.index
            .get(&PairKey::new(a, b))
            .map(|&idx| &self.entries[idx])
    }

    /// Returns true if the pair is present in either order.
    #[must_use]
    pub fn contains(&self, a: &str, b: &str) -> bool {
        self.index.contains_key(&PairKey::new(a, b))
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[MatchDecision] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [MatchDecision] {
        &mut self.entries
    }

    /// Confirmed entries in insertion order.
    pub fn confirmed(&self) -> impl Iterator<Item = &MatchDecision> + '_ {
        self.entries
            .iter()
            .filter(|e| e.label == MatchLabel::Confirmed)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the ledger holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry counts per label.
    #[must_use]
    pub fn label_counts(&self) -> LabelCounts {
        let mut counts = LabelCounts::default();
        for entry in &self.entries {
            match entry.label {
                MatchLabel::Unreviewed => counts.unreviewed += 1,
                MatchLabel::Confirmed => counts.confirmed += 1,
                MatchLabel::Rejected => counts.rejected += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordId;

    fn decision(a: &str, b: &str, label: MatchLabel) -> MatchDecision {
        MatchDecision::new(a, b, 90.0).unwrap().with_label(label)
    }

    #[test]
    fn test_reversed_pair_is_a_duplicate() {
        let mut ledger = MatchLedger::new();
        assert_eq!(ledger.insert(decision("A", "B", MatchLabel::Unreviewed)), InsertOutcome::Inserted);
        assert_eq!(ledger.insert(decision("b", " a ", MatchLabel::Unreviewed)), InsertOutcome::Duplicate);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains("B", "A"));
    }

    #[test]
    fn test_labeled_duplicate_upgrades_unreviewed() {
        let mut ledger = MatchLedger::new();
        ledger.insert(decision("A", "B", MatchLabel::Unreviewed));
        let labeled = decision("B", "A", MatchLabel::Confirmed)
            .with_ids(Some(RecordId::new("OPS_000001")), Some(RecordId::new("REC_000001")))
            .unwrap();
        assert_eq!(ledger.insert(labeled), InsertOutcome::Upgraded);
        let entry = ledger.get("A", "B").unwrap();
        assert_eq!(entry.label, MatchLabel::Confirmed);
        assert_eq!(entry.source_name, "A");
        assert_eq!(entry.source_id, Some(RecordId::new("REC_000001")));
        assert_eq!(entry.target_id, Some(RecordId::new("OPS_000001")));

        assert_eq!(ledger.insert(decision("A", "B", MatchLabel::Rejected)), InsertOutcome::Duplicate);
        assert_eq!(ledger.get("A", "B").unwrap().label, MatchLabel::Confirmed);
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let mut ledger = MatchLedger::new();
        let batch = vec![
            decision("A", "B", MatchLabel::Confirmed),
            decision("C", "D", MatchLabel::Unreviewed),
        ];
        for d in batch.clone() {
            ledger.insert(d);
        }
        let snapshot = ledger.entries().to_vec();
        for d in batch {
            assert_eq!(ledger.insert(d), InsertOutcome::Duplicate);
        }
        assert_eq!(ledger.entries(), snapshot.as_slice());
    }

    #[test]
    fn test_set_label_enforces_transitions() {
        let mut ledger = MatchLedger::new();
        ledger.insert(decision("A", "B", MatchLabel::Unreviewed));
        ledger.set_label("B", "A", MatchLabel::Rejected).unwrap();
        ledger.set_label("A", "B", MatchLabel::Rejected).unwrap();
        assert!(matches!(
            ledger.set_label("A", "B", MatchLabel::Confirmed),
            Err(ValidationError::IllegalLabelTransition { .. })
        ));
        assert!(matches!(
            ledger.set_label("X", "Y", MatchLabel::Confirmed),
            Err(ValidationError::UnknownPair { .. })
        ));
    }

    #[test]
    fn test_manual_insert_and_counts() {
        let mut ledger = MatchLedger::new();
        ledger
            .insert_manual("Department of Education", "DOE", 97.0, MatchLabel::Confirmed, "")
            .unwrap();
        ledger.insert(decision("C", "D", MatchLabel::Unreviewed));
        ledger.insert(decision("E", "F", MatchLabel::Rejected));
        assert!(ledger.get("DOE", "Department of Education").unwrap().has_note(MANUAL_NOTE));
        assert_eq!(
            ledger.label_counts(),
            LabelCounts {
                unreviewed: 1,
                confirmed: 1,
                rejected: 1
            }
        );
        assert!(ledger.insert_manual("a", "b", -1.0, MatchLabel::Confirmed, "").is_err());
    }
}
