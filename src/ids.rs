//! Record id issuance and repair.
//!
//! The [`IdManager`] is the only writer of record ids. It issues
//! `PREFIX_NNNNNN` ids per source prefix, continuing after the highest number
//! already in use, and repairs blank, malformed and duplicated ids in bulk.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::ValidationError;
use crate::record::{Record, RecordId, MAX_ID_NUMBER};
use crate::source::SourceId;

/// Why an id was (re)issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdChangeReason {
    /// The record had no id.
    Missing,
    /// The id did not match `PREFIX_NNNNNN`.
    Malformed,
    /// An earlier record already holds the id.
    Duplicate,
}

/// One id written by a repair pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdChange {
    /// Id before repair (blank when missing).
    pub old: RecordId,
    /// Id after repair.
    pub new: RecordId,
    /// Why the id changed.
    pub reason: IdChangeReason,
}

/// Result of [`IdManager::repair`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdRepairReport {
    /// Records whose id was kept.
    pub kept: usize,
    /// Ids issued or replaced, in record order.
    pub changes: Vec<IdChange>,
}

impl IdRepairReport {
    /// Returns true if no id changed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes for a reason.
    #[must_use]
    pub fn count(&self, reason: IdChangeReason) -> usize {
        self.changes.iter().filter(|c| c.reason == reason).count()
    }
}

/// Issues and repairs record ids.
#[derive(Debug, Clone, Default)]
pub struct IdManager {
    /// Highest number in use per prefix.
    high_water: BTreeMap<String, u32>,
}

impl IdManager {
    /// Creates a manager with no ids in use.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a manager aware of every well-formed id in `records`,
    /// including absorbed ids listed in their provenance.
    #[must_use]
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut manager = Self::new();
        for record in records {
            manager.observe_record(record);
        }
        manager
    }

    fn observe_record(&mut self, record: &Record) {
        self.observe(record.record_id());
        for id in &record.provenance().merged_from {
            self.observe(id);
        }
    }

    /// Marks a well-formed id as in use. Malformed ids are ignored.
    pub fn observe(&mut self, id: &RecordId) {
        let (Some(prefix), Some(number)) = (id.prefix(), id.number()) else {
            return;
        };
        let slot = self.high_water.entry(prefix.to_string()).or_insert(0);
        *slot = (*slot).max(number);
    }

    /// Issues the next id for a prefix.
    pub fn issue_with_prefix(&mut self, prefix: &str) -> Result<RecordId, ValidationError> {
        let current = self.high_water.get(prefix).copied().unwrap_or(0);
        if current >= MAX_ID_NUMBER {
            return Err(ValidationError::IdSpaceExhausted {
                prefix: prefix.to_string(),
            });
        }
        let id = RecordId::from_parts(prefix, current + 1)?;
        self.high_water.insert(prefix.to_string(), current + 1);
        Ok(id)
    }

    /// Issues the next id for a source's prefix.
    pub fn issue(&mut self, source: SourceId) -> Result<RecordId, ValidationError> {
        self.issue_with_prefix(source.id_prefix())
    }

    /// Repairs ids in place.
    ///
    /// The first occurrence of a well-formed id keeps it; blank, malformed and
    /// later duplicate ids are replaced with fresh ids for the record's source
    /// prefix. Running repair on its own output changes nothing.
    pub fn repair(&mut self, records: &mut [Record]) -> Result<IdRepairReport, ValidationError> {
        for record in records.iter() {
            self.observe_record(record);
        }

        let mut report = IdRepairReport::default();
        let mut seen: HashSet<RecordId> = HashSet::with_capacity(records.len());
        for record in records.iter_mut() {
            let current = record.record_id().clone();
            let reason = if current.is_blank() {
                IdChangeReason::Missing
            } else if !current.is_well_formed() {
                IdChangeReason::Malformed
            } else if seen.contains(&current) {
                IdChangeReason::Duplicate
            } else {
                seen.insert(current);
                report.kept += 1;
                continue;
            };

            let new = self.issue(record.source())?;
            debug!(old = %current, new = %new, ?reason, "reissued record id");
            seen.insert(new.clone());
            record.assign_id(new.clone());
            report.changes.push(IdChange {
                old: current,
                new,
                reason,
            });
        }

        if !report.is_clean() {
            info!(
                kept = report.kept,
                missing = report.count(IdChangeReason::Missing),
                malformed = report.count(IdChangeReason::Malformed),
                duplicate = report.count(IdChangeReason::Duplicate),
                "repaired record ids"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(source: SourceId, name: &str, id: &str) -> Record {
        Record::new(source, name).with_id(RecordId::new(id))
    }

    #[test]
    fn issues_after_highest_number_in_use() {
        let records = vec![
            rec(SourceId::Primary, "A", "REC_000005"),
            rec(SourceId::Primary, "B", "REC_000002"),
        ];
        let mut ids = IdManager::from_records(&records);
        assert_eq!(ids.issue(SourceId::Primary).unwrap().as_str(), "REC_000006");
        assert_eq!(ids.issue(SourceId::Ops).unwrap().as_str(), "OPS_000001");
    }

    #[test]
    fn repair_keeps_first_and_reissues_the_rest() {
        let mut records = vec![
            rec(SourceId::Primary, "A", "REC_000001"),
            rec(SourceId::Primary, "B", "REC_000001"),
            rec(SourceId::Ops, "C", ""),
            rec(SourceId::Hoo, "D", "hoo-17"),
        ];
        let report = IdManager::new().repair(&mut records).unwrap();

        let ids: Vec<&str> = records.iter().map(|r| r.record_id().as_str()).collect();
        assert_eq!(ids, vec!["REC_000001", "REC_000002", "OPS_000001", "HOO_000001"]);
        assert_eq!(report.kept, 1);
        assert_eq!(report.count(IdChangeReason::Duplicate), 1);
        assert_eq!(report.count(IdChangeReason::Missing), 1);
        assert_eq!(report.count(IdChangeReason::Malformed), 1);

        let unique: HashSet<_> = records.iter().map(|r| r.record_id().clone()).collect();
        assert_eq!(unique.len(), records.len());
        assert!(records.iter().all(|r| r.record_id().is_well_formed()));
    }

    #[test]
    fn repair_is_idempotent() {
        let mut records = vec![
            rec(SourceId::Ops, "A", "OPS_000009"),
            rec(SourceId::Ops, "B", ""),
        ];
        IdManager::new().repair(&mut records).unwrap();
        let before: Vec<RecordId> = records.iter().map(|r| r.record_id().clone()).collect();
        let report = IdManager::new().repair(&mut records).unwrap();
        assert!(report.is_clean());
        let after: Vec<RecordId> = records.iter().map(|r| r.record_id().clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn exhausted_prefix_is_an_error() {
        let mut records = vec![
            rec(SourceId::Primary, "A", "REC_999999"),
            rec(SourceId::Primary, "B", ""),
        ];
        let err = IdManager::new().repair(&mut records).unwrap_err();
        assert!(matches!(err, ValidationError::IdSpaceExhausted { .. }));
    }
}
