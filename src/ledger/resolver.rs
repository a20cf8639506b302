//! Resolves ledger names back to record ids.
//!
//! Lookups try, in order: the exact normalized name, generated name
//! variations, then the most similar indexed name at or above a threshold.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ledger::store::MatchLedger;
use crate::matching::similarity::ratio;
use crate::normalize::{name_variations, normalize};
use crate::record::RecordId;
use crate::storage::RecordStore;

/// How a name was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupMethod {
    /// Exact normalized name.
    Exact,
    /// A generated variation of the name.
    Variation,
    /// Fuzzy fallback.
    Fuzzy,
}

/// Index from normalized names to record ids.
///
/// Every display name and source name of every live record is indexed; the
/// first record (in store order) claiming a name wins.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    by_name: BTreeMap<String, RecordId>,
}

impl NameIndex {
    /// Indexes the live records of a store.
    #[must_use]
    pub fn build<S: RecordStore + ?Sized>(store: &S) -> Self {
        let mut by_name = BTreeMap::new();
        for record in store.records() {
            let names = std::iter::once(record.name()).chain(record.all_source_names().map(|(_, n)| n));
            for name in names {
                let key = normalize(name);
                if key.is_empty() {
                    continue;
                }
                by_name.entry(key).or_insert_with(|| record.record_id().clone());
            }
        }
        Self { by_name }
    }

    /// Number of indexed names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns true if nothing is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Resolves a raw name.
    #[must_use]
    pub fn lookup(&self, raw: &str, fuzzy_threshold: f64) -> Option<(RecordId, LookupMethod)> {
        let key = normalize(raw);
        if key.is_empty() {
            return None;
        }
        if let Some(id) = self.by_name.get(&key) {
            return Some((id.clone(), LookupMethod::Exact));
        }
        for variation in name_variations(&key) {
            if let Some(id) = self.by_name.get(&variation) {
                return Some((id.clone(), LookupMethod::Variation));
            }
        }

        let mut best: Option<(f64, &RecordId)> = None;
        for (name, id) in &self.by_name {
            let score = ratio(&key, name);
            if score >= fuzzy_threshold && best.map_or(true, |(b, _)| score > b) {
                best = Some((score, id));
            }
        }
        best.map(|(_, id)| (id.clone(), LookupMethod::Fuzzy))
    }
}

/// Outcome of [`backfill_ids`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Ids filled per lookup method.
    pub filled: BTreeMap<String, usize>,
    /// Names that did not resolve, in ledger order.
    pub unresolved: Vec<String>,
}

impl BackfillReport {
    /// Total ids filled.
    #[must_use]
    pub fn total_filled(&self) -> usize {
        self.filled.values().sum()
    }

    fn record(&mut self, method: LookupMethod) {
        let key = match method {
            LookupMethod::Exact => "exact",
            LookupMethod::Variation => "variation",
            LookupMethod::Fuzzy => "fuzzy",
        };
        *self.filled.entry(key.to_string()).or_insert(0) += 1;
    }
}

/// Fills missing or malformed `source_id`/`target_id` values.
///
/// Ids that are already well-formed are never touched. Names that do not
/// resolve leave the id unset; such entries stay in the ledger but cannot be
/// merged.
pub fn backfill_ids<S: RecordStore + ?Sized>(
    ledger: &mut MatchLedger,
    store: &S,
    fuzzy_threshold: f64,
) -> BackfillReport {
    let index = NameIndex::build(store);
    let mut report = BackfillReport::default();

    for entry in ledger.entries_mut() {
        let needs = |id: &Option<RecordId>| id.as_ref().map_or(true, |id| !id.is_well_formed());
        if needs(&entry.source_id) {
            match index.lookup(&entry.source_name, fuzzy_threshold) {
                Some((id, method)) => {
                    debug!(name = %entry.source_name, id = %id, ?method, "filled ledger source id");
                    entry.source_id = Some(id);
                    report.record(method);
                }
                None => report.unresolved.push(entry.source_name.clone()),
            }
        }
        if needs(&entry.target_id) {
            match index.lookup(&entry.target_name, fuzzy_threshold) {
                Some((id, method)) => {
                    debug!(name = %entry.target_name, id = %id, ?method, "filled ledger target id");
                    entry.target_id = Some(id);
                    report.record(method);
                }
                None => report.unresolved.push(entry.target_name.clone()),
            }
        }
    }

    if !report.unresolved.is_empty() {
        warn!(
            unresolved = report.unresolved.len(),
            "ledger names could not be resolved to record ids"
        );
    }
    info!(filled = report.total_filled(), "back-filled ledger ids");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::MatchDecision;
    use crate::record::Record;
    use crate::source::SourceId;
    use crate::storage::InMemoryRecordStore;

    fn store() -> InMemoryRecordStore {
        let mut store = InMemoryRecordStore::new();
        store
            .insert(Record::new(SourceId::Primary, "Department of Transportation").with_id(RecordId::new("REC_000001")))
            .unwrap();
        store
            .insert(Record::new(SourceId::Ops, "Police Department").with_id(RecordId::new("OPS_000001")))
            .unwrap();
        store
            .insert(Record::new(SourceId::Hoo, "Landmarks Preservation Commission").with_id(RecordId::new("HOO_000001")))
            .unwrap();
        store
    }

    #[test]
    fn lookup_prefers_exact_then_variation_then_fuzzy() {
        let index = NameIndex::build(&store());
        assert_eq!(
            index.lookup("Dept. of Transportation", 0.85),
            Some((RecordId::new("REC_000001"), LookupMethod::Exact))
        );
        assert_eq!(
            index.lookup("Transportation Department", 0.85),
            Some((RecordId::new("REC_000001"), LookupMethod::Variation))
        );
        assert_eq!(
            index.lookup("Landmark Preservation Commission", 0.85),
            Some((RecordId::new("HOO_000001"), LookupMethod::Fuzzy))
        );
        assert_eq!(index.lookup("Board of Elections", 0.85), None);
        assert_eq!(index.lookup("", 0.85), None);
    }

    #[test]
    fn backfill_fills_missing_and_keeps_existing() {
        let mut ledger = MatchLedger::new();
        ledger.insert(MatchDecision::new("NYC Police Department", "Department of Transportation", 83.0).unwrap());
        ledger.insert(
            MatchDecision::new("Board of Elections", "Police Department", 82.0)
                .unwrap()
                .with_ids(None, Some(RecordId::new("OPS_000042")))
                .unwrap(),
        );

        let report = backfill_ids(&mut ledger, &store(), 0.85);
        let first = &ledger.entries()[0];
        assert_eq!(first.source_id, Some(RecordId::new("OPS_000001")));
        assert_eq!(first.target_id, Some(RecordId::new("REC_000001")));

        let second = &ledger.entries()[1];
        assert_eq!(second.source_id, None);
        assert_eq!(second.target_id, Some(RecordId::new("OPS_000042")));
        assert_eq!(report.unresolved, vec!["Board of Elections".to_string()]);
        assert_eq!(report.total_filled(), 2);
    }
}
