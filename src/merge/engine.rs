//! The merge engine.
//!
//! Confirmed ledger entries are applied in descending score order. Each pass
//! merges a record at most once; passes repeat until nothing applies, so a
//! second run over the engine's own output with the same ledger is a no-op.
//!
//! An entry names one record pair, but the same raw name may sit on several
//! records. Once an entry's pair is one record, the other live records
//! carrying either of its names are merged into it as well.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ResolveResult;
use crate::ledger::{
    fold_name, same_library_system, MatchDecision, MatchLedger, AUTO_CONFIRMED_NOTE, LIBRARY_NOTE_PREFIX,
    MANUAL_NOTE,
};
use crate::merge::policy::{format_score, MergePolicy};
use crate::record::{Record, RecordId};
use crate::source::SourceId;
use crate::storage::{RecordStore, StorageError};

/// How a confirmed match came to be confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Confirmed by the generator's auto-confirm rule.
    Automatic,
    /// Confirmed by the library consolidation rule.
    Library,
    /// Inserted by hand.
    Manual,
    /// Reviewed in the ledger file.
    Reviewed,
}

impl MatchMethod {
    /// Classifies a ledger entry by its notes.
    #[must_use]
    pub fn of(decision: &MatchDecision) -> Self {
        if decision.has_note(MANUAL_NOTE) {
            Self::Manual
        } else if decision.has_note(LIBRARY_NOTE_PREFIX) {
            Self::Library
        } else if decision.has_note(AUTO_CONFIRMED_NOTE) {
            Self::Automatic
        } else {
            Self::Reviewed
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Automatic => "automatic",
            Self::Library => "library",
            Self::Manual => "manual",
            Self::Reviewed => "reviewed",
        })
    }
}

/// Why a confirmed match was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// One or both ids are unset.
    MissingIds,
    /// An id does not resolve to a live record.
    RecordNotFound {
        /// The unresolved id.
        id: RecordId,
    },
    /// Both sides already resolve to the same record.
    AlreadyMerged {
        /// The shared survivor.
        survivor: RecordId,
    },
    /// Both records carry a name from the same roster source.
    SameSource {
        /// The shared roster.
        source: SourceId,
    },
    /// The same unordered record pair was already handled this pass.
    DuplicatePair,
    /// A side was merged earlier in the same pass.
    ConsumedThisPass,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingIds => write!(f, "missing record ids"),
            Self::RecordNotFound { id } => write!(f, "record {id} not found"),
            Self::AlreadyMerged { survivor } => write!(f, "already merged into {survivor}"),
            Self::SameSource { source } => write!(f, "both records carry a {source} name"),
            Self::DuplicatePair => write!(f, "duplicate record pair"),
            Self::ConsumedThisPass => write!(f, "record already merged this pass"),
        }
    }
}

/// A merge that was applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedMerge {
    /// Surviving record.
    pub survivor: RecordId,
    /// Absorbed record.
    pub absorbed: RecordId,
    /// Ledger score.
    pub score: f64,
    /// How the match was confirmed.
    pub method: MatchMethod,
    /// Pass in which the merge happened (1-based).
    pub pass: usize,
}

/// A confirmed match that was not applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedMatch {
    /// Ledger source name.
    pub source_name: String,
    /// Ledger target name.
    pub target_name: String,
    /// Why it was skipped.
    #[serde(flatten)]
    pub reason: SkipReason,
}

/// Outcome of [`MergeEngine::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeReport {
    /// Applied merges in order.
    pub applied: Vec<AppliedMerge>,
    /// Confirmed matches that were not applied, with their final reason.
    pub skipped: Vec<SkippedMatch>,
    /// Number of passes run.
    pub passes: usize,
    /// Applied merges per method.
    pub method_counts: BTreeMap<String, usize>,
}

impl MergeReport {
    /// Number of merges applied.
    #[must_use]
    pub fn merged(&self) -> usize {
        self.applied.len()
    }

    /// Number of skips with a reason matching `pred`.
    pub fn count_skipped(&self, pred: impl Fn(&SkipReason) -> bool) -> usize {
        self.skipped.iter().filter(|s| pred(&s.reason)).count()
    }
}

enum Outcome {
    Applied,
    Skipped(SkipReason),
}

/// Applies confirmed matches to a record store.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    policy: MergePolicy,
}

/// Roster source both records carry a name from, if any.
fn shared_roster(a: &Record, b: &Record) -> Option<SourceId> {
    SourceId::ALL
        .into_iter()
        .filter(|s| s.is_roster())
        .find(|s| a.has_source_name(*s) && b.has_source_name(*s))
}

/// Display name followed by every per-source name.
fn record_names(record: &Record) -> impl Iterator<Item = &str> + '_ {
    std::iter::once(record.name()).chain(record.all_source_names().map(|(_, n)| n))
}

/// Returns true if some name of `a` and some name of `b` refer to the same
/// library system.
fn same_library(a: &Record, b: &Record) -> bool {
    let names_a: Vec<&str> = record_names(a).collect();
    let names_b: Vec<&str> = record_names(b).collect();
    names_a
        .iter()
        .any(|x| names_b.iter().any(|y| same_library_system(x, y).is_some()))
}

impl MergeEngine {
    /// Creates an engine.
    #[must_use]
    pub const fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    /// The merge policy.
    #[must_use]
    pub const fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Merges two live records without checking any guard. `a` survives
    /// unless `b`'s source outranks it. `note` receives the absorbed id.
    /// Returns `(survivor, absorbed)`.
    pub fn merge_pair<S, F>(
        &self,
        store: &mut S,
        a: &RecordId,
        b: &RecordId,
        note: F,
    ) -> ResolveResult<(RecordId, RecordId)>
    where
        S: RecordStore + ?Sized,
        F: FnOnce(&RecordId) -> String,
    {
        let ra = store.get(a)?.ok_or_else(|| StorageError::RecordNotFound(a.clone()))?;
        let rb = store.get(b)?.ok_or_else(|| StorageError::RecordNotFound(b.clone()))?;
        let (survivor, secondary) = if self.policy.a_survives(ra.source(), rb.source()) {
            (ra, rb)
        } else {
            (rb, ra)
        };
        let merged = self.policy.combine(survivor, secondary, &note(secondary.record_id()));
        let ids = (survivor.record_id().clone(), secondary.record_id().clone());
        store.absorb(merged, &ids.1)?;
        Ok(ids)
    }

    /// Applies every confirmed ledger entry.
    pub fn apply<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        ledger: &MatchLedger,
    ) -> ResolveResult<MergeReport> {
        let mut matches: Vec<&MatchDecision> = ledger.confirmed().collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut outcomes: HashMap<usize, Outcome> = HashMap::new();
        let mut report = MergeReport::default();

        loop {
            report.passes += 1;
            let pass = report.passes;
            let mut consumed: HashSet<RecordId> = HashSet::new();
            let mut seen_pairs: HashSet<(RecordId, RecordId)> = HashSet::new();
            let mut applied_this_pass = 0;

            for (idx, m) in matches.iter().enumerate() {
                if !matches!(outcomes.get(&idx), Some(Outcome::Applied)) {
                    let outcome = self.try_merge(store, m, pass, &mut consumed, &mut seen_pairs, &mut report)?;
                    if matches!(outcome, Outcome::Applied) {
                        applied_this_pass += 1;
                    }
                    outcomes.insert(idx, outcome);
                }
                if matches!(
                    outcomes.get(&idx),
                    Some(Outcome::Applied | Outcome::Skipped(SkipReason::AlreadyMerged { .. }))
                ) {
                    applied_this_pass += self.absorb_namesakes(store, m, pass, &mut consumed, &mut report)?;
                }
            }

            debug!(pass, applied = applied_this_pass, "merge pass finished");
            if applied_this_pass == 0 || pass > matches.len() {
                break;
            }
        }

        for (idx, m) in matches.iter().enumerate() {
            if let Some(Outcome::Skipped(reason)) = outcomes.remove(&idx) {
                if matches!(reason, SkipReason::RecordNotFound { .. } | SkipReason::MissingIds) {
                    warn!(
                        source = %m.source_name,
                        target = %m.target_name,
                        %reason,
                        "skipped confirmed match"
                    );
                }
                report.skipped.push(SkippedMatch {
                    source_name: m.source_name.clone(),
                    target_name: m.target_name.clone(),
                    reason,
                });
            }
        }

        info!(
            confirmed = matches.len(),
            merged = report.merged(),
            skipped = report.skipped.len(),
            passes = report.passes,
            "applied confirmed matches"
        );
        Ok(report)
    }

    fn try_merge<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        m: &MatchDecision,
        pass: usize,
        consumed: &mut HashSet<RecordId>,
        seen_pairs: &mut HashSet<(RecordId, RecordId)>,
        report: &mut MergeReport,
    ) -> ResolveResult<Outcome> {
        let (Some(source_id), Some(target_id)) = (&m.source_id, &m.target_id) else {
            return Ok(Outcome::Skipped(SkipReason::MissingIds));
        };
        let Some(a) = store.resolve(source_id)? else {
            return Ok(Outcome::Skipped(SkipReason::RecordNotFound {
                id: source_id.clone(),
            }));
        };
        let Some(b) = store.resolve(target_id)? else {
            return Ok(Outcome::Skipped(SkipReason::RecordNotFound {
                id: target_id.clone(),
            }));
        };
        if a == b {
            return Ok(Outcome::Skipped(SkipReason::AlreadyMerged { survivor: a }));
        }

        let pair = if a <= b { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
        if !seen_pairs.insert(pair) {
            return Ok(Outcome::Skipped(SkipReason::DuplicatePair));
        }
        if consumed.contains(&a) || consumed.contains(&b) {
            return Ok(Outcome::Skipped(SkipReason::ConsumedThisPass));
        }

        {
            let (Some(ra), Some(rb)) = (store.get(&a)?, store.get(&b)?) else {
                return Ok(Outcome::Skipped(SkipReason::RecordNotFound { id: a }));
            };
            if let Some(source) = shared_roster(ra, rb) {
                if !same_library(ra, rb) {
                    debug!(a = %a, b = %b, %source, "same-source guard blocked merge");
                    return Ok(Outcome::Skipped(SkipReason::SameSource { source }));
                }
            }
        }

        self.merge_recorded(store, m, &a, &b, pass, consumed, report)?;
        Ok(Outcome::Applied)
    }

    /// Merges every other live record carrying a name of a confirmed entry
    /// into the entry's survivor. Records consumed earlier in the pass wait
    /// for the next one; the same-roster guard still applies. Returns the
    /// number of merges.
    fn absorb_namesakes<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        m: &MatchDecision,
        pass: usize,
        consumed: &mut HashSet<RecordId>,
        report: &mut MergeReport,
    ) -> ResolveResult<usize> {
        let Some(anchor_id) = &m.source_id else {
            return Ok(0);
        };
        let Some(mut anchor) = store.resolve(anchor_id)? else {
            return Ok(0);
        };
        let keys = [fold_name(&m.source_name), fold_name(&m.target_name)];
        let namesakes: Vec<RecordId> = store
            .records()
            .into_iter()
            .filter(|r| r.record_id() != &anchor && !consumed.contains(r.record_id()))
            .filter(|r| record_names(r).any(|n| keys.contains(&fold_name(n))))
            .map(|r| r.record_id().clone())
            .collect();

        let mut applied = 0;
        for namesake in namesakes {
            let (Some(ra), Some(rb)) = (store.get(&anchor)?, store.get(&namesake)?) else {
                continue;
            };
            if let Some(source) = shared_roster(ra, rb) {
                if !same_library(ra, rb) {
                    debug!(a = %anchor, b = %namesake, %source, "same-source guard blocked namesake");
                    continue;
                }
            }
            anchor = self.merge_recorded(store, m, &anchor, &namesake, pass, consumed, report)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Merges `a` and `b` for entry `m` and records the merge. Returns the
    /// survivor.
    #[allow(clippy::too_many_arguments)]
    fn merge_recorded<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        m: &MatchDecision,
        a: &RecordId,
        b: &RecordId,
        pass: usize,
        consumed: &mut HashSet<RecordId>,
        report: &mut MergeReport,
    ) -> ResolveResult<RecordId> {
        let score = format_score(m.score);
        let (survivor, absorbed) =
            self.merge_pair(store, a, b, |absorbed| format!("Merged {absorbed} (score: {score})"))?;
        debug!(survivor = %survivor, absorbed = %absorbed, score = m.score, "merged records");

        consumed.insert(survivor.clone());
        consumed.insert(absorbed.clone());
        let method = MatchMethod::of(m);
        *report.method_counts.entry(method.to_string()).or_insert(0) += 1;
        report.applied.push(AppliedMerge {
            survivor: survivor.clone(),
            absorbed,
            score: m.score,
            method,
            pass,
        });
        Ok(survivor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MatchLabel;
    use crate::storage::InMemoryRecordStore;

    fn rec(id: &str, source: SourceId, name: &str) -> Record {
        Record::new(source, name).with_id(RecordId::new(id))
    }

    fn confirmed(a: &str, b: &str, score: f64, ida: &str, idb: &str) -> MatchDecision {
        MatchDecision::new(a, b, score)
            .unwrap()
            .with_label(MatchLabel::Confirmed)
            .with_ids(Some(RecordId::new(ida)), Some(RecordId::new(idb)))
            .unwrap()
    }

    #[test]
    fn test_confirmed_match_is_merged_with_provenance() {
        let mut store = InMemoryRecordStore::from_records([
            rec("REC_000001", SourceId::Primary, "Department of Education"),
            rec("REC_000002", SourceId::Primary, "DOE"),
        ])
        .unwrap();
        let mut ledger = MatchLedger::new();
        ledger.insert(confirmed("Department of Education", "DOE", 97.0, "REC_000001", "REC_000002"));

        let report = MergeEngine::default().apply(&mut store, &ledger).unwrap();
        assert_eq!(report.merged(), 1);
        assert_eq!(store.len(), 1);

        let survivor = store.get(&RecordId::new("REC_000001")).unwrap().unwrap();
        assert_eq!(survivor.provenance().merged_from, vec![RecordId::new("REC_000002")]);
        let note = survivor.provenance().merge_note.join("; ");
        assert!(note.contains("REC_000002"));
        assert!(note.contains("97"));
        assert_eq!(report.method_counts.get("reviewed"), Some(&1));
    }

    #[test]
    fn test_two_records_from_same_roster_are_not_merged() {
        let mut store = InMemoryRecordStore::from_records([
            rec("OPS_000001", SourceId::Ops, "Department of Finance"),
            rec("OPS_000002", SourceId::Ops, "Finance Department"),
        ])
        .unwrap();
        let mut ledger = MatchLedger::new();
        ledger.insert(confirmed(
            "Department of Finance",
            "Finance Department",
            96.0,
            "OPS_000001",
            "OPS_000002",
        ));

        let report = MergeEngine::default().apply(&mut store, &ledger).unwrap();
        assert_eq!(report.merged(), 0);
        assert_eq!(store.len(), 2);
        assert_eq!(
            report.skipped[0].reason,
            SkipReason::SameSource { source: SourceId::Ops }
        );
    }

    #[test]
    fn test_library_branches_bypass_same_source_guard() {
        let mut store = InMemoryRecordStore::from_records([
            rec("OPS_000001", SourceId::Ops, "Brooklyn Public Library"),
            rec("OPS_000002", SourceId::Ops, "Brooklyn Public Library - Central"),
        ])
        .unwrap();
        let mut ledger = MatchLedger::new();
        ledger.insert(confirmed(
            "Brooklyn Public Library",
            "Brooklyn Public Library - Central",
            90.0,
            "OPS_000001",
            "OPS_000002",
        ));

        let report = MergeEngine::default().apply(&mut store, &ledger).unwrap();
        assert_eq!(report.merged(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_higher_priority_source_survives() {
        let mut store = InMemoryRecordStore::from_records([
            rec("HOO_000001", SourceId::Hoo, "Dept. of Sanitation"),
            rec("REC_000001", SourceId::Primary, "Department of Sanitation"),
        ])
        .unwrap();
        let mut ledger = MatchLedger::new();
        ledger.insert(confirmed(
            "Dept. of Sanitation",
            "Department of Sanitation",
            99.0,
            "HOO_000001",
            "REC_000001",
        ));

        let report = MergeEngine::default().apply(&mut store, &ledger).unwrap();
        assert_eq!(report.applied[0].survivor, RecordId::new("REC_000001"));
        let survivor = store.get(&RecordId::new("HOO_000001")).unwrap().unwrap();
        assert_eq!(survivor.record_id(), &RecordId::new("REC_000001"));
        assert!(survivor.has_source_name(SourceId::Hoo));
    }

    #[test]
    fn test_chains_merge_across_passes_and_rerun_is_noop() {
        let mut store = InMemoryRecordStore::from_records([
            rec("REC_000001", SourceId::Primary, "Department of Education"),
            rec("REC_000002", SourceId::Primary, "DOE"),
            rec("REC_000003", SourceId::Primary, "Dept of Education"),
        ])
        .unwrap();
        let mut ledger = MatchLedger::new();
        ledger.insert(confirmed("Department of Education", "DOE", 97.0, "REC_000001", "REC_000002"));
        ledger.insert(confirmed("DOE", "Dept of Education", 96.0, "REC_000002", "REC_000003"));

        let engine = MergeEngine::default();
        let report = engine.apply(&mut store, &ledger).unwrap();
        assert_eq!(report.merged(), 2);
        assert_eq!(report.passes, 3);
        assert_eq!(report.applied[1].pass, 2);
        assert_eq!(store.len(), 1);

        let before = store.fingerprint().unwrap();
        let again = engine.apply(&mut store, &ledger).unwrap();
        assert_eq!(again.merged(), 0);
        assert_eq!(
            again.count_skipped(|r| matches!(r, SkipReason::AlreadyMerged { .. })),
            2
        );
        assert_eq!(before, store.fingerprint().unwrap());
    }

    #[test]
    fn test_same_name_in_every_source_collapses_to_one_record() {
        let mut store = InMemoryRecordStore::from_records([
            rec("REC_000001", SourceId::Primary, "Department of Finance"),
            rec("OPS_000001", SourceId::Ops, "Department of Finance"),
            rec("HOO_000001", SourceId::Hoo, "Department  of finance"),
            rec("OPS_000002", SourceId::Ops, "Department of Finance"),
        ])
        .unwrap();
        let mut ledger = MatchLedger::new();
        ledger.insert(confirmed(
            "Department of Finance",
            "Department of Finance",
            100.0,
            "OPS_000001",
            "HOO_000001",
        ));

        let engine = MergeEngine::default();
        let report = engine.apply(&mut store, &ledger).unwrap();
        assert_eq!(report.merged(), 2);
        assert_eq!(store.len(), 2);

        let survivor = store.get(&RecordId::new("REC_000001")).unwrap().unwrap();
        assert!(survivor.has_source_name(SourceId::Ops));
        assert!(survivor.has_source_name(SourceId::Hoo));
        assert_eq!(
            store.resolve(&RecordId::new("HOO_000001")).unwrap(),
            Some(RecordId::new("REC_000001"))
        );
        // The second ops record shares the ops roster with the survivor.
        assert!(store.get(&RecordId::new("OPS_000002")).unwrap().is_some());

        let before = store.fingerprint().unwrap();
        assert_eq!(engine.apply(&mut store, &ledger).unwrap().merged(), 0);
        assert_eq!(before, store.fingerprint().unwrap());
    }

    #[test]
    fn test_namesake_joins_existing_cluster_on_rerun() {
        let mut store = InMemoryRecordStore::from_records([
            rec("OPS_000001", SourceId::Ops, "Department of Finance"),
            rec("HOO_000001", SourceId::Hoo, "Department of Finance"),
        ])
        .unwrap();
        let mut ledger = MatchLedger::new();
        ledger.insert(confirmed(
            "Department of Finance",
            "Department of Finance",
            100.0,
            "OPS_000001",
            "HOO_000001",
        ));
        let engine = MergeEngine::default();
        engine.apply(&mut store, &ledger).unwrap();
        assert_eq!(store.len(), 1);

        store
            .insert(rec("REC_000001", SourceId::Primary, "Department of Finance"))
            .unwrap();
        let report = engine.apply(&mut store, &ledger).unwrap();
        assert_eq!(report.merged(), 1);
        assert_eq!(report.applied[0].survivor, RecordId::new("REC_000001"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_ids_and_unknown_records_are_skipped() {
        let mut store =
            InMemoryRecordStore::from_records([rec("REC_000001", SourceId::Primary, "Parks")]).unwrap();
        let mut ledger = MatchLedger::new();
        ledger.insert(
            MatchDecision::new("Parks", "Parks Dept", 95.0)
                .unwrap()
                .with_label(MatchLabel::Confirmed),
        );
        ledger.insert(confirmed("Parks", "Parks Department", 94.0, "REC_000001", "REC_000777"));

        let report = MergeEngine::default().apply(&mut store, &ledger).unwrap();
        assert_eq!(report.merged(), 0);
        assert_eq!(report.count_skipped(|r| *r == SkipReason::MissingIds), 1);
        assert_eq!(
            report.count_skipped(|r| matches!(r, SkipReason::RecordNotFound { .. })),
            1
        );
    }

    #[test]
    fn test_method_classification() {
        let mut d = MatchDecision::new("a", "b", 96.0).unwrap();
        assert_eq!(MatchMethod::of(&d), MatchMethod::Reviewed);
        d.add_note(AUTO_CONFIRMED_NOTE);
        assert_eq!(MatchMethod::of(&d), MatchMethod::Automatic);
        d.add_note("library system consolidation: queens public library");
        assert_eq!(MatchMethod::of(&d), MatchMethod::Library);
    }
}
