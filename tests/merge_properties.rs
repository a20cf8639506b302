use std::collections::BTreeSet;

use agency_resolve::ledger::MatchLedger;
use agency_resolve::normalize::normalize;
use agency_resolve::{
    CandidateGenerator, IdManager, InMemoryRecordStore, MergeEngine, Record, RecordId, RecordStore,
    SourceId,
};

const NAMES: &[(SourceId, &str)] = &[
    (SourceId::Primary, "Department of Education"),
    (SourceId::Ops, "Department of Education"),
    (SourceId::Hoo, "Education, Department of"),
    (SourceId::Primary, "NYC Police Department"),
    (SourceId::Hoo, "Police Department"),
    (SourceId::Primary, "Mayor's Office of Media and Entertainment"),
    (SourceId::Ops, "Mayors Office of Media & Entertainment"),
    (SourceId::Ops, "Department of Finance"),
    (SourceId::Ops, "Department of Finance"),
    (SourceId::Primary, "Landmarks Preservation Commission"),
    (SourceId::Hoo, "Landmarks Preservation Comm."),
];

fn records() -> Vec<Record> {
    let mut records: Vec<Record> = NAMES.iter().map(|(s, n)| Record::new(*s, n)).collect();
    // One duplicated and one malformed id among otherwise blank ids.
    records[0] = records[0].clone().with_id(RecordId::new("REC_000007"));
    records[3] = records[3].clone().with_id(RecordId::new("REC_000007"));
    records[5] = records[5].clone().with_id(RecordId::new("rec-5"));
    records
}

#[test]
fn normalization_is_idempotent() {
    for (_, name) in NAMES {
        let once = normalize(name);
        assert_eq!(normalize(&once), once, "{name}");
    }
}

#[test]
fn repaired_ids_are_unique_and_well_formed() {
    let mut records = records();
    let report = IdManager::new().repair(&mut records).unwrap();
    assert_eq!(report.kept, 1);

    let ids: BTreeSet<&str> = records.iter().map(|r| r.record_id().as_str()).collect();
    assert_eq!(ids.len(), records.len());
    assert!(records.iter().all(|r| r.record_id().is_well_formed()));
    assert_eq!(records[3].record_id().as_str(), "REC_000008");

    // Repair is a fixed point.
    let again = IdManager::new().repair(&mut records).unwrap();
    assert!(again.is_clean());
}

#[test]
fn pair_scores_are_symmetric() {
    let mut records = records();
    IdManager::new().repair(&mut records).unwrap();
    let generator = CandidateGenerator::default();
    for a in &records {
        for b in &records {
            let ab = generator.score(a, b).map(|c| c.score.total);
            let ba = generator.score(b, a).map(|c| c.score.total);
            assert_eq!(ab, ba, "{} / {}", a.name(), b.name());
        }
    }
}

#[test]
fn merging_conserves_every_id_and_name() {
    let mut records = records();
    IdManager::new().repair(&mut records).unwrap();
    let input_ids: BTreeSet<RecordId> = records.iter().map(|r| r.record_id().clone()).collect();
    let input_names: BTreeSet<String> = records.iter().map(|r| r.name().to_string()).collect();
    let mut store = InMemoryRecordStore::from_records(records).unwrap();

    let mut ledger = MatchLedger::new();
    CandidateGenerator::default()
        .extend_ledger(&store, &mut ledger)
        .unwrap();
    assert!(ledger.confirmed().count() >= 3);

    let report = MergeEngine::default().apply(&mut store, &ledger).unwrap();
    assert!(report.merged() > 0);

    // Every input id is either live or listed exactly once in a survivor's provenance.
    let mut seen: Vec<RecordId> = Vec::new();
    for record in store.records() {
        assert!(!record.provenance().merged_from.contains(record.record_id()));
        seen.push(record.record_id().clone());
        seen.extend(record.provenance().merged_from.iter().cloned());
    }
    let unique: BTreeSet<RecordId> = seen.iter().cloned().collect();
    assert_eq!(unique.len(), seen.len());
    assert_eq!(unique, input_ids);

    // No raw name is lost.
    let kept: BTreeSet<String> = store
        .records()
        .iter()
        .flat_map(|r| r.all_source_names().map(|(_, n)| n.to_string()).collect::<Vec<_>>())
        .collect();
    assert!(input_names.is_subset(&kept));

    // Same-roster duplicates survive as two records.
    let finance = store
        .records()
        .iter()
        .filter(|r| r.name() == "Department of Finance")
        .count();
    assert_eq!(finance, 2);
    for id in &input_ids {
        assert!(store.resolve(id).unwrap().is_some());
    }
}
