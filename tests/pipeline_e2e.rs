use std::fs;
use std::path::Path;

use agency_resolve::io::read_dataset;
use agency_resolve::{
    MergePolicy, Pipeline, PipelineConfig, PipelineInputs, PipelineOutputs, RecordId, SourceId,
    SourceInputs,
};

fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn seed(dir: &Path) -> PipelineInputs {
    let primary = write(
        dir,
        "primary.csv",
        "RecordID,Agency Name,Acronym,URL\n\
         REC_000001,Department of Education,DOE,https://www.schools.nyc.gov\n\
         REC_000002,DOE,,\n\
         ,Department of Sanitation,DSNY,nyc.gov/dsny\n",
    );
    let ops = write(
        dir,
        "ops.csv",
        "Name,URL,PrincipalOfficerName\n\
         Department of Sanitation,https://www.nyc.gov/dsny,Jessica Tisch\n\
         Brooklyn Public Library,,\n\
         Brooklyn Public Library - Central Library,,\n\
         Department of Finance,,\n\
         Department of Finance,,\n",
    );
    let hoo = write(dir, "hoo.csv", "Name,URL\nDept. of Sanitation,nyc.gov/site/dsny\n");
    let ledger = write(
        dir,
        "ledger.csv",
        "Source,Target,Score,Label,SourceID,TargetID,Notes\n\
         Department of Education,DOE,97,Match,REC_000001,REC_000002,\n\
         Brooklyn Public Library,Brooklyn Public Library - Central Library,76,,,,\n",
    );
    PipelineInputs {
        sources: SourceInputs::Tables { primary, ops, hoo },
        ledger,
        overrides: None,
    }
}

fn outputs(dir: &Path) -> PipelineOutputs {
    PipelineOutputs {
        dataset: dir.join("out/agencies.csv"),
        ledger: dir.join("out/ledger.csv"),
        audit: dir.join("out/audit.json"),
    }
}

#[test]
fn pipeline_merges_confirmed_matches_and_keeps_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = seed(dir.path());
    let out = outputs(dir.path());

    let summary = Pipeline::new(PipelineConfig::default())
        .unwrap()
        .run(&inputs, &out)
        .unwrap();
    assert_eq!(summary.published.len(), 3);
    assert_eq!(summary.records, 5);
    assert_eq!(summary.merged, 4);
    assert!(summary.changed);

    let dataset = read_dataset(&out.dataset, &MergePolicy::default()).unwrap();
    let doe = dataset
        .records
        .iter()
        .find(|r| r.record_id().as_str() == "REC_000001")
        .unwrap();
    assert_eq!(doe.provenance().merged_from, vec![RecordId::new("REC_000002")]);
    let notes = doe.provenance().merge_note.join("; ");
    assert!(notes.contains("REC_000002"));
    assert!(notes.contains("97"));

    let sanitation = dataset
        .records
        .iter()
        .find(|r| r.name() == "Department of Sanitation")
        .unwrap();
    assert_eq!(sanitation.record_id().as_str(), "REC_000003");
    assert_eq!(sanitation.provenance().merged_from.len(), 2);
    assert!(sanitation.has_source_name(SourceId::Hoo));
    assert_eq!(sanitation.field("PrincipalOfficerName"), Some("Jessica Tisch"));
    assert!(sanitation.resolution("URL").status("URL").is_conflict());

    let finance: Vec<_> = dataset
        .records
        .iter()
        .filter(|r| r.name() == "Department of Finance")
        .collect();
    assert_eq!(finance.len(), 2);

    let libraries = dataset
        .records
        .iter()
        .filter(|r| r.name().starts_with("Brooklyn Public Library"))
        .count();
    assert_eq!(libraries, 1);

    let ledger = fs::read_to_string(&out.ledger).unwrap();
    assert!(ledger.contains("auto-confirmed"));
    assert!(ledger.contains("library system consolidation: brooklyn public library"));

    let audit: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&out.audit).unwrap()).unwrap();
    assert_eq!(audit["run_id"], summary.run_id.to_string());
    assert!(audit["findings"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f["kind"] == "duplicate_raw_name" && f["name"] == "Department of Finance"));
    assert_eq!(audit["stages"]["ids"]["changes"][0]["new"], "REC_000003");
}

#[test]
fn rerun_over_published_output_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = seed(dir.path());
    let first = outputs(dir.path());
    Pipeline::new(PipelineConfig::default())
        .unwrap()
        .run(&inputs, &first)
        .unwrap();

    let rerun_inputs = PipelineInputs {
        sources: SourceInputs::Dataset(first.dataset.clone()),
        ledger: first.ledger.clone(),
        overrides: None,
    };
    let second = PipelineOutputs {
        dataset: dir.path().join("second/agencies.csv"),
        ledger: dir.path().join("second/ledger.csv"),
        audit: dir.path().join("second/audit.json"),
    };
    let summary = Pipeline::new(PipelineConfig::default())
        .unwrap()
        .run(&rerun_inputs, &second)
        .unwrap();

    assert_eq!(summary.merged, 0);
    assert!(!summary.changed);
    assert_eq!(
        fs::read_to_string(&first.dataset).unwrap(),
        fs::read_to_string(&second.dataset).unwrap()
    );
}

#[test]
fn overrides_force_merge_and_insert() {
    let dir = tempfile::tempdir().unwrap();
    let mut inputs = seed(dir.path());
    inputs.overrides = Some(write(
        dir.path(),
        "overrides.csv",
        "PrimaryRecordID,SecondaryRecordID,Notes\n\
         OPS_000004,OPS_000005,\n\
         REC_000100,,\"{\"\"Name\"\": \"\"Office of Nightlife\"\"}\"\n",
    ));
    let out = outputs(dir.path());
    let summary = Pipeline::new(PipelineConfig::default())
        .unwrap()
        .run(&inputs, &out)
        .unwrap();
    assert_eq!(summary.records, 5);

    let dataset = read_dataset(&out.dataset, &MergePolicy::default()).unwrap();
    let finance = dataset
        .records
        .iter()
        .find(|r| r.record_id().as_str() == "OPS_000004")
        .unwrap();
    assert_eq!(finance.provenance().merged_from, vec![RecordId::new("OPS_000005")]);
    assert!(dataset
        .records
        .iter()
        .any(|r| r.record_id().as_str() == "REC_000100" && r.name() == "Office of Nightlife"));
}

#[test]
fn same_name_in_every_source_publishes_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = PipelineInputs {
        sources: SourceInputs::Tables {
            primary: write(dir.path(), "primary.csv", "RecordID,Agency Name\nREC_000001,Department of Finance\n"),
            ops: write(dir.path(), "ops.csv", "Name\nDepartment of Finance\n"),
            hoo: write(dir.path(), "hoo.csv", "Name\nDepartment of Finance\n"),
        },
        ledger: dir.path().join("ledger.csv"),
        overrides: None,
    };
    let first = outputs(dir.path());
    let summary = Pipeline::new(PipelineConfig::default())
        .unwrap()
        .run(&inputs, &first)
        .unwrap();
    assert_eq!(summary.records, 1);
    assert_eq!(summary.merged, 2);

    let dataset = read_dataset(&first.dataset, &MergePolicy::default()).unwrap();
    let finance = &dataset.records[0];
    assert_eq!(finance.record_id().as_str(), "REC_000001");
    assert!(finance.has_source_name(SourceId::Ops));
    assert!(finance.has_source_name(SourceId::Hoo));

    let rerun_inputs = PipelineInputs {
        sources: SourceInputs::Dataset(first.dataset.clone()),
        ledger: first.ledger.clone(),
        overrides: None,
    };
    let second = PipelineOutputs {
        dataset: dir.path().join("second/agencies.csv"),
        ledger: dir.path().join("second/ledger.csv"),
        audit: dir.path().join("second/audit.json"),
    };
    let summary = Pipeline::new(PipelineConfig::default())
        .unwrap()
        .run(&rerun_inputs, &second)
        .unwrap();
    assert_eq!(summary.records, 1);
    assert!(!summary.changed);
}

#[test]
fn rerun_with_same_overrides_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut inputs = seed(dir.path());
    let overrides = write(
        dir.path(),
        "overrides.csv",
        "PrimaryRecordID,SecondaryRecordID,Notes\n\
         OPS_000004,OPS_000005,\n\
         new-row,,\"{\"\"Name\"\": \"\"Office of Nightlife\"\"}\"\n\
         REC_000001,,\"{\"\"URL\"\": \"\"https://schools.nyc.gov\"\"}\"\n",
    );
    inputs.overrides = Some(overrides.clone());
    let first = outputs(dir.path());
    let summary = Pipeline::new(PipelineConfig::default())
        .unwrap()
        .run(&inputs, &first)
        .unwrap();
    assert_eq!(summary.records, 5);

    let rerun_inputs = PipelineInputs {
        sources: SourceInputs::Dataset(first.dataset.clone()),
        ledger: first.ledger.clone(),
        overrides: Some(overrides),
    };
    let second = PipelineOutputs {
        dataset: dir.path().join("second/agencies.csv"),
        ledger: dir.path().join("second/ledger.csv"),
        audit: dir.path().join("second/audit.json"),
    };
    let summary = Pipeline::new(PipelineConfig::default())
        .unwrap()
        .run(&rerun_inputs, &second)
        .unwrap();
    assert_eq!(summary.records, 5);
    assert!(!summary.changed);

    let dataset = read_dataset(&second.dataset, &MergePolicy::default()).unwrap();
    let nightlife = dataset
        .records
        .iter()
        .filter(|r| r.name() == "Office of Nightlife")
        .count();
    assert_eq!(nightlife, 1);
    let education = dataset
        .records
        .iter()
        .find(|r| r.record_id().as_str() == "REC_000001")
        .unwrap();
    assert_eq!(education.field("URL"), Some("https://schools.nyc.gov"));
    let update_notes = education
        .provenance()
        .merge_note
        .iter()
        .filter(|n| n.starts_with("Manual override"))
        .count();
    assert_eq!(update_notes, 1);
}

#[test]
fn failed_run_leaves_published_files_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mut inputs = seed(dir.path());
    let out = outputs(dir.path());
    fs::create_dir_all(out.dataset.parent().unwrap()).unwrap();
    fs::write(&out.dataset, "previous").unwrap();

    if let SourceInputs::Tables { ops, .. } = &mut inputs.sources {
        *ops = dir.path().join("missing.csv");
    }
    let err = Pipeline::new(PipelineConfig::default())
        .unwrap()
        .run(&inputs, &out)
        .unwrap_err();
    assert!(err.is_config());
    assert_eq!(fs::read_to_string(&out.dataset).unwrap(), "previous");
    assert!(!out.ledger.exists());
}

#[test]
fn invalid_configuration_is_rejected_before_running() {
    let mut config = PipelineConfig::default();
    config.matcher.min_score = 99.0;
    config.matcher.auto_confirm_score = 90.0;
    assert!(Pipeline::new(config).unwrap_err().is_config());
    assert!(PipelineConfig::from_toml_str("[matcher]\nmin_score = 99.0\nauto_confirm_score = 90.0\n").is_err());
}
