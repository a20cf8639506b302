//! Run audit.
//!
//! Data-quality findings never stop a run; they are collected here together
//! with each stage's report and published as one JSON document.

use std::collections::BTreeMap;
use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::ids::IdRepairReport;
use crate::ledger::{BackfillReport, LabelCounts};
use crate::merge::{MergeReport, OverrideReport};
use crate::record::{Record, RecordId};
use crate::source::SourceId;

/// A data-quality observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// The same raw name appears on several rows of one source.
    DuplicateRawName {
        /// Source table.
        source: SourceId,
        /// Raw name as written.
        name: String,
        /// Number of rows carrying it.
        count: usize,
    },
    /// A name that normalizes to nothing.
    EmptyNormalizedName {
        /// Source table.
        source: SourceId,
        /// Id as read, possibly blank.
        record_id: RecordId,
        /// Raw name.
        name: String,
    },
    /// A ledger name no record could be found for.
    UnresolvedLedgerName {
        /// Ledger name.
        name: String,
    },
}

/// Flags raw names repeated within one source.
#[must_use]
pub fn duplicate_raw_names(source: SourceId, records: &[Record]) -> Vec<Finding> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        if !record.name().is_empty() {
            *counts.entry(record.name()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(name, count)| Finding::DuplicateRawName {
            source,
            name: name.to_string(),
            count,
        })
        .collect()
}

/// Flags records whose name normalizes to an empty key.
#[must_use]
pub fn empty_normalized_names(records: &[Record]) -> Vec<Finding> {
    records
        .iter()
        .filter(|r| r.name_normalized().is_empty())
        .map(|r| Finding::EmptyNormalizedName {
            source: r.source(),
            record_id: r.record_id().clone(),
            name: r.name().to_string(),
        })
        .collect()
}

/// Candidate generation summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CandidateSummary {
    /// New candidates added to the ledger.
    pub generated: usize,
    /// Pairs confirmed by the library rule.
    pub library_confirmed: usize,
}

/// Per-stage reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageReports {
    /// Records read per source.
    pub loaded: BTreeMap<String, usize>,
    /// Id repair.
    pub ids: IdRepairReport,
    /// Ledger id back-fill.
    pub backfill: BackfillReport,
    /// Candidate generation.
    pub candidates: CandidateSummary,
    /// Merge engine.
    pub merge: Option<MergeReport>,
    /// Manual overrides.
    pub overrides: Option<OverrideReport>,
    /// Ledger labels at the end of the run.
    pub ledger: LabelCounts,
    /// Records in the published table.
    pub output_records: usize,
}

/// The published audit document.
#[derive(Debug, Clone, Serialize)]
pub struct AuditDocument {
    /// Run id.
    pub run_id: Uuid,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end, set when the document is finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Effective configuration.
    pub config: PipelineConfig,
    /// Store fingerprint after ingestion.
    pub input_fingerprint: String,
    /// Store fingerprint after merging.
    pub output_fingerprint: String,
    /// Findings in discovery order.
    pub findings: Vec<Finding>,
    /// Stage reports.
    pub stages: StageReports,
}

impl AuditDocument {
    /// Starts a document for a run.
    #[must_use]
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, config: PipelineConfig) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: None,
            config,
            input_fingerprint: String::new(),
            output_fingerprint: String::new(),
            findings: Vec::new(),
            stages: StageReports::default(),
        }
    }

    /// Returns true if merging or overrides changed the store.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.input_fingerprint != self.output_fingerprint
    }

    /// Stamps the finish time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Serializes the document as pretty JSON.
    pub fn write_json<W: Write>(&self, writer: W) -> Result<(), ConfigError> {
        serde_json::to_writer_pretty(writer, self).map_err(|e| ConfigError::Parse {
            message: format!("audit: {e}"),
        })
    }
}
