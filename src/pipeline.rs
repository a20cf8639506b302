//! End-to-end batch run.
//!
//! A run reads the sources, repairs ids, extends the ledger, merges, applies
//! overrides and publishes. Every stage works on values it owns; nothing is
//! published unless all stages succeeded.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::{info, info_span};
use uuid::Uuid;

use crate::audit::{duplicate_raw_names, empty_normalized_names, AuditDocument, Finding};
use crate::config::PipelineConfig;
use crate::error::{ConfigError, ResolveResult};
use crate::ids::IdManager;
use crate::io::{
    read_dataset, read_ledger, read_overrides, read_source_table, write_dataset, write_ledger,
    Publisher,
};
use crate::ledger::{backfill_ids, consolidate_libraries, MatchLedger};
use crate::matching::CandidateGenerator;
use crate::merge::{apply_overrides, MergeEngine, MergePolicy};
use crate::source::SourceId;
use crate::storage::{InMemoryRecordStore, RecordStore};

/// Where records come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInputs {
    /// The three raw source tables.
    Tables {
        /// Primary agency export.
        primary: PathBuf,
        /// Operations roster.
        ops: PathBuf,
        /// Government roster.
        hoo: PathBuf,
    },
    /// A table published by an earlier run.
    Dataset(PathBuf),
}

/// Input files of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineInputs {
    /// Record sources.
    pub sources: SourceInputs,
    /// Ledger file; a missing file starts an empty ledger.
    pub ledger: PathBuf,
    /// Optional manual overrides table.
    pub overrides: Option<PathBuf>,
}

/// Output files of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutputs {
    /// Deduplicated table.
    pub dataset: PathBuf,
    /// Updated ledger.
    pub ledger: PathBuf,
    /// Audit JSON.
    pub audit: PathBuf,
}

/// Identity and settings of one run, passed to every stage.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Run id.
    pub run_id: Uuid,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Validated configuration.
    pub config: PipelineConfig,
}

impl RunContext {
    /// Validates `config` and starts a context.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            config,
        })
    }
}

/// In-memory result of a run, before publication.
#[derive(Debug)]
pub struct Resolution {
    /// Deduplicated records.
    pub store: InMemoryRecordStore,
    /// Updated ledger.
    pub ledger: MatchLedger,
    /// Audit collected so far.
    pub audit: AuditDocument,
}

/// Result of a published run.
#[derive(Debug)]
pub struct RunSummary {
    /// Run id.
    pub run_id: Uuid,
    /// Records published.
    pub records: usize,
    /// Merges applied by the engine.
    pub merged: usize,
    /// Whether merging or overrides changed any record.
    pub changed: bool,
    /// Files written.
    pub published: Vec<PathBuf>,
}

/// Batch pipeline.
#[derive(Debug, Clone)]
pub struct Pipeline {
    ctx: RunContext,
    merge: bool,
}

impl Pipeline {
    /// Creates a pipeline with a fresh run context.
    pub fn new(config: PipelineConfig) -> ResolveResult<Self> {
        Ok(Self {
            ctx: RunContext::new(config)?,
            merge: true,
        })
    }

    /// Disables merging and overrides; the run only extends the ledger.
    #[must_use]
    pub fn skip_merge(mut self, skip: bool) -> Self {
        self.merge = !skip;
        self
    }

    /// The run context.
    #[must_use]
    pub const fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Runs every stage and publishes the outputs.
    pub fn run(&self, inputs: &PipelineInputs, outputs: &PipelineOutputs) -> ResolveResult<RunSummary> {
        let span = info_span!("run", run_id = %self.ctx.run_id);
        let _guard = span.enter();

        let resolution = self.resolve(inputs)?;
        let merged = resolution.audit.stages.merge.as_ref().map_or(0, |m| m.merged());
        let changed = resolution.audit.changed();
        let (records, published) = self.publish(resolution, outputs)?;
        info!(records, merged, changed, "run finished");
        Ok(RunSummary {
            run_id: self.ctx.run_id,
            records,
            merged,
            changed,
            published,
        })
    }

    /// Runs every stage in memory.
    pub fn resolve(&self, inputs: &PipelineInputs) -> ResolveResult<Resolution> {
        let config = &self.ctx.config;
        let policy = MergePolicy::from_config(&config.merge);
        let mut audit = AuditDocument::new(self.ctx.run_id, self.ctx.started_at, config.clone());

        // Ingest.
        let (columns, mut records) = match &inputs.sources {
            SourceInputs::Tables { primary, ops, hoo } => {
                let mut columns: Vec<String> = Vec::new();
                let mut records = Vec::new();
                for (source, path) in [(SourceId::Primary, primary), (SourceId::Ops, ops), (SourceId::Hoo, hoo)] {
                    let table = read_source_table(path, source)?;
                    audit.findings.extend(duplicate_raw_names(source, &table.records));
                    audit.stages.loaded.insert(source.tag().to_string(), table.records.len());
                    for c in table.columns {
                        if !columns.contains(&c) {
                            columns.push(c);
                        }
                    }
                    records.extend(table.records);
                }
                (columns, records)
            }
            SourceInputs::Dataset(path) => {
                let dataset = read_dataset(path, &policy)?;
                audit.stages.loaded.insert("dataset".to_string(), dataset.records.len());
                (dataset.columns, dataset.records)
            }
        };
        audit.findings.extend(empty_normalized_names(&records));

        let mut ids = IdManager::new();
        audit.stages.ids = ids.repair(&mut records)?;
        let pass_through: Vec<String> = columns
            .into_iter()
            .filter(|c| records.iter().any(|r| r.fields().contains_key(c)))
            .collect();
        let mut store = InMemoryRecordStore::from_table(&pass_through, records)?;
        audit.input_fingerprint = store.fingerprint()?;

        // Ledger.
        let mut ledger = read_ledger(&inputs.ledger)?;
        let backfill = backfill_ids(&mut ledger, &store, config.ledger.fuzzy_threshold);
        let unresolved: BTreeSet<&String> = backfill.unresolved.iter().collect();
        audit.findings.extend(
            unresolved
                .into_iter()
                .map(|name| Finding::UnresolvedLedgerName { name: name.clone() }),
        );
        audit.stages.backfill = backfill;

        let generator = CandidateGenerator::new(config.matcher.clone());
        audit.stages.candidates.generated = generator.extend_ledger(&store, &mut ledger)?;
        audit.stages.candidates.library_confirmed = consolidate_libraries(&mut ledger);

        // Merge.
        if self.merge {
            let engine = MergeEngine::new(policy.clone());
            audit.stages.merge = Some(engine.apply(&mut store, &ledger)?);
            if let Some(path) = &inputs.overrides {
                let rows = read_overrides(path)?;
                audit.stages.overrides = Some(apply_overrides(&mut store, &mut ids, &policy, &rows));
            }
        }

        audit.output_fingerprint = store.fingerprint()?;
        audit.stages.ledger = ledger.label_counts();
        audit.stages.output_records = store.len();
        info!(
            records = store.len(),
            ledger = ledger.len(),
            findings = audit.findings.len(),
            "resolved records"
        );
        Ok(Resolution { store, ledger, audit })
    }

    /// Stages every output and publishes them together. Returns the number
    /// of records written and the published paths.
    pub fn publish(
        &self,
        resolution: Resolution,
        outputs: &PipelineOutputs,
    ) -> ResolveResult<(usize, Vec<PathBuf>)> {
        let Resolution {
            store,
            ledger,
            mut audit,
        } = resolution;
        let policy = MergePolicy::from_config(&self.ctx.config.merge);

        let mut publisher = Publisher::new();
        let mut records = 0;
        publisher.stage(&outputs.dataset, |w| {
            records = write_dataset(&store, &policy, w)?;
            Ok(())
        })?;
        publisher.stage(&outputs.ledger, |w| write_ledger(&ledger, w))?;
        audit.finish();
        publisher.stage(&outputs.audit, |w| {
            audit.write_json(&mut *w)?;
            w.write_all(b"\n").map_err(|e| ConfigError::io(&outputs.audit, e))
        })?;
        Ok((records, publisher.commit()?))
    }
}
