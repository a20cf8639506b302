//! The deduplicated output table.
//!
//! The published table is also a valid input: reading it back yields the same
//! records, with absorbed ids resolvable through `merged_from`.

use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::error::ConfigError;
use crate::merge::conflict::{status_column, suggested_column, FieldResolution};
use crate::merge::MergePolicy;
use crate::record::{Provenance, Record, RecordId};
use crate::source::SourceId;
use crate::storage::RecordStore;

const TABLE: &str = "dataset";

/// Display name column.
pub const NAME: &str = "Name";
/// Id column.
pub const RECORD_ID: &str = "RecordID";
/// Normalized name column.
pub const NAME_NORMALIZED: &str = "NameNormalized";
/// Originating source column.
pub const SOURCE: &str = "source";
/// Absorbed ids, as a JSON array.
pub const MERGED_FROM: &str = "merged_from";
/// Merge log, `"; "`-joined.
pub const MERGE_NOTE: &str = "merge_note";

const NOTE_SEPARATOR: &str = "; ";

fn core_columns() -> Vec<String> {
    let mut cols = vec![
        RECORD_ID.to_string(),
        NAME.to_string(),
        NAME_NORMALIZED.to_string(),
        SOURCE.to_string(),
    ];
    cols.extend(SourceId::ALL.iter().map(|s| s.name_column().to_string()));
    cols.push(MERGED_FROM.to_string());
    cols.push(MERGE_NOTE.to_string());
    cols
}

fn derived_columns(policy: &MergePolicy) -> Vec<String> {
    policy
        .conflict_fields()
        .iter()
        .flat_map(|f| [status_column(f), suggested_column(f)])
        .collect()
}

/// Full header of the published table for a store.
#[must_use]
pub fn dataset_columns<S: RecordStore + ?Sized>(store: &S, policy: &MergePolicy) -> Vec<String> {
    let core = core_columns();
    let derived = derived_columns(policy);
    let mut columns = core.clone();
    columns.extend(
        store
            .columns()
            .iter()
            .filter(|c| !core.contains(c) && !derived.contains(c))
            .cloned(),
    );
    columns.extend(derived);
    columns
}

fn to_json_error(e: serde_json::Error) -> ConfigError {
    ConfigError::Parse {
        message: format!("merged_from: {e}"),
    }
}

/// Writes every live record in store order.
pub fn write_dataset<S, W>(store: &S, policy: &MergePolicy, writer: W) -> Result<usize, ConfigError>
where
    S: RecordStore + ?Sized,
    W: Write,
{
    let columns = dataset_columns(store, policy);
    let mut out = csv::Writer::from_writer(writer);
    out.write_record(&columns).map_err(|e| ConfigError::csv(TABLE, e))?;

    let records = store.records();
    for record in &records {
        let mut row: Vec<String> = Vec::with_capacity(columns.len());
        row.push(record.record_id().to_string());
        row.push(record.name().to_string());
        row.push(record.name_normalized().to_string());
        row.push(record.source().tag().to_string());
        for source in SourceId::ALL {
            row.push(record.joined_source_names(source, policy.name_separator()));
        }
        row.push(serde_json::to_string(&record.provenance().merged_from).map_err(to_json_error)?);
        row.push(record.provenance().merge_note.join(NOTE_SEPARATOR));

        let core_len = row.len();
        let derived_start = columns.len() - policy.conflict_fields().len() * 2;
        for column in &columns[core_len..derived_start] {
            row.push(record.field(column).unwrap_or_default().to_string());
        }
        for field in policy.conflict_fields() {
            let resolution = record.resolution(field);
            if resolution.observations().is_empty() {
                row.push(String::new());
                row.push(String::new());
            } else {
                let status = resolution.status(field);
                // Agreeing values suggest the record's own form.
                let suggested = if status.is_conflict() {
                    resolution.suggested(policy.conflict_priority())
                } else {
                    record
                        .field(field)
                        .or_else(|| resolution.observations().first().map(|o| o.value.as_str()))
                };
                row.push(status.to_string());
                row.push(suggested.unwrap_or_default().to_string());
            }
        }
        out.write_record(&row).map_err(|e| ConfigError::csv(TABLE, e))?;
    }
    out.flush().map_err(|e| ConfigError::csv(TABLE, e.into()))?;
    info!(records = records.len(), columns = columns.len(), "wrote deduplicated table");
    Ok(records.len())
}

/// A published table read back for another run.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// Pass-through columns in file order.
    pub columns: Vec<String>,
    /// Records with ids as published.
    pub records: Vec<Record>,
}

/// Reads a published table back.
pub fn read_dataset(path: &Path, policy: &MergePolicy) -> Result<Dataset, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| ConfigError::csv(TABLE, e))?;
    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| ConfigError::csv(TABLE, e))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let position = |name: &str| columns.iter().position(|c| c == name);
    let id_idx = position(RECORD_ID).ok_or_else(|| ConfigError::MissingColumn {
        table: TABLE.to_string(),
        column: RECORD_ID.to_string(),
    })?;
    let name_idx = position(NAME).ok_or_else(|| ConfigError::MissingColumn {
        table: TABLE.to_string(),
        column: NAME.to_string(),
    })?;

    let core = core_columns();
    let derived = derived_columns(policy);
    let statuses: Vec<(&String, usize)> = policy
        .conflict_fields()
        .iter()
        .filter_map(|f| position(&status_column(f)).map(|idx| (f, idx)))
        .collect();

    let passthrough: Vec<String> = columns
        .iter()
        .filter(|c| !core.contains(c) && !derived.contains(c))
        .cloned()
        .collect();

    let mut records = Vec::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|e| ConfigError::csv(TABLE, e))?;
        let cell = |idx: usize| row.get(idx).map(str::trim).unwrap_or_default();
        let id = RecordId::new(cell(id_idx));
        let source = match position(SOURCE).map(cell).filter(|s| !s.is_empty()) {
            Some(tag) => tag.parse::<SourceId>().map_err(|e| ConfigError::Parse {
                message: format!("dataset line {}: {e}", line + 2),
            })?,
            None => id
                .prefix()
                .and_then(|p| SourceId::ALL.into_iter().find(|s| s.id_prefix() == p))
                .unwrap_or(SourceId::Primary),
        };

        let mut record = Record::restore(id, source, cell(name_idx));
        for s in SourceId::ALL {
            if let Some(idx) = position(s.name_column()) {
                for name in cell(idx).split(policy.name_separator()) {
                    record.add_source_name(s, name);
                }
            }
        }

        let merged_from: Vec<RecordId> = match position(MERGED_FROM).map(cell).filter(|s| !s.is_empty()) {
            Some(json) => serde_json::from_str(json).map_err(to_json_error)?,
            None => Vec::new(),
        };
        let merge_note = position(MERGE_NOTE)
            .map(cell)
            .unwrap_or_default()
            .split(NOTE_SEPARATOR)
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
            .collect();
        record.restore_provenance(Provenance {
            merged_from,
            merge_note,
        });

        for (idx, column) in columns.iter().enumerate() {
            if !passthrough.contains(column) {
                continue;
            }
            let value = cell(idx);
            if !value.is_empty() {
                record.set_field(column.clone(), value);
            }
        }
        for (field, idx) in &statuses {
            if let Some(resolution) = FieldResolution::parse_status(cell(*idx)) {
                record.set_resolution(field, resolution);
            }
        }
        record.refresh_name();
        records.push(record);
    }

    info!(records = records.len(), "loaded published table");
    Ok(Dataset {
        columns: passthrough,
        records,
    })
}
