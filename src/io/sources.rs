//! Source table ingestion.

use std::path::Path;

use tracing::{debug, info};

use crate::error::ConfigError;
use crate::record::{Record, RecordId, AGENCY_NAME_FIELD};
use crate::source::SourceId;

/// Optional id column of every input table.
pub const RECORD_ID_COLUMN: &str = "RecordID";

/// Generic name column accepted when `Agency Name` is absent.
pub const NAME_COLUMN: &str = "Name";

/// Rows of one source table.
#[derive(Debug, Clone)]
pub struct SourceTable {
    /// Source of every row.
    pub source: SourceId,
    /// Header in file order.
    pub columns: Vec<String>,
    /// One record per non-empty row, ids as given.
    pub records: Vec<Record>,
}

fn pick_name_column(columns: &[String], source: SourceId) -> Option<usize> {
    [AGENCY_NAME_FIELD, NAME_COLUMN, source.name_column()]
        .iter()
        .find_map(|wanted| columns.iter().position(|c| c == wanted))
}

/// Reads a source table.
///
/// The name comes from `Agency Name`, else `Name`, else the source's own
/// name column; a table with none of them is rejected. Every other column is
/// kept as a field, except per-source name columns which become source
/// names.
pub fn read_source_table(path: &Path, source: SourceId) -> Result<SourceTable, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let table = source.tag();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| ConfigError::csv(table, e))?;
    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| ConfigError::csv(table, e))?
        .iter()
        .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
        .collect();

    let name_idx = pick_name_column(&columns, source).ok_or_else(|| ConfigError::MissingColumn {
        table: table.to_string(),
        column: AGENCY_NAME_FIELD.to_string(),
    })?;
    let id_idx = columns.iter().position(|c| c == RECORD_ID_COLUMN);

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| ConfigError::csv(table, e))?;
        if row.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        let cell = |idx: usize| row.get(idx).map(str::trim).unwrap_or_default();

        let mut record = Record::new(source, cell(name_idx));
        if let Some(idx) = id_idx {
            record = record.with_id(RecordId::new(cell(idx)));
        }
        for (idx, column) in columns.iter().enumerate() {
            if Some(idx) == id_idx || (idx == name_idx && column != AGENCY_NAME_FIELD) {
                continue;
            }
            let value = cell(idx);
            if value.is_empty() {
                continue;
            }
            match SourceId::ALL.into_iter().find(|s| s.name_column() == column) {
                Some(s) => {
                    record.add_source_name(s, value);
                }
                None => record.set_field(column.clone(), value),
            }
        }
        record.refresh_name();
        records.push(record);
    }

    debug!(%source, path = %path.display(), columns = columns.len(), "read source header");
    info!(%source, rows = records.len(), "loaded source table");
    Ok(SourceTable {
        source,
        columns,
        records,
    })
}
