//! Manual override table.

use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;
use crate::merge::OverrideRow;

const TABLE: &str = "overrides";

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "PrimaryRecordID", default)]
    primary: String,
    #[serde(rename = "SecondaryRecordID", default)]
    secondary: String,
    #[serde(rename = "Notes", default)]
    notes: String,
}

/// Reads the overrides table. Blank rows are skipped.
pub fn read_overrides(path: &Path) -> Result<Vec<OverrideRow>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| ConfigError::csv(TABLE, e))?;
    let headers = reader.headers().map_err(|e| ConfigError::csv(TABLE, e))?;
    if !headers.iter().any(|h| h.trim() == "PrimaryRecordID") {
        return Err(ConfigError::MissingColumn {
            table: TABLE.to_string(),
            column: "PrimaryRecordID".to_string(),
        });
    }

    let mut rows = Vec::new();
    for (idx, raw) in reader.deserialize::<RawRow>().enumerate() {
        let raw = raw.map_err(|e| ConfigError::csv(TABLE, e))?;
        if raw.primary.trim().is_empty() && raw.secondary.trim().is_empty() && raw.notes.trim().is_empty() {
            continue;
        }
        rows.push(OverrideRow {
            line: idx + 2,
            primary: raw.primary.trim().to_string(),
            secondary: raw.secondary.trim().to_string(),
            notes: raw.notes,
        });
    }
    info!(rows = rows.len(), "loaded manual overrides");
    Ok(rows)
}
