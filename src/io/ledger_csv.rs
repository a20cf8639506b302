//! Match ledger persistence.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::ledger::{InsertOutcome, MatchDecision, MatchLabel, MatchLedger};
use crate::record::RecordId;

const TABLE: &str = "ledger";

/// Shortest text that reads back as exactly `score`, with at least one
/// decimal place.
fn score_text(score: f64) -> String {
    let text = score.to_string();
    if text.contains(['.', 'e']) {
        text
    } else {
        format!("{text}.0")
    }
}

/// One ledger row as written on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerRow {
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "Target")]
    target: String,
    #[serde(rename = "Score", default)]
    score: String,
    #[serde(rename = "Label", default)]
    label: String,
    #[serde(rename = "SourceID", default)]
    source_id: String,
    #[serde(rename = "TargetID", default)]
    target_id: String,
    #[serde(rename = "Notes", default)]
    notes: String,
}

fn parse_error(line: usize, message: impl std::fmt::Display) -> ConfigError {
    ConfigError::Parse {
        message: format!("ledger line {line}: {message}"),
    }
}

impl LedgerRow {
    fn into_decision(self, line: usize) -> Result<MatchDecision, ConfigError> {
        let score = match self.score.trim() {
            "" => 0.0,
            s => s
                .parse::<f64>()
                .map_err(|e| parse_error(line, format!("bad score '{s}': {e}")))?,
        };
        let label: MatchLabel = self.label.parse().map_err(|e| parse_error(line, e))?;
        let mut decision = MatchDecision::new(self.source.trim(), self.target.trim(), score)
            .map_err(|e| parse_error(line, e))?
            .with_label(label);
        decision.notes = self.notes.trim().to_string();

        let ids = (RecordId::new(&self.source_id), RecordId::new(&self.target_id));
        match decision.clone().with_ids(Some(ids.0), Some(ids.1)) {
            Ok(d) => decision = d,
            Err(e) => warn!(line, error = %e, "ignoring ledger ids"),
        }
        Ok(decision)
    }

    fn from_decision(d: &MatchDecision) -> Self {
        let id = |id: &Option<RecordId>| id.as_ref().map(ToString::to_string).unwrap_or_default();
        Self {
            source: d.source_name.clone(),
            target: d.target_name.clone(),
            score: score_text(d.score),
            label: d.label.as_ledger_str().to_string(),
            source_id: id(&d.source_id),
            target_id: id(&d.target_id),
            notes: d.notes.clone(),
        }
    }
}

/// Reads a ledger file. A missing file is an empty ledger.
///
/// Duplicate pairs keep the first entry, except that a labeled duplicate
/// upgrades an unreviewed first entry.
pub fn read_ledger(path: &Path) -> Result<MatchLedger, ConfigError> {
    let mut ledger = MatchLedger::new();
    if !path.exists() {
        info!(path = %path.display(), "no ledger file, starting empty");
        return Ok(ledger);
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| ConfigError::csv(TABLE, e))?;

    let mut duplicates = 0usize;
    for (idx, row) in reader.deserialize::<LedgerRow>().enumerate() {
        let row = row.map_err(|e| ConfigError::csv(TABLE, e))?;
        if row.source.trim().is_empty() && row.target.trim().is_empty() {
            continue;
        }
        if ledger.insert(row.into_decision(idx + 2)?) == InsertOutcome::Duplicate {
            duplicates += 1;
        }
    }
    let counts = ledger.label_counts();
    info!(
        entries = ledger.len(),
        confirmed = counts.confirmed,
        rejected = counts.rejected,
        duplicates,
        "loaded match ledger"
    );
    Ok(ledger)
}

/// Writes the ledger in entry order.
pub fn write_ledger<W: Write>(ledger: &MatchLedger, writer: W) -> Result<(), ConfigError> {
    let mut out = csv::Writer::from_writer(writer);
    if ledger.is_empty() {
        out.write_record(["Source", "Target", "Score", "Label", "SourceID", "TargetID", "Notes"])
            .map_err(|e| ConfigError::csv(TABLE, e))?;
    }
    for entry in ledger.entries() {
        out.serialize(LedgerRow::from_decision(entry))
            .map_err(|e| ConfigError::csv(TABLE, e))?;
    }
    out.flush().map_err(|e| ConfigError::csv(TABLE, e.into()))?;
    Ok(())
}
