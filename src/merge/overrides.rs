//! Manual overrides.
//!
//! Each override row names a primary record and optionally a secondary one.
//! With both ids the secondary is merged into the primary unconditionally;
//! with only a primary the row's JSON notes update that record, or create it
//! when the id is unknown. A bad row is reported and the rest still apply.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ResolveResult, ValidationError};
use crate::ids::IdManager;
use crate::merge::policy::MergePolicy;
use crate::normalize::normalize;
use crate::record::{Record, RecordId};
use crate::source::SourceId;
use crate::storage::{RecordStore, StorageError};

/// Update key that sets the display name.
pub const NAME_KEY: &str = "Name";

/// Update key that picks the source of an inserted record.
pub const SOURCE_KEY: &str = "source";

/// Merge note carried by records an override inserted.
pub const CREATED_NOTE: &str = "Created by manual override";

/// A raw row of the overrides table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideRow {
    /// 1-based data line, for reporting.
    pub line: usize,
    /// `PrimaryRecordID`.
    pub primary: String,
    /// `SecondaryRecordID`, possibly blank.
    pub secondary: String,
    /// `Notes`: a JSON object of field updates, possibly blank.
    pub notes: String,
}

/// A parsed override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualOverride {
    /// Record that receives the merge or the updates.
    pub primary: RecordId,
    /// Record forced into `primary`.
    pub secondary: Option<RecordId>,
    /// Field updates, applied in key order.
    pub updates: BTreeMap<String, String>,
}

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidOverride {
        reason: reason.into(),
    }
}

impl ManualOverride {
    /// Parses a raw row.
    pub fn parse(row: &OverrideRow) -> Result<Self, ValidationError> {
        let primary = RecordId::new(&row.primary);
        if primary.is_blank() {
            return Err(invalid("PrimaryRecordID is blank"));
        }
        let secondary = Some(RecordId::new(&row.secondary)).filter(|id| !id.is_blank());
        if secondary.as_ref() == Some(&primary) {
            return Err(ValidationError::SelfPair);
        }

        let mut updates = BTreeMap::new();
        let notes = row.notes.trim();
        if !notes.is_empty() {
            let value: Value = serde_json::from_str(notes)
                .map_err(|e| invalid(format!("Notes is not valid JSON: {e}")))?;
            let Value::Object(map) = value else {
                return Err(invalid("Notes must be a JSON object"));
            };
            for (key, value) in map {
                let value = match value {
                    Value::Null => continue,
                    Value::String(s) => s,
                    Value::Bool(_) | Value::Number(_) => value.to_string(),
                    Value::Array(_) | Value::Object(_) => {
                        return Err(invalid(format!("update for '{key}' must be a scalar")));
                    }
                };
                updates.insert(key, value);
            }
        }

        Ok(Self {
            primary,
            secondary,
            updates,
        })
    }
}

/// A row that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverrideFailure {
    /// Data line of the row.
    pub line: usize,
    /// `PrimaryRecordID` as given.
    pub primary: String,
    /// Error text.
    pub reason: String,
}

/// Outcome of [`apply_overrides`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverrideReport {
    /// Forced merges applied.
    pub merged: usize,
    /// Forced merges whose records were already one.
    pub already_merged: usize,
    /// Existing records updated.
    pub updated: usize,
    /// Rows whose updates or inserts were already in effect.
    pub unchanged: usize,
    /// New records inserted.
    pub inserted: Vec<RecordId>,
    /// Rows that failed.
    pub failures: Vec<OverrideFailure>,
}

fn source_for_name_column(key: &str) -> Option<SourceId> {
    SourceId::ALL.into_iter().find(|s| s.name_column() == key)
}

fn apply_updates(record: &mut Record, updates: &BTreeMap<String, String>) {
    for (key, value) in updates {
        if key == NAME_KEY {
            record.set_name(value);
        } else if let Some(source) = source_for_name_column(key) {
            record.add_source_name(source, value);
        } else if key != SOURCE_KEY {
            record.set_field(key.clone(), value.clone());
        }
    }
    record.refresh_name();
}

fn update_note(updates: &BTreeMap<String, String>) -> String {
    let keys: Vec<&str> = updates
        .keys()
        .map(String::as_str)
        .filter(|k| *k != SOURCE_KEY)
        .collect();
    format!("Manual override: updated {}", keys.join(", "))
}

/// Applies override rows in order.
pub fn apply_overrides<S: RecordStore + ?Sized>(
    store: &mut S,
    ids: &mut IdManager,
    policy: &MergePolicy,
    rows: &[OverrideRow],
) -> OverrideReport {
    let mut report = OverrideReport::default();
    for row in rows {
        if let Err(e) = apply_row(store, ids, policy, row, &mut report) {
            warn!(line = row.line, primary = %row.primary, error = %e, "override row failed");
            report.failures.push(OverrideFailure {
                line: row.line,
                primary: row.primary.clone(),
                reason: e.to_string(),
            });
        }
    }
    info!(
        merged = report.merged,
        updated = report.updated,
        inserted = report.inserted.len(),
        failed = report.failures.len(),
        "applied manual overrides"
    );
    report
}

fn apply_row<S: RecordStore + ?Sized>(
    store: &mut S,
    ids: &mut IdManager,
    policy: &MergePolicy,
    row: &OverrideRow,
    report: &mut OverrideReport,
) -> ResolveResult<()> {
    let ov = ManualOverride::parse(row)?;

    if let Some(secondary) = &ov.secondary {
        let primary = store
            .resolve(&ov.primary)?
            .ok_or_else(|| StorageError::RecordNotFound(ov.primary.clone()))?;
        let secondary = store
            .resolve(secondary)?
            .ok_or_else(|| StorageError::RecordNotFound(secondary.clone()))?;
        if primary == secondary {
            report.already_merged += 1;
        } else {
            force_merge(store, policy, &primary, &secondary)?;
            report.merged += 1;
        }
        if !ov.updates.is_empty() {
            let survivor = store
                .resolve(&primary)?
                .ok_or_else(|| StorageError::RecordNotFound(primary.clone()))?;
            update_existing(store, &survivor, &ov.updates)?;
        }
        return Ok(());
    }

    let existing = match store.resolve(&ov.primary)? {
        Some(id) => Some(id),
        None => previously_inserted(store, &ov),
    };
    if let Some(existing) = existing {
        if ov.updates.is_empty() {
            return Err(invalid("no secondary id and no updates").into());
        }
        if update_existing(store, &existing, &ov.updates)? {
            report.updated += 1;
        } else {
            report.unchanged += 1;
        }
        return Ok(());
    }

    let id = insert_new(store, ids, &ov)?;
    report.inserted.push(id);
    Ok(())
}

/// Finds the record an earlier run inserted for a row whose id had to be
/// issued: a live record created by an override under the same name.
fn previously_inserted<S: RecordStore + ?Sized>(store: &S, ov: &ManualOverride) -> Option<RecordId> {
    if ov.primary.is_well_formed() {
        return None;
    }
    let key = normalize(ov.updates.get(NAME_KEY)?);
    if key.is_empty() {
        return None;
    }
    store
        .find_by_normalized_name(&key)
        .into_iter()
        .find(|r| r.provenance().merge_note.iter().any(|n| n == CREATED_NOTE))
        .map(|r| r.record_id().clone())
}

fn force_merge<S: RecordStore + ?Sized>(
    store: &mut S,
    policy: &MergePolicy,
    primary: &RecordId,
    secondary: &RecordId,
) -> ResolveResult<()> {
    let (Some(p), Some(s)) = (store.get(primary)?, store.get(secondary)?) else {
        return Err(StorageError::RecordNotFound(primary.clone()).into());
    };
    let merged = policy.combine(p, s, &format!("Merged {secondary} (manual override)"));
    store.absorb(merged, secondary)?;
    debug!(survivor = %primary, absorbed = %secondary, "forced merge");
    Ok(())
}

/// Applies updates to a live record. Returns false, leaving the record and
/// its notes alone, when every update is already in effect.
fn update_existing<S: RecordStore + ?Sized>(
    store: &mut S,
    id: &RecordId,
    updates: &BTreeMap<String, String>,
) -> ResolveResult<bool> {
    let current = store.get(id)?.ok_or_else(|| StorageError::RecordNotFound(id.clone()))?;
    let mut record = current.clone();
    apply_updates(&mut record, updates);
    if &record == current {
        debug!(record = %id, "override updates already applied");
        return Ok(false);
    }
    record.push_merge_note(update_note(updates));
    store.update(record)?;
    debug!(record = %id, fields = updates.len(), "applied override updates");
    Ok(true)
}

fn insert_new<S: RecordStore + ?Sized>(
    store: &mut S,
    ids: &mut IdManager,
    ov: &ManualOverride,
) -> ResolveResult<RecordId> {
    let name = ov
        .updates
        .get(NAME_KEY)
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid(format!("new record {} needs a Name update", ov.primary)))?;

    let source = match ov.updates.get(SOURCE_KEY) {
        Some(tag) => SourceId::from_str(tag)?,
        None => ov
            .primary
            .prefix()
            .and_then(|p| SourceId::ALL.into_iter().find(|s| s.id_prefix() == p))
            .unwrap_or(SourceId::Primary),
    };

    let id = if ov.primary.is_well_formed() {
        ids.observe(&ov.primary);
        ov.primary.clone()
    } else {
        ids.issue(source)?
    };

    let mut record = Record::new(source, name).with_id(id.clone());
    apply_updates(&mut record, &ov.updates);
    record.push_merge_note(CREATED_NOTE);
    store.insert(record)?;
    debug!(record = %id, %source, "inserted override record");
    Ok(id)
}
