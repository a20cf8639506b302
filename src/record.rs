//! Agency records and their identifiers.
//!
//! A [`Record`] has a fixed core (id, display name, derived normalized name,
//! per-source original names, origin source, provenance) plus an open map of
//! pass-through fields. Field accessors treat blank values as absent.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::merge::conflict::{FieldResolution, Observation};
use crate::normalize::normalize;
use crate::source::SourceId;

/// Field holding the agency name in the source tables.
pub const AGENCY_NAME_FIELD: &str = "Agency Name";

/// Number of digits in the numeric part of a record id.
pub const ID_DIGITS: usize = 6;

/// Largest number representable in a record id.
pub const MAX_ID_NUMBER: u32 = 999_999;

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]+)_(\d{6})$").expect("record id pattern is valid"))
}

/// Stable record identifier, `PREFIX_NNNNNN`.
///
/// A blank id means "not yet assigned". Ids read from input files may be
/// malformed; [`crate::ids::IdManager`] repairs them before any other stage
/// sees the records.
///
/// # Examples
///
/// ```
/// use agency_resolve::RecordId;
///
/// let id = RecordId::from_parts("REC", 42).unwrap();
/// assert_eq!(id.as_str(), "REC_000042");
/// assert!(id.is_well_formed());
/// assert_eq!(id.number(), Some(42));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Wraps a raw id string, trimming surrounding whitespace. No validation.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_string())
    }

    /// Parses a well-formed id.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let id = Self::new(raw);
        if id.is_well_formed() {
            Ok(id)
        } else {
            Err(ValidationError::MalformedRecordId {
                value: raw.to_string(),
            })
        }
    }

    /// Builds `PREFIX_NNNNNN` from its parts.
    pub fn from_parts(prefix: &str, number: u32) -> Result<Self, ValidationError> {
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(ValidationError::InvalidIdPrefix {
                prefix: prefix.to_string(),
            });
        }
        if number > MAX_ID_NUMBER {
            return Err(ValidationError::IdSpaceExhausted {
                prefix: prefix.to_string(),
            });
        }
        Ok(Self(format!("{prefix}_{number:0width$}", width = ID_DIGITS)))
    }

    /// Returns the id text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if no id has been assigned.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true if the id matches `^[A-Z]+_\d{6}$`.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        id_pattern().is_match(&self.0)
    }

    /// Prefix of a well-formed id.
    #[must_use]
    pub fn prefix(&self) -> Option<&str> {
        id_pattern()
            .captures(&self.0)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// Numeric part of a well-formed id.
    #[must_use]
    pub fn number(&self) -> Option<u32> {
        id_pattern()
            .captures(&self.0)
            .and_then(|c| c.get(2))
            .and_then(|m| m.as_str().parse().ok())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Merge history of a record. Both lists are append-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Ids of records absorbed into this one, in merge order.
    pub merged_from: Vec<RecordId>,
    /// Human-readable merge justifications, in merge order.
    pub merge_note: Vec<String>,
}

/// One agency entity observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    record_id: RecordId,
    name: String,
    name_normalized: String,
    source_names: BTreeMap<SourceId, Vec<String>>,
    source: SourceId,
    provenance: Provenance,
    fields: BTreeMap<String, String>,
    resolutions: BTreeMap<String, FieldResolution>,
}

fn fold(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl Record {
    /// Creates an unassigned record from a source row's name.
    #[must_use]
    pub fn new(source: SourceId, name: &str) -> Self {
        let mut record = Self {
            record_id: RecordId::default(),
            name: name.trim().to_string(),
            name_normalized: String::new(),
            source_names: BTreeMap::new(),
            source,
            provenance: Provenance::default(),
            fields: BTreeMap::new(),
            resolutions: BTreeMap::new(),
        };
        record.add_source_name(source, name);
        record.refresh_name();
        record
    }

    /// Rebuilds a published record. Unlike [`Record::new`], the display name
    /// is not recorded as a source name; those come from their own columns.
    pub(crate) fn restore(id: RecordId, source: SourceId, name: &str) -> Self {
        Self {
            record_id: id,
            name: name.trim().to_string(),
            name_normalized: String::new(),
            source_names: BTreeMap::new(),
            source,
            provenance: Provenance::default(),
            fields: BTreeMap::new(),
            resolutions: BTreeMap::new(),
        }
    }

    /// Sets the id as read from input. Repair happens in the id manager.
    #[must_use]
    pub fn with_id(mut self, id: RecordId) -> Self {
        self.record_id = id;
        self
    }

    /// Returns the record id.
    #[must_use]
    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    pub(crate) fn assign_id(&mut self, id: RecordId) {
        self.record_id = id;
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Comparison key derived from the best available name.
    #[must_use]
    pub fn name_normalized(&self) -> &str {
        &self.name_normalized
    }

    /// Replaces the display name and recomputes the normalized name.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.trim().to_string();
        self.refresh_name();
    }

    /// Source the record was created from.
    #[must_use]
    pub const fn source(&self) -> SourceId {
        self.source
    }

    /// Merge history.
    #[must_use]
    pub const fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Original names recorded for a source, first-seen order.
    #[must_use]
    pub fn source_names(&self, source: SourceId) -> &[String] {
        self.source_names.get(&source).map_or(&[][..], Vec::as_slice)
    }

    /// Returns true if any name from `source` is recorded.
    #[must_use]
    pub fn has_source_name(&self, source: SourceId) -> bool {
        !self.source_names(source).is_empty()
    }

    /// Source names joined for output.
    #[must_use]
    pub fn joined_source_names(&self, source: SourceId, separator: &str) -> String {
        self.source_names(source).join(separator)
    }

    /// Every `(source, name)` pair held by the record.
    pub fn all_source_names(&self) -> impl Iterator<Item = (SourceId, &str)> + '_ {
        self.source_names
            .iter()
            .flat_map(|(s, names)| names.iter().map(move |n| (*s, n.as_str())))
    }

    /// Records an original name for a source. Blank names and names already
    /// present (ignoring case and whitespace) are ignored. Returns true if the
    /// name was added.
    pub fn add_source_name(&mut self, source: SourceId, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let names = self.source_names.entry(source).or_default();
        let key = fold(name);
        if names.iter().any(|n| fold(n) == key) {
            return false;
        }
        names.push(name.to_string());
        true
    }

    /// Returns a non-blank field value; absent and blank values are `None`.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// All fields including blank ones.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Sets a field, overwriting any previous value.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Observations recorded for a conflict-tracked field. A record that has
    /// never been merged observes only its own value.
    #[must_use]
    pub fn observations(&self, field: &str) -> Vec<Observation> {
        if let Some(resolution) = self.resolutions.get(field) {
            return resolution.observations().to_vec();
        }
        self.field(field)
            .map(|v| vec![Observation::new(self.source, v)])
            .unwrap_or_default()
    }

    /// Resolution state of a conflict-tracked field.
    #[must_use]
    pub fn resolution(&self, field: &str) -> FieldResolution {
        self.resolutions
            .get(field)
            .cloned()
            .unwrap_or_else(|| FieldResolution::from_observations(self.observations(field)))
    }

    pub(crate) fn set_resolution(&mut self, field: &str, resolution: FieldResolution) {
        self.resolutions.insert(field.to_string(), resolution);
    }

    /// Appends an absorbed id unless it is this record's own id or already
    /// listed.
    pub(crate) fn push_merged_from(&mut self, id: &RecordId) {
        if id.is_blank() || *id == self.record_id || self.provenance.merged_from.contains(id) {
            return;
        }
        self.provenance.merged_from.push(id.clone());
    }

    pub(crate) fn push_merge_note(&mut self, note: impl Into<String>) {
        let note = note.into();
        if !note.trim().is_empty() {
            self.provenance.merge_note.push(note);
        }
    }

    /// Restores provenance read from a previously published output.
    pub(crate) fn restore_provenance(&mut self, provenance: Provenance) {
        for id in &provenance.merged_from {
            self.push_merged_from(id);
        }
        for note in provenance.merge_note {
            self.push_merge_note(note);
        }
    }

    /// Best available name: the display name, else the first name from the
    /// primary export, ops roster, gov roster, else the `Agency Name` field.
    #[must_use]
    pub fn best_name(&self) -> Option<String> {
        if !self.name.is_empty() {
            return Some(self.name.clone());
        }
        self.cascade_name()
    }

    fn cascade_name(&self) -> Option<String> {
        SourceId::ALL
            .iter()
            .find_map(|s| self.source_names(*s).first().cloned())
            .or_else(|| self.field(AGENCY_NAME_FIELD).map(str::to_string))
    }

    /// Fills a blank display name from the cascade and recomputes the
    /// normalized name.
    pub(crate) fn refresh_name(&mut self) {
        if self.name.is_empty() {
            if let Some(name) = self.cascade_name() {
                self.name = name;
            }
        }
        self.name_normalized = normalize(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_parts_and_validation() {
        let id = RecordId::from_parts("OPS", 7).unwrap();
        assert_eq!(id.to_string(), "OPS_000007");
        assert_eq!(id.prefix(), Some("OPS"));
        assert!(RecordId::parse("REC_12").is_err());
        assert!(RecordId::parse("rec_000001").is_err());
        assert!(RecordId::parse(" HOO_000010 ").is_ok());
        assert!(matches!(
            RecordId::from_parts("REC", 1_000_000),
            Err(ValidationError::IdSpaceExhausted { .. })
        ));
        assert!(matches!(
            RecordId::from_parts("Rec", 1),
            Err(ValidationError::InvalidIdPrefix { .. })
        ));
    }

    #[test]
    fn test_blank_fields_are_absent() {
        let mut r = Record::new(SourceId::Primary, "Department of Education");
        r.set_field("URL", "   ");
        r.set_field("Acronym", "DOE");
        assert_eq!(r.field("URL"), None);
        assert_eq!(r.field("Missing"), None);
        assert_eq!(r.field("Acronym"), Some("DOE"));
    }

    #[test]
    fn test_normalized_name_follows_name() {
        let mut r = Record::new(SourceId::Ops, "Dept of Finance");
        assert_eq!(r.name_normalized(), "department of finance");
        r.set_name("Department of Finance (DOF)");
        assert_eq!(r.name_normalized(), "department of finance");
    }

    #[test]
    fn test_blank_name_cascades_through_sources() {
        let mut r = Record::new(SourceId::Hoo, "");
        assert_eq!(r.name(), "");
        r.add_source_name(SourceId::Hoo, "Board of Elections");
        r.add_source_name(SourceId::Ops, "NYC Board of Elections");
        r.refresh_name();
        assert_eq!(r.name(), "NYC Board of Elections");

        let mut r = Record::new(SourceId::Primary, "");
        r.set_field(AGENCY_NAME_FIELD, "Tax Commission");
        r.refresh_name();
        assert_eq!(r.name(), "Tax Commission");
        assert_eq!(r.name_normalized(), "tax commission");
    }

    #[test]
    fn test_source_names_dedupe_case_and_whitespace() {
        let mut r = Record::new(SourceId::Ops, "Department  of Probation");
        assert!(!r.add_source_name(SourceId::Ops, "department of probation"));
        assert!(r.add_source_name(SourceId::Ops, "Probation Dept"));
        assert_eq!(
            r.joined_source_names(SourceId::Ops, " | "),
            "Department  of Probation | Probation Dept"
        );
    }

    #[test]
    fn test_merged_from_never_contains_own_id() {
        let id = RecordId::parse("REC_000001").unwrap();
        let mut r = Record::new(SourceId::Primary, "A").with_id(id.clone());
        r.push_merged_from(&id);
        r.push_merged_from(&RecordId::new("REC_000002"));
        r.push_merged_from(&RecordId::new("REC_000002"));
        assert_eq!(r.provenance().merged_from, vec![RecordId::new("REC_000002")]);
    }
}
