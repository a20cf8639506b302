//! Field-level merge policy.
//!
//! Every field is merged under a declared [`FieldRule`]; undeclared fields
//! fill blanks. [`MergePolicy::combine`] is a pure function of the two
//! records, so the engine and the override applier share it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::MergeConfig;
use crate::matching::ACRONYM_FIELD;
use crate::record::{Record, AGENCY_NAME_FIELD};
use crate::source::{SourceId, SourcePriority};

/// Field collecting acronyms that lost to the survivor's.
pub const ALTERNATE_ACRONYMS_FIELD: &str = "AlternateAcronyms";

/// Separator of list-valued fields.
pub const LIST_SEPARATOR: &str = "; ";

/// How a field combines when two records merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRule {
    /// Keep the survivor's value; adopt the secondary's only if blank.
    FillBlank,
    /// Fill blanks and track disagreeing observations.
    ConflictTracked,
    /// Fill blanks; a differing secondary value is appended to `target`.
    Alternate {
        /// List field receiving the losing values.
        target: String,
    },
    /// Union of `"; "`-separated values.
    ListUnion,
    /// Never merged.
    Skip,
}

/// Declared merge behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct MergePolicy {
    survivor_priority: SourcePriority,
    conflict_priority: SourcePriority,
    rules: BTreeMap<String, FieldRule>,
    conflict_fields: Vec<String>,
    name_separator: String,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::from_config(&MergeConfig::default())
    }
}

fn fold(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(';').map(str::trim).filter(|v| !v.is_empty())
}

fn push_list_value(list: &str, value: &str) -> String {
    let mut items: Vec<&str> = split_list(list).collect();
    for v in split_list(value) {
        if !items.iter().any(|i| fold(i) == fold(v)) {
            items.push(v);
        }
    }
    items.join(LIST_SEPARATOR)
}

/// Formats a score for merge notes: one decimal, whole numbers without one.
#[must_use]
pub fn format_score(score: f64) -> String {
    let rounded = (score * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0}")
    } else {
        format!("{rounded:.1}")
    }
}

impl MergePolicy {
    /// Builds the policy from configuration.
    #[must_use]
    pub fn from_config(config: &MergeConfig) -> Self {
        let mut rules = BTreeMap::new();
        for field in &config.conflict_fields {
            rules.insert(field.clone(), FieldRule::ConflictTracked);
        }
        rules.insert(
            ACRONYM_FIELD.to_string(),
            FieldRule::Alternate {
                target: ALTERNATE_ACRONYMS_FIELD.to_string(),
            },
        );
        rules.insert(ALTERNATE_ACRONYMS_FIELD.to_string(), FieldRule::ListUnion);
        Self {
            survivor_priority: config.source_priority.clone(),
            conflict_priority: config.conflict_priority.clone(),
            rules,
            conflict_fields: config.conflict_fields.clone(),
            name_separator: config.name_separator.clone(),
        }
    }

    /// Declares a rule for a field.
    #[must_use]
    pub fn with_rule(mut self, field: impl Into<String>, rule: FieldRule) -> Self {
        let field = field.into();
        if rule == FieldRule::ConflictTracked && !self.conflict_fields.contains(&field) {
            self.conflict_fields.push(field.clone());
        }
        self.rules.insert(field, rule);
        self
    }

    /// Rule of a field; undeclared fields fill blanks.
    #[must_use]
    pub fn rule(&self, field: &str) -> &FieldRule {
        self.rules.get(field).unwrap_or(&FieldRule::FillBlank)
    }

    /// Conflict-tracked fields in declaration order.
    #[must_use]
    pub fn conflict_fields(&self) -> &[String] {
        &self.conflict_fields
    }

    /// Survivor ranking.
    #[must_use]
    pub const fn survivor_priority(&self) -> &SourcePriority {
        &self.survivor_priority
    }

    /// Suggestion ranking for conflict-tracked fields.
    #[must_use]
    pub const fn conflict_priority(&self) -> &SourcePriority {
        &self.conflict_priority
    }

    /// Separator for per-source name columns.
    #[must_use]
    pub fn name_separator(&self) -> &str {
        &self.name_separator
    }

    /// Returns true if the `a` side survives a merge with `b`. Ties keep `a`.
    #[must_use]
    pub fn a_survives(&self, a: SourceId, b: SourceId) -> bool {
        self.survivor_priority.prefers(a, b)
    }

    /// Folds `secondary` into a copy of `survivor`.
    ///
    /// `note` is appended after the secondary's own notes.
    #[must_use]
    pub fn combine(&self, survivor: &Record, secondary: &Record, note: &str) -> Record {
        let mut merged = survivor.clone();

        for (source, name) in secondary.all_source_names() {
            merged.add_source_name(source, name);
        }

        let mut keys: BTreeSet<&str> = secondary.fields().keys().map(String::as_str).collect();
        keys.extend(self.conflict_fields.iter().map(String::as_str));
        let kept: Vec<String> = keys
            .into_iter()
            .filter_map(|key| self.combine_field(&mut merged, secondary, key))
            .collect();

        merged.push_merged_from(secondary.record_id());
        for id in &secondary.provenance().merged_from {
            merged.push_merged_from(id);
        }
        for n in &secondary.provenance().merge_note {
            merged.push_merge_note(n.clone());
        }
        merged.push_merge_note(note);
        for n in kept {
            merged.push_merge_note(n);
        }
        merged.refresh_name();
        merged
    }

    /// Applies one field's rule. Returns a note when a differing secondary
    /// value was dropped.
    fn combine_field(&self, merged: &mut Record, secondary: &Record, key: &str) -> Option<String> {
        let theirs = secondary.field(key).map(str::to_string);
        let ours = merged.field(key).map(str::to_string);

        match self.rule(key) {
            FieldRule::Skip => {}
            FieldRule::FillBlank => match (ours, theirs) {
                (None, Some(v)) => merged.set_field(key, v),
                (Some(o), Some(t)) if fold(&o) != fold(&t) && key != AGENCY_NAME_FIELD => {
                    debug!(field = key, kept = %o, dropped = %t, "kept survivor value");
                    return Some(format!(
                        "Kept {key} '{o}' over '{t}' from {}",
                        secondary.record_id()
                    ));
                }
                _ => {}
            },
            FieldRule::ConflictTracked => {
                let mut resolution = merged.resolution(key);
                resolution.absorb(key, &secondary.observations(key));
                merged.set_resolution(key, resolution);
                if ours.is_none() {
                    if let Some(v) = theirs {
                        merged.set_field(key, v);
                    }
                }
            }
            FieldRule::Alternate { target } => match (ours, theirs) {
                (None, Some(v)) => merged.set_field(key, v),
                (Some(o), Some(t)) if fold(&o) != fold(&t) => {
                    let list = merged.field(target).unwrap_or_default().to_string();
                    merged.set_field(target.clone(), push_list_value(&list, &t));
                }
                _ => {}
            },
            FieldRule::ListUnion => {
                if let Some(t) = theirs {
                    let list = push_list_value(ours.as_deref().unwrap_or_default(), &t);
                    merged.set_field(key, list);
                }
            }
        }
        None
    }
}
