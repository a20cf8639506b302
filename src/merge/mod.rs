//! Merging confirmed matches into one record per agency.

pub mod conflict;
mod engine;
mod overrides;
pub mod policy;

pub use conflict::{ConflictStatus, FieldResolution, Observation};
pub use engine::{AppliedMerge, MatchMethod, MergeEngine, MergeReport, SkipReason, SkippedMatch};
pub use overrides::{
    apply_overrides, ManualOverride, OverrideFailure, OverrideReport, OverrideRow, CREATED_NOTE, NAME_KEY,
    SOURCE_KEY,
};
pub use policy::{FieldRule, MergePolicy};
