//! # agency-resolve
//!
//! Entity resolution for New York City agency records. Three overlapping
//! sources (the primary agency export, an operations roster and a government
//! roster) are unioned into one table, candidate duplicates are proposed into
//! a human-reviewed match ledger, and confirmed matches are merged with full
//! provenance.
//!
//! ## Core Concepts
//!
//! - **Record**: one agency observation with a stable [`RecordId`], the names
//!   each source used for it, and the ids it absorbed
//! - **Normalizer**: the single comparison key for names ([`normalize::normalize`])
//! - **Match Ledger**: deduplicated, tri-state match decisions ([`ledger::MatchLedger`])
//! - **Merge Engine**: applies confirmed matches under a per-field policy
//!   ([`merge::MergeEngine`])
//!
//! ## Usage
//!
//! ```rust
//! use agency_resolve::ledger::{MatchDecision, MatchLabel, MatchLedger};
//! use agency_resolve::merge::MergeEngine;
//! use agency_resolve::storage::{InMemoryRecordStore, RecordStore};
//! use agency_resolve::{Record, RecordId, SourceId};
//!
//! let mut store = InMemoryRecordStore::from_records([
//!     Record::new(SourceId::Primary, "Department of Education").with_id(RecordId::new("REC_000001")),
//!     Record::new(SourceId::Primary, "DOE").with_id(RecordId::new("REC_000002")),
//! ])?;
//!
//! let mut ledger = MatchLedger::new();
//! ledger.insert(
//!     MatchDecision::new("Department of Education", "DOE", 97.0)?
//!         .with_label(MatchLabel::Confirmed)
//!         .with_ids(Some(RecordId::new("REC_000001")), Some(RecordId::new("REC_000002")))?,
//! );
//!
//! let report = MergeEngine::default().apply(&mut store, &ledger)?;
//! assert_eq!(report.merged(), 1);
//! assert_eq!(store.len(), 1);
//! # Ok::<(), agency_resolve::ResolveError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod normalize;
pub mod record;
pub mod source;

// Identity and storage
pub mod ids;
pub mod storage;

// Matching and review
pub mod ledger;
pub mod matching;

// Merging
pub mod merge;

// Runs
pub mod audit;
pub mod config;
pub mod io;
pub mod pipeline;

// Re-export primary types at crate root for convenience
pub use config::PipelineConfig;
pub use error::{ConfigError, ResolveError, ResolveResult, ValidationError};
pub use ids::IdManager;
pub use ledger::{MatchDecision, MatchLabel, MatchLedger};
pub use matching::{CandidateGenerator, MatchCandidate};
pub use merge::{MergeEngine, MergePolicy, MergeReport};
pub use pipeline::{Pipeline, PipelineInputs, PipelineOutputs, RunContext, SourceInputs};
pub use record::{Provenance, Record, RecordId};
pub use source::{SourceId, SourcePriority};
pub use storage::{InMemoryRecordStore, RecordStore, StorageError};
