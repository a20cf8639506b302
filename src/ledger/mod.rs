//! Match ledger.
//!
//! The ledger is the human-verifiable record of match decisions. Entries are
//! created by the candidate generator or by hand, mutated only by review and
//! id back-fill, and never deleted.

mod library;
mod resolver;
mod store;
mod types;

pub use library::{consolidate_libraries, same_library_system};
pub use resolver::{backfill_ids, BackfillReport, LookupMethod, NameIndex};
pub use store::{InsertOutcome, LabelCounts, MatchLedger};
pub(crate) use types::fold_name;
pub use types::{
    MatchDecision, MatchLabel, PairKey, AUTO_CONFIRMED_NOTE, LIBRARY_NOTE_PREFIX, MANUAL_NOTE,
};
