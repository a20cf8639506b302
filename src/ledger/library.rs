//! Library system consolidation.
//!
//! The three public library systems appear under many names (branches,
//! boards of trustees, "NYPL", …). Unreviewed ledger pairs whose two names
//! refer to the same system are confirmed by rule.

use tracing::info;

use crate::ledger::store::MatchLedger;
use crate::ledger::types::{MatchLabel, LIBRARY_NOTE_PREFIX};
use crate::normalize::library_system;

/// Returns the shared library system of two raw names, if both name the same
/// one.
#[must_use]
pub fn same_library_system(a: &str, b: &str) -> Option<String> {
    let ka = library_system(a)?;
    let kb = library_system(b)?;
    (ka == kb).then_some(ka)
}

/// Confirms unreviewed pairs naming the same library system. Returns the
/// number of entries confirmed.
pub fn consolidate_libraries(ledger: &mut MatchLedger) -> usize {
    let mut confirmed = 0;
    for entry in ledger.entries_mut() {
        if entry.label != MatchLabel::Unreviewed {
            continue;
        }
        let Some(system) = same_library_system(&entry.source_name, &entry.target_name) else {
            continue;
        };
        entry.label = MatchLabel::Confirmed;
        entry.add_note(&format!("{LIBRARY_NOTE_PREFIX}: {system}"));
        confirmed += 1;
    }
    if confirmed > 0 {
        info!(confirmed, "confirmed library system pairs");
    }
    confirmed
}
