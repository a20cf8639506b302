//! String similarity on normalized names, on a 0–100 scale.

use std::collections::BTreeSet;

/// Weight of the edit similarity in the composite score.
pub const EDIT_WEIGHT: f64 = 0.6;

/// Weight of the token-set similarity in the composite score.
pub const TOKEN_SET_WEIGHT: f64 = 0.4;

/// Normalized Levenshtein similarity scaled to 0–100.
#[must_use]
pub fn edit_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    strsim::normalized_levenshtein(a, b) * 100.0
}

/// Token-set similarity scaled to 0–100.
///
/// Tokens are split into the shared set and each side's remainder; the score
/// is 100 when one name's tokens are a subset of the other's, otherwise the
/// best edit similarity among the shared set and each side's sorted full set.
#[must_use]
pub fn token_set_similarity(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split_whitespace().collect();
    let tb: BTreeSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return if ta.is_empty() && tb.is_empty() { 100.0 } else { 0.0 };
    }

    let shared: Vec<&str> = ta.intersection(&tb).copied().collect();
    let only_a: Vec<&str> = ta.difference(&tb).copied().collect();
    let only_b: Vec<&str> = tb.difference(&ta).copied().collect();

    if !shared.is_empty() && (only_a.is_empty() || only_b.is_empty()) {
        return 100.0;
    }

    let sect = shared.join(" ");
    let join = |rest: &[&str]| {
        if sect.is_empty() {
            rest.join(" ")
        } else {
            format!("{sect} {}", rest.join(" "))
        }
    };
    let full_a = join(&only_a);
    let full_b = join(&only_b);

    let mut best = edit_similarity(&full_a, &full_b);
    if !sect.is_empty() {
        best = best
            .max(edit_similarity(&sect, &full_a))
            .max(edit_similarity(&sect, &full_b));
    }
    best
}

/// `0.6 * edit + 0.4 * token_set`, before bonuses.
#[must_use]
pub fn composite(a: &str, b: &str) -> f64 {
    EDIT_WEIGHT * edit_similarity(a, b) + TOKEN_SET_WEIGHT * token_set_similarity(a, b)
}

/// Normalized Levenshtein similarity on a 0–1 scale, used for ledger
/// lookups.
#[must_use]
pub fn ratio(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}
