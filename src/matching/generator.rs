//! Candidate pair generation.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::MatcherConfig;
use crate::error::ResolveResult;
use crate::ledger::{MatchDecision, MatchLabel, MatchLedger, PairKey, AUTO_CONFIRMED_NOTE};
use crate::matching::blocking::{build_blocks, candidate_pairs};
use crate::matching::pool::score_pairs;
use crate::matching::similarity::{edit_similarity, token_set_similarity, EDIT_WEIGHT, TOKEN_SET_WEIGHT};
use crate::normalize::{extract_acronym, org_type_tokens, strip_phrase, NYC_PHRASE};
use crate::record::{Record, RecordId};
use crate::source::SourceId;
use crate::storage::RecordStore;

/// Field that may hold a record's acronym.
pub const ACRONYM_FIELD: &str = "Acronym";

/// Why a pair was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    /// Both names normalize to the same key.
    ExactNormalized,
    /// Equal parenthetical acronyms.
    Acronym,
    /// A shared organizational-type token.
    OrgType,
    /// Names differ only by the city prefix.
    NycPrefix,
    /// Names have the same tokens in a different order.
    WordOrder,
}

impl fmt::Display for MatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ExactNormalized => "exact normalized match",
            Self::Acronym => "acronym match",
            Self::OrgType => "organizational type match",
            Self::NycPrefix => "NYC prefix variation",
            Self::WordOrder => "word order variation",
        })
    }
}

/// Score components of a candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Edit similarity, 0–100.
    pub edit: f64,
    /// Token-set similarity, 0–100.
    pub token_set: f64,
    /// Organizational-type and acronym bonuses.
    pub bonus: f64,
    /// Final score, capped at 100.
    pub total: f64,
}

/// A scored candidate pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    /// Id of the source side.
    pub source_id: RecordId,
    /// Id of the target side.
    pub target_id: RecordId,
    /// Raw name of the source side.
    pub source_name: String,
    /// Raw name of the target side.
    pub target_name: String,
    /// Score components.
    pub score: ScoreBreakdown,
    /// Why the pair was proposed.
    pub reasons: BTreeSet<MatchReason>,
}

impl MatchCandidate {
    /// Label assigned by the auto-confirm rule.
    #[must_use]
    pub fn label(&self, config: &MatcherConfig) -> MatchLabel {
        if self.score.total >= config.auto_confirm_score {
            MatchLabel::Confirmed
        } else {
            MatchLabel::Unreviewed
        }
    }

    /// Converts the candidate into a ledger entry.
    pub fn into_decision(self, config: &MatcherConfig) -> ResolveResult<MatchDecision> {
        let label = self.label(config);
        let mut decision = MatchDecision::new(self.source_name, self.target_name, self.score.total)?
            .with_label(label)
            .with_ids(Some(self.source_id), Some(self.target_id))?;
        for reason in &self.reasons {
            decision.add_note(&reason.to_string());
        }
        if label == MatchLabel::Confirmed {
            decision.add_note(AUTO_CONFIRMED_NOTE);
        }
        Ok(decision)
    }
}

/// Per-record view used while scoring.
#[derive(Debug, Clone)]
struct Profile {
    id: RecordId,
    name: String,
    normalized: String,
    tokens: BTreeSet<String>,
    source: SourceId,
    acronym: Option<String>,
    org_types: BTreeSet<&'static str>,
}

impl Profile {
    fn of(record: &Record) -> Self {
        let normalized = record.name_normalized().to_string();
        let acronym = std::iter::once(record.name())
            .chain(record.all_source_names().map(|(_, n)| n))
            .find_map(extract_acronym)
            .or_else(|| {
                record
                    .field(ACRONYM_FIELD)
                    .map(|a| a.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_uppercase())
                    .filter(|a| a.chars().count() >= 2)
            });
        Self {
            id: record.record_id().clone(),
            name: record.name().to_string(),
            tokens: normalized.split_whitespace().map(str::to_string).collect(),
            org_types: org_type_tokens(&normalized),
            normalized,
            source: record.source(),
            acronym,
        }
    }
}

/// Blocks, scores and labels candidate pairs.
#[derive(Debug, Clone, Default)]
pub struct CandidateGenerator {
    config: MatcherConfig,
}

impl CandidateGenerator {
    /// Creates a generator.
    #[must_use]
    pub const fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Generator settings.
    #[must_use]
    pub const fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Scores two records. Returns `None` for pairs that must never be
    /// proposed: the same record, empty names, or identical normalized names
    /// from the same source.
    #[must_use]
    pub fn score(&self, a: &Record, b: &Record) -> Option<MatchCandidate> {
        self.score_profiles(&Profile::of(a), &Profile::of(b))
    }

    fn score_profiles(&self, a: &Profile, b: &Profile) -> Option<MatchCandidate> {
        if a.id == b.id || a.normalized.is_empty() || b.normalized.is_empty() {
            return None;
        }
        if a.normalized == b.normalized && a.source == b.source {
            return None;
        }

        let edit = edit_similarity(&a.normalized, &b.normalized);
        let token_set = token_set_similarity(&a.normalized, &b.normalized);
        let mut reasons = BTreeSet::new();
        let mut bonus = 0.0;

        if a.normalized == b.normalized {
            reasons.insert(MatchReason::ExactNormalized);
        }
        if a.org_types.intersection(&b.org_types).next().is_some() {
            bonus += self.config.org_type_bonus;
            reasons.insert(MatchReason::OrgType);
        }
        if let (Some(x), Some(y)) = (&a.acronym, &b.acronym) {
            if x == y {
                bonus += self.config.acronym_bonus;
                reasons.insert(MatchReason::Acronym);
            }
        }
        if a.normalized != b.normalized
            && strip_phrase(&a.normalized, NYC_PHRASE) == strip_phrase(&b.normalized, NYC_PHRASE)
        {
            reasons.insert(MatchReason::NycPrefix);
        }
        if a.normalized != b.normalized && a.tokens == b.tokens {
            reasons.insert(MatchReason::WordOrder);
        }

        let total = (EDIT_WEIGHT * edit + TOKEN_SET_WEIGHT * token_set + bonus).min(100.0);
        if total < self.config.min_score {
            return None;
        }

        Some(MatchCandidate {
            source_id: a.id.clone(),
            target_id: b.id.clone(),
            source_name: a.name.clone(),
            target_name: b.name.clone(),
            score: ScoreBreakdown {
                edit,
                token_set,
                bonus,
                total,
            },
            reasons,
        })
    }

    /// Generates candidates over the live records of a store, skipping pairs
    /// the ledger already holds in either order.
    ///
    /// Output is sorted by score (descending), then source and target name,
    /// and holds at most one candidate per unordered name pair.
    pub fn generate<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        ledger: &MatchLedger,
    ) -> ResolveResult<Vec<MatchCandidate>> {
        let profiles: Vec<Profile> = store.records().into_iter().map(Profile::of).collect();
        let blocks = build_blocks(profiles.iter().map(|p| p.normalized.as_str()));
        let pairs = candidate_pairs(&blocks);
        debug!(records = profiles.len(), blocks = blocks.len(), pairs = pairs.len(), "blocked records");

        let mut scored = score_pairs(&pairs, self.config.workers, |i, j| {
            self.score_profiles(&profiles[i], &profiles[j])
        })?;
        scored.sort_by(|a, b| {
            b.score
                .total
                .total_cmp(&a.score.total)
                .then_with(|| a.source_name.cmp(&b.source_name))
                .then_with(|| a.target_name.cmp(&b.target_name))
                .then_with(|| a.source_id.cmp(&b.source_id))
                .then_with(|| a.target_id.cmp(&b.target_id))
        });

        let mut seen: HashSet<PairKey> = HashSet::new();
        let total = scored.len();
        let candidates: Vec<MatchCandidate> = scored
            .into_iter()
            .filter(|c| !ledger.contains(&c.source_name, &c.target_name))
            .filter(|c| seen.insert(PairKey::new(&c.source_name, &c.target_name)))
            .collect();

        info!(
            scored = total,
            emitted = candidates.len(),
            "generated match candidates"
        );
        Ok(candidates)
    }

    /// Generates candidates and inserts them into the ledger. Returns the
    /// number of new entries.
    pub fn extend_ledger<S: RecordStore + ?Sized>(
        &self,
        store: &S,
        ledger: &mut MatchLedger,
    ) -> ResolveResult<usize> {
        let candidates = self.generate(store, ledger)?;
        let count = candidates.len();
        for candidate in candidates {
            ledger.insert(candidate.into_decision(&self.config)?);
        }
        Ok(count)
    }
}
