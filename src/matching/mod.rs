//! Candidate generation: blocking, similarity scoring and labeling.

pub mod blocking;
mod generator;
pub mod pool;
pub mod similarity;

pub use generator::{CandidateGenerator, MatchCandidate, MatchReason, ScoreBreakdown, ACRONYM_FIELD};
