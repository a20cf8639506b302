//! Bounded worker pool for pair scoring.
//!
//! Scoring is pure, so index pairs are fanned out in chunks over a bounded
//! channel to scoped worker threads. Each worker returns its own results;
//! the caller sorts the concatenation, so output does not depend on
//! scheduling.

use std::thread;

use crossbeam_channel::bounded;
use tracing::debug;

use crate::error::{ResolveError, ResolveResult};

/// Pairs handed to a worker at a time.
pub const CHUNK_SIZE: usize = 512;

/// Scores `pairs` with `score` on up to `workers` threads, keeping the
/// `Some` results.
///
/// With `workers <= 1`, or too few pairs to fill two chunks, scoring runs on
/// the calling thread.
pub fn score_pairs<T, F>(pairs: &[(usize, usize)], workers: usize, score: F) -> ResolveResult<Vec<T>>
where
    T: Send,
    F: Fn(usize, usize) -> Option<T> + Sync,
{
    if workers <= 1 || pairs.len() < CHUNK_SIZE * 2 {
        return Ok(pairs.iter().filter_map(|&(i, j)| score(i, j)).collect());
    }

    let workers = workers.min(pairs.len().div_ceil(CHUNK_SIZE));
    let (tx, rx) = bounded::<&[(usize, usize)]>(workers * 2);
    let score = &score;

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("agency-resolve-score-{idx}"))
                .spawn_scoped(scope, move || {
                    let mut out = Vec::new();
                    while let Ok(chunk) = rx.recv() {
                        out.extend(chunk.iter().filter_map(|&(i, j)| score(i, j)));
                    }
                    out
                })
                .map_err(|e| ResolveError::internal(format!("failed to spawn scoring worker: {e}")))?;
            handles.push(handle);
        }
        drop(rx);

        for chunk in pairs.chunks(CHUNK_SIZE) {
            if tx.send(chunk).is_err() {
                break;
            }
        }
        // Close the channel: workers drain queued chunks then exit.
        drop(tx);

        let mut results = Vec::new();
        for handle in handles {
            let part = handle
                .join()
                .map_err(|_| ResolveError::internal("scoring worker panicked"))?;
            results.extend(part);
        }
        debug!(workers, pairs = pairs.len(), kept = results.len(), "scored candidate pairs");
        Ok(results)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_and_sequential_agree() {
        let pairs: Vec<(usize, usize)> = (0..3000).map(|i| (i, i + 1)).collect();
        let f = |i: usize, j: usize| (i % 3 == 0).then_some(i + j);

        let mut seq = score_pairs(&pairs, 1, f).unwrap();
        let mut par = score_pairs(&pairs, 4, f).unwrap();
        seq.sort_unstable();
        par.sort_unstable();
        assert_eq!(seq, par);
        assert_eq!(seq.len(), 1000);
    }

    #[test]
    fn small_inputs_stay_on_calling_thread() {
        let pairs = vec![(0, 1), (1, 2)];
        let out = score_pairs(&pairs, 8, |i, j| Some((i, j))).unwrap();
        assert_eq!(out, pairs);
    }
}
