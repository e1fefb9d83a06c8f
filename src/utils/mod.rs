use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

pub mod metrics;
pub mod validation;

/// Coarse cancellation flag shared between a caller and a long-running training job.
///
/// Training checks the flag between phases and discards partial state when it is set.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(AtomicOrdering::SeqCst)
    }
}

/// Descending by score, ascending by id on ties.
pub fn score_desc_then_id(a: (usize, f64), b: (usize, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

/// Keeps the `k` best `(id, score)` pairs, ordered by [`score_desc_then_id`].
///
/// Partial selection keeps this O(n + k log k) rather than a full sort.
pub fn top_k(mut scored: Vec<(usize, f64)>, k: usize) -> Vec<(usize, f64)> {
    if k == 0 {
        return Vec::new();
    }
    if scored.len() > k {
        scored.select_nth_unstable_by(k - 1, |a, b| score_desc_then_id(*a, *b));
        scored.truncate(k);
    }
    scored.sort_by(|a, b| score_desc_then_id(*a, *b));
    scored
}
