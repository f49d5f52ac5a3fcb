/// What to do with one page's batch given the dataset count so far.
#[derive(Debug, PartialEq, Eq)]
pub struct CapDecision {
    /// How many records of the batch to store.
    pub take: usize,
    /// Whether the run is done: no further pages, no next-page enqueue.
    pub stop: bool,
}

/// Enforce the maximum total record count. When storing the whole batch
/// would meet or exceed the cap, the batch is truncated to exactly the
/// remaining headroom and the run terminates.
pub fn apply_cap(current: usize, max_items: Option<usize>, batch_len: usize) -> CapDecision {
    let Some(max) = max_items else {
        return CapDecision {
            take: batch_len,
            stop: false,
        };
    };
    if current + batch_len >= max {
        CapDecision {
            take: max.saturating_sub(current).min(batch_len),
            stop: true,
        }
    } else {
        CapDecision {
            take: batch_len,
            stop: false,
        }
    }
}

// ── Tests ──
