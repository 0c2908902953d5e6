//! Label cardinality budgeting.
//!
//! Metric labels fed from request paths and task names are unbounded in
//! principle; a budget keeps the time-series count finite by folding values
//! past the limit into a single overflow bucket.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Label value that absorbs everything past the budget.
pub const OVERFLOW_LABEL: &str = "__overflow__";

/// Bounds the number of distinct values a metric label may take.
///
/// Values seen while under budget are admitted verbatim; once the budget is
/// spent, unseen values fold into [`OVERFLOW_LABEL`] and the fold is counted.
pub struct LabelBudget {
    admitted: Mutex<HashSet<String>>,
    limit: usize,
    folded: AtomicU64,
}

impl LabelBudget {
    /// Create a budget allowing at most `limit` distinct values.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            admitted: Mutex::new(HashSet::new()),
            limit,
            folded: AtomicU64::new(0),
        }
    }

    /// Resolve a label value against the budget.
    ///
    /// Known values and values admitted under the limit come back unchanged;
    /// anything else becomes [`OVERFLOW_LABEL`].
    pub fn admit<'a>(&self, value: &'a str) -> &'a str {
        let mut admitted = self.admitted.lock();
        if admitted.contains(value) {
            value
        } else if admitted.len() < self.limit {
            admitted.insert(value.to_string());
            value
        } else {
            self.folded.fetch_add(1, Ordering::Relaxed);
            OVERFLOW_LABEL
        }
    }

    /// How many recordings have been folded into the overflow bucket.
    #[must_use]
    pub fn folded_count(&self) -> u64 {
        self.folded.load(Ordering::Relaxed)
    }
}
