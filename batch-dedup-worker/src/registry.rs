use std::collections::HashSet;
use std::sync::Mutex;

/// Set of ids claimed so far in this run, shared by every worker.
///
/// The membership test and the insert happen under the same lock, so two workers
/// racing on one id can never both win the claim. Ids are never evicted; memory grows
/// with the number of distinct ids claimed during the run.
#[derive(Debug, Default)]
pub struct DedupRegistry {
    claimed: Mutex<HashSet<i64>>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for the caller. Returns `false` if it was already claimed.
    pub fn claim_if_new(&self, id: i64) -> bool {
        // A poisoned lock still holds a consistent set, insert is a single step
        let mut claimed = match self.claimed.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        claimed.insert(id)
    }

    pub fn len(&self) -> usize {
        match self.claimed.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
