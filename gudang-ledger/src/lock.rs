use std::sync::Arc;

use chrono::{DateTime, Utc};
use gudang_core::StockKey;
use tracing::debug;
use uuid::Uuid;

use crate::{LedgerQuery, LedgerRepository, LedgerResult};

/// Marks ledger history as immutable once an approved reconciliation has
/// taken it as fact, and clears those marks on revert.
#[derive(Clone)]
pub struct LockManager {
    repo: Arc<dyn LedgerRepository>,
}

impl LockManager {
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    /// Lock every currently-unlocked entry for `key` strictly before
    /// `before`. Entries already claimed by a different reconciliation are
    /// left untouched; the workflow guard rejects overlapping approvals
    /// before this point. Returns the number of entries newly locked.
    /// No-op over an empty history.
    pub fn lock_history(
        &self,
        key: StockKey,
        before: DateTime<Utc>,
        lock_ref: Uuid,
    ) -> LedgerResult<usize> {
        let mut locked = 0;
        for entry in self.repo.query(LedgerQuery::for_key(key))? {
            if entry.timestamp >= before {
                break;
            }
            if entry.locked {
                if entry.locked_by != Some(lock_ref) {
                    debug!(
                        key = %key,
                        entry = %entry.id,
                        held_by = ?entry.locked_by,
                        "skipping entry already claimed by another reconciliation"
                    );
                }
                continue;
            }
            self.repo.set_locked(entry.id, true, Some(lock_ref))?;
            locked += 1;
        }
        Ok(locked)
    }

    /// Clear the lock on every entry held by `lock_ref`, across all keys.
    /// Reference-scoped rather than range-scoped, so revert is one
    /// idempotent sweep.
    pub fn unlock(&self, lock_ref: Uuid) -> LedgerResult<usize> {
        let held = self
            .repo
            .query(LedgerQuery::default().with_lock_reference(lock_ref))?;
        let count = held.len();
        for entry in held {
            self.repo.set_locked(entry.id, false, None)?;
        }
        Ok(count)
    }
}
