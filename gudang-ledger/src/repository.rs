use chrono::{DateTime, Utc};
use gudang_core::StockKey;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{LedgerEntry, LedgerQuery, LedgerResult};

/// Whether a scan starting at a timestamp includes the same-instant bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inclusion {
    Inclusive,
    Exclusive,
}

/// Abstraction over durable ledger storage engines.
///
/// All scans return entries ordered by (timestamp, sequence) ascending; that
/// ordering is the one correctness contract recalculation depends on.
pub trait LedgerRepository: Send + Sync {
    /// Persist an entry, assigning the next `sequence` within its
    /// (product, location, timestamp) bucket. Returns the stored entry.
    fn append(&self, entry: LedgerEntry) -> LedgerResult<LedgerEntry>;

    /// Every entry for the key at or after (`Inclusive`) / strictly after
    /// (`Exclusive`) the timestamp.
    fn scan_from(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
        inclusion: Inclusion,
    ) -> LedgerResult<Vec<LedgerEntry>>;

    /// Latest entry strictly before the timestamp, if any.
    fn entry_before(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
    ) -> LedgerResult<Option<LedgerEntry>>;

    /// The same-instant bucket at exactly `timestamp`, sequence ascending.
    fn entries_at(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
    ) -> LedgerResult<Vec<LedgerEntry>>;

    /// Rewrite one entry's derived running balance. Locked entries are
    /// refused with a lock violation.
    fn update_balance(&self, id: Uuid, running_balance: Decimal) -> LedgerResult<()>;

    /// Mark or clear the lock flag on one entry.
    fn set_locked(&self, id: Uuid, locked: bool, lock_ref: Option<Uuid>) -> LedgerResult<()>;

    /// Remove every entry carrying the source reference; skips nothing and
    /// refuses locked entries. Returns the number of deleted rows, zero when
    /// the reference matches nothing (safe to re-run).
    fn delete_by_source(&self, source_reference: &str) -> LedgerResult<usize>;

    /// Stream entries matching the supplied filter.
    fn query(&self, query: LedgerQuery) -> LedgerResult<Vec<LedgerEntry>>;

    /// Balance of the key including every entry timestamped at or before
    /// `as_of`; zero for an empty history.
    fn balance_as_of(&self, key: StockKey, as_of: DateTime<Utc>) -> LedgerResult<Decimal> {
        let mut entries = self.scan_from(key, DateTime::<Utc>::MIN_UTC, Inclusion::Inclusive)?;
        entries.retain(|entry| entry.timestamp <= as_of);
        Ok(entries
            .last()
            .map(|entry| entry.running_balance)
            .unwrap_or(Decimal::ZERO))
    }
}
