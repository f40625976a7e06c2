use chrono::{DateTime, Utc};
use gudang_core::StockKey;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    Inclusion, LedgerEntry, LedgerError, LedgerQuery, LedgerRepository, LedgerResult,
};

/// In-memory ledger repository for tests and short-lived embedding.
///
/// Entries are kept in (timestamp, sequence) order so scans are plain slices
/// of the backing vector.
#[derive(Debug, Default)]
pub struct MemoryLedgerRepository {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl MemoryLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn position_for(entries: &[LedgerEntry], entry: &LedgerEntry) -> usize {
        entries
            .partition_point(|existing| {
                (existing.timestamp, existing.sequence) <= (entry.timestamp, entry.sequence)
            })
    }
}

impl LedgerRepository for MemoryLedgerRepository {
    fn append(&self, mut entry: LedgerEntry) -> LedgerResult<LedgerEntry> {
        if entry.quantity_in.is_sign_negative() || entry.quantity_out.is_sign_negative() {
            return Err(LedgerError::InvalidEntry(
                "movement quantities must be non-negative".into(),
            ));
        }
        if !entry.quantity_in.is_zero() && !entry.quantity_out.is_zero() {
            return Err(LedgerError::InvalidEntry(
                "an entry may move stock in or out, not both".into(),
            ));
        }
        let mut entries = self.entries.write();
        let next_sequence = entries
            .iter()
            .filter(|existing| {
                existing.key() == entry.key() && existing.timestamp == entry.timestamp
            })
            .map(|existing| existing.sequence)
            .max()
            .unwrap_or(0)
            + 1;
        entry.sequence = next_sequence;
        let position = Self::position_for(&entries, &entry);
        entries.insert(position, entry.clone());
        Ok(entry)
    }

    fn scan_from(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
        inclusion: Inclusion,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|entry| entry.key() == key)
            .filter(|entry| match inclusion {
                Inclusion::Inclusive => entry.timestamp >= timestamp,
                Inclusion::Exclusive => entry.timestamp > timestamp,
            })
            .cloned()
            .collect())
    }

    fn entry_before(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
    ) -> LedgerResult<Option<LedgerEntry>> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|entry| entry.key() == key && entry.timestamp < timestamp)
            .last()
            .cloned())
    }

    fn entries_at(
        &self,
        key: StockKey,
        timestamp: DateTime<Utc>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .filter(|entry| entry.key() == key && entry.timestamp == timestamp)
            .cloned()
            .collect())
    }

    fn update_balance(&self, id: Uuid, running_balance: Decimal) -> LedgerResult<()> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(LedgerError::EntryNotFound(id))?;
        if entry.locked {
            return Err(LedgerError::LockViolation {
                id,
                lock_ref: entry.locked_by.unwrap_or_default(),
            });
        }
        entry.running_balance = running_balance;
        Ok(())
    }

    fn set_locked(&self, id: Uuid, locked: bool, lock_ref: Option<Uuid>) -> LedgerResult<()> {
        if locked && lock_ref.is_none() {
            return Err(LedgerError::InvalidEntry(
                "locking an entry requires a lock reference".into(),
            ));
        }
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|entry| entry.id == id)
            .ok_or(LedgerError::EntryNotFound(id))?;
        entry.locked = locked;
        entry.locked_by = if locked { lock_ref } else { None };
        Ok(())
    }

    fn delete_by_source(&self, source_reference: &str) -> LedgerResult<usize> {
        let mut entries = self.entries.write();
        if let Some(held) = entries
            .iter()
            .find(|entry| entry.source_reference == source_reference && entry.locked)
        {
            return Err(LedgerError::LockViolation {
                id: held.id,
                lock_ref: held.locked_by.unwrap_or_default(),
            });
        }
        let before = entries.len();
        entries.retain(|entry| entry.source_reference != source_reference);
        Ok(before - entries.len())
    }

    fn query(&self, query: LedgerQuery) -> LedgerResult<Vec<LedgerEntry>> {
        let entries = self.entries.read();
        let mut matched: Vec<LedgerEntry> = entries
            .iter()
            .filter(|entry| query.product.map_or(true, |p| entry.product == p))
            .filter(|entry| query.location.map_or(true, |l| entry.location == l))
            .filter(|entry| query.source_kind.map_or(true, |k| entry.source_kind == k))
            .filter(|entry| {
                query
                    .source_reference
                    .as_deref()
                    .map_or(true, |r| entry.source_reference == r)
            })
            .filter(|entry| query.locked_by.map_or(true, |lock| entry.locked_by == Some(lock)))
            .filter(|entry| query.start_time.map_or(true, |t| entry.timestamp >= t))
            .filter(|entry| query.end_time.map_or(true, |t| entry.timestamp <= t))
            .cloned()
            .collect();
        if !query.ascending {
            matched.reverse();
        }
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}
