use std::sync::Arc;

use chrono::{DateTime, Utc};
use gudang_core::StockKey;
use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use crate::{Inclusion, LedgerError, LedgerRepository, LedgerResult};

/// Transient storage failures mid-fold are retried from the same anchor;
/// the pass is idempotent so a retry can only converge.
const MAX_ATTEMPTS: usize = 3;

/// Rebuilds running balances for every entry after an anchor timestamp.
///
/// The fold never touches `quantity_in`/`quantity_out`; it is order-based,
/// not delta-based, so running it twice from the same anchor yields the same
/// balances.
#[derive(Clone)]
pub struct Recalculator {
    repo: Arc<dyn LedgerRepository>,
}

/// Result of one recalculation pass.
#[derive(Clone, Debug, Default)]
pub struct RecalcOutcome {
    /// Entries whose stored balance actually changed.
    pub updated: usize,
    /// Soft-invariant violations: balances that went negative during the fold.
    pub warnings: Vec<NegativeBalance>,
}

/// A point in the ledger where the running balance dipped below zero.
#[derive(Clone, Debug, PartialEq)]
pub struct NegativeBalance {
    pub entry: Uuid,
    pub key: StockKey,
    pub timestamp: DateTime<Utc>,
    pub balance: Decimal,
}

impl Recalculator {
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    /// Restore the running-balance invariant for every entry of `key`
    /// timestamped strictly after `anchor`.
    pub fn recalculate(
        &self,
        key: StockKey,
        anchor: DateTime<Utc>,
    ) -> LedgerResult<RecalcOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.recalculate_once(key, anchor) {
                Ok(outcome) => return Ok(outcome),
                Err(LedgerError::Storage(message)) if attempt < MAX_ATTEMPTS => {
                    warn!(
                        key = %key,
                        attempt,
                        error = %message,
                        "balance recalculation interrupted, retrying from the same anchor"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn recalculate_once(&self, key: StockKey, anchor: DateTime<Utc>) -> LedgerResult<RecalcOutcome> {
        let mut balance = self.anchor_balance(key, anchor)?;
        let mut outcome = RecalcOutcome::default();
        for entry in self.repo.scan_from(key, anchor, Inclusion::Exclusive)? {
            balance += entry.delta();
            if balance != entry.running_balance {
                self.repo.update_balance(entry.id, balance)?;
                outcome.updated += 1;
            }
            if balance.is_sign_negative() {
                warn!(
                    key = %key,
                    entry = %entry.id,
                    timestamp = %entry.timestamp,
                    balance = %balance,
                    "running balance went negative"
                );
                outcome.warnings.push(NegativeBalance {
                    entry: entry.id,
                    key,
                    timestamp: entry.timestamp,
                    balance,
                });
            }
        }
        Ok(outcome)
    }

    /// The balance to fold from: the highest-sequence entry exactly at the
    /// anchor instant (typically a reconciliation adjustment), else the
    /// latest earlier entry, else zero.
    fn anchor_balance(&self, key: StockKey, anchor: DateTime<Utc>) -> LedgerResult<Decimal> {
        if let Some(at_anchor) = self.repo.entries_at(key, anchor)?.last() {
            return Ok(at_anchor.running_balance);
        }
        Ok(self
            .repo
            .entry_before(key, anchor)?
            .map(|entry| entry.running_balance)
            .unwrap_or(Decimal::ZERO))
    }
}
