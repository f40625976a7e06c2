use chrono::{DateTime, Utc};
use gudang_core::{LocationCode, ProductId, StockKey};
use uuid::Uuid;

use crate::SourceKind;

/// Filter describing which ledger entries to load from storage.
///
/// Results are always ordered by (timestamp, sequence); `ascending` only
/// flips the direction.
#[derive(Clone, Debug)]
pub struct LedgerQuery {
    pub product: Option<ProductId>,
    pub location: Option<LocationCode>,
    pub source_kind: Option<SourceKind>,
    pub source_reference: Option<String>,
    pub locked_by: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub ascending: bool,
}

impl Default for LedgerQuery {
    fn default() -> Self {
        Self {
            product: None,
            location: None,
            source_kind: None,
            source_reference: None,
            locked_by: None,
            start_time: None,
            end_time: None,
            limit: None,
            ascending: true,
        }
    }
}

impl LedgerQuery {
    pub fn for_key(key: StockKey) -> Self {
        Self {
            product: Some(key.product),
            location: Some(key.location),
            ..Self::default()
        }
    }

    pub fn with_source_kind(mut self, kind: SourceKind) -> Self {
        self.source_kind = Some(kind);
        self
    }

    pub fn with_source_reference(mut self, reference: impl Into<String>) -> Self {
        self.source_reference = Some(reference.into());
        self
    }

    pub fn with_lock_reference(mut self, lock_ref: Uuid) -> Self {
        self.locked_by = Some(lock_ref);
        self
    }

    pub fn with_time_range(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.start_time = start;
        self.end_time = end;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }
}
