use chrono::{DateTime, Utc};
use gudang_core::{LocationCode, ProductId, StockKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A stock opname: a reviewed comparison of recorded stock against a
/// physical count at one location, possibly backdated.
///
/// A single-product reconciliation is an opname with one line; there is no
/// separate single-item path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Opname {
    pub id: Uuid,
    /// Logical time the count is valid for, not the submission time.
    pub timestamp: DateTime<Utc>,
    pub location: LocationCode,
    pub responsible_party: String,
    pub notes: Option<String>,
    pub status: OpnameStatus,
    pub lines: Vec<OpnameLine>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl Opname {
    /// Stock keys touched by this opname, sorted and deduplicated; this is
    /// the stripe acquisition order for approve/revert.
    pub fn keys(&self) -> Vec<StockKey> {
        let mut keys: Vec<StockKey> = self
            .lines
            .iter()
            .map(|line| StockKey::new(line.product, self.location))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// The value written into `source_reference` of every ledger entry this
    /// opname mints, and into `locked_by` of every entry it locks.
    pub fn source_reference(&self) -> String {
        self.id.to_string()
    }
}

/// One product's count within an opname.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OpnameLine {
    pub product: ProductId,
    /// Ledger balance snapshotted at submission time. Informational; the
    /// authoritative adjustment is recomputed against the ledger at approval.
    pub system_stock: Decimal,
    pub physical_stock: Decimal,
    pub unit: String,
    pub notes: Option<String>,
}

impl OpnameLine {
    /// Counted minus recorded, as shown to the reviewer.
    pub fn difference(&self) -> Decimal {
        self.physical_stock - self.system_stock
    }
}

/// Workflow state of an opname.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpnameStatus {
    Pending,
    Approved,
    Rejected,
}

impl OpnameStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OpnameStatus::Pending => "pending",
            OpnameStatus::Approved => "approved",
            OpnameStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for OpnameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpnameStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OpnameStatus::Pending),
            "approved" => Ok(OpnameStatus::Approved),
            "rejected" => Ok(OpnameStatus::Rejected),
            other => Err(format!("unknown opname status: {other}")),
        }
    }
}

/// Caller-supplied opname submission, before resolution and snapshotting.
#[derive(Clone, Debug)]
pub struct OpnameDraft {
    /// Location code or name; resolved through the location resolver.
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub responsible_party: String,
    pub notes: Option<String>,
    pub lines: Vec<DraftLine>,
}

/// One counted product in a draft.
#[derive(Clone, Debug)]
pub struct DraftLine {
    /// Product name, SKU, or numeric id; resolved through the product
    /// resolver.
    pub product: String,
    pub physical_stock: Decimal,
    pub unit: String,
    pub notes: Option<String>,
}
