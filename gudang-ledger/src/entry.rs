use chrono::{DateTime, Utc};
use gudang_core::{LocationCode, ProductId, StockKey};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical ledger record: one stock movement for a product at a location.
///
/// `running_balance` is derived state owned by the recalculator; readers must
/// never treat it as authoritative input. `sequence` is assigned by the store
/// at append time and breaks ties between movements sharing a timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub product: ProductId,
    pub location: LocationCode,
    pub timestamp: DateTime<Utc>,
    pub sequence: u32,
    pub quantity_in: Decimal,
    pub quantity_out: Decimal,
    pub running_balance: Decimal,
    pub source_kind: SourceKind,
    pub source_reference: String,
    pub locked: bool,
    pub locked_by: Option<Uuid>,
}

impl LedgerEntry {
    /// Inbound movement (receipt, production output, positive adjustment).
    pub fn inbound(
        product: ProductId,
        location: LocationCode,
        timestamp: DateTime<Utc>,
        quantity: Decimal,
        source_kind: SourceKind,
        source_reference: impl Into<String>,
    ) -> Self {
        Self::build(
            product,
            location,
            timestamp,
            quantity.abs(),
            Decimal::ZERO,
            source_kind,
            source_reference,
        )
    }

    /// Outbound movement (issue, transfer out, negative adjustment).
    pub fn outbound(
        product: ProductId,
        location: LocationCode,
        timestamp: DateTime<Utc>,
        quantity: Decimal,
        source_kind: SourceKind,
        source_reference: impl Into<String>,
    ) -> Self {
        Self::build(
            product,
            location,
            timestamp,
            Decimal::ZERO,
            quantity.abs(),
            source_kind,
            source_reference,
        )
    }

    /// Movement from a signed delta: positive lands in `quantity_in`,
    /// negative in `quantity_out`.
    pub fn from_delta(
        product: ProductId,
        location: LocationCode,
        timestamp: DateTime<Utc>,
        delta: Decimal,
        source_kind: SourceKind,
        source_reference: impl Into<String>,
    ) -> Self {
        if delta.is_sign_negative() {
            Self::outbound(product, location, timestamp, -delta, source_kind, source_reference)
        } else {
            Self::inbound(product, location, timestamp, delta, source_kind, source_reference)
        }
    }

    fn build(
        product: ProductId,
        location: LocationCode,
        timestamp: DateTime<Utc>,
        quantity_in: Decimal,
        quantity_out: Decimal,
        source_kind: SourceKind,
        source_reference: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product,
            location,
            timestamp,
            sequence: 0,
            quantity_in,
            quantity_out,
            running_balance: Decimal::ZERO,
            source_kind,
            source_reference: source_reference.into(),
            locked: false,
            locked_by: None,
        }
    }

    /// Set the expected balance immediately after this entry.
    pub fn with_running_balance(mut self, balance: Decimal) -> Self {
        self.running_balance = balance;
        self
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product, self.location)
    }

    /// Signed effect of this entry on the running balance.
    pub fn delta(&self) -> Decimal {
        self.quantity_in - self.quantity_out
    }
}

/// Enumerates the documented origins of a stock movement.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Manual,
    Transfer,
    Production,
    PurchaseReceipt,
    SalesIssue,
    Opname,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Manual => "manual",
            SourceKind::Transfer => "transfer",
            SourceKind::Production => "production",
            SourceKind::PurchaseReceipt => "purchase_receipt",
            SourceKind::SalesIssue => "sales_issue",
            SourceKind::Opname => "opname",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(SourceKind::Manual),
            "transfer" => Ok(SourceKind::Transfer),
            "production" => Ok(SourceKind::Production),
            "purchase_receipt" => Ok(SourceKind::PurchaseReceipt),
            "sales_issue" => Ok(SourceKind::SalesIssue),
            "opname" => Ok(SourceKind::Opname),
            other => Err(format!("unknown source kind: {other}")),
        }
    }
}
