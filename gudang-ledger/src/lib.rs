//! Running-balance stock ledger, recalculation, and locking for Gudang.

mod entry;
mod error;
mod lock;
mod memory;
mod query;
mod recalc;
mod repository;
mod sqlite;

pub use entry::{LedgerEntry, SourceKind};
pub use error::{LedgerError, LedgerResult};
pub use lock::LockManager;
pub use memory::MemoryLedgerRepository;
pub use query::LedgerQuery;
pub use recalc::{NegativeBalance, RecalcOutcome, Recalculator};
pub use repository::{Inclusion, LedgerRepository};
pub use sqlite::SqliteLedgerRepository;
