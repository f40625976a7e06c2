//! Umbrella crate re-exporting the Gudang public API.

pub use gudang_config as config;
pub use gudang_core as core;
pub use gudang_ledger as ledger;
pub use gudang_masterdata as masterdata;
pub use gudang_opname as opname;
