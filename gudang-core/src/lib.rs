//! Core domain identifiers shared by the Gudang crates.

mod ids;
mod intern;

pub use ids::{ProductId, StockKey};
pub use intern::LocationCode;
