use gudang_core::{LocationCode, ProductId};
use thiserror::Error;

use crate::OpnameError;

/// Master-data lookup failure.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unknown product: {0}")]
    UnknownProduct(String),
    #[error("unknown location: {0}")]
    UnknownLocation(String),
}

impl From<ResolveError> for OpnameError {
    fn from(value: ResolveError) -> Self {
        match value {
            ResolveError::UnknownProduct(name) => OpnameError::ProductNotFound(name),
            ResolveError::UnknownLocation(code) => OpnameError::LocationNotFound(code),
        }
    }
}

/// Supplies product identity from master data. The workflow consumes this;
/// it never owns product records.
pub trait ProductResolver: Send + Sync {
    fn resolve_product(&self, name_or_id: &str) -> Result<ProductId, ResolveError>;
}

/// Supplies location identity from master data.
pub trait LocationResolver: Send + Sync {
    fn resolve_location(&self, code_or_name: &str) -> Result<LocationCode, ResolveError>;
}
