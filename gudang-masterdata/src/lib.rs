//! Product and location master data for Gudang.
//!
//! The workflow engine consumes master data through the resolver traits; it
//! never owns these records. `MasterRegistry` is the in-process registry the
//! surrounding application loads its catalog into.

use std::collections::HashMap;

use gudang_core::{LocationCode, ProductId};
use gudang_opname::{LocationResolver, ProductResolver, ResolveError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One sellable or stockable product.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub sku: Option<String>,
    pub unit: String,
}

/// One warehouse or store location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub code: LocationCode,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum MasterDataError {
    #[error("product id {0} is already registered")]
    DuplicateProduct(ProductId),
    #[error("location {0} is already registered")]
    DuplicateLocation(LocationCode),
}

#[derive(Default)]
struct Catalog {
    products: HashMap<ProductId, Product>,
    products_by_name: HashMap<String, ProductId>,
    products_by_sku: HashMap<String, ProductId>,
    locations: HashMap<LocationCode, Location>,
    locations_by_name: HashMap<String, LocationCode>,
}

/// In-process master data registry; name lookups are case-insensitive.
#[derive(Default)]
pub struct MasterRegistry {
    catalog: RwLock<Catalog>,
}

impl MasterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&self, product: Product) -> Result<(), MasterDataError> {
        let mut catalog = self.catalog.write();
        if catalog.products.contains_key(&product.id) {
            return Err(MasterDataError::DuplicateProduct(product.id));
        }
        catalog
            .products_by_name
            .insert(product.name.to_lowercase(), product.id);
        if let Some(sku) = &product.sku {
            catalog.products_by_sku.insert(sku.clone(), product.id);
        }
        catalog.products.insert(product.id, product);
        Ok(())
    }

    pub fn add_location(&self, location: Location) -> Result<(), MasterDataError> {
        let mut catalog = self.catalog.write();
        if catalog.locations.contains_key(&location.code) {
            return Err(MasterDataError::DuplicateLocation(location.code));
        }
        catalog
            .locations_by_name
            .insert(location.name.to_lowercase(), location.code);
        catalog.locations.insert(location.code, location);
        Ok(())
    }

    pub fn product(&self, id: ProductId) -> Option<Product> {
        self.catalog.read().products.get(&id).cloned()
    }

    pub fn location(&self, code: LocationCode) -> Option<Location> {
        self.catalog.read().locations.get(&code).cloned()
    }

    pub fn products(&self) -> Vec<Product> {
        let mut products: Vec<Product> = self.catalog.read().products.values().cloned().collect();
        products.sort_by_key(|product| product.id);
        products
    }

    pub fn locations(&self) -> Vec<Location> {
        let mut locations: Vec<Location> =
            self.catalog.read().locations.values().cloned().collect();
        locations.sort_by_key(|location| location.code);
        locations
    }
}

impl ProductResolver for MasterRegistry {
    fn resolve_product(&self, name_or_id: &str) -> Result<ProductId, ResolveError> {
        let catalog = self.catalog.read();
        if let Ok(id) = name_or_id.parse::<ProductId>() {
            if catalog.products.contains_key(&id) {
                return Ok(id);
            }
        }
        if let Some(&id) = catalog.products_by_sku.get(name_or_id) {
            return Ok(id);
        }
        catalog
            .products_by_name
            .get(&name_or_id.to_lowercase())
            .copied()
            .ok_or_else(|| ResolveError::UnknownProduct(name_or_id.to_string()))
    }
}

impl LocationResolver for MasterRegistry {
    fn resolve_location(&self, code_or_name: &str) -> Result<LocationCode, ResolveError> {
        let catalog = self.catalog.read();
        let code = LocationCode::new(code_or_name);
        if catalog.locations.contains_key(&code) {
            return Ok(code);
        }
        catalog
            .locations_by_name
            .get(&code_or_name.to_lowercase())
            .copied()
            .ok_or_else(|| ResolveError::UnknownLocation(code_or_name.to_string()))
    }
}
