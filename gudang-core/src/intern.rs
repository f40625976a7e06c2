use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static TABLE: Lazy<RwLock<SymbolTable>> = Lazy::new(|| RwLock::new(SymbolTable::default()));

#[derive(Default)]
struct SymbolTable {
    lookup: HashMap<&'static str, u32>,
    symbols: Vec<&'static str>,
}

impl SymbolTable {
    fn intern(&mut self, value: &str) -> u32 {
        if let Some(&handle) = self.lookup.get(value) {
            return handle;
        }
        let leaked: &'static str = Box::leak(value.to_owned().into_boxed_str());
        let handle = self.symbols.len() as u32;
        self.symbols.push(leaked);
        self.lookup.insert(leaked, handle);
        handle
    }
}

/// Interned warehouse location code ("WH1", "TOKO-2", ...).
///
/// Codes are process-wide unique symbols, so the type is `Copy` and equality
/// is a handle comparison. The intern table is never freed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocationCode(u32);

impl LocationCode {
    pub fn new(code: &str) -> Self {
        if let Some(&handle) = TABLE.read().lookup.get(code) {
            return Self(handle);
        }
        Self(TABLE.write().intern(code))
    }

    pub fn as_str(&self) -> &'static str {
        TABLE.read().symbols[self.0 as usize]
    }
}

impl From<&str> for LocationCode {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<String> for LocationCode {
    fn from(code: String) -> Self {
        Self::new(&code)
    }
}

impl fmt::Display for LocationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for LocationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LocationCode({})", self.as_str())
    }
}

// Codes sort lexically, not by intern handle; multi-key lock acquisition
// relies on this being a stable total order.
impl Ord for LocationCode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl PartialOrd for LocationCode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for LocationCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LocationCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::new(&code))
    }
}
