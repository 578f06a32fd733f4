//! In-process token cache

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::registry::Role;
use crate::token::TokenRecord;

/// Role → token map scoped to one test run.
///
/// A pure key-value store: no background sweep runs, staleness is checked by
/// the caller at lookup time. Entries are replaced wholesale, never merged.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<Role, TokenRecord>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, role: &Role) -> Option<TokenRecord> {
        self.entries.read().get(role).cloned()
    }

    /// Store a record, superseding any previous one for the role
    pub fn put(&self, role: Role, record: TokenRecord) {
        self.entries.write().insert(role, record);
    }

    pub fn remove(&self, role: &Role) -> Option<TokenRecord> {
        self.entries.write().remove(role)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
