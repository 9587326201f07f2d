//! Category lookup boundary.
//!
//! Category/taxonomy management lives outside the engine; the engine only asks
//! whether a referenced category exists.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use fundhub_core::CategoryId;

/// Read-only view of the category catalogue.
pub trait CategoryStore: Send + Sync {
    fn exists(&self, id: CategoryId) -> bool;
}

impl<C> CategoryStore for Arc<C>
where
    C: CategoryStore + ?Sized,
{
    fn exists(&self, id: CategoryId) -> bool {
        (**self).exists(id)
    }
}

/// In-memory catalogue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCategoryStore {
    ids: RwLock<HashSet<CategoryId>>,
}

impl InMemoryCategoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a category and return its id.
    pub fn add(&self) -> CategoryId {
        let id = CategoryId::new();
        self.insert(id);
        id
    }

    pub fn insert(&self, id: CategoryId) {
        if let Ok(mut ids) = self.ids.write() {
            ids.insert(id);
        }
    }
}

impl CategoryStore for InMemoryCategoryStore {
    fn exists(&self, id: CategoryId) -> bool {
        self.ids.read().map(|ids| ids.contains(&id)).unwrap_or(false)
    }
}
