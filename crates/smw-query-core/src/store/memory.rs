//! In-memory [`Store`] implementation.
//!
//! Used by tests and as the compile-time snapshot of an SQLite database:
//! the application loads the id table and concept rows once, then compiles
//! any number of queries against this store without touching the database.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::description::PageRef;

use super::{AnsiDatabase, ConceptCacheRow, Database, PageId, Store};

type PageKey = (String, i32, String, String);

fn key_of(page: &PageRef) -> PageKey {
    (
        page.dbkey.clone(),
        page.namespace,
        page.interwiki.clone(),
        page.subobject.clone(),
    )
}

#[derive(Default)]
struct Tables {
    ids: HashMap<PageKey, PageId>,
    pages: HashMap<PageId, PageRef>,
    concepts: HashMap<PageId, ConceptCacheRow>,
    next_id: PageId,
}

/// In-memory object-id index and concept table.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    db: AnsiDatabase,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_database(AnsiDatabase::default())
    }

    pub fn with_database(db: AnsiDatabase) -> Self {
        Self {
            tables: RwLock::new(Tables {
                next_id: 1,
                ..Tables::default()
            }),
            db,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a page, returning its id. Existing pages keep their id.
    pub fn insert_page(&self, page: &PageRef) -> PageId {
        let mut t = self.write();
        let key = key_of(page);
        if let Some(id) = t.ids.get(&key) {
            return *id;
        }
        let id = t.next_id;
        t.next_id += 1;
        t.ids.insert(key, id);
        t.pages.insert(id, page.clone());
        id
    }

    /// Register a page under a known id (snapshot loading).
    pub fn insert_page_with_id(&self, page: &PageRef, id: PageId) {
        let mut t = self.write();
        t.ids.insert(key_of(page), id);
        t.pages.insert(id, page.clone());
        if id >= t.next_id {
            t.next_id = id + 1;
        }
    }

    pub fn set_concept_row(&self, concept_id: PageId, row: ConceptCacheRow) {
        self.write().concepts.insert(concept_id, row);
    }

    pub fn page_by_id(&self, id: PageId) -> Option<PageRef> {
        self.read().pages.get(&id).cloned()
    }

    pub fn page_count(&self) -> usize {
        self.read().pages.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn get_smw_page_id(
        &self,
        dbkey: &str,
        namespace: i32,
        interwiki: &str,
        subobject: &str,
    ) -> PageId {
        let key = (
            dbkey.to_string(),
            namespace,
            interwiki.to_string(),
            subobject.to_string(),
        );
        self.read().ids.get(&key).copied().unwrap_or(0)
    }

    fn database(&self) -> &dyn Database {
        &self.db
    }

    fn concept_cache_row(&self, concept_id: PageId) -> Option<ConceptCacheRow> {
        self.read().concepts.get(&concept_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{NS_CATEGORY, NS_MAIN};

    #[test]
    fn test_insert_and_resolve() {
        let store = MemoryStore::new();
        let city = PageRef::new("City", NS_CATEGORY);
        let id = store.insert_page(&city);
        assert!(id > 0);
        assert_eq!(store.insert_page(&city), id);
        assert_eq!(store.page_id(&city), id);
        assert_eq!(store.page_by_id(id), Some(city));
    }

    #[test]
    fn test_unknown_page_is_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.page_id(&PageRef::new("Nowhere", NS_MAIN)), 0);
    }

    #[test]
    fn test_subobject_is_distinct() {
        let store = MemoryStore::new();
        let page = PageRef::new("Berlin", NS_MAIN);
        let a = store.insert_page(&page);
        let b = store.insert_page(&page.clone().with_subobject("history"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_insert_with_id_advances_counter() {
        let store = MemoryStore::new();
        store.insert_page_with_id(&PageRef::new("A", NS_MAIN), 10);
        let next = store.insert_page(&PageRef::new("B", NS_MAIN));
        assert_eq!(next, 11);
        assert_eq!(store.page_count(), 2);
    }

    #[test]
    fn test_concept_row() {
        let store = MemoryStore::new();
        assert!(store.concept_cache_row(5).is_none());
        store.set_concept_row(
            5,
            ConceptCacheRow {
                concept_txt: Some("[[Category:City]]".into()),
                concept_size: 1,
                ..ConceptCacheRow::default()
            },
        );
        assert_eq!(store.concept_cache_row(5).unwrap().concept_size, 1);
    }
}
