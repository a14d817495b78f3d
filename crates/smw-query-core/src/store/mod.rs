//! Storage abstraction consumed by the query compilers.
//!
//! The [`Store`] trait is the narrow read-only view the compilers need:
//! object-id resolution, table naming and quoting, property-table lookup,
//! and the concept cache metadata row. Lookups are synchronous; backends
//! that talk to an async database load a snapshot up front (see
//! [`memory::MemoryStore`]).
//!
//! Implementations must be `Send + Sync` so a store can be shared between
//! concurrent compiles.

pub mod memory;

use crate::description::{PageRef, Property};

/// Object id of a page in the id table. `0` means "not found".
pub type PageId = u64;

pub const ID_TABLE: &str = "smw_object_ids";
pub const CONCEPT_CACHE_TABLE: &str = "smw_concept_cache";
pub const CONCEPT_TABLE: &str = "smw_fpt_conc";
pub const INST_TABLE: &str = "smw_fpt_inst";
pub const SUBC_TABLE: &str = "smw_fpt_subc";
pub const WIKIPAGE_TABLE: &str = "smw_di_wikipage";

/// Concept metadata as stored in the concept table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConceptCacheRow {
    /// Escaped query text of the concept, if any.
    pub concept_txt: Option<String>,
    pub concept_features: u32,
    pub concept_size: u32,
    pub concept_depth: u32,
    /// Unix timestamp of the last cache refresh.
    pub cache_date: Option<i64>,
}

/// Database naming and quoting boundary.
pub trait Database: Send + Sync {
    /// Physical table name for a logical table id.
    fn table_name(&self, table: &str) -> String;

    /// Quote a value as an SQL string literal.
    fn add_quotes(&self, value: &str) -> String;
}

/// ANSI quoting with an optional table prefix.
#[derive(Debug, Clone, Default)]
pub struct AnsiDatabase {
    pub prefix: String,
}

impl AnsiDatabase {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Database for AnsiDatabase {
    fn table_name(&self, table: &str) -> String {
        format!("{}{}", self.prefix, table)
    }

    fn add_quotes(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }
}

/// Read access to semantic data needed during compilation.
pub trait Store: Send + Sync {
    /// Resolve a page to its object id, `0` when unknown.
    fn get_smw_page_id(&self, dbkey: &str, namespace: i32, interwiki: &str, subobject: &str)
        -> PageId;

    fn page_id(&self, page: &PageRef) -> PageId {
        self.get_smw_page_id(&page.dbkey, page.namespace, &page.interwiki, &page.subobject)
    }

    fn database(&self) -> &dyn Database;

    /// Logical table holding the values of `property`.
    fn find_property_table_id(&self, property: &Property) -> String {
        match property.key() {
            Property::INSTANCE_OF => INST_TABLE.to_string(),
            Property::SUBCATEGORY_OF => SUBC_TABLE.to_string(),
            _ => WIKIPAGE_TABLE.to_string(),
        }
    }

    /// Fixed-property tables store one property and have no `p_id` column.
    fn is_fixed_property_table(&self, table: &str) -> bool {
        table != WIKIPAGE_TABLE
    }

    /// Concept metadata row, read directly from the concept table.
    fn concept_cache_row(&self, concept_id: PageId) -> Option<ConceptCacheRow>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_quotes_escapes() {
        let db = AnsiDatabase::default();
        assert_eq!(db.add_quotes("O'Brien"), "'O''Brien'");
        assert_eq!(db.add_quotes("14"), "'14'");
    }

    #[test]
    fn test_table_prefix() {
        let db = AnsiDatabase::new("wiki_");
        assert_eq!(db.table_name(ID_TABLE), "wiki_smw_object_ids");
    }
}
