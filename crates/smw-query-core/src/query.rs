//! Queries, their results, and the engine abstraction.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::description::{Description, PageRef};

/// What a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Instances,
    Count,
}

/// A compiled-to-be query with paging and cache options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub description: Description,
    pub limit: usize,
    pub offset: usize,
    /// Page the query is embedded in, if any.
    pub context_page: Option<PageRef>,
    pub mode: QueryMode,
    /// Explicit opt-out from the result cache.
    pub no_cache: bool,
}

impl Query {
    pub fn new(description: Description) -> Self {
        Self {
            description,
            limit: 50,
            offset: 0,
            context_page: None,
            mode: QueryMode::Instances,
            no_cache: false,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_context_page(mut self, page: PageRef) -> Self {
        self.context_page = Some(page);
        self
    }

    pub fn with_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    /// Stable fingerprint of what the query computes. The description is
    /// hashed in its JSON form, which keeps data-item kinds apart.
    ///
    /// Embedded queries also hash their context page, so the same query on
    /// two pages gets two cache entries, each linked to its own page.
    pub fn query_id(&self) -> String {
        let mode = match self.mode {
            QueryMode::Instances => "instances",
            QueryMode::Count => "count",
        };
        let description = serde_json::to_string(&self.description)
            .unwrap_or_else(|_| self.description.query_string());
        let mut hasher = Sha256::new();
        hasher.update(description.as_bytes());
        hasher.update(format!("#{}#{}#{}", self.limit, self.offset, mode).as_bytes());
        if let Some(page) = &self.context_page {
            hasher.update(format!("#{}", page.serialization()).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Embedded queries run in the context of a page.
    pub fn is_embedded(&self) -> bool {
        self.context_page.is_some()
    }
}

/// Pages matching a query, plus paging and diagnostic information.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub results: Vec<PageRef>,
    /// More results exist beyond `limit`.
    pub has_further: bool,
    pub count: usize,
    /// Per-page snippets keyed by page serialization.
    pub excerpts: BTreeMap<String, String>,
    pub errors: Vec<String>,
    pub from_cache: bool,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn serialized_results(&self) -> Vec<String> {
        self.results.iter().map(PageRef::serialization).collect()
    }
}

/// Executes queries against the data store.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    async fn get_query_result(&self, query: &Query) -> anyhow::Result<QueryResult>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{Comparator, DataItem, NS_CATEGORY, NS_MAIN};

    fn query() -> Query {
        Query::new(Description::class(vec![PageRef::new("City", NS_CATEGORY)]))
    }

    #[test]
    fn test_query_id_is_stable() {
        assert_eq!(query().query_id(), query().query_id());
        assert_eq!(query().query_id().len(), 64);
    }

    #[test]
    fn test_query_id_depends_on_paging_and_mode() {
        let base = query().query_id();
        assert_ne!(base, query().with_limit(10).query_id());
        assert_ne!(base, query().with_offset(5).query_id());
        assert_ne!(base, query().with_mode(QueryMode::Count).query_id());
    }

    #[test]
    fn test_query_id_depends_on_context_page() {
        let berlin = query()
            .with_context_page(PageRef::new("Berlin", NS_MAIN))
            .query_id();
        let paris = query()
            .with_context_page(PageRef::new("Paris", NS_MAIN))
            .query_id();
        assert_ne!(query().query_id(), berlin);
        assert_ne!(berlin, paris);
        assert_eq!(
            berlin,
            query()
                .with_context_page(PageRef::new("Berlin", NS_MAIN))
                .query_id()
        );
    }

    #[test]
    fn test_query_id_tells_data_item_kinds_apart() {
        let page = Query::new(Description::value(
            DataItem::Page(PageRef::new("Berlin", NS_MAIN)),
            Comparator::Eq,
        ));
        let text = Query::new(Description::value(
            DataItem::Text("Berlin".to_string()),
            Comparator::Eq,
        ));
        assert_eq!(page.description.query_string(), text.description.query_string());
        assert_ne!(page.query_id(), text.query_id());
    }

    #[test]
    fn test_embedded() {
        assert!(!query().is_embedded());
        assert!(query()
            .with_context_page(PageRef::new("Berlin", NS_MAIN))
            .is_embedded());
    }
}
