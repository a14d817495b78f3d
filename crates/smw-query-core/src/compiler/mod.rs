//! Query compilation: [`Description`] trees to [`QueryContainer`] plans.
//!
//! A [`QueryBuilder`] owns the state of one compile: the container arena,
//! the collected soft errors, and the stack of concepts being expanded.
//! Dispatch is an exhaustive `match` over the description variant; each
//! variant is handled by one unit-struct compiler implementing
//! [`DescriptionCompiler`].
//!
//! Compilation never fails hard. A branch that cannot produce rows yields an
//! empty-result container, and a branch without constraints yields a
//! `NoQuery` container that the parent drops. Explanations are collected as
//! [`CompileMessage`]s.
//!
//! # Example
//!
//! ```
//! use smw_query_core::compiler::{compile, CompilerSettings};
//! use smw_query_core::parser::parse_query;
//! use smw_query_core::store::memory::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let description = parse_query("[[Help:+]]").unwrap();
//! let plan = compile(&store, &CompilerSettings::default(), &description);
//! assert!(plan.root.is_some());
//! ```

mod class;
mod concept;
mod conjunction;
mod namespace;
mod property;
mod thing;
mod value;

pub use class::ClassDescriptionCompiler;
pub use concept::{escape_concept_text, unescape_concept_text, ConceptDescriptionCompiler};
pub use conjunction::DisjunctionConjunctionCompiler;
pub use namespace::NamespaceCompiler;
pub use property::SomePropertyCompiler;
pub use thing::ThingDescriptionCompiler;
pub use value::{like_pattern, ValueDescriptionCompiler};

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::container::{ContainerType, NodeId, QueryContainer};
use crate::description::{features, Description};
use crate::store::{PageId, Store};

/// How concept results are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptCacheMode {
    /// Never use the concept cache; always compute.
    None,
    /// Use the cache, compute when it is stale and the concept is cheap enough.
    Hard,
    /// Only ever answer from the cache.
    All,
}

/// Limits and switches that govern compilation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerSettings {
    /// Enabled query features (see [`features`]).
    pub features: u32,
    pub max_size: u32,
    pub max_depth: u32,
    pub concept_cache: ConceptCacheMode,
    pub concept_cache_lifetime_minutes: i64,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            features: features::ALL,
            max_size: 16,
            max_depth: 4,
            concept_cache: ConceptCacheMode::Hard,
            concept_cache_lifetime_minutes: 24 * 60,
        }
    }
}

/// Soft, user-visible compile diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CompileMessage {
    /// A concept's query text compiled to nothing.
    EmptySubquery(String),
    /// A concept has no usable cache and may not be computed.
    ConceptCacheMiss(String),
    CircularConcept(String),
    UnparsableConcept(String),
    QueryTooLarge { size: u32, max: u32 },
    QueryTooDeep { depth: u32, max: u32 },
    FeatureDisabled(String),
}

impl fmt::Display for CompileMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileMessage::EmptySubquery(name) => {
                write!(f, "The query of concept \"{}\" has no conditions and was ignored.", name)
            }
            CompileMessage::ConceptCacheMiss(name) => write!(
                f,
                "Concept \"{}\" is not cached and exceeds the limits for computing it on demand.",
                name
            ),
            CompileMessage::CircularConcept(name) => {
                write!(f, "Concept \"{}\" refers to itself and was ignored.", name)
            }
            CompileMessage::UnparsableConcept(name) => {
                write!(f, "The query of concept \"{}\" could not be parsed.", name)
            }
            CompileMessage::QueryTooLarge { size, max } => write!(
                f,
                "The query has {} conditions; at most {} are allowed.",
                size, max
            ),
            CompileMessage::QueryTooDeep { depth, max } => write!(
                f,
                "The query nests properties {} levels deep; at most {} are allowed.",
                depth, max
            ),
            CompileMessage::FeatureDisabled(name) => {
                write!(f, "Queries using {} conditions are disabled.", name)
            }
        }
    }
}

/// A per-kind compiler.
pub trait DescriptionCompiler {
    fn can_compile_description(&self, description: &Description) -> bool;

    /// Compile `description`. Callers must check
    /// [`can_compile_description`](DescriptionCompiler::can_compile_description) first.
    fn compile_description(
        &self,
        builder: &mut QueryBuilder<'_>,
        description: &Description,
    ) -> QueryContainer;
}

/// Compilation context for one top-level query.
pub struct QueryBuilder<'s> {
    store: &'s dyn Store,
    settings: CompilerSettings,
    now: i64,
    segments: Vec<Option<QueryContainer>>,
    errors: Vec<CompileMessage>,
    concept_stack: Vec<PageId>,
}

impl<'s> QueryBuilder<'s> {
    pub fn new(store: &'s dyn Store, settings: CompilerSettings) -> Self {
        Self {
            store,
            settings,
            now: chrono::Utc::now().timestamp(),
            segments: Vec::new(),
            errors: Vec::new(),
            concept_stack: Vec::new(),
        }
    }

    /// Override the clock used for concept cache freshness.
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    pub fn store(&self) -> &'s dyn Store {
        self.store
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    pub fn now(&self) -> i64 {
        self.now
    }

    /// Allocate a fresh container with a unique id and alias.
    pub fn new_container(&mut self) -> QueryContainer {
        let id = NodeId(self.segments.len());
        self.segments.push(None);
        QueryContainer::new(id)
    }

    /// Compile one node through the per-kind compiler for its variant.
    pub fn compile_description(&mut self, description: &Description) -> QueryContainer {
        fn run(
            compiler: &dyn DescriptionCompiler,
            builder: &mut QueryBuilder<'_>,
            description: &Description,
        ) -> QueryContainer {
            debug_assert!(compiler.can_compile_description(description));
            compiler.compile_description(builder, description)
        }

        match description {
            Description::Thing => run(&ThingDescriptionCompiler, self, description),
            Description::Value { .. } => run(&ValueDescriptionCompiler, self, description),
            Description::Class { .. } => run(&ClassDescriptionCompiler, self, description),
            Description::Namespace(_) => run(&NamespaceCompiler, self, description),
            Description::Concept(_) => run(&ConceptDescriptionCompiler, self, description),
            Description::Conjunction(_) | Description::Disjunction(_) => {
                run(&DisjunctionConjunctionCompiler, self, description)
            }
            Description::SomeProperty { .. } => run(&SomePropertyCompiler, self, description),
        }
    }

    /// Compile and register a node. `None` means the node imposes no
    /// constraint (`NoQuery`) and should be left out by the caller.
    pub fn compile_queries(&mut self, description: &Description) -> Option<NodeId> {
        let container = self.compile_description(description);
        if container.container_type == ContainerType::NoQuery {
            debug!(alias = %container.alias, "description compiled to no query");
            return None;
        }
        let id = container.id;
        self.add_segment(container);
        Some(id)
    }

    /// Register a finished container under its id.
    pub fn add_segment(&mut self, container: QueryContainer) {
        let index = container.id.0;
        if index >= self.segments.len() {
            self.segments.resize_with(index + 1, || None);
        }
        self.segments[index] = Some(container);
    }

    pub fn get(&self, id: NodeId) -> Option<&QueryContainer> {
        self.segments.get(id.0).and_then(Option::as_ref)
    }

    pub fn errors(&self) -> &[CompileMessage] {
        &self.errors
    }

    pub fn add_error(&mut self, message: CompileMessage) {
        debug!(%message, "compile message");
        self.errors.push(message);
    }

    pub(crate) fn enter_concept(&mut self, id: PageId) -> bool {
        if self.concept_stack.contains(&id) {
            return false;
        }
        self.concept_stack.push(id);
        true
    }

    pub(crate) fn leave_concept(&mut self) {
        self.concept_stack.pop();
    }

    /// Finish compilation, handing out the registered containers.
    pub fn into_plan(self, root: Option<NodeId>) -> QueryPlan {
        QueryPlan {
            root,
            containers: self.segments.into_iter().flatten().collect(),
            errors: self.errors,
        }
    }
}

/// The result of compiling one query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    /// Root node, `None` when the query has no results.
    pub root: Option<NodeId>,
    pub containers: Vec<QueryContainer>,
    pub errors: Vec<CompileMessage>,
}

impl QueryPlan {
    pub fn get(&self, id: NodeId) -> Option<&QueryContainer> {
        self.containers.iter().find(|c| c.id == id)
    }

    pub fn root_container(&self) -> Option<&QueryContainer> {
        self.root.and_then(|id| self.get(id))
    }
}

/// Messages for a description that exceeds the configured limits.
pub fn check_restrictions(settings: &CompilerSettings, description: &Description) -> Vec<CompileMessage> {
    let mut messages = Vec::new();
    let size = description.size();
    if size > settings.max_size {
        messages.push(CompileMessage::QueryTooLarge {
            size,
            max: settings.max_size,
        });
    }
    let depth = description.depth();
    if depth > settings.max_depth {
        messages.push(CompileMessage::QueryTooDeep {
            depth,
            max: settings.max_depth,
        });
    }
    let disabled = description.features() & !settings.features;
    let names = [
        (features::PROPERTY, "property"),
        (features::CATEGORY, "category"),
        (features::CONCEPT, "concept"),
        (features::NAMESPACE, "namespace"),
        (features::CONJUNCTION, "conjunction"),
        (features::DISJUNCTION, "disjunction"),
    ];
    for (bit, name) in names {
        if disabled & bit != 0 {
            messages.push(CompileMessage::FeatureDisabled(name.to_string()));
        }
    }
    messages
}

/// Compile a top-level description into a plan.
///
/// Descriptions outside the configured size, depth, or feature limits
/// compile to an empty plan carrying the reasons.
pub fn compile(store: &dyn Store, settings: &CompilerSettings, description: &Description) -> QueryPlan {
    let mut builder = QueryBuilder::new(store, settings.clone());
    let restrictions = check_restrictions(settings, description);
    if !restrictions.is_empty() {
        for message in restrictions {
            builder.add_error(message);
        }
        return builder.into_plan(None);
    }
    let root = builder.compile_queries(description);
    debug!(?root, containers = builder.segments.len(), "query compiled");
    builder.into_plan(root)
}

/// Compile the stored query of concept `concept_id` to fill its cache.
///
/// The size, depth and feature limits are not applied: they only decide
/// whether a concept may be computed on demand. References back to the
/// concept itself are cut.
pub fn compile_concept(
    store: &dyn Store,
    settings: &CompilerSettings,
    concept_id: PageId,
    description: &Description,
) -> QueryPlan {
    let mut builder = QueryBuilder::new(store, settings.clone());
    builder.enter_concept(concept_id);
    let root = builder.compile_queries(description);
    builder.leave_concept();
    debug!(?root, concept_id, "concept query compiled");
    builder.into_plan(root)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::container::Component;
    use crate::description::{PageRef, Property, NS_CATEGORY, NS_HELP, NS_MAIN, SMW_NS_PROPERTY};
    use crate::parser::parse_query;
    use crate::store::memory::MemoryStore;

    fn store_with_categories() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_page(&PageRef::new("City", NS_CATEGORY));
        store.insert_page(&PageRef::new("Country", NS_CATEGORY));
        store.insert_page(&PageRef::new("Berlin", NS_MAIN));
        store.insert_page(&PageRef::new("Located_in", SMW_NS_PROPERTY));
        store
    }

    #[test]
    fn test_aliases_unique_across_nesting() {
        let store = store_with_categories();
        let d = parse_query(
            "[[Category:City]] <q>[[Help:+]] OR <q>[[Category:Country]][[!Berlin]]</q></q> \
             [[Located in::<q>[[Category:Country]] OR [[Help:+]]</q>]] OR [[Category:City]][[:+]]",
        )
        .unwrap();
        let plan = compile(&store, &CompilerSettings {
            max_size: 100,
            ..CompilerSettings::default()
        }, &d);
        assert!(plan.root.is_some());
        let aliases: HashSet<&str> = plan.containers.iter().map(|c| c.alias.as_str()).collect();
        assert_eq!(aliases.len(), plan.containers.len());
        assert!(plan.containers.len() >= 10);
    }

    #[test]
    fn test_components_reference_registered_nodes() {
        let store = store_with_categories();
        let d = parse_query("[[Category:City]][[Help:+]] OR [[Located in::Berlin]]").unwrap();
        let plan = compile(&store, &CompilerSettings::default(), &d);
        for container in &plan.containers {
            for child in container.components.keys() {
                assert!(plan.get(*child).is_some(), "dangling child {}", child);
            }
        }
    }

    #[test]
    fn test_thing_at_top_level_has_no_root() {
        let store = MemoryStore::new();
        let plan = compile(&store, &CompilerSettings::default(), &Description::Thing);
        assert!(plan.root.is_none());
        assert!(plan.containers.is_empty());
    }

    #[test]
    fn test_mixed_tree_dispatch() {
        let store = store_with_categories();
        let d = Description::and(vec![
            Description::class(vec![PageRef::new("City", NS_CATEGORY)]),
            Description::Namespace(NS_HELP),
        ]);
        let plan = compile(&store, &CompilerSettings::default(), &d);
        let root = plan.root_container().unwrap();
        assert_eq!(root.container_type, ContainerType::Conjunction);
        assert_eq!(root.components.len(), 2);
        assert!(root.components.values().all(|c| *c == Component::Marker));
    }

    #[test]
    fn test_restrictions_block_compilation() {
        let store = store_with_categories();
        let settings = CompilerSettings {
            max_size: 1,
            features: features::ALL & !features::NAMESPACE,
            ..CompilerSettings::default()
        };
        let d = parse_query("[[Category:City]][[Help:+]]").unwrap();
        let plan = compile(&store, &settings, &d);
        assert!(plan.root.is_none());
        assert!(plan
            .errors
            .contains(&CompileMessage::QueryTooLarge { size: 2, max: 1 }));
        assert!(plan
            .errors
            .contains(&CompileMessage::FeatureDisabled("namespace".into())));
    }

    #[test]
    fn test_concept_query_ignores_restrictions() {
        let store = store_with_categories();
        let settings = CompilerSettings {
            max_size: 1,
            ..CompilerSettings::default()
        };
        let d = parse_query("[[Category:City]][[Help:+]]").unwrap();
        let plan = compile_concept(&store, &settings, 999, &d);
        assert!(plan.errors.is_empty());
        let root = plan.root_container().unwrap();
        assert_eq!(root.container_type, ContainerType::Conjunction);
    }

    #[test]
    fn test_depth_restriction() {
        let settings = CompilerSettings {
            max_depth: 1,
            ..CompilerSettings::default()
        };
        let d = Description::some_property(
            Property::from_label("A"),
            Description::some_property(Property::from_label("B"), Description::Thing),
        );
        let messages = check_restrictions(&settings, &d);
        assert_eq!(messages, vec![CompileMessage::QueryTooDeep { depth: 2, max: 1 }]);
    }

    #[test]
    fn test_plan_serializes() {
        let store = store_with_categories();
        let d = parse_query("[[Category:City]]").unwrap();
        let plan = compile(&store, &CompilerSettings::default(), &d);
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["root"], serde_json::json!(0));
        assert_eq!(json["containers"].as_array().unwrap().len(), 2);
    }
}
