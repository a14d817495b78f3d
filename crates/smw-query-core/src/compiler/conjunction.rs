use crate::container::{Component, ContainerType, QueryContainer};
use crate::description::Description;

use super::{DescriptionCompiler, QueryBuilder};

/// Compiles conjunctions and disjunctions into logical nodes.
///
/// Operands that compile to nothing are left out. When no operand remains
/// the node becomes `NoQuery`.
pub struct DisjunctionConjunctionCompiler;

impl DescriptionCompiler for DisjunctionConjunctionCompiler {
    fn can_compile_description(&self, description: &Description) -> bool {
        matches!(
            description,
            Description::Conjunction(_) | Description::Disjunction(_)
        )
    }

    fn compile_description(
        &self,
        builder: &mut QueryBuilder<'_>,
        description: &Description,
    ) -> QueryContainer {
        let (container_type, parts) = match description {
            Description::Conjunction(parts) => (ContainerType::Conjunction, parts),
            Description::Disjunction(parts) => (ContainerType::Disjunction, parts),
            other => unreachable!("conjunction compiler called with {:?}", other),
        };

        let mut query = builder.new_container();
        query.container_type = container_type;

        for part in parts {
            if let Some(id) = builder.compile_queries(part) {
                query.components.insert(id, Component::Marker);
            }
        }

        if query.components.is_empty() {
            query.container_type = ContainerType::NoQuery;
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerSettings;
    use crate::description::{PageRef, NS_CATEGORY, NS_HELP};
    use crate::store::memory::MemoryStore;

    #[test]
    fn test_all_failing_children_collapse_to_noquery() {
        let store = MemoryStore::new();
        let mut builder = QueryBuilder::new(&store, CompilerSettings::default());
        for d in [
            Description::Conjunction(vec![Description::Thing, Description::Thing]),
            Description::Disjunction(vec![Description::Thing, Description::Thing]),
            Description::Conjunction(vec![]),
        ] {
            let q = builder.compile_description(&d);
            assert_eq!(q.container_type, ContainerType::NoQuery);
            assert!(q.components.is_empty());
        }
    }

    #[test]
    fn test_type_mirrors_input() {
        let store = MemoryStore::new();
        let mut builder = QueryBuilder::new(&store, CompilerSettings::default());
        let parts = vec![
            Description::Namespace(NS_HELP),
            Description::class(vec![PageRef::new("Unknown", NS_CATEGORY)]),
        ];
        let q = builder.compile_description(&Description::Disjunction(parts.clone()));
        assert_eq!(q.container_type, ContainerType::Disjunction);
        assert_eq!(q.components.len(), 2);

        let q = builder.compile_description(&Description::Conjunction(parts));
        assert_eq!(q.container_type, ContainerType::Conjunction);
        assert_eq!(q.components.len(), 2);
    }

    #[test]
    fn test_failing_child_is_dropped() {
        let store = MemoryStore::new();
        let mut builder = QueryBuilder::new(&store, CompilerSettings::default());
        let q = builder.compile_description(&Description::Conjunction(vec![
            Description::Thing,
            Description::Namespace(NS_HELP),
        ]));
        assert_eq!(q.container_type, ContainerType::Conjunction);
        assert_eq!(q.components.len(), 1);
        let child = q.components.keys().next().unwrap();
        assert!(builder.get(*child).is_some());
    }
}
