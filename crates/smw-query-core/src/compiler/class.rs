use tracing::debug;

use crate::container::{Component, ContainerType, JoinField, QueryContainer};
use crate::description::{Description, Property, NS_CATEGORY};

use super::{DescriptionCompiler, QueryBuilder};

/// Compiles category membership.
///
/// The instance-of table is joined on its subject column, and a child
/// `ClassHierarchy` node holding the resolved category ids is attached to
/// its object column so the SQL layer can expand subcategories.
pub struct ClassDescriptionCompiler;

impl DescriptionCompiler for ClassDescriptionCompiler {
    fn can_compile_description(&self, description: &Description) -> bool {
        matches!(description, Description::Class { .. })
    }

    fn compile_description(
        &self,
        builder: &mut QueryBuilder<'_>,
        description: &Description,
    ) -> QueryContainer {
        let Description::Class {
            categories,
            hierarchy_depth,
        } = description
        else {
            unreachable!("class compiler called with {:?}", description)
        };

        let mut query = builder.new_container();
        let store = builder.store();

        let ids: Vec<_> = categories
            .iter()
            .map(|category| {
                store.get_smw_page_id(
                    &category.dbkey,
                    NS_CATEGORY,
                    &category.interwiki,
                    &category.subobject,
                )
            })
            .filter(|id| *id != 0)
            .collect();

        if ids.is_empty() {
            debug!(alias = %query.alias, "no known category, empty result");
            query.set_empty_result();
            return query;
        }

        let table = store.find_property_table_id(&Property::instance_of());
        query.jointable = store.database().table_name(&table);
        query.joinfield = JoinField::Column(format!("{}.s_id", query.alias));

        let mut hierarchy = builder.new_container();
        hierarchy.container_type = ContainerType::ClassHierarchy;
        hierarchy.joinfield = JoinField::Ids(ids);
        hierarchy.depth = *hierarchy_depth;

        query
            .components
            .insert(hierarchy.id, Component::Column(format!("{}.o_id", query.alias)));
        builder.add_segment(hierarchy);
        query
    }
}
