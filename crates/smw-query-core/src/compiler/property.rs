use tracing::debug;

use crate::container::{Component, JoinField, QueryContainer};
use crate::description::Description;

use super::{DescriptionCompiler, QueryBuilder};

/// Compiles `[[Property::…]]` conditions.
///
/// Subjects are taken from the property's value table; the value
/// description is compiled as a child joined on the object column.
pub struct SomePropertyCompiler;

impl DescriptionCompiler for SomePropertyCompiler {
    fn can_compile_description(&self, description: &Description) -> bool {
        matches!(description, Description::SomeProperty { .. })
    }

    fn compile_description(
        &self,
        builder: &mut QueryBuilder<'_>,
        description: &Description,
    ) -> QueryContainer {
        let Description::SomeProperty {
            property,
            description: value,
        } = description
        else {
            unreachable!("property compiler called with {:?}", description)
        };

        let mut query = builder.new_container();
        let store = builder.store();
        let db = store.database();

        let table = store.find_property_table_id(property);
        if !store.is_fixed_property_table(&table) {
            let pid = store.page_id(&property.page());
            if pid == 0 {
                debug!(property = property.key(), "unknown property, empty result");
                query.set_empty_result();
                return query;
            }
            query.add_where(format!(
                "{}.p_id={}",
                query.alias,
                db.add_quotes(&pid.to_string())
            ));
        }
        query.jointable = db.table_name(&table);
        query.joinfield = JoinField::Column(format!("{}.s_id", query.alias));

        if let Some(child) = builder.compile_queries(value) {
            query
                .components
                .insert(child, Component::Column(format!("{}.o_id", query.alias)));
        }
        query
    }
}
