use crate::container::{ContainerType, QueryContainer};
use crate::description::Description;

use super::{DescriptionCompiler, QueryBuilder};

/// `[[+]]` imposes no constraint.
pub struct ThingDescriptionCompiler;

impl DescriptionCompiler for ThingDescriptionCompiler {
    fn can_compile_description(&self, description: &Description) -> bool {
        matches!(description, Description::Thing)
    }

    fn compile_description(
        &self,
        builder: &mut QueryBuilder<'_>,
        _description: &Description,
    ) -> QueryContainer {
        let mut query = builder.new_container();
        query.container_type = ContainerType::NoQuery;
        query
    }
}
