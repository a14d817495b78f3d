use crate::container::{JoinField, QueryContainer};
use crate::description::Description;
use crate::store::ID_TABLE;

use super::{DescriptionCompiler, QueryBuilder};

/// Restricts subjects to one namespace via the id table.
pub struct NamespaceCompiler;

impl DescriptionCompiler for NamespaceCompiler {
    fn can_compile_description(&self, description: &Description) -> bool {
        matches!(description, Description::Namespace(_))
    }

    fn compile_description(
        &self,
        builder: &mut QueryBuilder<'_>,
        description: &Description,
    ) -> QueryContainer {
        let Description::Namespace(ns) = description else {
            unreachable!("namespace compiler called with {:?}", description)
        };

        // TODO: several namespace conditions over the same subjects could share one id-table join.
        let mut query = builder.new_container();
        let db = builder.store().database();
        query.jointable = db.table_name(ID_TABLE);
        query.joinfield = JoinField::Column(format!("{}.smw_id", query.alias));
        query.add_where(format!(
            "{}.smw_namespace={}",
            query.alias,
            db.add_quotes(&ns.to_string())
        ));
        query
    }
}
