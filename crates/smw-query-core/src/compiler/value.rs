use crate::container::{ContainerType, JoinField, QueryContainer};
use crate::description::{Comparator, DataItem, Description};
use crate::store::ID_TABLE;

use super::{DescriptionCompiler, QueryBuilder};

/// Compiles page values.
///
/// Equality is a literal id list. Every other comparator joins the id table
/// and compares the sort key.
pub struct ValueDescriptionCompiler;

impl DescriptionCompiler for ValueDescriptionCompiler {
    fn can_compile_description(&self, description: &Description) -> bool {
        matches!(description, Description::Value { .. })
    }

    fn compile_description(
        &self,
        builder: &mut QueryBuilder<'_>,
        description: &Description,
    ) -> QueryContainer {
        let Description::Value {
            data_item,
            comparator,
        } = description
        else {
            unreachable!("value compiler called with {:?}", description)
        };

        let mut query = builder.new_container();
        let DataItem::Page(page) = data_item else {
            query.set_empty_result();
            return query;
        };

        let store = builder.store();
        if *comparator == Comparator::Eq {
            query.container_type = ContainerType::Value;
            query.joinfield = JoinField::Ids(vec![store.page_id(page)]);
            return query;
        }

        let db = store.database();
        query.jointable = db.table_name(ID_TABLE);
        query.joinfield = JoinField::Column(format!("{}.smw_id", query.alias));

        let condition = if comparator.is_like() {
            format!(
                "{}.smw_sortkey{}{} ESCAPE {}",
                query.alias,
                comparator.sql_operator(),
                db.add_quotes(&like_pattern(&page.sort_key())),
                db.add_quotes("\\")
            )
        } else {
            format!(
                "{}.smw_sortkey{}{}",
                query.alias,
                comparator.sql_operator(),
                db.add_quotes(&page.sort_key())
            )
        };
        query.add_where(condition);
        query
    }
}

/// Translate a user pattern into a SQL `LIKE` pattern.
///
/// Literal `%` and `_` are escaped first, then the user wildcards `*` and
/// `?` become `%` and `_`. The order matters.
pub fn like_pattern(value: &str) -> String {
    value
        .replace('%', "\\%")
        .replace('_', "\\_")
        .replace('*', "%")
        .replace('?', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompilerSettings;
    use crate::description::{PageRef, NS_MAIN};
    use crate::store::memory::MemoryStore;

    fn compile(store: &MemoryStore, d: &Description) -> QueryContainer {
        let mut builder = QueryBuilder::new(store, CompilerSettings::default());
        builder.compile_description(d)
    }

    #[test]
    fn test_eq_is_literal_id() {
        let store = MemoryStore::new();
        let id = store.insert_page(&PageRef::new("Berlin", NS_MAIN));
        let q = compile(&store, &Description::page(PageRef::new("Berlin", NS_MAIN)));
        assert_eq!(q.container_type, ContainerType::Value);
        assert_eq!(q.joinfield, JoinField::Ids(vec![id]));
        assert!(q.jointable.is_empty());
        assert!(q.where_clause.is_none());
    }

    #[test]
    fn test_other_comparators_join_id_table() {
        let store = MemoryStore::new();
        let cases = [
            (Comparator::Neq, "!="),
            (Comparator::Less, "<"),
            (Comparator::Greater, ">"),
            (Comparator::Leq, "<="),
            (Comparator::Geq, ">="),
            (Comparator::Like, " LIKE "),
            (Comparator::NotLike, " NOT LIKE "),
        ];
        for (comparator, op) in cases {
            let d = Description::value(DataItem::Page(PageRef::new("Berlin", NS_MAIN)), comparator);
            let q = compile(&store, &d);
            assert_eq!(q.jointable, "smw_object_ids");
            let clause = q.where_clause.unwrap();
            assert!(
                clause.starts_with(&format!("{}.smw_sortkey{}'Berlin'", q.alias, op)),
                "{:?}: {}",
                comparator,
                clause
            );
        }
    }

    #[test]
    fn test_like_escaping_order() {
        assert_eq!(like_pattern("50%_special*item?"), "50\\%\\_special%item_");

        let store = MemoryStore::new();
        let d = Description::value(
            DataItem::Page(PageRef::new("x", NS_MAIN).with_sortkey("50%_special*item?")),
            Comparator::Like,
        );
        let q = compile(&store, &d);
        let clause = q.where_clause.unwrap();
        assert!(clause.contains("'50\\%\\_special%item_'"), "{}", clause);
        assert!(clause.ends_with("ESCAPE '\\'"));
    }

    #[test]
    fn test_non_page_value_is_empty() {
        let store = MemoryStore::new();
        let d = Description::value(DataItem::Number(3.0), Comparator::Eq);
        let q = compile(&store, &d);
        assert!(q.is_empty_result());
        let d = Description::value(DataItem::Text("abc".into()), Comparator::Like);
        assert!(compile(&store, &d).is_empty_result());
    }
}
