//! SQL rendering of compiled plans.
//!
//! Every plan node denotes a set of subject ids and renders to a `SELECT`
//! yielding one column named `id`. `None` stands for the empty set, which
//! lets empty branches drop out before any SQL is produced.

use crate::compiler::QueryPlan;
use crate::container::{Component, ContainerType, JoinField, NodeId, QueryContainer};
use crate::store::{Database, ID_TABLE, SUBC_TABLE};

/// Columns selected for each result page, in this order.
pub const PAGE_COLUMNS: &str =
    "r.smw_id, r.smw_title, r.smw_namespace, r.smw_iw, r.smw_subobject, r.smw_sortkey";

pub struct SqlGenerator<'a> {
    plan: &'a QueryPlan,
    db: &'a dyn Database,
    subcategory_depth: u32,
}

impl<'a> SqlGenerator<'a> {
    pub fn new(plan: &'a QueryPlan, db: &'a dyn Database, subcategory_depth: u32) -> Self {
        Self {
            plan,
            db,
            subcategory_depth,
        }
    }

    /// Page rows of the result, one more than `limit` to detect further results.
    pub fn instance_query(&self, limit: usize, offset: usize) -> Option<String> {
        let set = self.subject_set(self.plan.root?)?;
        Some(format!(
            "SELECT {} FROM {} AS r WHERE r.smw_id IN ({}) ORDER BY r.smw_sortkey, r.smw_id LIMIT {} OFFSET {}",
            PAGE_COLUMNS,
            self.db.table_name(ID_TABLE),
            set,
            limit + 1,
            offset
        ))
    }

    pub fn count_query(&self) -> Option<String> {
        let set = self.subject_set(self.plan.root?)?;
        Some(format!("SELECT COUNT(DISTINCT id) FROM ({})", set))
    }

    /// SQL for the subject ids of one node.
    pub fn subject_set(&self, id: NodeId) -> Option<String> {
        let node = self.plan.get(id)?;
        match node.container_type {
            ContainerType::Value => match &node.joinfield {
                JoinField::Ids(ids) if !ids.is_empty() => Some(format!(
                    "SELECT smw_id AS id FROM {} WHERE smw_id IN ({})",
                    self.db.table_name(ID_TABLE),
                    join_ids(ids)
                )),
                _ => None,
            },
            ContainerType::Table => self.table_set(node),
            ContainerType::ClassHierarchy => self.hierarchy_set(node),
            ContainerType::Conjunction => {
                let members = node
                    .components
                    .keys()
                    .map(|child| self.subject_set(*child))
                    .collect::<Option<Vec<_>>>()?;
                compound(&members, "INTERSECT")
            }
            ContainerType::Disjunction => {
                let members: Vec<String> = node
                    .components
                    .keys()
                    .filter_map(|child| self.subject_set(*child))
                    .collect();
                compound(&members, "UNION")
            }
            ContainerType::NoQuery => Some(format!(
                "SELECT smw_id AS id FROM {}",
                self.db.table_name(ID_TABLE)
            )),
        }
    }

    fn table_set(&self, node: &QueryContainer) -> Option<String> {
        let joinfield = node.joinfield.column()?;
        let mut conditions = Vec::new();
        if let Some(clause) = &node.where_clause {
            conditions.push(clause.clone());
        }
        for (child, component) in &node.components {
            let column = match component {
                Component::Column(column) => column.as_str(),
                Component::Marker => joinfield,
            };
            conditions.push(format!("{} IN ({})", column, self.subject_set(*child)?));
        }
        let mut sql = format!(
            "SELECT DISTINCT {} AS id FROM {} AS {}",
            joinfield, node.jointable, node.alias
        );
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        Some(sql)
    }

    /// Categories plus their subcategories, up to the node's depth.
    fn hierarchy_set(&self, node: &QueryContainer) -> Option<String> {
        let JoinField::Ids(ids) = &node.joinfield else {
            return None;
        };
        if ids.is_empty() {
            return None;
        }
        let depth = node.depth.unwrap_or(self.subcategory_depth);
        let cte = format!("h_{}", node.alias);
        Some(format!(
            "WITH RECURSIVE {cte}(id, depth) AS (\
             SELECT smw_id, 0 FROM {ids_table} WHERE smw_id IN ({ids}) \
             UNION SELECT s.s_id, h.depth + 1 FROM {subc} AS s JOIN {cte} AS h ON s.o_id = h.id \
             WHERE h.depth < {depth}) SELECT DISTINCT id FROM {cte}",
            cte = cte,
            ids_table = self.db.table_name(ID_TABLE),
            ids = join_ids(ids),
            subc = self.db.table_name(SUBC_TABLE),
            depth = depth
        ))
    }
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn compound(members: &[String], operator: &str) -> Option<String> {
    match members.len() {
        0 => None,
        1 => Some(members[0].clone()),
        _ => Some(
            members
                .iter()
                .map(|m| format!("SELECT id FROM ({})", m))
                .collect::<Vec<_>>()
                .join(&format!(" {} ", operator)),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{compile, CompilerSettings};
    use crate::description::{PageRef, NS_CATEGORY, NS_MAIN};
    use crate::parser::parse_query;
    use crate::store::memory::MemoryStore;
    use crate::store::AnsiDatabase;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert_page(&PageRef::new("City", NS_CATEGORY));
        store.insert_page(&PageRef::new("Berlin", NS_MAIN));
        store
    }

    fn render(query: &str) -> Option<String> {
        let store = store();
        let plan = compile(&store, &CompilerSettings::default(), &parse_query(query).unwrap());
        let db = AnsiDatabase::default();
        SqlGenerator::new(&plan, &db, 3).instance_query(10, 0)
    }

    #[test]
    fn test_class_query_uses_hierarchy() {
        let sql = render("[[Category:City]]").unwrap();
        assert!(sql.contains("WITH RECURSIVE h_t1"), "{}", sql);
        assert!(sql.contains("h.depth < 3"), "{}", sql);
        assert!(sql.contains("FROM smw_fpt_inst AS t0"), "{}", sql);
        assert!(sql.ends_with("LIMIT 11 OFFSET 0"), "{}", sql);
    }

    #[test]
    fn test_explicit_depth_overrides_default() {
        let sql = render("[[Category:City|+depth=0]]").unwrap();
        assert!(sql.contains("h.depth < 0"), "{}", sql);
    }

    #[test]
    fn test_empty_branches() {
        assert!(render("[[Category:Unknown]]").is_none());
        assert!(render("[[Category:Unknown]][[Help:+]]").is_none());
        let sql = render("[[Category:Unknown]] OR [[Help:+]]").unwrap();
        assert!(!sql.contains("UNION"), "{}", sql);
        assert!(render("[[+]]").is_none());
    }

    #[test]
    fn test_conjunction_intersects() {
        let sql = render("[[Category:City]][[!Berlin]]").unwrap();
        assert!(sql.contains(" INTERSECT "), "{}", sql);
        assert!(sql.contains("smw_sortkey!='Berlin'"), "{}", sql);
    }

    #[test]
    fn test_count_query() {
        let store = store();
        let plan = compile(&store, &CompilerSettings::default(), &parse_query("[[:Berlin]]").unwrap());
        let db = AnsiDatabase::default();
        let sql = SqlGenerator::new(&plan, &db, 3).count_query().unwrap();
        assert!(sql.starts_with("SELECT COUNT(DISTINCT id) FROM ("), "{}", sql);
        assert!(sql.contains("smw_id IN (2)"), "{}", sql);
    }
}
