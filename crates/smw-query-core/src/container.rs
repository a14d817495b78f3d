//! Compiled query plan nodes.
//!
//! A [`QueryContainer`] is the compiled form of one description node. The
//! containers of one compile live in an arena owned by the
//! [`QueryBuilder`](crate::compiler::QueryBuilder) and refer to each other
//! by [`NodeId`].

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

use crate::store::PageId;

/// Index of a container in the compile arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a plan node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerType {
    /// Rows of `jointable`, keyed by `joinfield`.
    Table,
    /// Category ids to be expanded along the subcategory hierarchy.
    ClassHierarchy,
    Conjunction,
    Disjunction,
    /// No constraint; matches everything.
    NoQuery,
    /// A literal id list, or nothing when the list is empty.
    Value,
}

/// Column (or literal ids) a container contributes to its parent's join.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JoinField {
    #[default]
    None,
    /// Qualified column, e.g. `t3.s_id`.
    Column(String),
    Ids(Vec<PageId>),
}

impl JoinField {
    pub fn is_none(&self) -> bool {
        matches!(self, JoinField::None)
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            JoinField::Column(c) => Some(c),
            _ => None,
        }
    }
}

impl Serialize for JoinField {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JoinField::None => serializer.serialize_str(""),
            JoinField::Column(c) => serializer.serialize_str(c),
            JoinField::Ids(ids) => {
                let mut seq = serializer.serialize_seq(Some(ids.len()))?;
                for id in ids {
                    seq.serialize_element(id)?;
                }
                seq.end()
            }
        }
    }
}

/// How a child container is attached to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Component {
    /// The child's subject set is joined against this column of the parent.
    Column(String),
    /// Pure logical membership (conjunction or disjunction operand).
    Marker,
}

impl Serialize for Component {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Component::Column(c) => serializer.serialize_str(c),
            Component::Marker => serializer.serialize_bool(true),
        }
    }
}

/// One node of the compiled plan.
#[derive(Debug, Clone, Serialize)]
pub struct QueryContainer {
    pub id: NodeId,
    /// SQL alias, unique within one compile.
    pub alias: String,
    #[serde(rename = "type")]
    pub container_type: ContainerType,
    pub jointable: String,
    pub joinfield: JoinField,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<String>,
    pub components: BTreeMap<NodeId, Component>,
    /// Subcategory expansion depth for hierarchy nodes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

impl QueryContainer {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            alias: format!("t{}", id.0),
            container_type: ContainerType::Table,
            jointable: String::new(),
            joinfield: JoinField::None,
            where_clause: None,
            components: BTreeMap::new(),
            depth: None,
        }
    }

    /// Turn this node into the empty-result sentinel: a value node with no ids.
    pub fn set_empty_result(&mut self) {
        self.container_type = ContainerType::Value;
        self.jointable.clear();
        self.joinfield = JoinField::None;
        self.where_clause = None;
        self.components.clear();
    }

    pub fn is_empty_result(&self) -> bool {
        match (&self.container_type, &self.joinfield) {
            (ContainerType::Value, JoinField::None) => true,
            (ContainerType::Value, JoinField::Ids(ids)) => ids.is_empty(),
            _ => false,
        }
    }

    /// Append a condition, AND-ing it with any existing one.
    pub fn add_where(&mut self, condition: impl Into<String>) {
        let condition = condition.into();
        self.where_clause = Some(match self.where_clause.take() {
            Some(existing) => format!("{} AND {}", existing, condition),
            None => condition,
        });
    }
}
