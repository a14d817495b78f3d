//! Query description AST.
//!
//! A [`Description`] is the immutable tree produced by the query parser
//! ([`crate::parser`]) and consumed by the compilers ([`crate::compiler`]).
//! The variant set is closed, so dispatch over it is an exhaustive `match`.
//!
//! Descriptions render back to query syntax through [`std::fmt::Display`];
//! that string is the stable input of the query fingerprint.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const NS_MAIN: i32 = 0;
pub const NS_HELP: i32 = 12;
pub const NS_CATEGORY: i32 = 14;
pub const SMW_NS_PROPERTY: i32 = 102;
pub const SMW_NS_CONCEPT: i32 = 108;

const NAMESPACES: &[(&str, i32)] = &[
    ("Talk", 1),
    ("User", 2),
    ("Project", 4),
    ("File", 6),
    ("MediaWiki", 8),
    ("Template", 10),
    ("Help", NS_HELP),
    ("Category", NS_CATEGORY),
    ("Property", SMW_NS_PROPERTY),
    ("Concept", SMW_NS_CONCEPT),
];

/// Resolve a canonical namespace name (case-insensitive).
pub fn namespace_id(name: &str) -> Option<i32> {
    NAMESPACES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name.trim()))
        .map(|(_, id)| *id)
}

/// Canonical name of a namespace, `None` for the main namespace and
/// unknown ids.
pub fn namespace_name(id: i32) -> Option<&'static str> {
    NAMESPACES.iter().find(|(_, n)| *n == id).map(|(name, _)| *name)
}

/// Query features, recorded per concept and checked against the enabled set.
pub mod features {
    pub const PROPERTY: u32 = 1;
    pub const CATEGORY: u32 = 2;
    pub const CONCEPT: u32 = 4;
    pub const NAMESPACE: u32 = 8;
    pub const CONJUNCTION: u32 = 16;
    pub const DISJUNCTION: u32 = 32;
    pub const ALL: u32 = PROPERTY | CATEGORY | CONCEPT | NAMESPACE | CONJUNCTION | DISJUNCTION;

    /// Map a configuration name to its feature bit.
    pub fn from_name(name: &str) -> Option<u32> {
        match name {
            "property" => Some(PROPERTY),
            "category" => Some(CATEGORY),
            "concept" => Some(CONCEPT),
            "namespace" => Some(NAMESPACE),
            "conjunction" => Some(CONJUNCTION),
            "disjunction" => Some(DISJUNCTION),
            "all" => Some(ALL),
            _ => None,
        }
    }
}

/// Reference to a wiki page (or a subobject of one).
///
/// Identity is `(dbkey, namespace, interwiki, subobject)`; the optional
/// sortkey is carried along but does not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRef {
    pub dbkey: String,
    pub namespace: i32,
    #[serde(default)]
    pub interwiki: String,
    #[serde(default)]
    pub subobject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortkey: Option<String>,
}

impl PageRef {
    /// Create a page reference; spaces in the title become underscores.
    pub fn new(title: impl AsRef<str>, namespace: i32) -> Self {
        Self {
            dbkey: title.as_ref().trim().replace(' ', "_"),
            namespace,
            interwiki: String::new(),
            subobject: String::new(),
            sortkey: None,
        }
    }

    /// Parse `Ns:Title#subobject`, falling back to the main namespace when
    /// the prefix is not a known namespace.
    pub fn from_title(text: &str) -> Self {
        let text = text.trim();
        let (title, subobject) = match text.split_once('#') {
            Some((t, s)) => (t, s),
            None => (text, ""),
        };
        let page = match title.split_once(':') {
            Some((prefix, rest)) => match namespace_id(prefix) {
                Some(ns) => PageRef::new(rest, ns),
                None => PageRef::new(title, NS_MAIN),
            },
            None => PageRef::new(title, NS_MAIN),
        };
        page.with_subobject(subobject)
    }

    pub fn with_subobject(mut self, subobject: impl Into<String>) -> Self {
        self.subobject = subobject.into();
        self
    }

    pub fn with_sortkey(mut self, sortkey: impl Into<String>) -> Self {
        self.sortkey = Some(sortkey.into());
        self
    }

    /// Title with underscores shown as spaces.
    pub fn title_text(&self) -> String {
        self.dbkey.replace('_', " ")
    }

    /// Title including its namespace prefix, e.g. `Category:Big cities`.
    pub fn prefixed_text(&self) -> String {
        let mut text = match namespace_name(self.namespace) {
            Some(ns) => format!("{}:{}", ns, self.title_text()),
            None => self.title_text(),
        };
        if !self.subobject.is_empty() {
            text.push('#');
            text.push_str(&self.subobject);
        }
        text
    }

    /// String used for ordering and for non-equality comparisons.
    pub fn sort_key(&self) -> String {
        match &self.sortkey {
            Some(key) if !key.is_empty() => key.clone(),
            _ => self.title_text(),
        }
    }

    /// `dbkey#namespace#interwiki#subobject`
    pub fn serialization(&self) -> String {
        format!(
            "{}#{}#{}#{}",
            self.dbkey, self.namespace, self.interwiki, self.subobject
        )
    }

    /// Inverse of [`serialization`](PageRef::serialization).
    pub fn from_serialization(serialization: &str) -> Result<Self> {
        let parts: Vec<&str> = serialization.split('#').collect();
        if parts.len() != 4 || parts[0].is_empty() {
            return Err(Error::InvalidSerialization(serialization.to_string()));
        }
        let namespace = parts[1]
            .parse::<i32>()
            .map_err(|_| Error::InvalidSerialization(serialization.to_string()))?;
        Ok(PageRef {
            dbkey: parts[0].to_string(),
            namespace,
            interwiki: parts[2].to_string(),
            subobject: parts[3].to_string(),
            sortkey: None,
        })
    }
}

impl PartialEq for PageRef {
    fn eq(&self, other: &Self) -> bool {
        self.dbkey == other.dbkey
            && self.namespace == other.namespace
            && self.interwiki == other.interwiki
            && self.subobject == other.subobject
    }
}

impl Eq for PageRef {}

impl Hash for PageRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.dbkey.hash(state);
        self.namespace.hash(state);
        self.interwiki.hash(state);
        self.subobject.hash(state);
    }
}

/// A semantic property, identified by its key (`Has_author`, `_INST`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Property {
    key: String,
}

impl Property {
    pub const INSTANCE_OF: &'static str = "_INST";
    pub const SUBCATEGORY_OF: &'static str = "_SUBC";

    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Build a user-defined property from its label (`Has author`).
    pub fn from_label(label: &str) -> Self {
        Self::new(label.trim().replace(' ', "_"))
    }

    pub fn instance_of() -> Self {
        Self::new(Self::INSTANCE_OF)
    }

    pub fn subcategory_of() -> Self {
        Self::new(Self::SUBCATEGORY_OF)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn label(&self) -> String {
        self.key.replace('_', " ")
    }

    /// The property's own page in the property namespace.
    pub fn page(&self) -> PageRef {
        PageRef::new(&self.key, SMW_NS_PROPERTY)
    }
}

/// Value compared by a [`Description::Value`] node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataItem {
    Page(PageRef),
    Text(String),
    Number(f64),
}

impl fmt::Display for DataItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataItem::Page(page) => write!(f, "{}", page.prefixed_text()),
            DataItem::Text(text) => write!(f, "{}", text),
            DataItem::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Comparison operator of a value condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparator {
    Eq,
    Neq,
    Less,
    Greater,
    Leq,
    Geq,
    Like,
    NotLike,
}

impl Comparator {
    /// SQL operator, spaced where the operator is a keyword.
    pub fn sql_operator(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Neq => "!=",
            Comparator::Less => "<",
            Comparator::Greater => ">",
            Comparator::Leq => "<=",
            Comparator::Geq => ">=",
            Comparator::Like => " LIKE ",
            Comparator::NotLike => " NOT LIKE ",
        }
    }

    /// Prefix used in query syntax.
    pub fn prefix(self) -> &'static str {
        match self {
            Comparator::Eq => "",
            Comparator::Neq => "!",
            Comparator::Less => "<<",
            Comparator::Greater => ">>",
            Comparator::Leq => "<",
            Comparator::Geq => ">",
            Comparator::Like => "~",
            Comparator::NotLike => "!~",
        }
    }

    pub fn is_like(self) -> bool {
        matches!(self, Comparator::Like | Comparator::NotLike)
    }
}

/// One node of a structured query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Description {
    /// Matches everything.
    Thing,
    Value {
        data_item: DataItem,
        comparator: Comparator,
    },
    /// Members of any of the categories (a disjunction of classes).
    Class {
        categories: Vec<PageRef>,
        hierarchy_depth: Option<u32>,
    },
    Namespace(i32),
    Concept(PageRef),
    Conjunction(Vec<Description>),
    Disjunction(Vec<Description>),
    /// Subjects with some value of `property` matching `description`.
    SomeProperty {
        property: Property,
        description: Box<Description>,
    },
}

impl Description {
    pub fn page(page: PageRef) -> Self {
        Self::value(DataItem::Page(page), Comparator::Eq)
    }

    pub fn value(data_item: DataItem, comparator: Comparator) -> Self {
        Description::Value {
            data_item,
            comparator,
        }
    }

    pub fn class(categories: Vec<PageRef>) -> Self {
        Description::Class {
            categories,
            hierarchy_depth: None,
        }
    }

    pub fn concept(page: PageRef) -> Self {
        Description::Concept(page)
    }

    pub fn some_property(property: Property, description: Description) -> Self {
        Description::SomeProperty {
            property,
            description: Box::new(description),
        }
    }

    /// Normalising conjunction: nested conjunctions are flattened, `Thing`
    /// members are dropped, and a single remaining member stands alone.
    pub fn and(descriptions: Vec<Description>) -> Self {
        let mut parts = Vec::new();
        for d in descriptions {
            match d {
                Description::Thing => {}
                Description::Conjunction(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Description::Thing,
            1 => parts.remove(0),
            _ => Description::Conjunction(parts),
        }
    }

    /// Normalising disjunction: nested disjunctions are flattened and any
    /// `Thing` member makes the whole disjunction `Thing`.
    pub fn or(descriptions: Vec<Description>) -> Self {
        let mut parts = Vec::new();
        for d in descriptions {
            match d {
                Description::Thing => return Description::Thing,
                Description::Disjunction(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Description::Thing,
            1 => parts.remove(0),
            _ => Description::Disjunction(parts),
        }
    }

    /// Feature bits this description uses.
    pub fn features(&self) -> u32 {
        match self {
            Description::Thing | Description::Value { .. } => 0,
            Description::Class { .. } => features::CATEGORY,
            Description::Namespace(_) => features::NAMESPACE,
            Description::Concept(_) => features::CONCEPT,
            Description::Conjunction(parts) => parts
                .iter()
                .fold(features::CONJUNCTION, |acc, d| acc | d.features()),
            Description::Disjunction(parts) => parts
                .iter()
                .fold(features::DISJUNCTION, |acc, d| acc | d.features()),
            Description::SomeProperty { description, .. } => {
                features::PROPERTY | description.features()
            }
        }
    }

    /// Number of atomic conditions.
    pub fn size(&self) -> u32 {
        match self {
            Description::Thing => 0,
            Description::Value { .. } | Description::Namespace(_) | Description::Concept(_) => 1,
            Description::Class { categories, .. } => categories.len() as u32,
            Description::Conjunction(parts) | Description::Disjunction(parts) => {
                parts.iter().map(Description::size).sum()
            }
            Description::SomeProperty { description, .. } => 1 + description.size(),
        }
    }

    /// Property-chain nesting depth.
    pub fn depth(&self) -> u32 {
        match self {
            Description::Conjunction(parts) | Description::Disjunction(parts) => {
                parts.iter().map(Description::depth).max().unwrap_or(0)
            }
            Description::SomeProperty { description, .. } => 1 + description.depth(),
            _ => 0,
        }
    }

    /// Render in query syntax.
    pub fn query_string(&self) -> String {
        self.to_string()
    }

    fn fmt_property_value(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Description::Thing => write!(f, "+"),
            Description::Value {
                data_item,
                comparator,
            } => write!(f, "{}{}", comparator.prefix(), data_item),
            Description::Disjunction(parts)
                if parts
                    .iter()
                    .all(|p| matches!(p, Description::Value { .. })) =>
            {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "||")?;
                    }
                    part.fmt_property_value(f)?;
                }
                Ok(())
            }
            other => write!(f, "<q>{}</q>", other),
        }
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Description::Thing => write!(f, "[[+]]"),
            Description::Value {
                data_item,
                comparator: Comparator::Eq,
            } => write!(f, "[[:{}]]", data_item),
            Description::Value {
                data_item,
                comparator,
            } => write!(f, "[[{}{}]]", comparator.prefix(), data_item),
            Description::Class {
                categories,
                hierarchy_depth,
            } => {
                let names: Vec<String> = categories.iter().map(|c| c.title_text()).collect();
                write!(f, "[[Category:{}", names.join("||"))?;
                if let Some(depth) = hierarchy_depth {
                    write!(f, "|+depth={}", depth)?;
                }
                write!(f, "]]")
            }
            Description::Namespace(ns) => match namespace_name(*ns) {
                Some(name) => write!(f, "[[{}:+]]", name),
                None if *ns == NS_MAIN => write!(f, "[[:+]]"),
                None => write!(f, "[[{}:+]]", ns),
            },
            Description::Concept(page) => write!(f, "[[Concept:{}]]", page.title_text()),
            Description::Conjunction(parts) => {
                if parts.is_empty() {
                    return write!(f, "[[+]]");
                }
                for part in parts {
                    match part {
                        Description::Disjunction(_) => write!(f, "<q>{}</q>", part)?,
                        _ => write!(f, "{}", part)?,
                    }
                }
                Ok(())
            }
            Description::Disjunction(parts) => {
                if parts.is_empty() {
                    return write!(f, "[[+]]");
                }
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " OR ")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
            Description::SomeProperty {
                property,
                description,
            } => {
                write!(f, "[[{}::", property.label())?;
                description.fmt_property_value(f)?;
                write!(f, "]]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_serialization_roundtrip() {
        let page = PageRef::new("Main Page", NS_MAIN).with_subobject("sec");
        assert_eq!(page.serialization(), "Main_Page#0##sec");
        let back = PageRef::from_serialization(&page.serialization()).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn test_malformed_serialization_is_fatal() {
        assert!(PageRef::from_serialization("Foo#0").is_err());
        assert!(PageRef::from_serialization("Foo#x##").is_err());
        assert!(PageRef::from_serialization("#0##").is_err());
    }

    #[test]
    fn test_sort_key_prefers_explicit() {
        let page = PageRef::new("New York", NS_MAIN);
        assert_eq!(page.sort_key(), "New York");
        let page = page.with_sortkey("York, New");
        assert_eq!(page.sort_key(), "York, New");
    }

    #[test]
    fn test_from_title_namespaces() {
        let page = PageRef::from_title("Category:Big cities");
        assert_eq!(page.namespace, NS_CATEGORY);
        assert_eq!(page.dbkey, "Big_cities");

        let page = PageRef::from_title("Unknown:Thing");
        assert_eq!(page.namespace, NS_MAIN);
        assert_eq!(page.dbkey, "Unknown:Thing");
    }

    #[test]
    fn test_and_or_normalisation() {
        let a = Description::class(vec![PageRef::new("A", NS_CATEGORY)]);
        let b = Description::Namespace(NS_HELP);

        assert_eq!(
            Description::and(vec![Description::Thing, a.clone()]),
            a.clone()
        );
        assert_eq!(
            Description::or(vec![a.clone(), Description::Thing]),
            Description::Thing
        );
        match Description::and(vec![a.clone(), Description::and(vec![b.clone(), a.clone()])]) {
            Description::Conjunction(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected conjunction, got {:?}", other),
        }
    }

    #[test]
    fn test_features_size_depth() {
        let d = Description::and(vec![
            Description::class(vec![
                PageRef::new("A", NS_CATEGORY),
                PageRef::new("B", NS_CATEGORY),
            ]),
            Description::some_property(
                Property::from_label("Located in"),
                Description::some_property(
                    Property::from_label("Part of"),
                    Description::page(PageRef::new("Europe", NS_MAIN)),
                ),
            ),
        ]);
        assert_eq!(
            d.features(),
            features::CONJUNCTION | features::CATEGORY | features::PROPERTY
        );
        assert_eq!(d.size(), 4);
        assert_eq!(d.depth(), 2);
    }

    #[test]
    fn test_query_string_rendering() {
        let d = Description::and(vec![
            Description::class(vec![PageRef::new("City", NS_CATEGORY)]),
            Description::or(vec![
                Description::Namespace(NS_HELP),
                Description::concept(PageRef::new("Capitals", SMW_NS_CONCEPT)),
            ]),
            Description::some_property(
                Property::from_label("Located in"),
                Description::value(
                    DataItem::Page(PageRef::new("Ger*", NS_MAIN)),
                    Comparator::Like,
                ),
            ),
        ]);
        assert_eq!(
            d.to_string(),
            "[[Category:City]]<q>[[Help:+]] OR [[Concept:Capitals]]</q>[[Located in::~Ger*]]"
        );
    }
}
