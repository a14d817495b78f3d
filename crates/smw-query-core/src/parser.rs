//! Query-string parser.
//!
//! Turns inline query syntax into a [`Description`] tree:
//!
//! | Syntax | Description |
//! |--------|-------------|
//! | `[[Category:A\|\|B]]` | class (disjunction of categories), optional `\|+depth=N` |
//! | `[[Concept:X]]` | concept |
//! | `[[Help:+]]`, `[[:+]]` | namespace |
//! | `[[+]]` | thing |
//! | `[[Foo]]`, `[[:Category:Foo]]` | page value (`=`) |
//! | `[[!Foo]]`, `[[<Foo]]`, `[[>Foo]]`, `[[<<Foo]]`, `[[>>Foo]]`, `[[~Fo*]]`, `[[!~Fo*]]` | page value with comparator |
//! | `[[Prop::a\|\|b]]`, `[[Prop::+]]`, `[[Prop::<q>…</q>]]` | some-property |
//! | `[[A]][[B]]` | conjunction |
//! | `[[A]] OR [[B]]` | disjunction |
//! | `<q>…</q>` | subquery |

use crate::description::{
    namespace_id, Comparator, DataItem, Description, PageRef, Property, NS_CATEGORY, NS_MAIN,
    SMW_NS_CONCEPT,
};
use crate::error::{Error, Result};

/// Parse a query string into a description.
pub fn parse_query(input: &str) -> Result<Description> {
    let mut parser = Parser { input, pos: 0 };
    let description = parser.disjunction()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(description)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn error(&self, message: &str) -> Error {
        Error::Syntax {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", token)))
        }
    }

    fn eat_or_keyword(&mut self) -> bool {
        let rest = self.rest();
        if rest.starts_with("OR")
            && rest[2..]
                .chars()
                .next()
                .map_or(false, |c| c.is_whitespace() || c == '[' || c == '<')
        {
            self.pos += 2;
            true
        } else {
            false
        }
    }

    fn disjunction(&mut self) -> Result<Description> {
        let mut parts = vec![self.conjunction()?];
        loop {
            self.skip_ws();
            if self.eat_or_keyword() {
                parts.push(self.conjunction()?);
            } else {
                break;
            }
        }
        Ok(Description::or(parts))
    }

    fn conjunction(&mut self) -> Result<Description> {
        let mut parts = Vec::new();
        loop {
            self.skip_ws();
            if self.rest().starts_with("[[") {
                parts.push(self.condition()?);
            } else if self.eat("<q>") {
                parts.push(self.subquery()?);
            } else {
                break;
            }
        }
        if parts.is_empty() {
            return Err(self.error("expected a condition"));
        }
        Ok(Description::and(parts))
    }

    /// Body of `<q>…</q>`, after the opening tag.
    fn subquery(&mut self) -> Result<Description> {
        let description = self.disjunction()?;
        self.skip_ws();
        self.expect("</q>")?;
        Ok(description)
    }

    fn condition(&mut self) -> Result<Description> {
        self.expect("[[")?;
        if let Some(name) = self.property_name() {
            self.pos += name.len() + 2;
            let value = self.property_value()?;
            self.expect("]]")?;
            return Ok(Description::some_property(Property::from_label(name), value));
        }
        let start = self.pos;
        let end = self
            .rest()
            .find("]]")
            .ok_or_else(|| self.error("unterminated condition"))?;
        let body = &self.input[start..start + end];
        self.pos = start + end + 2;
        condition_from_text(body).ok_or(Error::Syntax {
            offset: start,
            message: format!("invalid condition '{}'", body),
        })
    }

    /// Property name when the current condition is `[[Name::…]]`.
    fn property_name(&self) -> Option<&'a str> {
        let rest = self.rest();
        let sep = rest.find("::")?;
        let name = &rest[..sep];
        let blocked = ["]]", "[[", "<q>", "||"];
        if name.trim().is_empty() || blocked.iter().any(|b| name.contains(b)) {
            return None;
        }
        Some(name)
    }

    fn property_value(&mut self) -> Result<Description> {
        self.skip_ws();
        if self.eat("<q>") {
            let description = self.subquery()?;
            self.skip_ws();
            return Ok(description);
        }
        let start = self.pos;
        let end = self
            .rest()
            .find("]]")
            .ok_or_else(|| self.error("unterminated property value"))?;
        let text = self.input[start..start + end].trim();
        self.pos = start + end;
        if text == "+" {
            return Ok(Description::Thing);
        }
        if text.is_empty() {
            return Err(Error::Syntax {
                offset: start,
                message: "empty property value".to_string(),
            });
        }
        Ok(Description::or(
            text.split("||").map(value_from_text).collect(),
        ))
    }
}

fn condition_from_text(text: &str) -> Option<Description> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text == "+" {
        return Some(Description::Thing);
    }
    if let Some(rest) = text.strip_prefix(':') {
        let rest = rest.trim();
        if rest == "+" {
            return Some(Description::Namespace(NS_MAIN));
        }
        return Some(Description::page(PageRef::from_title(rest)));
    }
    if let Some((prefix, rest)) = text.split_once(':') {
        let rest = rest.trim();
        let ns = namespace_id(prefix).or_else(|| {
            if rest == "+" {
                prefix.trim().parse::<i32>().ok()
            } else {
                None
            }
        });
        match ns {
            Some(NS_CATEGORY) if rest != "+" => return class_from_text(rest),
            Some(SMW_NS_CONCEPT) if rest != "+" => {
                return Some(Description::concept(PageRef::new(rest, SMW_NS_CONCEPT)))
            }
            Some(ns) if rest == "+" => return Some(Description::Namespace(ns)),
            _ => {}
        }
    }
    Some(value_from_text(text))
}

fn class_from_text(text: &str) -> Option<Description> {
    let (names, depth) = match text.split_once("|+depth=") {
        Some((names, depth)) => (names, Some(depth.trim().parse::<u32>().ok()?)),
        None => (text, None),
    };
    let categories: Vec<PageRef> = names
        .split("||")
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| PageRef::new(n, NS_CATEGORY))
        .collect();
    if categories.is_empty() {
        return None;
    }
    Some(Description::Class {
        categories,
        hierarchy_depth: depth,
    })
}

fn value_from_text(text: &str) -> Description {
    let text = text.trim();
    let prefixes = [
        ("!~", Comparator::NotLike),
        ("<<", Comparator::Less),
        (">>", Comparator::Greater),
        ("!", Comparator::Neq),
        ("<", Comparator::Leq),
        (">", Comparator::Geq),
        ("~", Comparator::Like),
    ];
    for (prefix, comparator) in prefixes {
        if let Some(rest) = text.strip_prefix(prefix) {
            return Description::value(DataItem::Page(PageRef::from_title(rest)), comparator);
        }
    }
    Description::page(PageRef::from_title(text))
}
