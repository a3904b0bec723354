#![forbid(unsafe_code)]

//! Selector parsing and matching.
//!
//! Supports the subset of CSS selectors that harness queries use:
//!
//! - type (`button`, `*`), `#id`, `.class`
//! - attributes: `[a]`, `[a=v]`, `[a~=v]`, `[a|=v]`, `[a^=v]`, `[a$=v]`,
//!   `[a*=v]` with bare or quoted values
//! - pseudo-classes: `:first-child`, `:last-child`, `:only-child`, `:empty`,
//!   `:disabled`, `:enabled`, `:checked`, `:focus`, `:not(..)`
//! - combinators: descendant, `>`, `+`, `~`
//! - selector lists separated by `,`
//!
//! Matching runs right-to-left over the arena without allocating.

use crate::dom::DomInner;
use crate::dom::NodeId;
use crate::error::{DomError, Result};

/// A parsed, comma-separated selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    selectors: Vec<ComplexSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ComplexSelector {
    compounds: Vec<Compound>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`.
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
    NextSibling,
    SubsequentSibling,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    ids: Vec<String>,
    classes: Vec<String>,
    attributes: Vec<AttributeSelector>,
    pseudos: Vec<Pseudo>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttributeSelector {
    name: String,
    op: AttributeOp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttributeOp {
    Exists,
    Equals(String),
    Includes(String),
    DashMatch(String),
    Prefix(String),
    Suffix(String),
    Substring(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pseudo {
    FirstChild,
    LastChild,
    OnlyChild,
    Empty,
    Disabled,
    Enabled,
    Checked,
    Focus,
    Not(SelectorList),
}

impl SelectorList {
    /// Parse a selector list.
    pub fn parse(source: &str) -> Result<Self> {
        let parts = split_top_level(source).map_err(|reason| invalid(source, reason))?;
        let mut selectors = Vec::with_capacity(parts.len());
        for part in parts {
            let chars: Vec<char> = part.trim().chars().collect();
            if chars.is_empty() {
                return Err(invalid(source, "empty selector in list"));
            }
            let mut parser = Parser {
                chars: &chars,
                pos: 0,
            };
            let complex = parser
                .complex()
                .map_err(|reason| invalid(source, &reason))?;
            selectors.push(complex);
        }
        Ok(Self { selectors })
    }

    /// Number of comma-separated selectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    /// Whether the list is empty (never true for a parsed list).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub(crate) fn matches(&self, dom: &DomInner, node: NodeId) -> bool {
        dom.element(node).is_some()
            && self
                .selectors
                .iter()
                .any(|s| s.matches_at(dom, node, s.compounds.len() - 1))
    }
}

impl ComplexSelector {
    fn matches_at(&self, dom: &DomInner, node: NodeId, index: usize) -> bool {
        if !self.compounds[index].matches(dom, node) {
            return false;
        }
        if index == 0 {
            return true;
        }
        match self.combinators[index - 1] {
            Combinator::Descendant => {
                let mut cursor = dom.parent_element(node);
                while let Some(ancestor) = cursor {
                    if self.matches_at(dom, ancestor, index - 1) {
                        return true;
                    }
                    cursor = dom.parent_element(ancestor);
                }
                false
            }
            Combinator::Child => dom
                .parent_element(node)
                .is_some_and(|parent| self.matches_at(dom, parent, index - 1)),
            Combinator::NextSibling => dom
                .previous_element_sibling(node)
                .is_some_and(|sibling| self.matches_at(dom, sibling, index - 1)),
            Combinator::SubsequentSibling => {
                let mut cursor = dom.previous_element_sibling(node);
                while let Some(sibling) = cursor {
                    if self.matches_at(dom, sibling, index - 1) {
                        return true;
                    }
                    cursor = dom.previous_element_sibling(sibling);
                }
                false
            }
        }
    }
}

impl Compound {
    fn matches(&self, dom: &DomInner, node: NodeId) -> bool {
        let Some(element) = dom.element(node) else {
            return false;
        };
        if let Some(tag) = &self.tag
            && !tag.eq_ignore_ascii_case(&element.tag)
        {
            return false;
        }
        if !self
            .ids
            .iter()
            .all(|id| element.attribute("id") == Some(id.as_str()))
        {
            return false;
        }
        if !self.classes.iter().all(|class| element.has_class(class)) {
            return false;
        }
        let attributes_match = self.attributes.iter().all(|selector| {
            let Some(actual) = element.attribute(&selector.name) else {
                return false;
            };
            match &selector.op {
                AttributeOp::Exists => true,
                AttributeOp::Equals(v) => actual == v,
                AttributeOp::Includes(v) => actual.split_ascii_whitespace().any(|w| w == v),
                AttributeOp::DashMatch(v) => {
                    actual == v || actual.strip_prefix(v.as_str()).is_some_and(|r| r.starts_with('-'))
                }
                AttributeOp::Prefix(v) => !v.is_empty() && actual.starts_with(v.as_str()),
                AttributeOp::Suffix(v) => !v.is_empty() && actual.ends_with(v.as_str()),
                AttributeOp::Substring(v) => !v.is_empty() && actual.contains(v.as_str()),
            }
        });
        if !attributes_match {
            return false;
        }
        self.pseudos.iter().all(|pseudo| match pseudo {
            Pseudo::FirstChild => {
                dom.parent(node).is_some() && dom.previous_element_sibling(node).is_none()
            }
            Pseudo::LastChild => {
                dom.parent(node).is_some() && dom.next_element_sibling(node).is_none()
            }
            Pseudo::OnlyChild => {
                dom.parent(node).is_some()
                    && dom.previous_element_sibling(node).is_none()
                    && dom.next_element_sibling(node).is_none()
            }
            Pseudo::Empty => !dom.has_children(node),
            Pseudo::Disabled => element.is_disabled(),
            Pseudo::Enabled => !element.is_disabled(),
            Pseudo::Checked => element.checked || (element.tag == "option" && element.selected),
            Pseudo::Focus => dom.active_element() == Some(node),
            Pseudo::Not(list) => !list.matches(dom, node),
        })
    }

    fn is_empty(&self) -> bool {
        self.tag.is_none()
            && self.ids.is_empty()
            && self.classes.is_empty()
            && self.attributes.is_empty()
            && self.pseudos.is_empty()
    }
}

/// Split a selector list on its top-level commas, trimming each part.
///
/// Commas inside brackets, parentheses, or quotes are kept.
pub fn split_selector_list(source: &str) -> Result<Vec<String>> {
    let parts = split_top_level(source).map_err(|reason| invalid(source, reason))?;
    Ok(parts.into_iter().map(|part| part.trim().to_string()).collect())
}

fn invalid(source: &str, reason: &str) -> DomError {
    DomError::InvalidSelector {
        selector: source.to_string(),
        reason: reason.to_string(),
    }
}

/// Split on commas that are not nested in brackets, parentheses, or quotes.
fn split_top_level(source: &str) -> std::result::Result<Vec<&str>, &'static str> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in source.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced closing bracket");
                }
            }
            (None, ',') if depth == 0 => {
                parts.push(&source[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err("unterminated string");
    }
    if depth != 0 {
        return Err("unbalanced brackets");
    }
    parts.push(&source[start..]);
    Ok(parts)
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '-' || ch == '_' || !ch.is_ascii()
}

struct Parser<'a> {
    chars: &'a [char],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn ident(&mut self) -> std::result::Result<String, String> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(format!("expected identifier at offset {start}"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn complex(&mut self) -> std::result::Result<ComplexSelector, String> {
        let mut compounds = Vec::new();
        let mut combinators = Vec::new();
        let mut pending: Option<Combinator> = None;
        loop {
            let had_whitespace = self.skip_whitespace();
            let Some(ch) = self.peek() else {
                break;
            };
            let explicit = match ch {
                '>' => Some(Combinator::Child),
                '+' => Some(Combinator::NextSibling),
                '~' => Some(Combinator::SubsequentSibling),
                _ => None,
            };
            if let Some(combinator) = explicit {
                if compounds.is_empty() || pending.is_some() {
                    return Err(format!("unexpected combinator '{ch}'"));
                }
                pending = Some(combinator);
                self.pos += 1;
                continue;
            }
            if !compounds.is_empty() {
                match pending.take() {
                    Some(combinator) => combinators.push(combinator),
                    None if had_whitespace => combinators.push(Combinator::Descendant),
                    None => return Err(format!("unexpected character '{ch}'")),
                }
            }
            compounds.push(self.compound()?);
        }
        if pending.is_some() {
            return Err("dangling combinator".into());
        }
        if compounds.is_empty() {
            return Err("empty selector".into());
        }
        Ok(ComplexSelector {
            compounds,
            combinators,
        })
    }

    fn compound(&mut self) -> std::result::Result<Compound, String> {
        let mut compound = Compound::default();
        let mut universal = false;
        match self.peek() {
            Some('*') => {
                universal = true;
                self.pos += 1;
            }
            Some(c) if is_ident_char(c) => compound.tag = Some(self.ident()?.to_ascii_lowercase()),
            _ => {}
        }
        while let Some(ch) = self.peek() {
            match ch {
                '#' => {
                    self.pos += 1;
                    compound.ids.push(self.ident()?);
                }
                '.' => {
                    self.pos += 1;
                    compound.classes.push(self.ident()?);
                }
                '[' => {
                    self.pos += 1;
                    compound.attributes.push(self.attribute()?);
                }
                ':' => {
                    self.pos += 1;
                    compound.pseudos.push(self.pseudo()?);
                }
                _ => break,
            }
        }
        if compound.is_empty() && !universal {
            return Err(format!("expected selector at offset {}", self.pos));
        }
        Ok(compound)
    }

    fn attribute(&mut self) -> std::result::Result<AttributeSelector, String> {
        self.skip_whitespace();
        let name = self.ident()?;
        self.skip_whitespace();
        let op_char = self.peek().ok_or("unterminated attribute selector")?;
        if op_char == ']' {
            self.pos += 1;
            return Ok(AttributeSelector {
                name,
                op: AttributeOp::Exists,
            });
        }
        let prefix = if op_char == '=' {
            None
        } else {
            self.pos += 1;
            Some(op_char)
        };
        if self.peek() != Some('=') {
            return Err(format!("expected '=' in attribute selector [{name}]"));
        }
        self.pos += 1;
        self.skip_whitespace();
        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != q) {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err("unterminated string".into());
                }
                let value: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                value
            }
            _ => self.ident()?,
        };
        self.skip_whitespace();
        if self.peek() != Some(']') {
            return Err(format!("expected ']' after attribute selector [{name}]"));
        }
        self.pos += 1;
        let op = match prefix {
            None => AttributeOp::Equals(value),
            Some('~') => AttributeOp::Includes(value),
            Some('|') => AttributeOp::DashMatch(value),
            Some('^') => AttributeOp::Prefix(value),
            Some('$') => AttributeOp::Suffix(value),
            Some('*') => AttributeOp::Substring(value),
            Some(other) => return Err(format!("unknown attribute operator '{other}='")),
        };
        Ok(AttributeSelector { name, op })
    }

    fn pseudo(&mut self) -> std::result::Result<Pseudo, String> {
        let name = self.ident()?.to_ascii_lowercase();
        let pseudo = match name.as_str() {
            "first-child" => Pseudo::FirstChild,
            "last-child" => Pseudo::LastChild,
            "only-child" => Pseudo::OnlyChild,
            "empty" => Pseudo::Empty,
            "disabled" => Pseudo::Disabled,
            "enabled" => Pseudo::Enabled,
            "checked" => Pseudo::Checked,
            "focus" => Pseudo::Focus,
            "not" => {
                if self.peek() != Some('(') {
                    return Err("expected '(' after :not".into());
                }
                self.pos += 1;
                let start = self.pos;
                let mut depth = 1;
                while let Some(ch) = self.peek() {
                    match ch {
                        '(' => depth += 1,
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    self.pos += 1;
                }
                if self.peek() != Some(')') {
                    return Err("unterminated :not(".into());
                }
                let inner: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                let list = SelectorList::parse(&inner).map_err(|e| e.to_string())?;
                Pseudo::Not(list)
            }
            other => return Err(format!("unsupported pseudo-class ':{other}'")),
        };
        Ok(pseudo)
    }
}

#[cfg(test)]
mod tests {
    use crate::dom::Document;
    use crate::error::DomError;

    fn table() -> Document {
        let doc = Document::new();
        let table = doc
            .append_element(doc.body(), "table", &[("id", "people")])
            .unwrap();
        for i in 0..3 {
            let row = doc
                .append_element(table, "tr", &[("class", "row"), ("data-index", &i.to_string())])
                .unwrap();
            doc.append_element(row, "td", &[("class", "cell name")]).unwrap();
            doc.append_element(row, "td", &[("class", "cell"), ("lang", "en-US")])
                .unwrap();
        }
        doc
    }

    #[test]
    fn descendant_and_child_combinators() {
        let doc = table();
        let body = doc.body();
        assert_eq!(doc.query_selector_all(body, "#people td").unwrap().len(), 6);
        assert_eq!(doc.query_selector_all(body, "table > td").unwrap().len(), 0);
        assert_eq!(doc.query_selector_all(body, "tr > .name").unwrap().len(), 3);
    }

    #[test]
    fn sibling_combinators() {
        let doc = table();
        let body = doc.body();
        assert_eq!(doc.query_selector_all(body, "tr + tr").unwrap().len(), 2);
        assert_eq!(doc.query_selector_all(body, ".name ~ td").unwrap().len(), 3);
    }

    #[test]
    fn attribute_operators() {
        let doc = table();
        let body = doc.body();
        assert_eq!(doc.query_selector_all(body, "[data-index='1']").unwrap().len(), 1);
        assert_eq!(doc.query_selector_all(body, "[class~=name]").unwrap().len(), 3);
        assert_eq!(doc.query_selector_all(body, "[lang|=en]").unwrap().len(), 3);
        assert_eq!(doc.query_selector_all(body, "[lang^=en]").unwrap().len(), 3);
        assert_eq!(doc.query_selector_all(body, "[lang$=US]").unwrap().len(), 3);
        assert_eq!(doc.query_selector_all(body, "[lang*='-']").unwrap().len(), 3);
        assert_eq!(doc.query_selector_all(body, "[data-index]").unwrap().len(), 3);
    }

    #[test]
    fn pseudo_classes() {
        let doc = table();
        let body = doc.body();
        assert_eq!(doc.query_selector_all(body, "tr:first-child").unwrap().len(), 1);
        assert_eq!(doc.query_selector_all(body, "td:last-child").unwrap().len(), 3);
        assert_eq!(doc.query_selector_all(body, "td:not(.name)").unwrap().len(), 3);
        assert_eq!(doc.query_selector_all(body, "td:empty").unwrap().len(), 6);
    }

    #[test]
    fn selector_lists_keep_document_order() {
        let doc = table();
        let found = doc.query_selector_all(doc.body(), "td.name, tr").unwrap();
        assert_eq!(found.len(), 6);
        assert_eq!(doc.tag_name(found[0]).unwrap(), "tr");
        assert_eq!(doc.tag_name(found[1]).unwrap(), "td");
    }

    #[test]
    fn query_excludes_root() {
        let doc = table();
        let rows = doc.query_selector_all(doc.body(), "tr").unwrap();
        assert!(doc.query_selector_all(rows[0], "tr").unwrap().is_empty());
        assert!(doc.matches(rows[0], "#people tr").unwrap());
    }

    #[test]
    fn closest_is_inclusive() {
        let doc = table();
        let cells = doc.query_selector_all(doc.body(), "td").unwrap();
        let row = doc.closest(cells[0], "tr").unwrap().unwrap();
        assert_eq!(doc.tag_name(row).unwrap(), "tr");
        assert_eq!(doc.closest(cells[0], ".cell").unwrap(), Some(cells[0]));
        assert_eq!(doc.closest(cells[0], "section").unwrap(), None);
    }

    #[test]
    fn invalid_selectors_are_rejected() {
        for bad in ["", "a,,b", "> a", "a >", "[x", "a:hover", "a[x!=y]", "'open"] {
            assert!(
                matches!(
                    crate::SelectorList::parse(bad),
                    Err(DomError::InvalidSelector { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn split_keeps_nested_commas() {
        let parts = crate::selector::split_selector_list("a, [x='1,2'] , :not(b,c)").unwrap();
        assert_eq!(parts, vec!["a", "[x='1,2']", ":not(b,c)"]);
    }

    #[test]
    fn universal_selector() {
        let doc = table();
        let all = doc.query_selector_all(doc.body(), "*").unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(doc.query_selector_all(doc.body(), "tr > *").unwrap().len(), 6);
    }
}
