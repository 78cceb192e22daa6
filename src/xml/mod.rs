//! Namespace-aware XML value extraction.
//!
//! Feed documents are streamed with `quick-xml` until the first element of
//! interest (usually `<channel>`) has been read completely. That subtree is
//! kept as an owned [`Element`] tree and queried with small XPath-like
//! expressions:
//!
//! - `title/text()` - text of a child element
//! - `itunes:owner/itunes:name/text()` - namespaced child chain
//! - `//itunes:category/@text` - attribute of any descendant
//! - `enclosure//@url` - attribute of the element or any of its descendants
//!
//! Prefixes used in expressions must be registered in a [`Namespaces`] table
//! before the expression is compiled.
//!
//! # Example
//!
//! ```
//! use podcrawl::xml::{find_first, Namespaces, XPath, XPathFinder};
//!
//! let ns = Namespaces::new().register("itunes", "http://www.itunes.com/dtds/podcast-1.0.dtd");
//! let doc = br#"<rss xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
//!     <channel><itunes:author>Jane</itunes:author></channel></rss>"#;
//!
//! let channel = find_first(doc, "channel", &ns).unwrap().unwrap();
//! let path = XPath::compile("itunes:author/text()", &ns).unwrap();
//! assert_eq!(XPathFinder::new(&channel).first(&[path]), Some("Jane".to_string()));
//! ```

mod tree;
mod xpath;

use std::collections::HashMap;
use std::hash::Hash;

use thiserror::Error;

pub use tree::{find_first, Element, QName};
pub use xpath::XPath;

/// Errors raised while reading XML or compiling path expressions.
#[derive(Debug, Error)]
pub enum XmlError {
    /// The document is not well-formed.
    #[error("XML syntax error: {0}")]
    Syntax(String),

    /// The document ended while an element was still open.
    #[error("unexpected end of document inside <{0}>")]
    UnexpectedEof(String),

    /// SEC-003: nesting exceeded [`tree::MAX_DEPTH`].
    #[error("XML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// A path expression used a prefix missing from the namespace table.
    #[error("unregistered namespace prefix '{prefix}' in '{expr}'")]
    UnknownPrefix { prefix: String, expr: String },

    /// A path expression could not be parsed.
    #[error("invalid path expression '{0}'")]
    InvalidPath(String),
}

/// Prefix to namespace URI table used to resolve qualified names.
#[derive(Debug, Clone, Default)]
pub struct Namespaces {
    by_prefix: HashMap<String, String>,
}

impl Namespaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(prefix, uri)` pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        pairs
            .iter()
            .fold(Self::new(), |ns, (prefix, uri)| ns.register(prefix, uri))
    }

    /// Registers (or replaces) a prefix.
    pub fn register(mut self, prefix: &str, uri: &str) -> Self {
        self.by_prefix.insert(prefix.to_owned(), uri.to_owned());
        self
    }

    /// Looks up the URI bound to `prefix`.
    pub fn uri(&self, prefix: &str) -> Option<&str> {
        self.by_prefix.get(prefix).map(String::as_str)
    }
}

/// A compiled, declarative extraction table: each field maps to an ordered
/// list of candidate paths.
#[derive(Debug, Clone)]
pub struct FieldPaths<F> {
    fields: Vec<(F, Vec<XPath>)>,
}

impl<F: Copy + Eq + Hash> FieldPaths<F> {
    /// Compiles `(field, [paths])` pairs against `namespaces`.
    pub fn compile(table: &[(F, &[&str])], namespaces: &Namespaces) -> Result<Self, XmlError> {
        let fields = table
            .iter()
            .map(|(field, exprs)| {
                let paths = exprs
                    .iter()
                    .map(|expr| XPath::compile(expr, namespaces))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((*field, paths))
            })
            .collect::<Result<Vec<_>, XmlError>>()?;
        Ok(Self { fields })
    }
}

/// Evaluates compiled paths relative to one element.
#[derive(Debug, Clone, Copy)]
pub struct XPathFinder<'a> {
    element: &'a Element,
}

impl<'a> XPathFinder<'a> {
    pub fn new(element: &'a Element) -> Self {
        Self { element }
    }

    /// Returns the first non-empty value, trying `paths` in order.
    pub fn first(&self, paths: &[XPath]) -> Option<String> {
        paths
            .iter()
            .find_map(|path| path.evaluate(self.element).into_iter().next())
            .map(str::to_owned)
    }

    /// Returns every non-empty value of every path, concatenated in path order.
    pub fn all(&self, paths: &[XPath]) -> Vec<String> {
        paths
            .iter()
            .flat_map(|path| path.evaluate(self.element))
            .map(str::to_owned)
            .collect()
    }

    /// Runs a whole extraction table, keeping the first non-empty value per field.
    /// Fields with no value are absent from the result.
    pub fn extract<F: Copy + Eq + Hash>(&self, table: &FieldPaths<F>) -> HashMap<F, String> {
        table
            .fields
            .iter()
            .filter_map(|(field, paths)| self.first(paths).map(|value| (*field, value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ITUNES: &str = "http://www.itunes.com/dtds/podcast-1.0.dtd";

    fn namespaces() -> Namespaces {
        Namespaces::new().register("itunes", ITUNES)
    }

    fn channel(xml: &str) -> Element {
        find_first(xml.as_bytes(), "channel", &namespaces())
            .unwrap()
            .unwrap()
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Field {
        Title,
        Owner,
        Missing,
    }

    #[test]
    fn test_first_falls_back_in_order() {
        let ch = channel(&format!(
            r#"<rss xmlns:itunes="{ITUNES}"><channel>
                <description></description>
                <itunes:summary>Summary text</itunes:summary>
            </channel></rss>"#
        ));
        let ns = namespaces();
        let paths = vec![
            XPath::compile("description/text()", &ns).unwrap(),
            XPath::compile("itunes:summary/text()", &ns).unwrap(),
        ];
        assert_eq!(
            XPathFinder::new(&ch).first(&paths),
            Some("Summary text".to_string())
        );
    }

    #[test]
    fn test_all_concatenates_paths() {
        let ch = channel(&format!(
            r#"<rss xmlns:itunes="{ITUNES}"><channel>
                <itunes:category text="Science">
                    <itunes:category text="Physics"/>
                </itunes:category>
                <category>Extra</category>
            </channel></rss>"#
        ));
        let ns = namespaces();
        let paths = vec![
            XPath::compile("//itunes:category/@text", &ns).unwrap(),
            XPath::compile("category/text()", &ns).unwrap(),
        ];
        assert_eq!(
            XPathFinder::new(&ch).all(&paths),
            vec!["Science", "Physics", "Extra"]
        );
    }

    #[test]
    fn test_extract_table() {
        let ch = channel(&format!(
            r#"<rss xmlns:itunes="{ITUNES}"><channel>
                <title>Show</title>
                <itunes:owner><itunes:name>Owner Name</itunes:name></itunes:owner>
            </channel></rss>"#
        ));
        let ns = namespaces();
        let table: &[(Field, &[&str])] = &[
            (Field::Title, &["title/text()"]),
            (
                Field::Owner,
                &["itunes:author/text()", "itunes:owner/itunes:name/text()"],
            ),
            (Field::Missing, &["nothing/text()"]),
        ];
        let compiled = FieldPaths::compile(table, &ns).unwrap();
        let values = XPathFinder::new(&ch).extract(&compiled);

        assert_eq!(values.get(&Field::Title).map(String::as_str), Some("Show"));
        assert_eq!(
            values.get(&Field::Owner).map(String::as_str),
            Some("Owner Name")
        );
        assert!(!values.contains_key(&Field::Missing));
    }

    #[test]
    fn test_compile_rejects_unregistered_prefix() {
        let table: &[(Field, &[&str])] = &[(Field::Title, &["media:title/text()"])];
        let err = FieldPaths::compile(table, &namespaces()).unwrap_err();
        assert!(matches!(err, XmlError::UnknownPrefix { .. }));
    }

    #[test]
    fn test_from_pairs() {
        let ns = Namespaces::from_pairs(&[("a", "urn:a"), ("b", "urn:b")]);
        assert_eq!(ns.uri("a"), Some("urn:a"));
        assert_eq!(ns.uri("b"), Some("urn:b"));
        assert_eq!(ns.uri("c"), None);
    }
}
