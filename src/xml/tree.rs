use std::borrow::Cow;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use super::{Namespaces, XmlError};

/// SEC-003: Maximum element nesting accepted anywhere in a document.
pub(crate) const MAX_DEPTH: usize = 256;

/// A namespace-qualified element name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub namespace: Option<String>,
    pub local: String,
}

impl QName {
    /// Parses `prefix:local` or `local` against a namespace table.
    /// Unprefixed names carry no namespace.
    pub fn parse(name: &str, namespaces: &Namespaces) -> Result<Self, XmlError> {
        match name.split_once(':') {
            Some((prefix, local)) => {
                let uri = namespaces
                    .uri(prefix)
                    .ok_or_else(|| XmlError::UnknownPrefix {
                        prefix: prefix.to_owned(),
                        expr: name.to_owned(),
                    })?;
                if local.is_empty() {
                    return Err(XmlError::InvalidPath(name.to_owned()));
                }
                Ok(Self {
                    namespace: Some(uri.to_owned()),
                    local: local.to_owned(),
                })
            }
            None if name.is_empty() => Err(XmlError::InvalidPath(name.to_owned())),
            None => Ok(Self {
                namespace: None,
                local: name.to_owned(),
            }),
        }
    }
}

/// An owned element subtree.
///
/// Attributes are keyed by local name; namespace declarations are dropped.
/// `text` holds the element's own text and CDATA content, concatenated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: QName,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn new(name: QName) -> Self {
        Self {
            name,
            attributes: Vec::new(),
            text: String::new(),
            children: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Direct children with the given name, in document order.
    pub fn children_named(&self, name: &QName) -> Vec<&Element> {
        self.children
            .iter()
            .filter(|child| child.name == *name)
            .collect()
    }

    /// This element and every element below it, in document order.
    pub fn self_and_descendants(&self) -> Vec<&Element> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.self_and_descendants());
        }
        out
    }

    /// Every element below this one, in document order.
    pub fn descendants(&self) -> Vec<&Element> {
        self.children
            .iter()
            .flat_map(Element::self_and_descendants)
            .collect()
    }
}

/// Streams `content` until the first element named `tag` has been read in
/// full and returns it as an owned tree.
///
/// Returns `Ok(None)` if the document has no such element.
///
/// # Errors
///
/// - [`XmlError::Syntax`] for malformed XML
/// - [`XmlError::UnexpectedEof`] when the document ends inside the element
/// - [`XmlError::MaxDepthExceeded`] for pathologically nested documents
/// - [`XmlError::UnknownPrefix`] if `tag` uses an unregistered prefix
pub fn find_first(
    content: &[u8],
    tag: &str,
    namespaces: &Namespaces,
) -> Result<Option<Element>, XmlError> {
    let target = QName::parse(tag, namespaces)?;

    // SEC-002: quick-xml never expands <!ENTITY> declarations; unknown entity
    // references fail to unescape and fall back to the raw text below.
    let mut reader = NsReader::from_reader(content);

    let mut buf = Vec::new();
    let mut depth: usize = 0;
    // Open elements of the captured subtree; empty until `target` starts.
    let mut stack: Vec<Element> = Vec::new();

    loop {
        // Take ownership of the namespace before touching `reader` again.
        let (namespace, event) = match reader.read_resolved_event_into(&mut buf) {
            Ok((resolved, event)) => (owned_namespace(resolved, namespaces), event),
            Err(e) => return Err(XmlError::Syntax(e.to_string())),
        };

        match event {
            Event::Start(e) => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(XmlError::MaxDepthExceeded(MAX_DEPTH));
                }
                let name = element_name(&e, namespace);
                if !stack.is_empty() || name == target {
                    let mut element = Element::new(name);
                    element.attributes = read_attributes(&e, &reader);
                    stack.push(element);
                }
            }
            Event::Empty(e) => {
                let name = element_name(&e, namespace);
                if !stack.is_empty() || name == target {
                    let mut element = Element::new(name);
                    element.attributes = read_attributes(&e, &reader);
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(Some(element)),
                    }
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if let Some(mut done) = stack.pop() {
                    // Text and CDATA segments are joined verbatim, then trimmed once.
                    let trimmed = done.text.trim();
                    if trimmed.len() != done.text.len() {
                        done.text = trimmed.to_owned();
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => return Ok(Some(done)),
                    }
                }
            }
            Event::Text(t) => {
                if let Some(open) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .unwrap_or_else(|_| Cow::Owned(String::from_utf8_lossy(&t).into_owned()));
                    open.text.push_str(&text);
                }
            }
            Event::CData(c) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&String::from_utf8_lossy(&c));
                }
            }
            Event::Eof => {
                return match stack.first() {
                    Some(open) => Err(XmlError::UnexpectedEof(open.name.local.clone())),
                    None => Ok(None),
                };
            }
            _ => {}
        }
        buf.clear();
    }
}

fn owned_namespace(resolved: ResolveResult<'_>, namespaces: &Namespaces) -> Option<String> {
    match resolved {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        ResolveResult::Unbound => None,
        // Undeclared prefix: fall back to the well-known table.
        ResolveResult::Unknown(prefix) => namespaces
            .uri(&String::from_utf8_lossy(&prefix))
            .map(str::to_owned),
    }
}

fn element_name(e: &BytesStart<'_>, namespace: Option<String>) -> QName {
    QName {
        namespace,
        local: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
    }
}

fn read_attributes(e: &BytesStart<'_>, reader: &NsReader<&[u8]>) -> Vec<(String, String)> {
    let mut attributes = Vec::new();
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed XML attribute");
                continue;
            }
        };
        let key = attr.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let local = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(value) => value.trim().to_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).trim().to_owned(),
        };
        attributes.push((local, value));
    }
    attributes
}
