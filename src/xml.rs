//! Minimal XML document model used for both ends of the wire.
//!
//! Requests are assembled by string templating (see [crate::request]), so this module only
//! needs to read documents. Every value that enters a template goes through [escape] first.
//!
//! Children are grouped by element name: a node answers "the n-th child called `x`", never
//! "the n-th child". Ordering between differently named siblings is not kept.
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

mod reader;

pub use reader::{parse, parse_fragment, MAX_DEPTH};

/// Name of the synthetic root created by [parse_fragment].
pub const FRAGMENT_ROOT: &str = "fragment";

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The input is not well-formed XML.
    #[error("malformed xml: {0}")]
    Malformed(String),
    /// The input did not contain a root element.
    #[error("document has no root element")]
    Empty,
}

/// A single element of a parsed document.
///
/// Every node shares the source text of its document and keeps the byte spans of its own
/// markup, so inner and outer markup are slices of the input rather than copies.
#[derive(Clone, PartialEq, Eq)]
pub struct XmlNode {
    name: String,
    text: String,
    attributes: BTreeMap<String, String>,
    children: BTreeMap<String, Vec<XmlNode>>,
    source: Arc<str>,
    outer: Range<usize>,
    inner: Range<usize>,
}

impl fmt::Debug for XmlNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlNode")
            .field("name", &self.name)
            .field("text", &self.text)
            .field("attributes", &self.attributes)
            .field("children", &self.children)
            .finish()
    }
}

impl XmlNode {
    pub(crate) fn new(name: String, source: Arc<str>, start: usize) -> Self {
        Self {
            name,
            text: String::new(),
            attributes: BTreeMap::new(),
            children: BTreeMap::new(),
            source,
            outer: start..start,
            inner: start..start,
        }
    }

    /// Qualified element name, prefix included (`wc:info`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element name without its namespace prefix.
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    /// Concatenated character data of this element, trimmed.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// Markup between the start and end tag, as it appeared in the source.
    pub fn inner_xml(&self) -> &str {
        self.source.get(self.inner.clone()).unwrap_or_default()
    }

    /// Markup of the whole element, tags included.
    pub fn outer_xml(&self) -> &str {
        self.source.get(self.outer.clone()).unwrap_or_default()
    }

    /// All children called `name`, in document order. Empty if there are none.
    pub fn select_nodes(&self, name: &str) -> &[XmlNode] {
        self.children.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The first child called `name`.
    pub fn select_single_node(&self, name: &str) -> Option<&XmlNode> {
        self.select_single_node_at(name, 0)
    }

    /// The `index`-th (zero based) child called `name`.
    pub fn select_single_node_at(&self, name: &str, index: usize) -> Option<&XmlNode> {
        self.select_nodes(name).get(index)
    }

    /// All children whose local name is `name`, whatever their prefix.
    pub fn select_local(&self, name: &str) -> impl Iterator<Item = &XmlNode> + '_ {
        let name = name.to_string();
        self.children
            .iter()
            .filter(move |(key, _)| local_part(key) == name)
            .flat_map(|(_, nodes)| nodes.iter())
    }

    /// Follows a `/` separated path of child names, taking the first match at each step.
    pub fn select_path(&self, path: &str) -> Option<&XmlNode> {
        path.split('/')
            .filter(|step| !step.is_empty())
            .try_fold(self, |node, step| node.select_single_node(step))
    }

    /// Text of the first child called `name`, if that child exists.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.select_single_node(name).map(XmlNode::text)
    }

    /// Value of attribute `name`; `None` when the attribute is absent.
    pub fn attr_value(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub(crate) fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub(crate) fn set_attribute(&mut self, name: String, value: String) {
        self.attributes.insert(name, value);
    }

    pub(crate) fn add_child(&mut self, child: XmlNode) {
        self.children
            .entry(child.name.clone())
            .or_default()
            .push(child);
    }

    /// Closes the element: `inner` and `outer` are byte ranges of the source.
    pub(crate) fn finish(&mut self, inner: Range<usize>, outer: Range<usize>) {
        let trimmed = self.text.trim();
        if trimmed.len() != self.text.len() {
            self.text = trimmed.to_string();
        }
        self.inner = inner;
        self.outer = outer;
    }
}

fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

/// Escapes `&`, `<`, `>`, `"` and `'` so the value can sit in text or attribute position.
pub fn escape(value: &str) -> Cow<'_, str> {
    quick_xml::escape::escape(value)
}
