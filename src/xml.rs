// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Mutable XML tree.
//!
//! View definitions are edited in place, so we need more than a pull parser.
//! Parsed markup is held in a [`Document`], an arena of nodes addressed by
//! [`NodeId`]. Every node knows its parent and its ordered children, which
//! makes the typical CAML edits cheap: swap one `FieldRef` for another, hoist
//! the only child of an `Or` into its parent's slot, or graft a freshly parsed
//! filter fragment under `<Where>`.
//!
//! # Attribute Handling
//!
//! Attributes keep their document order and their exact casing. Lookup is
//! case-sensitive. A `collapse` attribute is __not__ the `Collapse` attribute.
//! Unknown attributes are carried through untouched so they survive a
//! parse-edit-serialize round trip.
//!
//! # Detached Nodes
//!
//! Removing a node only unlinks it from its parent. The node stays in the
//! arena, so a [`NodeId`] never dangles. A detached node can be re-attached
//! anywhere in the same document.

use quick_xml::{
    escape::{escape, partial_escape},
    events::{BytesStart, Event},
    Reader,
};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Handle to a node inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Single attribute of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// Element name plus its attributes in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<Attribute>,
}

/// Kind of content a node holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
}

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena backed XML document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    nodes: Vec<NodeData>,
    top: Vec<NodeId>,
    root: Option<NodeId>,
}

impl Document {
    /// Construct new empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse XML markup into a new document.
    ///
    /// Whitespace text is preserved. Declarations, processing instructions,
    /// and doctypes are dropped. A document without any root element parses
    /// fine. Checking for that is left to the caller.
    ///
    /// # Errors
    ///
    /// - Return [`XmlError::Syntax`] or [`XmlError::Attribute`] if the markup
    ///   is malformed.
    /// - Return [`XmlError::MultipleRoots`] if more than one top-level element
    ///   exists.
    /// - Return [`XmlError::TextOutsideRoot`] if non-whitespace text exists at
    ///   the top-level.
    /// - Return [`XmlError::Unclosed`] if input ends with open elements.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut doc = Document::new();
        let mut stack: Vec<NodeId> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let id = doc.element_from_start(&start)?;
                    doc.attach_parsed(stack.last().copied(), id)?;
                    stack.push(id);
                }
                Event::Empty(start) => {
                    let id = doc.element_from_start(&start)?;
                    doc.attach_parsed(stack.last().copied(), id)?;
                }
                Event::End(_) => {
                    stack.pop();
                }
                Event::Text(text) => {
                    let content = text.unescape()?;
                    match stack.last().copied() {
                        Some(parent) => {
                            let id = doc.push(NodeKind::Text(content.into_owned()));
                            doc.append_child(parent, id);
                        }
                        None if content.trim().is_empty() => {}
                        None => return Err(XmlError::TextOutsideRoot),
                    }
                }
                Event::CData(cdata) => {
                    let content = std::str::from_utf8(&cdata)?.to_owned();
                    let id = doc.push(NodeKind::CData(content));
                    doc.attach_parsed(stack.last().copied(), id)?;
                }
                Event::Comment(comment) => {
                    let content = std::str::from_utf8(&comment)?.to_owned();
                    let id = doc.push(NodeKind::Comment(content));
                    doc.attach_parsed(stack.last().copied(), id)?;
                }
                Event::Decl(_) | Event::PI(_) | Event::DocType(_) => {}
                Event::Eof => break,
            }
        }

        if let Some(open) = stack.last() {
            return Err(XmlError::Unclosed {
                name: doc.name(*open).unwrap_or_default().to_owned(),
            });
        }

        Ok(doc)
    }

    /// Parse a markup fragment and import its nodes into this document.
    ///
    /// The fragment may hold any number of sibling nodes. Imported nodes are
    /// returned detached, in document order.
    ///
    /// # Errors
    ///
    /// - Return [`XmlError`] if fragment is malformed.
    pub fn parse_fragment(&mut self, xml: &str) -> Result<Vec<NodeId>> {
        let wrapped = format!("<fragment>{xml}</fragment>");
        let fragment = Document::parse(&wrapped)?;
        let Some(wrapper) = fragment.root() else {
            return Err(XmlError::NoRootElement);
        };

        Ok(fragment
            .children(wrapper)
            .iter()
            .map(|child| self.import(&fragment, *child))
            .collect())
    }

    /// Deep copy a node of another document into this one.
    ///
    /// The copy is returned detached.
    pub fn import(&mut self, other: &Document, node: NodeId) -> NodeId {
        let id = self.push(other.kind(node).clone());
        for child in other.children(node) {
            let copy = self.import(other, *child);
            self.append_child(id, copy);
        }

        id
    }

    /// Root element of document if any.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Install detached element as the document root.
    ///
    /// Replaces the current root if there is one.
    pub fn set_root(&mut self, element: NodeId) {
        self.detach(element);
        match self.root {
            Some(old) => {
                if let Some(slot) = self.top.iter_mut().find(|id| **id == old) {
                    *slot = element;
                }
            }
            None => self.top.push(element),
        }
        self.root = Some(element);
    }

    pub fn kind(&self, node: NodeId) -> &NodeKind {
        &self.nodes[node.0].kind
    }

    /// Element data of node, or `None` for non-element nodes.
    pub fn element(&self, node: NodeId) -> Option<&Element> {
        match &self.nodes[node.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, node: NodeId) -> Option<&mut Element> {
        match &mut self.nodes[node.0].kind {
            NodeKind::Element(element) => Some(element),
            _ => None,
        }
    }

    /// Tag name of element node.
    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|element| element.name.as_str())
    }

    /// Check if node is an element with the exact tag name.
    pub fn is_element_named(&self, node: NodeId, name: &str) -> bool {
        self.name(node) == Some(name)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.0].parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.nodes[node.0].children
    }

    /// Iterate over direct children that are elements.
    pub fn child_elements(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(node)
            .iter()
            .copied()
            .filter(move |child| self.element(*child).is_some())
    }

    /// Iterate over direct children that are elements with exact tag name.
    pub fn children_named<'a>(
        &'a self,
        node: NodeId,
        name: &'a str,
    ) -> impl Iterator<Item = NodeId> + 'a {
        self.child_elements(node)
            .filter(move |child| self.is_element_named(*child, name))
    }

    /// First direct child element with exact tag name.
    pub fn first_child_named(&self, node: NodeId, name: &str) -> Option<NodeId> {
        self.children_named(node, name).next()
    }

    /// All descendants of node in document order, excluding node itself.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut pending: Vec<NodeId> = self.children(node).iter().rev().copied().collect();

        // Use DFS so output follows document order.
        while let Some(next) = pending.pop() {
            found.push(next);
            pending.extend(self.children(next).iter().rev());
        }

        found
    }

    /// First descendant element with exact tag name in document order.
    pub fn first_descendant_named(&self, node: NodeId, name: &str) -> Option<NodeId> {
        self.descendants(node)
            .into_iter()
            .find(|child| self.is_element_named(*child, name))
    }

    /// Value of attribute with exact name.
    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?
            .attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }

    /// Set attribute value.
    ///
    /// Existing attribute keeps its position. New attribute is appended.
    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: impl Into<String>) {
        let value = value.into();
        let Some(element) = self.element_mut(node) else {
            return;
        };

        match element.attributes.iter_mut().find(|attr| attr.name == name) {
            Some(attr) => attr.value = value,
            None => element.attributes.push(Attribute {
                name: name.to_owned(),
                value,
            }),
        }
    }

    /// Remove attribute, returning whether it existed.
    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> bool {
        let Some(element) = self.element_mut(node) else {
            return false;
        };

        let before = element.attributes.len();
        element.attributes.retain(|attr| attr.name != name);
        before != element.attributes.len()
    }

    /// Concatenated text of all descendant text and CDATA nodes.
    pub fn text_content(&self, node: NodeId) -> String {
        match self.kind(node) {
            NodeKind::Text(text) | NodeKind::CData(text) => text.clone(),
            NodeKind::Comment(_) => String::new(),
            NodeKind::Element(_) => self
                .descendants(node)
                .into_iter()
                .filter_map(|child| match self.kind(child) {
                    NodeKind::Text(text) | NodeKind::CData(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Replace all children of element with one text node.
    pub fn set_text_content(&mut self, node: NodeId, text: impl Into<String>) {
        for child in self.children(node).to_vec() {
            self.detach(child);
        }

        let text = text.into();
        if !text.is_empty() {
            let id = self.push(NodeKind::Text(text));
            self.append_child(node, id);
        }
    }

    /// Create detached element.
    pub fn create_element(&mut self, name: impl Into<String>) -> NodeId {
        self.push(NodeKind::Element(Element {
            name: name.into(),
            attributes: Vec::new(),
        }))
    }

    /// Create detached text node.
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeKind::Text(text.into()))
    }

    /// Append child to parent, moving it out of its old position first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.detach(child);
        self.nodes[child.0].parent = Some(parent);
        self.nodes[parent.0].children.push(child);
    }

    /// Insert child before reference node of parent.
    ///
    /// Falls back to appending if reference is not a child of parent.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: NodeId) {
        if child == reference {
            return;
        }

        self.detach(child);
        let children = &mut self.nodes[parent.0].children;
        let position = children
            .iter()
            .position(|id| *id == reference)
            .unwrap_or(children.len());
        children.insert(position, child);
        self.nodes[child.0].parent = Some(parent);
    }

    /// Insert child as the very first child of parent.
    pub fn prepend_child(&mut self, parent: NodeId, child: NodeId) {
        match self.children(parent).first().copied() {
            Some(first) => self.insert_before(parent, child, first),
            None => self.append_child(parent, child),
        }
    }

    /// Unlink node from its parent.
    pub fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|id| *id != node);
        }
    }

    /// Put replacement into the slot of old node.
    ///
    /// Old node ends up detached. Replacing the root element replaces the
    /// document root.
    pub fn replace(&mut self, old: NodeId, replacement: NodeId) {
        if old == replacement {
            return;
        }

        if self.root == Some(old) {
            self.set_root(replacement);
            return;
        }

        let Some(parent) = self.parent(old) else {
            return;
        };

        self.insert_before(parent, replacement, old);
        self.detach(old);
    }

    /// Serialize node and its subtree.
    pub fn outer_xml(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, &mut out);
        out
    }

    /// Serialize only the children of node.
    pub fn inner_xml(&self, node: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(node) {
            self.write_node(*child, &mut out);
        }
        out
    }

    fn write_node(&self, node: NodeId, out: &mut String) {
        match self.kind(node) {
            NodeKind::Element(element) => {
                out.push('<');
                out.push_str(&element.name);
                for attr in &element.attributes {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    out.push_str(&escape(attr.value.as_str()));
                    out.push('"');
                }

                let children = self.children(node);
                if children.is_empty() {
                    out.push_str("/>");
                    return;
                }

                out.push('>');
                for child in children {
                    self.write_node(*child, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
            NodeKind::Text(text) => out.push_str(&partial_escape(text.as_str())),
            NodeKind::CData(text) => {
                out.push_str("<![CDATA[");
                out.push_str(text);
                out.push_str("]]>");
            }
            NodeKind::Comment(text) => {
                out.push_str("<!--");
                out.push_str(text);
                out.push_str("-->");
            }
        }
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(NodeData {
            kind,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    fn element_from_start(&mut self, start: &BytesStart<'_>) -> Result<NodeId> {
        let name = std::str::from_utf8(start.name().as_ref())?.to_owned();
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            attributes.push(Attribute {
                name: std::str::from_utf8(attr.key.as_ref())?.to_owned(),
                value: attr.unescape_value()?.into_owned(),
            });
        }

        Ok(self.push(NodeKind::Element(Element { name, attributes })))
    }

    fn attach_parsed(&mut self, parent: Option<NodeId>, node: NodeId) -> Result<()> {
        if let Some(parent) = parent {
            self.append_child(parent, node);
            return Ok(());
        }

        // INVARIANT: Only one element may live at the top-level.
        if self.element(node).is_some() {
            if self.root.is_some() {
                return Err(XmlError::MultipleRoots);
            }
            self.root = Some(node);
        }
        self.top.push(node);

        Ok(())
    }
}

impl Display for Document {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let mut out = String::new();
        for node in &self.top {
            self.write_node(*node, &mut out);
        }
        fmt.write_str(&out)
    }
}

/// XML handling error types.
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    /// Markup is not well-formed.
    #[error(transparent)]
    Syntax(#[from] quick_xml::Error),

    /// Attribute is malformed, e.g., duplicated or unquoted.
    #[error(transparent)]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    /// Names or content are not valid UTF-8.
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),

    /// Input ended while elements were still open.
    #[error("element <{name}> is never closed")]
    Unclosed { name: String },

    /// More than one element exists at the top-level.
    #[error("document has more than one root element")]
    MultipleRoots,

    /// Text content exists outside of the root element.
    #[error("text content found outside of root element")]
    TextOutsideRoot,

    /// Document does not contain any element at all.
    #[error("document has no root element")]
    NoRootElement,

    /// Document carries a parser error report.
    #[error("document contains a parsererror element")]
    ParserErrorNode,
}

/// Friendly result alias :3
type Result<T, E = XmlError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test]
    fn parse_and_serialize_keeps_attribute_order() -> anyhow::Result<()> {
        let xml = r#"<View Name="x" Type="HTML"><Query><OrderBy><FieldRef Name="aaa" Foo="bar" Ascending="FALSE" /></OrderBy></Query></View>"#;
        let doc = Document::parse(xml)?;

        let expect = r#"<View Name="x" Type="HTML"><Query><OrderBy><FieldRef Name="aaa" Foo="bar" Ascending="FALSE"/></OrderBy></Query></View>"#;
        assert_eq!(doc.to_string(), expect);

        Ok(())
    }

    #[test]
    fn parse_decodes_entities() -> anyhow::Result<()> {
        let doc = Document::parse(r#"<Value Type="Text" Extra="a&quot;b">Tom &amp; Jerry &lt;3</Value>"#)?;
        let root = doc.root().unwrap();

        assert_eq!(doc.text_content(root), "Tom & Jerry <3");
        assert_eq!(doc.attribute(root, "Extra"), Some("a\"b"));
        assert_eq!(doc.to_string(), r#"<Value Type="Text" Extra="a&quot;b">Tom &amp; Jerry &lt;3</Value>"#);

        Ok(())
    }

    #[test]
    fn attribute_lookup_is_case_sensitive() -> anyhow::Result<()> {
        let doc = Document::parse(r#"<GroupBy collapse="TRUE"/>"#)?;
        let root = doc.root().unwrap();

        assert_eq!(doc.attribute(root, "Collapse"), None);
        assert_eq!(doc.attribute(root, "collapse"), Some("TRUE"));

        Ok(())
    }

    #[test_case("<View>"; "unclosed element")]
    #[test_case("<View></Query>"; "mismatched end tag")]
    #[test_case("<View/><View/>"; "two roots")]
    #[test_case("<View/>trailing"; "text after root")]
    #[test_case(r#"<View a="1" a="2"/>"#; "duplicate attribute")]
    #[test]
    fn parse_rejects_malformed_markup(xml: &str) {
        assert!(Document::parse(xml).is_err());
    }

    #[test]
    fn parse_empty_input_has_no_root() -> anyhow::Result<()> {
        let doc = Document::parse("")?;
        assert_eq!(doc.root(), None);

        Ok(())
    }

    #[test]
    fn tree_mutation_moves_nodes() -> anyhow::Result<()> {
        let mut doc = Document::parse("<a><b/><c/></a>")?;
        let root = doc.root().unwrap();
        let b = doc.first_child_named(root, "b").unwrap();
        let c = doc.first_child_named(root, "c").unwrap();

        doc.insert_before(root, c, b);
        assert_eq!(doc.to_string(), "<a><c/><b/></a>");

        let d = doc.create_element("d");
        doc.replace(b, d);
        assert_eq!(doc.to_string(), "<a><c/><d/></a>");
        assert_eq!(doc.parent(b), None);

        doc.append_child(d, c);
        assert_eq!(doc.to_string(), "<a><d><c/></d></a>");

        Ok(())
    }

    #[test]
    fn parse_fragment_imports_siblings() -> anyhow::Result<()> {
        let mut doc = Document::parse("<Where/>")?;
        let root = doc.root().unwrap();
        let nodes = doc.parse_fragment(r#"<Eq><FieldRef Name="a"/></Eq><IsNull/>"#)?;
        for node in &nodes {
            doc.append_child(root, *node);
        }

        assert_eq!(nodes.len(), 2);
        assert_eq!(doc.to_string(), r#"<Where><Eq><FieldRef Name="a"/></Eq><IsNull/></Where>"#);

        Ok(())
    }

    #[test]
    fn descendants_follow_document_order() -> anyhow::Result<()> {
        let doc = Document::parse("<a><b><c/></b><d/></a>")?;
        let root = doc.root().unwrap();
        let names: Vec<_> = doc
            .descendants(root)
            .into_iter()
            .filter_map(|id| doc.name(id))
            .collect();

        assert_eq!(names, vec!["b", "c", "d"]);

        Ok(())
    }
}
