// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Minimal XML document tree used for asset bodies, device description files,
//! and assembled MTConnect response documents.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use thiserror::Error;

/// Indicates an error occurred while parsing an XML fragment into an
/// [`Element`] tree.
#[derive(Error, Debug)]
pub enum XmlError {
    /// The underlying reader rejected the input
    #[error(transparent)]
    Malformed(#[from] quick_xml::Error),
    /// An attribute could not be decoded
    #[error(transparent)]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    /// An entity reference could not be resolved
    #[error(transparent)]
    Escape(#[from] quick_xml::escape::EscapeError),
    /// The input contained no root element
    #[error("document has no root element")]
    NoRoot,
    /// A closing tag appeared without a matching opening tag
    #[error("unbalanced closing tag")]
    UnbalancedClose,
}

/// A node in an XML document tree, either a child element or a run of
/// character data.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// A nested element
    Element(Element),
    /// Character data
    Text(String),
}

/// An XML element with attributes and child nodes.
///
/// Attribute order is preserved, matching the order they are pushed (or the
/// order they appear in parsed input).
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    /// Tag name
    pub name: String,
    /// Attributes in document order
    pub attributes: Vec<(String, String)>,
    /// Child nodes in document order
    pub children: Vec<Node>,
}

impl Element {
    /// Creates an empty element with the given tag name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Appends an attribute, returning `self` for chaining.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    /// Appends an attribute in place.
    pub fn push_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.push((name.into(), value.into()));
    }

    /// Sets an attribute, replacing an existing one of the same name.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(attr, _)| *attr == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Appends a child element.
    pub fn push_element(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Replaces all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![Node::Text(text.into())];
    }

    /// Returns the value of the named attribute, if present.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| value.as_str())
    }

    /// Concatenation of the direct text children.
    #[must_use]
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                Node::Text(text) => Some(text.as_str()),
                Node::Element(_) => None,
            })
            .collect()
    }

    /// Child elements in document order.
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        })
    }

    /// Returns the first child element with the given tag name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|element| element.name == name)
    }

    /// Returns the innermost (deepest, first in document order among ties)
    /// element named `name` in this subtree, including `self`.
    pub fn innermost_mut(&mut self, name: &str) -> Option<&mut Element> {
        let mut prefix = Vec::new();
        let mut best = None;
        find_innermost(self, name, &mut prefix, &mut best);
        let path = best?;
        let mut cursor = self;
        for index in path {
            let Some(Node::Element(next)) = cursor.children.get_mut(index) else {
                return None;
            };
            cursor = next;
        }
        Some(cursor)
    }

    /// Parses a string into an element tree. Leading declarations, comments
    /// and processing instructions are skipped; the first element becomes the
    /// root.
    pub fn parse_str(input: &str) -> Result<Element, XmlError> {
        let mut reader = Reader::from_str(input);
        reader.config_mut().trim_text(true);
        reader.config_mut().expand_empty_elements = true;

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    let mut element =
                        Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
                    for attribute in start.attributes() {
                        let attribute = attribute?;
                        element.attributes.push((
                            String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
                            attribute.unescape_value()?.into_owned(),
                        ));
                    }
                    stack.push(element);
                }
                Event::End(_) => {
                    let Some(finished) = stack.pop() else {
                        return Err(XmlError::UnbalancedClose);
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(Node::Element(finished)),
                        None => {
                            if root.is_none() {
                                root = Some(finished);
                            }
                        }
                    }
                }
                Event::Text(text) => {
                    let value = text.unescape()?.into_owned();
                    if !value.is_empty() {
                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(Node::Text(value));
                        }
                    }
                }
                Event::CData(data) => {
                    let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(Node::Text(value));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        root.ok_or(XmlError::NoRoot)
    }

    /// Serializes this element as a standalone XML document with a
    /// declaration.
    #[must_use]
    pub fn to_document_string(&self) -> String {
        let mut out = String::with_capacity(256);
        out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        self.write_into(&mut out);
        out.push('\n');
        out
    }

    /// Serializes this element as an XML fragment without a declaration.
    #[must_use]
    pub fn to_fragment_string(&self) -> String {
        let mut out = String::with_capacity(128);
        self.write_into(&mut out);
        out
    }

    fn write_into(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&escape(value.as_str()));
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(element) => element.write_into(out),
                Node::Text(text) => out.push_str(&escape(text.as_str())),
            }
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push('>');
    }
}

// `prefix` holds child indexes from the root down to the node being visited;
// `best` keeps the deepest matching path seen so far (empty means the root
// itself). Strict comparison keeps the first of equally-deep matches.
fn find_innermost(
    element: &Element,
    name: &str,
    prefix: &mut Vec<usize>,
    best: &mut Option<Vec<usize>>,
) {
    for (index, child) in element.children.iter().enumerate() {
        if let Node::Element(child) = child {
            prefix.push(index);
            find_innermost(child, name, prefix, best);
            prefix.pop();
        }
    }
    if element.name == name && best.as_ref().is_none_or(|path| prefix.len() > path.len()) {
        *best = Some(prefix.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attributes_and_text() {
        let element =
            Element::parse_str(r#"<CuttingTool assetId="EM233"><ToolLife>100</ToolLife></CuttingTool>"#)
                .unwrap();
        assert_eq!(element.name, "CuttingTool");
        assert_eq!(element.attribute("assetId"), Some("EM233"));
        assert_eq!(element.child("ToolLife").unwrap().text(), "100");
    }

    #[test]
    fn test_parse_self_closing() {
        let element = Element::parse_str(r#"<CuttingTool serialNumber="1"/>"#).unwrap();
        assert_eq!(element.name, "CuttingTool");
        assert!(element.children.is_empty());
    }

    #[test]
    fn test_parse_skips_declaration() {
        let element =
            Element::parse_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?><Root><A/></Root>")
                .unwrap();
        assert_eq!(element.name, "Root");
        assert!(element.child("A").is_some());
    }

    #[test]
    fn test_parse_no_root() {
        assert!(matches!(Element::parse_str("   "), Err(XmlError::NoRoot)));
    }

    #[test]
    fn test_innermost_prefers_deepest() {
        // depth wins over document order
        let mut element = Element::parse_str(
            "<Tool><Life>outer</Life><Measurements><Life>inner</Life></Measurements></Tool>",
        )
        .unwrap();
        assert_eq!(element.innermost_mut("Life").unwrap().text(), "inner");

        let mut reversed = Element::parse_str(
            "<Tool><Measurements><Life>inner</Life></Measurements><Life>outer</Life></Tool>",
        )
        .unwrap();
        assert_eq!(reversed.innermost_mut("Life").unwrap().text(), "inner");
    }

    #[test]
    fn test_innermost_can_match_root() {
        let mut element = Element::parse_str("<Life><Other/></Life>").unwrap();
        assert_eq!(element.innermost_mut("Life").unwrap().name, "Life");
    }

    #[test]
    fn test_innermost_missing() {
        let mut element = Element::parse_str("<Tool/>").unwrap();
        assert!(element.innermost_mut("Life").is_none());
    }

    #[test]
    fn test_write_escapes() {
        let mut element = Element::new("Message").with_attribute("nativeCode", "A<B");
        element.set_text("temp > 90 & rising");
        assert_eq!(
            element.to_fragment_string(),
            r#"<Message nativeCode="A&lt;B">temp &gt; 90 &amp; rising</Message>"#
        );
    }

    #[test]
    fn test_round_trip() {
        let input = r#"<CuttingTool assetId="EM233"><ToolLife type="MINUTES">120</ToolLife></CuttingTool>"#;
        let element = Element::parse_str(input).unwrap();
        assert_eq!(element.to_fragment_string(), input);
    }
}
