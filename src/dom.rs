//! A small owned node tree standing in for the rendered card.
//!
//! Captures never rasterize the live tree. They take a deep [`Clone`] of it,
//! strip sub-resources that must not load during capture
//! ([`DISALLOWED_TAGS`]), lock its size, and hand the detached copy to the
//! rasterizer.

use std::collections::BTreeMap;

/// Id of the element that is captured.
pub const CAPTURE_AREA_ID: &str = "capture-area";

/// Id of the element holding the card's text.
pub const CONTENT_ID: &str = "content-text";

/// Elements removed from every capture clone.
pub const DISALLOWED_TAGS: &[&str] = &["script", "iframe", "object", "embed"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn element(tag: impl Into<String>) -> Self {
        Node::Element(Element {
            tag: tag.into().to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Node::Text(text.into())
    }

    /// Builder-style attribute setter; no-op on text nodes.
    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_id(self, id: &str) -> Self {
        self.with_attr("id", id)
    }

    /// Builder-style child append; no-op on text nodes.
    pub fn with_child(mut self, child: Node) -> Self {
        if let Node::Element(el) = &mut self {
            el.children.push(child);
        }
        self
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        if let Node::Element(el) = self {
            el.attrs.insert(name.to_string(), value.into());
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        match self {
            Node::Element(el) => el.attrs.get(name).map(String::as_str),
            Node::Text(_) => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Node::Element(el) => Some(el.tag.as_str()),
            Node::Text(_) => None,
        }
    }

    /// Concatenated text of this node and all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            Node::Text(t) => out.push_str(t),
            Node::Element(el) => el.children.iter().for_each(|c| c.collect_text(out)),
        }
    }

    /// Replace all children with a single text node.
    pub fn set_text_content(&mut self, text: &str) {
        match self {
            Node::Text(t) => *t = text.to_string(),
            Node::Element(el) => el.children = vec![Node::text(text)],
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Node> {
        if self.attr("id") == Some(id) {
            return Some(self);
        }
        match self {
            Node::Element(el) => el.children.iter().find_map(|c| c.find_by_id(id)),
            Node::Text(_) => None,
        }
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Node> {
        if self.attr("id") == Some(id) {
            return Some(self);
        }
        match self {
            Node::Element(el) => el.children.iter_mut().find_map(|c| c.find_by_id_mut(id)),
            Node::Text(_) => None,
        }
    }

    /// Remove every descendant whose tag is in [`DISALLOWED_TAGS`].
    /// Returns how many subtrees were removed.
    pub fn strip_disallowed(&mut self) -> usize {
        let Node::Element(el) = self else {
            return 0;
        };
        let before = el.children.len();
        el.children
            .retain(|c| !c.tag().is_some_and(|t| DISALLOWED_TAGS.contains(&t)));
        let mut removed = before - el.children.len();
        for child in &mut el.children {
            removed += child.strip_disallowed();
        }
        removed
    }

    /// The text the card shows: the content element's text when present,
    /// otherwise the whole subtree's.
    pub fn card_text(&self) -> String {
        self.find_by_id(CONTENT_ID)
            .map(Node::text_content)
            .unwrap_or_else(|| self.text_content())
    }
}

/// The standard card: `#capture-area > #content-text > text`.
pub fn card(content: &str) -> Node {
    Node::element("div")
        .with_id(CAPTURE_AREA_ID)
        .with_child(
            Node::element("div")
                .with_id(CONTENT_ID)
                .with_child(Node::text(content)),
        )
}
