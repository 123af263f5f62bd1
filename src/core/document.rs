//! Document capability - the handful of DOM operations the page stamp needs
//!
//! The browser implementation lives in `web`; `MemoryDocument` is a small
//! arena-backed tree used on native targets and in tests.

use thiserror::Error;
use tracing::trace;

/// Failure reported by a document implementation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// The host rejected the operation (e.g. a `web-sys` call returned `Err`)
    #[error("host document error: {0}")]
    Host(String),
    /// A node handle that this document never produced
    #[error("unknown node")]
    UnknownNode,
}

/// Element creation, lookup by id and child-list mutation
pub trait Document {
    type Node: Clone;

    fn create_element(&mut self, tag: &str) -> Result<Self::Node, DocumentError>;
    fn set_class_name(&mut self, node: &Self::Node, class: &str) -> Result<(), DocumentError>;
    fn set_text_content(&mut self, node: &Self::Node, text: &str) -> Result<(), DocumentError>;
    fn get_element_by_id(&self, id: &str) -> Option<Self::Node>;
    fn append_child(&mut self, parent: &Self::Node, child: &Self::Node)
        -> Result<(), DocumentError>;
}

/// Handle into a `MemoryDocument`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Default)]
struct Element {
    tag: String,
    id: Option<String>,
    class: Option<String>,
    text: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// In-memory document tree
///
/// Index 0 is always `<body>`. Detached elements stay in the arena but are not
/// reachable from the body and never match id lookups.
#[derive(Debug)]
pub struct MemoryDocument {
    nodes: Vec<Element>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    /// Empty document with just a `<body>`
    pub fn new() -> Self {
        Self {
            nodes: vec![Element {
                tag: "body".to_string(),
                ..Default::default()
            }],
        }
    }

    /// Document whose body holds one empty `<div>` per id, in order
    pub fn with_containers(ids: &[&str]) -> Self {
        let mut doc = Self::new();
        for id in ids {
            let div = doc.push_element("div");
            doc.nodes[div].id = Some(id.to_string());
            doc.attach(0, div);
        }
        doc
    }

    pub fn body(&self) -> NodeId {
        NodeId(0)
    }

    /// Attach an id to an element (page markup stand-in)
    pub fn set_id(&mut self, node: NodeId, id: &str) -> Result<(), DocumentError> {
        self.node_mut(node)?.id = Some(id.to_string());
        Ok(())
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(node.0)
            .map(|n| n.children.iter().copied().map(NodeId).collect())
            .unwrap_or_default()
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0).map(|n| n.tag.as_str())
    }

    pub fn class_name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0)?.class.as_deref()
    }

    pub fn text_content(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.0)?.text.as_deref()
    }

    /// Number of elements reachable from `<body>`, body included
    pub fn element_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![0];
        while let Some(idx) = stack.pop() {
            count += 1;
            stack.extend(self.nodes[idx].children.iter().copied());
        }
        count
    }

    /// Serialize the attached tree starting at `<body>`
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(0, &mut out);
        out
    }

    fn write_html(&self, idx: usize, out: &mut String) {
        let node = &self.nodes[idx];
        out.push('<');
        out.push_str(&node.tag);
        if let Some(id) = &node.id {
            out.push_str(" id=\"");
            out.push_str(&escape_attr(id));
            out.push('"');
        }
        if let Some(class) = &node.class {
            out.push_str(" class=\"");
            out.push_str(&escape_attr(class));
            out.push('"');
        }
        out.push('>');
        if let Some(text) = &node.text {
            out.push_str(&escape_text(text));
        }
        for &child in &node.children {
            self.write_html(child, out);
        }
        out.push_str("</");
        out.push_str(&node.tag);
        out.push('>');
    }

    fn push_element(&mut self, tag: &str) -> usize {
        self.nodes.push(Element {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        });
        self.nodes.len() - 1
    }

    fn attach(&mut self, parent: usize, child: usize) {
        if let Some(old) = self.nodes[child].parent.take() {
            self.nodes[old].children.retain(|&c| c != child);
        }
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut Element, DocumentError> {
        self.nodes.get_mut(node.0).ok_or(DocumentError::UnknownNode)
    }

    fn is_ancestor(&self, ancestor: usize, mut idx: usize) -> bool {
        loop {
            if idx == ancestor {
                return true;
            }
            match self.nodes[idx].parent {
                Some(p) => idx = p,
                None => return false,
            }
        }
    }
}

impl Document for MemoryDocument {
    type Node = NodeId;

    fn create_element(&mut self, tag: &str) -> Result<NodeId, DocumentError> {
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(DocumentError::Host(format!("invalid tag name '{tag}'")));
        }
        let idx = self.push_element(tag);
        trace!(tag, idx, "Element created");
        Ok(NodeId(idx))
    }

    fn set_class_name(&mut self, node: &NodeId, class: &str) -> Result<(), DocumentError> {
        self.node_mut(*node)?.class = Some(class.to_string());
        Ok(())
    }

    fn set_text_content(&mut self, node: &NodeId, text: &str) -> Result<(), DocumentError> {
        let element = self.node_mut(*node)?;
        element.text = Some(text.to_string());
        // Setting textContent replaces every child
        let children = std::mem::take(&mut element.children);
        for child in children {
            self.nodes[child].parent = None;
        }
        Ok(())
    }

    fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        // Depth-first pre-order is document order
        let mut stack = vec![0];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if node.id.as_deref() == Some(id) {
                return Some(NodeId(idx));
            }
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }

    fn append_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<(), DocumentError> {
        if parent.0 >= self.nodes.len() || child.0 >= self.nodes.len() {
            return Err(DocumentError::UnknownNode);
        }
        if self.is_ancestor(child.0, parent.0) {
            return Err(DocumentError::Host(
                "the new child is an ancestor of the parent".to_string(),
            ));
        }
        self.attach(parent.0, child.0);
        trace!(parent = parent.0, child = child.0, "Child appended");
        Ok(())
    }
}

fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
