//! Arena node types for the document tree.

use std::fmt;

use compact_str::CompactString;
use indexmap::IndexMap;

/// Handle to a node in a [`Document`](super::Document).
///
/// The `stamp` is unique for the lifetime of the document, so a handle to a
/// removed node never resolves to whatever later reuses its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: usize,
    pub(crate) stamp: u64,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}.{}", self.index, self.stamp)
    }
}

/// Tag and attributes of an element. Names are stored lower-case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub tag: CompactString,
    pub attrs: IndexMap<CompactString, String>,
}

impl ElementData {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: CompactString::new(tag.to_ascii_lowercase()),
            attrs: IndexMap::new(),
        }
    }

    #[inline]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    #[inline]
    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    #[inline]
    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Element(ElementData),
    Text(String),
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) stamp: u64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) data: NodeData,
}

impl Node {
    #[inline]
    pub(crate) fn element(&self) -> Option<&ElementData> {
        match &self.data {
            NodeData::Element(el) => Some(el),
            NodeData::Text(_) => None,
        }
    }

    #[inline]
    pub(crate) fn element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.data {
            NodeData::Element(el) => Some(el),
            NodeData::Text(_) => None,
        }
    }
}
