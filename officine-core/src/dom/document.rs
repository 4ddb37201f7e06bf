//! `src/dom/document.rs`
//! ============================================================================
//! # Document: the in-process document tree
//!
//! A cheaply clonable handle over an arena of element and text nodes. Besides
//! queries and mutations it provides the three host signals the runtime needs:
//! - **mount notifications**: every markup insertion is published on a
//!   broadcast channel, so code waiting for a subtree can react to the swap
//!   instead of sleeping blindly;
//! - **readiness**: the "initial load finished" flag;
//! - **events**: listeners on nodes or on the document, with bubbling and a
//!   prevent-default flag.
//!
//! Locks are never held while listeners run, so listeners may freely query
//! and mutate the document.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use compact_str::CompactString;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use slab::Slab;
use tokio::sync::{broadcast, watch};
use tracing::trace;

use super::markup::{self, ParsedNode};
use super::node::{ElementData, Node, NodeData, NodeId};
use super::selector::Selector;
use crate::error::{AppError, AppResult};

const MOUNT_CHANNEL_CAPACITY: usize = 256;
const ROOT_TAG: &str = "#document";

/// Published after markup has been inserted under `parent`.
#[derive(Debug, Clone)]
pub struct MountEvent {
    pub parent: NodeId,
    pub inserted: Vec<NodeId>,
}

/// Where a listener is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Document,
    Node(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&DomEvent) + Send + Sync>;

/// An event travelling from its target up to the document.
#[derive(Debug)]
pub struct DomEvent {
    event_type: CompactString,
    target: NodeId,
    default_prevented: AtomicBool,
    propagation_stopped: AtomicBool,
}

impl DomEvent {
    fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: CompactString::new(event_type),
            target,
            default_prevented: AtomicBool::new(false),
            propagation_stopped: AtomicBool::new(false),
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn prevent_default(&self) {
        self.default_prevented.store(true, Ordering::Relaxed);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.load(Ordering::Relaxed)
    }

    pub fn stop_propagation(&self) {
        self.propagation_stopped.store(true, Ordering::Relaxed);
    }

    fn propagation_stopped(&self) -> bool {
        self.propagation_stopped.load(Ordering::Relaxed)
    }
}

struct ListenerEntry {
    target: EventTarget,
    event_type: CompactString,
    callback: Listener,
}

struct Tree {
    nodes: Slab<Node>,
    next_stamp: u64,
    root: NodeId,
}

impl Tree {
    fn new() -> Self {
        let mut nodes: Slab<Node> = Slab::new();
        let index: usize = nodes.insert(Node {
            stamp: 0,
            parent: None,
            children: Vec::new(),
            data: NodeData::Element(ElementData::new(ROOT_TAG)),
        });
        Self {
            nodes,
            next_stamp: 1,
            root: NodeId { index, stamp: 0 },
        }
    }

    #[inline]
    fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index).filter(|node| node.stamp == id.stamp)
    }

    #[inline]
    fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.index)
            .filter(|node| node.stamp == id.stamp)
    }

    fn require(&self, id: NodeId) -> AppResult<&Node> {
        self.get(id).ok_or_else(|| AppError::StaleNode(id.to_string()))
    }

    fn element(&self, id: NodeId) -> Option<&ElementData> {
        self.get(id).and_then(Node::element)
    }

    fn alloc(&mut self, data: NodeData, parent: NodeId) -> NodeId {
        let stamp: u64 = self.next_stamp;
        self.next_stamp += 1;
        let index: usize = self.nodes.insert(Node {
            stamp,
            parent: Some(parent),
            children: Vec::new(),
            data,
        });
        NodeId { index, stamp }
    }

    /// Builds `parsed` under `parent` without linking it into the parent's
    /// child list.
    fn build(&mut self, parsed: ParsedNode, parent: NodeId) -> NodeId {
        match parsed {
            ParsedNode::Text(text) => self.alloc(NodeData::Text(text), parent),
            ParsedNode::Element {
                tag,
                attrs,
                children,
            } => {
                let element = ElementData {
                    tag,
                    attrs: attrs.into_iter().collect(),
                };
                let id: NodeId = self.alloc(NodeData::Element(element), parent);
                let child_ids: Vec<NodeId> = children
                    .into_iter()
                    .map(|child| self.build(child, id))
                    .collect();
                if let Some(node) = self.get_mut(id) {
                    node.children = child_ids;
                }
                id
            }
        }
    }

    fn build_all(&mut self, markup: &str, parent: NodeId) -> Vec<NodeId> {
        markup::parse_fragment(markup)
            .into_iter()
            .map(|parsed| self.build(parsed, parent))
            .collect()
    }

    fn remove_subtree(&mut self, id: NodeId, removed: &mut Vec<NodeId>) {
        if self.get(id).is_none() {
            return;
        }
        let node: Node = self.nodes.remove(id.index);
        removed.push(id);
        for child in node.children {
            self.remove_subtree(child, removed);
        }
    }

    fn clear_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children: Vec<NodeId> = self
            .get_mut(id)
            .map(|node| std::mem::take(&mut node.children))
            .unwrap_or_default();
        let mut removed: Vec<NodeId> = Vec::new();
        for child in children {
            self.remove_subtree(child, &mut removed);
        }
        removed
    }

    /// Preorder descendants of `scope`, excluding `scope` itself.
    fn descendants(&self, scope: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        let mut stack: Vec<NodeId> = match self.get(scope) {
            Some(node) => node.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(id) = stack.pop() {
            if let Some(node) = self.get(id) {
                out.push(id);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    fn ancestors_inclusive(&self, id: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        let mut current: Option<NodeId> = self.get(id).map(|_| id);
        while let Some(node_id) = current {
            out.push(node_id);
            current = self.get(node_id).and_then(|node| node.parent);
        }
        out
    }

    fn write_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        match &node.data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Element(_) => {
                for child in &node.children {
                    self.write_text(*child, out);
                }
            }
        }
    }

    fn write_children(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        let raw: bool = node
            .element()
            .is_some_and(|el| markup::is_raw_text(&el.tag) && el.tag != "textarea");
        for child in &node.children {
            match self.get(*child).map(|n| &n.data) {
                Some(NodeData::Text(text)) if raw => out.push_str(text),
                _ => self.write_node(*child, out),
            }
        }
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.get(id) else { return };
        match &node.data {
            NodeData::Text(text) => out.push_str(&markup::escape_text(text)),
            NodeData::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attrs {
                    out.push(' ');
                    out.push_str(name);
                    if !value.is_empty() {
                        out.push_str("=\"");
                        out.push_str(&markup::escape_attr(value));
                        out.push('"');
                    }
                }
                out.push('>');
                if markup::is_void(&el.tag) {
                    return;
                }
                self.write_children(id, out);
                out.push_str("</");
                out.push_str(&el.tag);
                out.push('>');
            }
        }
    }
}

struct DocumentInner {
    tree: RwLock<Tree>,
    listeners: Mutex<IndexMap<u64, ListenerEntry>>,
    next_listener: AtomicU64,
    mounts: broadcast::Sender<MountEvent>,
    loaded: watch::Sender<bool>,
}

/// Shared handle to a document tree.
#[derive(Clone)]
pub struct Document {
    inner: Arc<DocumentInner>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("nodes", &self.inner.tree.read().nodes.len())
            .field("listeners", &self.inner.listeners.lock().len())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty shell with `html`, `head` and `body`.
    pub fn new() -> Self {
        Self::parse("<html><head></head><body></body></html>")
    }

    /// Builds a document from markup.
    pub fn parse(markup: &str) -> Self {
        let mut tree: Tree = Tree::new();
        let root: NodeId = tree.root;
        let children: Vec<NodeId> = tree.build_all(markup, root);
        if let Some(node) = tree.get_mut(root) {
            node.children = children;
        }

        let (mounts, _) = broadcast::channel(MOUNT_CHANNEL_CAPACITY);
        let (loaded, _) = watch::channel(false);

        Self {
            inner: Arc::new(DocumentInner {
                tree: RwLock::new(tree),
                listeners: Mutex::new(IndexMap::new()),
                next_listener: AtomicU64::new(1),
                mounts,
                loaded,
            }),
        }
    }

    pub fn root(&self) -> NodeId {
        self.inner.tree.read().root
    }

    /// The `body` element, or the root for body-less documents.
    pub fn body(&self) -> NodeId {
        let root: NodeId = self.root();
        self.query_first(root, &Selector::tag("body"))
            .unwrap_or(root)
    }

    /// Whether the handle still refers to a node of this document.
    pub fn contains(&self, id: NodeId) -> bool {
        self.inner.tree.read().get(id).is_some()
    }

    pub fn element(&self, id: NodeId) -> Option<ElementData> {
        self.inner.tree.read().element(id).cloned()
    }

    pub fn tag_name(&self, id: NodeId) -> Option<CompactString> {
        self.inner.tree.read().element(id).map(|el| el.tag.clone())
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<String> {
        self.inner
            .tree
            .read()
            .element(id)
            .and_then(|el| el.attr(name).map(str::to_string))
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.inner
            .tree
            .read()
            .element(id)
            .is_some_and(|el| el.has_attr(name))
    }

    pub fn set_attr(&self, id: NodeId, name: &str, value: &str) -> AppResult<()> {
        let mut tree = self.inner.tree.write();
        let element: &mut ElementData = tree
            .get_mut(id)
            .and_then(Node::element_mut)
            .ok_or_else(|| AppError::StaleNode(id.to_string()))?;
        element.attrs.insert(
            CompactString::new(name.to_ascii_lowercase()),
            value.to_string(),
        );
        Ok(())
    }

    /// Returns whether the attribute was present.
    pub fn remove_attr(&self, id: NodeId, name: &str) -> AppResult<bool> {
        let mut tree = self.inner.tree.write();
        let element: &mut ElementData = tree
            .get_mut(id)
            .and_then(Node::element_mut)
            .ok_or_else(|| AppError::StaleNode(id.to_string()))?;
        Ok(element.attrs.shift_remove(name).is_some())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.inner.tree.read().get(id).and_then(|node| node.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.inner
            .tree
            .read()
            .get(id)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.query_first(self.root(), &Selector::id(id))
    }

    /// First element under `scope` (document order) matching `selector`.
    pub fn query_first(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        let tree = self.inner.tree.read();
        tree.descendants(scope)
            .into_iter()
            .find(|id| tree.element(*id).is_some_and(|el| selector.matches(el)))
    }

    /// Every element under `scope` (document order) matching `selector`.
    pub fn query_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        let tree = self.inner.tree.read();
        tree.descendants(scope)
            .into_iter()
            .filter(|id| tree.element(*id).is_some_and(|el| selector.matches(el)))
            .collect()
    }

    /// Nearest inclusive ancestor matching `selector`.
    pub fn closest(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        let tree = self.inner.tree.read();
        tree.ancestors_inclusive(id)
            .into_iter()
            .find(|node| tree.element(*node).is_some_and(|el| selector.matches(el)))
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out: String = String::new();
        self.inner.tree.read().write_text(id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out: String = String::new();
        self.inner.tree.read().write_children(id, &mut out);
        out
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out: String = String::new();
        self.inner.tree.read().write_node(id, &mut out);
        out
    }

    /// Replaces the children of `id` with parsed `markup`.
    pub fn set_inner_html(&self, id: NodeId, markup: &str) -> AppResult<Vec<NodeId>> {
        let (inserted, removed) = {
            let mut tree = self.inner.tree.write();
            tree.require(id)?;
            let removed: Vec<NodeId> = tree.clear_children(id);
            let inserted: Vec<NodeId> = tree.build_all(markup, id);
            if let Some(node) = tree.get_mut(id) {
                node.children = inserted.clone();
            }
            (inserted, removed)
        };

        self.prune_listeners(&removed);
        self.publish_mount(id, &inserted);
        Ok(inserted)
    }

    /// Appends parsed `markup` after the existing children of `id`.
    pub fn append_html(&self, id: NodeId, markup: &str) -> AppResult<Vec<NodeId>> {
        let inserted: Vec<NodeId> = {
            let mut tree = self.inner.tree.write();
            tree.require(id)?;
            let inserted: Vec<NodeId> = tree.build_all(markup, id);
            if let Some(node) = tree.get_mut(id) {
                node.children.extend(inserted.iter().copied());
            }
            inserted
        };

        self.publish_mount(id, &inserted);
        Ok(inserted)
    }

    /// Replaces the node `id` itself with parsed `markup`, in place.
    pub fn replace_with_html(&self, id: NodeId, markup: &str) -> AppResult<Vec<NodeId>> {
        let (parent, inserted, removed) = {
            let mut tree = self.inner.tree.write();
            let parent: NodeId = tree
                .require(id)?
                .parent
                .ok_or_else(|| AppError::Other("cannot replace the document root".into()))?;

            let inserted: Vec<NodeId> = tree.build_all(markup, parent);
            if let Some(parent_node) = tree.get_mut(parent) {
                if let Some(position) = parent_node.children.iter().position(|c| *c == id) {
                    let tail: Vec<NodeId> = parent_node.children.split_off(position + 1);
                    parent_node.children.pop();
                    parent_node.children.extend(inserted.iter().copied());
                    parent_node.children.extend(tail);
                }
            }

            let mut removed: Vec<NodeId> = Vec::new();
            tree.remove_subtree(id, &mut removed);
            (parent, inserted, removed)
        };

        self.prune_listeners(&removed);
        self.publish_mount(parent, &inserted);
        Ok(inserted)
    }

    /// Receives every subsequent markup insertion.
    pub fn subscribe_mounts(&self) -> broadcast::Receiver<MountEvent> {
        self.inner.mounts.subscribe()
    }

    fn publish_mount(&self, parent: NodeId, inserted: &[NodeId]) {
        trace!("mount under {parent}: {} node(s)", inserted.len());
        // no subscribers is fine
        let _ = self.inner.mounts.send(MountEvent {
            parent,
            inserted: inserted.to_vec(),
        });
    }

    /// Signals that the initial document load has finished.
    pub fn mark_loaded(&self) {
        self.inner.loaded.send_replace(true);
    }

    pub fn is_loaded(&self) -> bool {
        *self.inner.loaded.borrow()
    }

    /// Resolves once [`mark_loaded`](Self::mark_loaded) has been called.
    pub async fn wait_loaded(&self) {
        let mut rx: watch::Receiver<bool> = self.inner.loaded.subscribe();
        // the sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|loaded| *loaded).await;
    }

    pub fn add_listener(
        &self,
        target: EventTarget,
        event_type: &str,
        callback: Listener,
    ) -> ListenerId {
        let id: u64 = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(
            id,
            ListenerEntry {
                target,
                event_type: CompactString::new(event_type),
                callback,
            },
        );
        ListenerId(id)
    }

    /// Returns whether the listener was still attached.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.lock().shift_remove(&id.0).is_some()
    }

    pub fn listener_count(&self, target: EventTarget, event_type: &str) -> usize {
        self.inner
            .listeners
            .lock()
            .values()
            .filter(|entry| entry.target == target && entry.event_type == event_type)
            .count()
    }

    fn prune_listeners(&self, removed: &[NodeId]) {
        if removed.is_empty() {
            return;
        }
        let gone: HashSet<NodeId> = removed.iter().copied().collect();
        self.inner.listeners.lock().retain(|_, entry| match entry.target {
            EventTarget::Node(node) => !gone.contains(&node),
            EventTarget::Document => true,
        });
    }

    fn listeners_for(&self, target: EventTarget, event_type: &str) -> Vec<Listener> {
        self.inner
            .listeners
            .lock()
            .values()
            .filter(|entry| entry.target == target && entry.event_type == event_type)
            .map(|entry| Arc::clone(&entry.callback))
            .collect()
    }

    /// Fires `event_type` at `target`, bubbling up to the document.
    ///
    /// Events aimed at nodes outside the document reach no listener.
    pub fn dispatch(&self, target: NodeId, event_type: &str) -> DomEvent {
        let event: DomEvent = DomEvent::new(event_type, target);
        let path: Vec<NodeId> = self.inner.tree.read().ancestors_inclusive(target);
        if path.is_empty() {
            return event;
        }

        for node in path {
            for listener in self.listeners_for(EventTarget::Node(node), event_type) {
                listener(&event);
            }
            if event.propagation_stopped() {
                return event;
            }
        }
        for listener in self.listeners_for(EventTarget::Document, event_type) {
            listener(&event);
        }
        event
    }

    pub fn click(&self, target: NodeId) -> DomEvent {
        self.dispatch(target, "click")
    }

    pub fn submit(&self, form: NodeId) -> DomEvent {
        self.dispatch(form, "submit")
    }
}

/// An element together with the document it lives in.
#[derive(Debug, Clone)]
pub struct ElementRef {
    document: Document,
    node: NodeId,
}

impl ElementRef {
    pub fn new(document: Document, node: NodeId) -> Self {
        Self { document, node }
    }

    #[inline]
    pub fn node(&self) -> NodeId {
        self.node
    }

    #[inline]
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn is_connected(&self) -> bool {
        self.document.contains(self.node)
    }

    pub fn id(&self) -> Option<String> {
        self.attr("id")
    }

    pub fn attr(&self, name: &str) -> Option<String> {
        self.document.attr(self.node, name)
    }

    pub fn set_attr(&self, name: &str, value: &str) -> AppResult<()> {
        self.document.set_attr(self.node, name, value)
    }

    pub fn query_first(&self, selector: &Selector) -> Option<NodeId> {
        self.document.query_first(self.node, selector)
    }

    pub fn outer_html(&self) -> String {
        self.document.outer_html(self.node)
    }
}
