//! Host document model.
//!
//! Export never renders into the nodes the user sees. It attaches its own
//! temporary nodes (the offscreen map container and the grid clone) to the
//! same document, placed outside the visible viewport, and must remove them
//! again. This module tracks attached nodes, who owns them and which event
//! listeners are bound, so that cleanup is observable.

use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Identifier of a node attached to a `Document`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

/// Identifier of one export run; temporary nodes are tagged with it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

/// Identifier of a bound event listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A node belonging to the live page (e.g. the grid container)
    Live,
    /// Container hosting an offscreen map surface
    OffscreenContainer,
    /// Deep copy of the grid made for capture
    GridClone,
}

/// Absolute placement of a node in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Placement {
    pub left: i32,
    pub top: i32,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Placement {
    /// Whether any part of the node intersects a viewport anchored at the origin
    pub fn intersects(&self, viewport: crate::Viewport) -> bool {
        let w = self.width.unwrap_or(0) as i64;
        let h = self.height.unwrap_or(0) as i64;
        let (l, t) = (self.left as i64, self.top as i64);
        l < viewport.width as i64 && t < viewport.height as i64 && l + w > 0 && t + h > 0
    }
}

/// What to attach
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub kind: NodeKind,
    pub html: String,
    pub classes: BTreeSet<String>,
    pub placement: Placement,
    pub owner: Option<RunId>,
}

impl NodeSpec {
    /// A live node holding the given markup; classes are taken from its root element
    pub fn live(html: impl Into<String>) -> Self {
        let html = html.into();
        let classes = root_classes(&html);
        Self { kind: NodeKind::Live, html, classes, placement: Placement::default(), owner: None }
    }
}

/// Read-only copy of an attached node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub html: String,
    pub classes: BTreeSet<String>,
    pub placement: Placement,
    pub owner: Option<RunId>,
}

#[derive(Debug, Clone)]
struct Listener {
    event: String,
    owner: u64,
}

#[derive(Debug, Default)]
struct DocumentInner {
    next_id: u64,
    nodes: BTreeMap<NodeId, NodeSnapshot>,
    listeners: BTreeMap<ListenerId, Listener>,
    created: BTreeMap<&'static str, usize>,
    unloaded: bool,
}

/// Shared handle to the host document. Cloning yields another handle to the same document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    inner: Arc<Mutex<DocumentInner>>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DocumentInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a node and return its id. Fails once the document has been unloaded.
    pub fn attach(&self, spec: NodeSpec) -> Result<NodeId> {
        let mut inner = self.lock();
        if inner.unloaded {
            return Err(Error::AttachError("document is unloaded".into()));
        }
        inner.next_id += 1;
        let id = NodeId(inner.next_id);
        *inner.created.entry(kind_key(spec.kind)).or_insert(0) += 1;
        inner.nodes.insert(
            id,
            NodeSnapshot {
                id,
                kind: spec.kind,
                html: spec.html,
                classes: spec.classes,
                placement: spec.placement,
                owner: spec.owner,
            },
        );
        log::trace!("attached {:?} as {:?}", spec.kind, id);
        Ok(id)
    }

    /// Attach a node whose lifetime is bound to the returned guard
    pub fn attach_scoped(&self, spec: NodeSpec) -> Result<AttachedNode> {
        let id = self.attach(spec)?;
        Ok(AttachedNode { document: self.clone(), id })
    }

    /// Remove a node. Returns false when it was not attached.
    pub fn detach(&self, id: NodeId) -> bool {
        let removed = self.lock().nodes.remove(&id).is_some();
        if removed {
            log::trace!("detached {:?}", id);
        }
        removed
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        self.lock().nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<NodeSnapshot> {
        self.lock().nodes.get(&id).cloned()
    }

    pub fn attached_count(&self) -> usize {
        self.lock().nodes.len()
    }

    /// Number of currently attached nodes of a kind
    pub fn attached_of_kind(&self, kind: NodeKind) -> usize {
        self.lock().nodes.values().filter(|n| n.kind == kind).count()
    }

    /// Number of nodes of a kind ever attached to this document
    pub fn created_of_kind(&self, kind: NodeKind) -> usize {
        self.lock().created.get(kind_key(kind)).copied().unwrap_or(0)
    }

    /// Detach every node still owned by `run`; returns how many were removed
    pub fn detach_owned_by(&self, run: RunId) -> usize {
        let mut inner = self.lock();
        let before = inner.nodes.len();
        inner.nodes.retain(|_, n| n.owner != Some(run));
        before - inner.nodes.len()
    }

    /// Bind a listener for `event` on behalf of `owner`
    pub fn add_listener(&self, event: &str, owner: u64) -> ListenerId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.listeners.insert(id, Listener { event: event.to_string(), owner });
        id
    }

    /// Unbind every listener of `owner`; returns how many were removed
    pub fn remove_listeners(&self, owner: u64) -> usize {
        let mut inner = self.lock();
        let before = inner.listeners.len();
        inner.listeners.retain(|_, l| l.owner != owner);
        before - inner.listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn listeners_for(&self, event: &str) -> usize {
        self.lock().listeners.values().filter(|l| l.event == event).count()
    }

    /// Stop accepting new nodes (page teardown)
    pub fn unload(&self) {
        self.lock().unloaded = true;
    }
}

fn kind_key(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Live => "live",
        NodeKind::OffscreenContainer => "offscreen",
        NodeKind::GridClone => "grid-clone",
    }
}

/// Classes declared on the first element of a markup fragment
pub fn root_classes(html: &str) -> BTreeSet<String> {
    let fragment = scraper::Html::parse_fragment(html);
    fragment
        .root_element()
        .children()
        .find_map(scraper::ElementRef::wrap)
        .map(|el| el.value().classes().map(str::to_string).collect())
        .unwrap_or_default()
}

/// A node that is detached when the guard drops
#[derive(Debug)]
pub struct AttachedNode {
    document: Document,
    id: NodeId,
}

impl AttachedNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Detach now. Returns false if something else already removed the node.
    pub fn remove(self) -> bool {
        self.document.detach(self.id)
    }
}

impl Drop for AttachedNode {
    fn drop(&mut self) {
        self.document.detach(self.id);
    }
}
