//! Reference-counted heap nodes
//!
//! Every heap value (string, list, hash, object) is a [`Node`]. A node
//! carries two lifetimes:
//!
//! - the *logical* reference count, driven by [`NodeRef`] handles through
//!   `ref`/`deref`; reaching zero runs type-specific teardown exactly once
//! - the *allocation*, owned by an `Arc`; it outlives teardown for as long
//!   as any structural holder (a scan, a lock pin) still points at it
//!
//! Teardown releases everything a node contains, which is also what breaks
//! `Arc` cycles between objects once the cycle scanner decides to collect.

mod display;
mod value;

pub use value::Value;

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::ExceptionSink;
use crate::object::Object;

/// Process-unique identity of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

impl NodeId {
    fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Type tag of a heap node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Mutable string
    String,
    /// Ordered list of values
    List,
    /// Insertion-ordered string-keyed map
    Hash,
    /// Class instance
    Object,
}

impl NodeType {
    /// Human-readable type name.
    pub fn name(self) -> &'static str {
        match self {
            NodeType::String => "string",
            NodeType::List => "list",
            NodeType::Hash => "hash",
            NodeType::Object => "object",
        }
    }
}

pub(crate) enum NodeBody {
    String(RwLock<String>),
    List(RwLock<Vec<Value>>),
    Hash(RwLock<IndexMap<String, Value>>),
    Object(Object),
}

/// A reference-counted heap value.
pub struct Node {
    id: NodeId,
    refs: AtomicUsize,
    pub(crate) body: NodeBody,
}

impl Node {
    pub(crate) fn new(body: NodeBody) -> Self {
        Self {
            id: NodeId::next(),
            refs: AtomicUsize::new(1),
            body,
        }
    }

    /// This node's identity.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Current logical reference count.
    pub fn reference_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// This node's type tag.
    pub fn node_type(&self) -> NodeType {
        match &self.body {
            NodeBody::String(_) => NodeType::String,
            NodeBody::List(_) => NodeType::List,
            NodeBody::Hash(_) => NodeType::Hash,
            NodeBody::Object(_) => NodeType::Object,
        }
    }

    pub(crate) fn as_object(&self) -> Option<&Object> {
        match &self.body {
            NodeBody::Object(obj) => Some(obj),
            _ => None,
        }
    }

    fn retain(&self) {
        let prev = self.refs.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev < usize::MAX / 2, "reference count overflow");
    }

    /// Drop one logical reference. Returns true if this was the last one
    /// and the node has been torn down.
    pub(crate) fn release(self: &Arc<Self>, sink: &mut ExceptionSink) -> bool {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "deref of node {} with no references", self.id);
        if prev == 1 {
            self.teardown(sink);
            return true;
        }
        if let NodeBody::Object(obj) = &self.body {
            obj.released_to(self, prev - 1, sink);
        }
        false
    }

    /// Drop one logical reference without running teardown. Returns the
    /// remaining count.
    pub(crate) fn release_quiet(&self) -> usize {
        self.refs.fetch_sub(1, Ordering::AcqRel) - 1
    }

    fn teardown(self: &Arc<Self>, sink: &mut ExceptionSink) {
        match &self.body {
            NodeBody::String(_) => {}
            NodeBody::List(items) => {
                let items = std::mem::take(&mut *items.write());
                for item in items {
                    item.discard(sink);
                }
            }
            NodeBody::Hash(map) => {
                let map = std::mem::take(&mut *map.write());
                for (_, item) in map {
                    item.discard(sink);
                }
            }
            NodeBody::Object(obj) => obj.destroy(self, sink),
        }
    }

    /// Copy the contents of a container into a fresh node with count 1.
    /// Objects are never copied.
    fn copy_container(&self) -> Option<NodeRef> {
        let body = match &self.body {
            NodeBody::String(s) => NodeBody::String(RwLock::new(s.read().clone())),
            NodeBody::List(items) => NodeBody::List(RwLock::new(items.read().clone())),
            NodeBody::Hash(map) => NodeBody::Hash(RwLock::new(map.read().clone())),
            NodeBody::Object(_) => return None,
        };
        Some(NodeRef::adopt(Arc::new(Node::new(body))))
    }
}

/// An owned logical reference to a [`Node`].
///
/// Cloning is `ref()`; [`NodeRef::deref`] gives the reference back and
/// reports teardown errors to the caller's sink. A handle that is simply
/// dropped still releases its reference, logging anything teardown raised.
pub struct NodeRef {
    node: Arc<Node>,
    released: bool,
}

impl NodeRef {
    /// Take ownership of a reference the count already includes.
    pub(crate) fn adopt(node: Arc<Node>) -> Self {
        Self {
            node,
            released: false,
        }
    }

    /// Create a new reference, incrementing the count.
    pub(crate) fn acquire(node: &Arc<Node>) -> Self {
        node.retain();
        Self::adopt(Arc::clone(node))
    }

    /// Release this reference. Returns true if it was the last one; the
    /// node has then been torn down.
    pub fn deref(mut self, sink: &mut ExceptionSink) -> bool {
        self.released = true;
        self.node.release(sink)
    }

    /// Give back a reference without triggering teardown. Returns the
    /// remaining count.
    pub(crate) fn release_quiet(mut self) -> usize {
        self.released = true;
        self.node.release_quiet()
    }

    /// Current logical reference count.
    pub fn reference_count(&self) -> usize {
        self.node.reference_count()
    }

    /// True if this is the only reference.
    pub fn is_unique(&self) -> bool {
        self.reference_count() == 1
    }

    /// Identity of the referenced node.
    pub fn id(&self) -> NodeId {
        self.node.id()
    }

    /// Type tag of the referenced node.
    pub fn node_type(&self) -> NodeType {
        self.node.node_type()
    }

    /// True if both handles refer to the same node.
    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    pub(crate) fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Replace `self` with a private copy if the node is shared, releasing
    /// the shared original. Objects are left as they are.
    pub fn ensure_unique(&mut self, sink: &mut ExceptionSink) {
        if self.is_unique() {
            return;
        }
        if let Some(copy) = self.node.copy_container() {
            let shared = std::mem::replace(self, copy);
            shared.deref(sink);
        }
    }
}

impl Clone for NodeRef {
    fn clone(&self) -> Self {
        NodeRef::acquire(&self.node)
    }
}

impl Drop for NodeRef {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut sink = ExceptionSink::new();
        self.node.release(&mut sink);
        sink.discard("implicit node deref");
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NodeRef({} {}, refs={})",
            self.node_type().name(),
            self.id(),
            self.reference_count()
        )
    }
}
