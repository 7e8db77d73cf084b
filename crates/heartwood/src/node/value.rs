//! Runtime values: inline scalars or references to heap nodes

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::{Node, NodeBody, NodeRef, NodeType};
use crate::error::ExceptionSink;
use crate::object::ObjectRef;

/// A value as stored in variables, members, and containers.
///
/// Scalars are stored inline; everything else is a counted reference to a
/// heap [`Node`].
#[derive(Clone, Default)]
pub enum Value {
    /// No value
    #[default]
    Nothing,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Reference to a heap node
    Node(NodeRef),
}

// ═══════════════════════════════════════════════════════════════════
// Construction
// ═══════════════════════════════════════════════════════════════════

impl Value {
    fn from_body(body: NodeBody) -> Self {
        Value::Node(NodeRef::adopt(Arc::new(Node::new(body))))
    }

    /// Create a string node.
    pub fn string(s: impl Into<String>) -> Self {
        Self::from_body(NodeBody::String(RwLock::new(s.into())))
    }

    /// Create a list node owning `items`.
    pub fn list(items: Vec<Value>) -> Self {
        Self::from_body(NodeBody::List(RwLock::new(items)))
    }

    /// Create a hash node owning the given entries.
    pub fn hash<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let map = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::from_body(NodeBody::Hash(RwLock::new(map)))
    }

    pub(crate) fn hash_from_map(map: IndexMap<String, Value>) -> Self {
        Self::from_body(NodeBody::Hash(RwLock::new(map)))
    }
}

// ═══════════════════════════════════════════════════════════════════
// Inspection
// ═══════════════════════════════════════════════════════════════════

impl Value {
    /// True for [`Value::Nothing`].
    pub fn is_nothing(&self) -> bool {
        matches!(self, Value::Nothing)
    }

    /// The runtime type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nothing => "nothing",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Node(n) => n.node_type().name(),
        }
    }

    /// The node type, if this value is a heap reference.
    pub fn node_type(&self) -> Option<NodeType> {
        self.as_node().map(NodeRef::node_type)
    }

    /// Borrow the node reference, if any.
    pub fn as_node(&self) -> Option<&NodeRef> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    /// Integer value, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float value, if this is a `Float`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Boolean value, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// A copy of the string contents, if this is a string node.
    pub fn as_string(&self) -> Option<String> {
        match &self.as_node()?.node().body {
            NodeBody::String(s) => Some(s.read().clone()),
            _ => None,
        }
    }

    /// A new reference to the object, if this is an object.
    pub fn as_object(&self) -> Option<ObjectRef> {
        self.as_node().and_then(|n| ObjectRef::from_node(n.clone()).ok())
    }

    /// Convert into an object reference, or give the value back.
    pub fn into_object(self) -> Result<ObjectRef, Value> {
        match self {
            Value::Node(n) => ObjectRef::from_node(n).map_err(Value::Node),
            other => Err(other),
        }
    }

    /// Number of elements in a list node.
    pub fn list_len(&self) -> Option<usize> {
        match &self.as_node()?.node().body {
            NodeBody::List(items) => Some(items.read().len()),
            _ => None,
        }
    }

    /// A new reference to a list element.
    pub fn list_get(&self, index: usize) -> Option<Value> {
        match &self.as_node()?.node().body {
            NodeBody::List(items) => items.read().get(index).cloned(),
            _ => None,
        }
    }

    /// A new reference to a hash entry.
    pub fn hash_get(&self, key: &str) -> Option<Value> {
        match &self.as_node()?.node().body {
            NodeBody::Hash(map) => map.read().get(key).cloned(),
            _ => None,
        }
    }

    /// Keys of a hash node, in insertion order.
    pub fn hash_keys(&self) -> Option<Vec<String>> {
        match &self.as_node()?.node().body {
            NodeBody::Hash(map) => Some(map.read().keys().cloned().collect()),
            _ => None,
        }
    }

    /// True if this value is an object or a container holding one.
    pub(crate) fn references_objects(&self) -> bool {
        let Some(node) = self.as_node() else {
            return false;
        };
        match &node.node().body {
            NodeBody::Object(_) => true,
            NodeBody::List(items) => items.read().iter().any(Value::references_objects),
            NodeBody::Hash(map) => map.read().values().any(Value::references_objects),
            NodeBody::String(_) => false,
        }
    }

    /// Identity for nodes, equality for scalars.
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Node(a), Value::Node(b)) => a.ptr_eq(b),
            (a, b) => a == b,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Release and copy-on-write mutation
// ═══════════════════════════════════════════════════════════════════

impl Value {
    /// Release this value, reporting teardown errors to `sink`.
    pub fn discard(self, sink: &mut ExceptionSink) {
        if let Value::Node(n) = self {
            n.deref(sink);
        }
    }

    /// Make sure a container node is referenced only by this value before
    /// it is mutated in place.
    pub fn ensure_unique(&mut self, sink: &mut ExceptionSink) {
        if let Value::Node(n) = self {
            n.ensure_unique(sink);
        }
    }

    /// Append to a list node. Returns false if this is not a list.
    pub fn list_push(&mut self, item: Value, sink: &mut ExceptionSink) -> bool {
        if self.node_type() != Some(NodeType::List) {
            item.discard(sink);
            return false;
        }
        self.ensure_unique(sink);
        if let Some(NodeBody::List(items)) = self.as_node().map(|n| &n.node().body) {
            items.write().push(item);
        }
        true
    }

    /// Set a hash entry, releasing any previous value. Returns false if
    /// this is not a hash.
    pub fn hash_set(&mut self, key: impl Into<String>, item: Value, sink: &mut ExceptionSink) -> bool {
        if self.node_type() != Some(NodeType::Hash) {
            item.discard(sink);
            return false;
        }
        self.ensure_unique(sink);
        let old = match self.as_node().map(|n| &n.node().body) {
            Some(NodeBody::Hash(map)) => map.write().insert(key.into(), item),
            _ => None,
        };
        if let Some(old) = old {
            old.discard(sink);
        }
        true
    }

    /// Append to a string node. Returns false if this is not a string.
    pub fn string_append(&mut self, suffix: &str, sink: &mut ExceptionSink) -> bool {
        if self.node_type() != Some(NodeType::String) {
            return false;
        }
        self.ensure_unique(sink);
        if let Some(NodeBody::String(s)) = self.as_node().map(|n| &n.node().body) {
            s.write().push_str(suffix);
        }
        true
    }
}

// ═══════════════════════════════════════════════════════════════════
// Conversions and equality
// ═══════════════════════════════════════════════════════════════════

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        obj.into_value()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nothing, Value::Nothing) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Node(a), Value::Node(b)) => {
                if a.ptr_eq(b) {
                    return true;
                }
                match (&a.node().body, &b.node().body) {
                    (NodeBody::String(x), NodeBody::String(y)) => *x.read() == *y.read(),
                    (NodeBody::List(x), NodeBody::List(y)) => *x.read() == *y.read(),
                    (NodeBody::Hash(x), NodeBody::Hash(y)) => *x.read() == *y.read(),
                    _ => false,
                }
            }
            _ => false,
        }
    }
}
