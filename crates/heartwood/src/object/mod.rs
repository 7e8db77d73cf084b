//! Class instances
//!
//! An object is a [`Node`] whose body carries class-derived behavior and a
//! keyed member map. Besides the ordinary reference count inherited from
//! the node, it tracks:
//!
//! - a lifecycle state, `Live` or `Deleted`; the member map only exists
//!   while live, so "use after delete" is an exhaustive match rather than a
//!   flag check
//! - a structural count that keeps the allocation accounted as alive while
//!   destructors run, a lock chain pins it, or a reference variable aliases it
//! - its recursive set, if the cycle scanner found it on a cycle, and the
//!   number of references that come from inside that set

mod class;
mod lifecycle;
mod private;

pub use class::{ClassBuilder, ClassDescriptor, ClassId, MethodBody};
pub use lifecycle::StructuralRef;
pub use private::PrivateData;

pub(crate) use private::KeyList;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::cycle::{self, RecursiveSet};
use crate::error::{CoreError, ExceptionSink};
use crate::heap::{Counters, HeapShared};
use crate::lock::{LockChain, TieredMutex};
use crate::node::{Node, NodeBody, NodeId, NodeRef, NodeType, Value};
use crate::program::ProgramRef;

/// Lifecycle status of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    /// Constructed and usable
    Ok,
    /// Destroyed; members and private data have been released
    Deleted,
}

/// Where a member access originates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// From the class's own methods; private members are visible
    Internal,
    /// From outside the class
    External,
}

pub(crate) enum ObjectState {
    Live {
        members: IndexMap<String, Value>,
        private: KeyList,
    },
    Deleted,
}

#[derive(Default)]
pub(crate) struct Recursion {
    pub(crate) set: Option<Arc<RecursiveSet>>,
    /// References to this object held by other members of `set`
    pub(crate) rcount: usize,
}

pub(crate) struct Object {
    class: Arc<ClassDescriptor>,
    pub(crate) heap: Arc<HeapShared>,
    pub(crate) state: RwLock<ObjectState>,
    deleted: AtomicBool,
    gate: TieredMutex,
    program: Mutex<Option<ProgramRef>>,
    structural: AtomicUsize,
    pub(crate) in_destructor: AtomicBool,
    /// Thread currently scanning this object, or 0
    pub(crate) rsection: AtomicU64,
    pub(crate) recursion: Mutex<Recursion>,
}

impl Object {
    fn new(class: &Arc<ClassDescriptor>, heap: &Arc<HeapShared>, program: Option<ProgramRef>) -> Self {
        Counters::bump(&heap.counters.live_objects);
        Self {
            class: Arc::clone(class),
            heap: Arc::clone(heap),
            state: RwLock::new(ObjectState::Live {
                members: IndexMap::new(),
                private: KeyList::default(),
            }),
            deleted: AtomicBool::new(false),
            gate: TieredMutex::new(format!("lock of object of class '{}'", class.name())),
            program: Mutex::new(program),
            structural: AtomicUsize::new(1),
            in_destructor: AtomicBool::new(false),
            rsection: AtomicU64::new(0),
            recursion: Mutex::new(Recursion::default()),
        }
    }

    pub(crate) fn class_name(&self) -> &str {
        self.class.name()
    }

    pub(crate) fn status(&self) -> ObjectStatus {
        if self.deleted.load(Ordering::Acquire) {
            ObjectStatus::Deleted
        } else {
            ObjectStatus::Ok
        }
    }

    fn deleted_error(&self, action: &'static str) -> CoreError {
        CoreError::ObjectDeleted {
            class: self.class.name().to_string(),
            action,
        }
    }
}

/// An owned reference to an object.
///
/// Like [`NodeRef`], cloning takes a reference and [`ObjectRef::deref`]
/// gives it back.
#[derive(Clone)]
pub struct ObjectRef(NodeRef);

/// A handle that observes an object without holding a reference.
#[derive(Clone)]
pub struct ObjectWatch {
    node: Weak<Node>,
}

impl ObjectWatch {
    /// Status of the object, or `None` once its memory has been freed.
    pub fn status(&self) -> Option<ObjectStatus> {
        let node = self.node.upgrade()?;
        node.as_object().map(Object::status)
    }

    /// Current reference count, or `None` once its memory has been freed.
    pub fn reference_count(&self) -> Option<usize> {
        self.node.upgrade().map(|n| n.reference_count())
    }
}

// ═══════════════════════════════════════════════════════════════════
// Identity and conversion
// ═══════════════════════════════════════════════════════════════════

impl ObjectRef {
    pub(crate) fn allocate(
        class: &Arc<ClassDescriptor>,
        heap: &Arc<HeapShared>,
        program: Option<ProgramRef>,
    ) -> Self {
        let obj = Object::new(class, heap, program);
        let node = Arc::new(Node::new(NodeBody::Object(obj)));
        ObjectRef(NodeRef::adopt(node))
    }

    /// Wrap a node reference, giving it back if it is not an object.
    pub(crate) fn from_node(node: NodeRef) -> Result<Self, NodeRef> {
        if node.node_type() == NodeType::Object {
            Ok(ObjectRef(node))
        } else {
            Err(node)
        }
    }

    /// Take a new reference to an object node.
    pub(crate) fn acquire(node: &Arc<Node>) -> Self {
        ObjectRef(NodeRef::acquire(node))
    }

    fn obj(&self) -> &Object {
        match self.0.node().as_object() {
            Some(obj) => obj,
            None => unreachable!("ObjectRef always wraps an object node"),
        }
    }

    /// The object's class.
    pub fn class(&self) -> &Arc<ClassDescriptor> {
        &self.obj().class
    }

    /// Lifecycle status.
    pub fn status(&self) -> ObjectStatus {
        self.obj().status()
    }

    /// True once the object has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.status() == ObjectStatus::Deleted
    }

    /// Node identity.
    pub fn id(&self) -> NodeId {
        self.0.id()
    }

    /// Current ordinary reference count.
    pub fn reference_count(&self) -> usize {
        self.0.reference_count()
    }

    /// True if both handles refer to the same object.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        self.0.ptr_eq(&other.0)
    }

    /// Borrow the underlying node reference.
    pub fn as_node(&self) -> &NodeRef {
        &self.0
    }

    /// Convert into a value, transferring the reference.
    pub fn into_value(self) -> Value {
        Value::Node(self.0)
    }

    /// Release this reference. Returns true if it was the last one.
    pub fn deref(self, sink: &mut ExceptionSink) -> bool {
        self.0.deref(sink)
    }

    /// Observe the object without keeping it alive.
    pub fn watch(&self) -> ObjectWatch {
        ObjectWatch {
            node: Arc::downgrade(self.0.node()),
        }
    }

    /// The object's reentrant write lock.
    pub fn gate(&self) -> &TieredMutex {
        &self.obj().gate
    }

    /// Current structural count.
    pub fn structural_count(&self) -> usize {
        self.obj().structural.load(Ordering::Acquire)
    }

    /// The recursive set this object currently belongs to.
    pub fn recursive_set(&self) -> Option<Arc<RecursiveSet>> {
        self.obj().recursion.lock().set.clone()
    }

    /// References to this object that come from inside its recursive set.
    pub fn recursive_count(&self) -> usize {
        self.obj().recursion.lock().rcount
    }
}

// ═══════════════════════════════════════════════════════════════════
// Members
// ═══════════════════════════════════════════════════════════════════

impl ObjectRef {
    /// Read a member. Members never assigned read as [`Value::Nothing`];
    /// `None` means an error was raised.
    pub fn get_member(&self, name: &str, access: Access, sink: &mut ExceptionSink) -> Option<Value> {
        let obj = self.obj();
        sink.check(obj.class.check_member_access(name, access))?;
        let state = obj.state.read();
        match &*state {
            ObjectState::Live { members, .. } => Some(members.get(name).cloned().unwrap_or_default()),
            ObjectState::Deleted => {
                drop(state);
                sink.raise(obj.deleted_error("read a member of"));
                None
            }
        }
    }

    /// Assign a member under the object's lock, releasing the previous value.
    ///
    /// The lock is taken through `chain`; if the calling thread already
    /// holds it the assignment simply re-enters.
    pub fn set_member(
        &self,
        name: &str,
        value: Value,
        access: Access,
        chain: &mut LockChain,
        sink: &mut ExceptionSink,
    ) -> bool {
        self.store_members(vec![(name.to_string(), value)], access, chain, sink)
    }

    /// Copy every entry of a hash into the object's members.
    pub fn merge(&self, hash: &Value, access: Access, chain: &mut LockChain, sink: &mut ExceptionSink) -> bool {
        let Some(keys) = hash.hash_keys() else {
            sink.raise(CoreError::raised(
                "RUNTIME-TYPE-ERROR",
                format!("cannot merge a value of type {} into an object", hash.type_name()),
            ));
            return false;
        };
        let entries = keys
            .into_iter()
            .filter_map(|k| hash.hash_get(&k).map(|v| (k, v)))
            .collect();
        self.store_members(entries, access, chain, sink)
    }

    fn store_members(
        &self,
        entries: Vec<(String, Value)>,
        access: Access,
        chain: &mut LockChain,
        sink: &mut ExceptionSink,
    ) -> bool {
        let obj = self.obj();
        let checked = entries
            .iter()
            .try_for_each(|(name, _)| obj.class.check_member_access(name, access));
        if let Err(e) = checked {
            sink.raise(e);
            discard_all(entries.into_iter().map(|(_, v)| v), sink);
            return false;
        }
        if !chain.enter_object(self, sink) {
            discard_all(entries.into_iter().map(|(_, v)| v), sink);
            return false;
        }

        let links = entries.iter().any(|(_, v)| v.references_objects());
        let stored = {
            let mut state = obj.state.write();
            match &mut *state {
                ObjectState::Live { members, .. } => Ok(entries
                    .into_iter()
                    .filter_map(|(name, value)| members.insert(name, value))
                    .collect::<Vec<_>>()),
                ObjectState::Deleted => Err(entries),
            }
        };
        obj.gate.exit(chain, sink);

        match stored {
            Ok(old) => {
                self.unlink(old, sink);
                if links && obj.heap.config.scan_on_assign {
                    cycle::scan(self.0.node(), &obj.heap, obj.heap.eager(), sink);
                }
                true
            }
            Err(entries) => {
                sink.raise(obj.deleted_error("assign a member of"));
                discard_all(entries.into_iter().map(|(_, v)| v), sink);
                false
            }
        }
    }

    /// Remove a member and hand its reference to the caller.
    pub fn take_member(
        &self,
        name: &str,
        access: Access,
        chain: &mut LockChain,
        sink: &mut ExceptionSink,
    ) -> Option<Value> {
        let obj = self.obj();
        sink.check(obj.class.check_member_access(name, access))?;
        if !chain.enter_object(self, sink) {
            return None;
        }
        let taken = {
            let mut state = obj.state.write();
            match &mut *state {
                ObjectState::Live { members, .. } => Some(members.shift_remove(name)),
                ObjectState::Deleted => None,
            }
        };
        obj.gate.exit(chain, sink);

        let Some(taken) = taken else {
            sink.raise(obj.deleted_error("remove a member of"));
            return None;
        };
        let value = taken.unwrap_or_default();
        if value.references_objects() {
            let former = cycle::dissolve(self.0.node());
            cycle::rescan(former, &obj.heap, obj.heap.eager(), sink);
        }
        Some(value)
    }

    /// Release replaced member values. A replaced value that reached other
    /// objects may have been an edge of this object's cycle, so the set is
    /// dissolved first and its former members rescanned afterwards.
    fn unlink(&self, old: Vec<Value>, sink: &mut ExceptionSink) {
        if old.is_empty() {
            return;
        }
        let former = if old.iter().any(Value::references_objects) {
            cycle::dissolve(self.0.node())
        } else {
            Vec::new()
        };
        discard_all(old, sink);
        let heap = &self.obj().heap;
        cycle::rescan(former, heap, heap.eager(), sink);
    }

    /// Names of the members visible with the given access, in insertion order.
    pub fn member_names(&self, access: Access, sink: &mut ExceptionSink) -> Option<Vec<String>> {
        let obj = self.obj();
        let names = self.with_members("list the members of", sink, |members| {
            members.keys().cloned().collect::<Vec<_>>()
        })?;
        Some(
            names
                .into_iter()
                .filter(|n| obj.class.check_member_access(n, access).is_ok())
                .collect(),
        )
    }

    /// The first member key visible with the given access, if any.
    pub fn first_key(&self, access: Access, sink: &mut ExceptionSink) -> Option<String> {
        let class = &self.obj().class;
        self.with_members("read a key of", sink, |m| {
            m.keys()
                .find(|k| class.check_member_access(k, access).is_ok())
                .cloned()
        })?
    }

    /// The last member key visible with the given access, if any.
    pub fn last_key(&self, access: Access, sink: &mut ExceptionSink) -> Option<String> {
        let class = &self.obj().class;
        self.with_members("read a key of", sink, |m| {
            m.keys()
                .rev()
                .find(|k| class.check_member_access(k, access).is_ok())
                .cloned()
        })?
    }

    /// A hash holding new references to every member.
    pub fn copy_data(&self, sink: &mut ExceptionSink) -> Option<Value> {
        let map = self.with_members("copy the data of", sink, |m| m.clone())?;
        Some(Value::hash_from_map(map))
    }

    fn with_members<T>(
        &self,
        action: &'static str,
        sink: &mut ExceptionSink,
        f: impl FnOnce(&IndexMap<String, Value>) -> T,
    ) -> Option<T> {
        let obj = self.obj();
        let state = obj.state.read();
        match &*state {
            ObjectState::Live { members, .. } => Some(f(members)),
            ObjectState::Deleted => {
                drop(state);
                sink.raise(obj.deleted_error(action));
                None
            }
        }
    }
}

fn discard_all(values: impl IntoIterator<Item = Value>, sink: &mut ExceptionSink) {
    for value in values {
        value.discard(sink);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Private data and program
// ═══════════════════════════════════════════════════════════════════

impl ObjectRef {
    /// Attach native data owned by `class`. The data is also visible under
    /// each of `class`'s ancestors, which share it without owning it.
    pub fn set_private_data(
        &self,
        class: &Arc<ClassDescriptor>,
        data: Arc<dyn PrivateData>,
        sink: &mut ExceptionSink,
    ) -> bool {
        let obj = self.obj();
        let replaced = {
            let mut state = obj.state.write();
            match &mut *state {
                ObjectState::Live { private, .. } => {
                    for ancestor in class.ancestors() {
                        private.insert_virtual(ancestor.id(), Arc::clone(&data));
                    }
                    Ok(private.insert(class.id(), data))
                }
                ObjectState::Deleted => Err(()),
            }
        };
        match replaced {
            Ok(replaced) => {
                if let Some(old) = replaced {
                    old.release(sink);
                }
                true
            }
            Err(()) => {
                sink.raise(obj.deleted_error("attach private data to"));
                false
            }
        }
    }

    /// Native data registered under `class`, owned or shared.
    pub fn get_private_data(&self, class: ClassId) -> Option<Arc<dyn PrivateData>> {
        match &*self.obj().state.read() {
            ObjectState::Live { private, .. } => private.get(class),
            ObjectState::Deleted => None,
        }
    }

    /// The program this object belongs to, if it still holds it.
    pub fn program(&self) -> Option<ProgramRef> {
        self.obj().program.lock().clone()
    }

    /// Drop the hold on the owning program ahead of deletion.
    pub fn release_program(&self) {
        let program = self.obj().program.lock().take();
        drop(program);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("class", &self.obj().class_name())
            .field("id", &self.id())
            .field("refs", &self.reference_count())
            .field("status", &self.status())
            .finish()
    }
}
