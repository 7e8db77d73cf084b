//! Deletion paths: last deref, explicit delete, and obliterate

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use indexmap::IndexMap;

use super::{KeyList, Object, ObjectRef, ObjectState};
use crate::cycle;
use crate::error::ExceptionSink;
use crate::heap::Counters;
use crate::node::{Node, Value};

/// Contents swapped out of an object when it is retired.
pub(crate) struct Retired {
    members: IndexMap<String, Value>,
    private: KeyList,
}

impl Object {
    /// Called after a deref leaves `remaining` references. If they could
    /// all come from this object's own recursive set, the set is a
    /// collection candidate.
    pub(crate) fn released_to(&self, node: &Arc<Node>, remaining: usize, sink: &mut ExceptionSink) {
        if self.in_destructor.load(Ordering::Acquire) {
            return;
        }
        let candidate = {
            let recursion = self.recursion.lock();
            recursion.set.is_some() && recursion.rcount == remaining
        };
        if candidate {
            self.heap.candidate(node, sink);
        }
    }

    /// Teardown when the ordinary count reaches zero.
    pub(crate) fn destroy(&self, node: &Arc<Node>, sink: &mut ExceptionSink) {
        if self.claim() {
            self.run_deletion(node, true, sink);
        }
    }

    /// Mark the object as being destroyed. Returns false if some other
    /// path already owns its deletion.
    pub(crate) fn claim(&self) -> bool {
        !self.in_destructor.swap(true, Ordering::AcqRel)
    }

    fn run_deletion(&self, node: &Arc<Node>, run_destructor: bool, sink: &mut ExceptionSink) {
        if run_destructor {
            self.run_destructors(node, sink);
        }
        if let Some(retired) = self.retire() {
            let former = cycle::dissolve(node);
            self.release_contents(retired, sink);
            self.finish_deletion();
            cycle::rescan(former, &self.heap, self.heap.eager(), sink);
        }
        self.structural_release();
    }

    /// Run the destructor chain while holding a temporary reference, so a
    /// destructor that takes and drops references to `self` cannot start a
    /// second deletion.
    pub(crate) fn run_destructors(&self, node: &Arc<Node>, sink: &mut ExceptionSink) {
        let this = ObjectRef::acquire(node);
        self.class.run_destructors(&this, sink);
        this.0.release_quiet();
    }

    /// Move to `DELETED`, swapping the contents out under the write lock so
    /// readers see either the full member map or the deleted state.
    pub(crate) fn retire(&self) -> Option<Retired> {
        let mut state = self.state.write();
        match std::mem::replace(&mut *state, ObjectState::Deleted) {
            ObjectState::Live { members, private } => {
                self.deleted.store(true, Ordering::Release);
                Some(Retired { members, private })
            }
            ObjectState::Deleted => None,
        }
    }

    /// Release private data, the program hold, and members, in that order.
    pub(crate) fn release_contents(&self, retired: Retired, sink: &mut ExceptionSink) {
        retired.private.release_all(sink);
        let program = self.program.lock().take();
        drop(program);
        for (_, value) in retired.members.into_iter().rev() {
            value.discard(sink);
        }
    }

    pub(crate) fn finish_deletion(&self) {
        Counters::bump(&self.heap.counters.deleted);
        log::debug!("deleted object of class '{}'", self.class.name());
    }

    fn structural_retain(&self) {
        self.structural.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn structural_release(&self) {
        if self.structural.fetch_sub(1, Ordering::AcqRel) == 1 {
            Counters::drop_one(&self.heap.counters.live_objects);
            log::trace!("object of class '{}' has no structural holders", self.class.name());
        }
    }
}

impl ObjectRef {
    /// Delete the object now, running its destructor, even though other
    /// references exist. They observe `OBJECT-ALREADY-DELETED` afterwards.
    /// Returns false if the object was already deleted or being deleted.
    pub fn delete(&self, sink: &mut ExceptionSink) -> bool {
        let obj = self.obj();
        if !obj.claim() {
            return false;
        }
        log::debug!("explicit delete of object of class '{}'", obj.class_name());
        obj.run_deletion(self.0.node(), true, sink);
        true
    }

    /// Give back a reference to an object whose construction failed.
    ///
    /// If this was the last reference the object is retired without
    /// running any destructor, releasing every member it acquired. An
    /// object already being destroyed is left to that deletion.
    pub fn obliterate(self, sink: &mut ExceptionSink) {
        let node = Arc::clone(self.0.node());
        if self.0.release_quiet() > 0 {
            return;
        }
        let Some(obj) = node.as_object() else {
            return;
        };
        if obj.claim() {
            log::debug!("obliterating object of class '{}'", obj.class_name());
            obj.run_deletion(&node, false, sink);
        }
    }

    /// Pin the object's allocation.
    pub fn structural_ref(&self) -> StructuralRef {
        StructuralRef::new(self.0.node())
    }
}

/// A structural reference: keeps an object's allocation accounted as alive
/// without contributing to its ordinary count.
pub struct StructuralRef {
    node: Arc<Node>,
}

impl StructuralRef {
    fn new(node: &Arc<Node>) -> Self {
        if let Some(obj) = node.as_object() {
            obj.structural_retain();
        }
        Self {
            node: Arc::clone(node),
        }
    }

    /// True if this pins `obj`.
    pub fn is_for(&self, obj: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.node, obj.0.node())
    }
}

impl Drop for StructuralRef {
    fn drop(&mut self) {
        if let Some(obj) = self.node.as_object() {
            obj.structural_release();
        }
    }
}

impl fmt::Debug for StructuralRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructuralRef({})", self.node.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::LockChain;
    use crate::object::{Access, ClassDescriptor, ObjectStatus};
    use crate::Heap;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_last_deref_runs_destructor_once() {
        let heap = Heap::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let class = ClassDescriptor::builder("Counted")
            .destructor(move |this, _sink| {
                // Taking and dropping a reference must not start a second deletion.
                let again = this.clone();
                drop(again);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        let mut sink = ExceptionSink::new();

        let obj = heap.new_object(&class, None);
        let watch = obj.watch();
        assert!(obj.deref(&mut sink));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(watch.status(), None);
        assert_eq!(heap.stats().deleted, 1);
    }

    #[test]
    fn test_destructor_error_does_not_stop_teardown() {
        let heap = Heap::default();
        let class = ClassDescriptor::builder("Faulty")
            .destructor(|_this, sink| sink.raise_kind("DTOR-FAILED", "boom"))
            .build();
        let mut sink = ExceptionSink::new();
        let mut chain = LockChain::new();
        let member = Value::string("m");

        let obj = heap.new_object(&class, None);
        obj.set_member("m", member.clone(), Access::External, &mut chain, &mut sink);
        obj.deref(&mut sink);

        assert!(sink.contains_kind("DTOR-FAILED"));
        assert_eq!(member.as_node().unwrap().reference_count(), 1);
    }

    #[test]
    fn test_explicit_delete_leaves_deleted_shell() {
        let heap = Heap::default();
        let class = ClassDescriptor::builder("Shell").build();
        let mut sink = ExceptionSink::new();
        let mut chain = LockChain::new();

        let obj = heap.new_object(&class, None);
        let other = obj.clone();
        assert!(obj.delete(&mut sink));
        assert!(!obj.delete(&mut sink));
        assert_eq!(other.status(), ObjectStatus::Deleted);

        assert!(!other.set_member("x", Value::Int(1), Access::External, &mut chain, &mut sink));
        assert!(sink.contains_kind("OBJECT-ALREADY-DELETED"));
        assert!(chain.is_empty());
    }

    #[test]
    fn test_obliterate_skips_destructor() {
        let heap = Heap::default();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let class = ClassDescriptor::builder("Half")
            .destructor(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();
        let mut sink = ExceptionSink::new();

        let obj = heap.new_object(&class, None);
        obj.obliterate(&mut sink);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn test_structural_ref_outlives_deletion() {
        let heap = Heap::default();
        let class = ClassDescriptor::builder("Pinned").build();
        let mut sink = ExceptionSink::new();

        let obj = heap.new_object(&class, None);
        let watch = obj.watch();
        let pin = obj.structural_ref();
        assert_eq!(obj.structural_count(), 2);

        obj.deref(&mut sink);
        assert_eq!(watch.status(), Some(ObjectStatus::Deleted));
        assert_eq!(heap.stats().live_objects, 1);

        drop(pin);
        assert_eq!(heap.stats().live_objects, 0);
        assert_eq!(watch.status(), None);
    }
}
