//! Recursive sets: proven cycles of objects, collectible as a unit

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::heap::{Counters, HeapShared};
use crate::node::{Node, NodeId};
use crate::object::ObjectRef;

static NEXT_SET_ID: AtomicU64 = AtomicU64::new(1);

/// A strongly connected group of objects found by the cycle scanner.
///
/// Every member holds the set through its recursion record; the set is
/// counted by those assignments and retires once the last member lets go.
pub struct RecursiveSet {
    id: u64,
    members: Vec<Weak<Node>>,
    ids: Vec<NodeId>,
    assigned: AtomicUsize,
    collecting: AtomicBool,
    heap: Arc<HeapShared>,
}

impl RecursiveSet {
    pub(crate) fn new(members: &[Arc<Node>], heap: &Arc<HeapShared>) -> Arc<Self> {
        let set = Arc::new(Self {
            id: NEXT_SET_ID.fetch_add(1, Ordering::Relaxed),
            members: members.iter().map(Arc::downgrade).collect(),
            ids: members.iter().map(|n| n.id()).collect(),
            assigned: AtomicUsize::new(0),
            collecting: AtomicBool::new(false),
            heap: Arc::clone(heap),
        });
        Counters::bump(&heap.counters.live_sets);
        Counters::bump(&heap.counters.sets_built);
        log::debug!("built recursive set {} with {} objects", set.id, set.ids.len());
        set
    }

    /// Set identity, for diagnostics.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Number of objects in the set.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True if the set has no members.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids of the member objects.
    pub fn member_ids(&self) -> &[NodeId] {
        &self.ids
    }

    /// True if `obj` is one of the members.
    pub fn contains(&self, obj: &ObjectRef) -> bool {
        self.ids.contains(&obj.id())
    }

    /// Number of objects currently pointing at this set.
    pub fn assign_count(&self) -> usize {
        self.assigned.load(Ordering::Acquire)
    }

    pub(crate) fn assign(&self) {
        self.assigned.fetch_add(1, Ordering::AcqRel);
    }

    /// Drop one assignment. Returns true if that was the last one.
    pub(crate) fn release(&self) -> bool {
        if self.assigned.fetch_sub(1, Ordering::AcqRel) == 1 {
            Counters::drop_one(&self.heap.counters.live_sets);
            log::debug!("recursive set {} released", self.id);
            true
        } else {
            false
        }
    }

    /// Members whose memory is still allocated.
    pub(crate) fn members(&self) -> Vec<Arc<Node>> {
        self.members.iter().filter_map(Weak::upgrade).collect()
    }

    /// True if every member is live, still assigned to this set, and
    /// referenced only from inside it.
    pub(crate) fn can_delete(self: &Arc<Self>) -> bool {
        if self.collecting.load(Ordering::Acquire) {
            return false;
        }
        self.members.iter().all(|weak| {
            let Some(node) = weak.upgrade() else {
                return false;
            };
            let Some(obj) = node.as_object() else {
                return false;
            };
            if obj.in_destructor.load(Ordering::Acquire) {
                return false;
            }
            let recursion = obj.recursion.lock();
            let same = recursion.set.as_ref().is_some_and(|s| Arc::ptr_eq(s, self));
            same && node.reference_count() == recursion.rcount
        })
    }

    /// Claim the set for collection. Only one thread wins.
    pub(crate) fn begin_collect(&self) -> bool {
        self.collecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl fmt::Debug for RecursiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveSet")
            .field("id", &self.id)
            .field("members", &self.ids)
            .field("assigned", &self.assign_count())
            .finish()
    }
}
