//! Object allocation, cycle-collection entry points, and heap statistics

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::context::{RuntimeConfig, ScanPolicy};
use crate::cycle::{self, ScanOutcome};
use crate::error::ExceptionSink;
use crate::node::{Node, NodeId};
use crate::object::{ClassDescriptor, ObjectRef, ObjectStatus};
use crate::program::ProgramRef;

/// Counters maintained by a heap.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) live_objects: AtomicUsize,
    pub(crate) live_sets: AtomicUsize,
    pub(crate) scans: AtomicUsize,
    pub(crate) scans_skipped: AtomicUsize,
    pub(crate) scans_abandoned: AtomicUsize,
    pub(crate) scans_deferred: AtomicUsize,
    pub(crate) sets_built: AtomicUsize,
    pub(crate) cycle_collected: AtomicUsize,
    pub(crate) deleted: AtomicUsize,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn drop_one(counter: &AtomicUsize) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A point-in-time copy of a heap's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeapStats {
    /// Objects whose allocation is still accounted as alive
    pub live_objects: usize,
    /// Recursive sets still held by at least one object
    pub live_sets: usize,
    /// Scans that ran to completion
    pub scans: usize,
    /// Scans that found their start object already being scanned
    pub scans_skipped: usize,
    /// Scans that exceeded `max_scan_objects`
    pub scans_abandoned: usize,
    /// Scans that reached an object another thread was scanning
    pub scans_deferred: usize,
    /// Recursive sets created
    pub sets_built: usize,
    /// Objects deleted as part of a collected cycle
    pub cycle_collected: usize,
    /// Objects that reached `DELETED` by any path
    pub deleted: usize,
}

pub(crate) struct HeapShared {
    pub(crate) config: RuntimeConfig,
    pub(crate) counters: Counters,
    pending: DashMap<NodeId, Weak<Node>>,
}

impl HeapShared {
    /// True if candidates are collected as soon as they are found.
    pub(crate) fn eager(&self) -> bool {
        self.config.scan_policy == ScanPolicy::Eager
    }

    /// Queue an object for a later scan: a collection candidate under
    /// `SafePoint`, or a scan that had to be deferred.
    pub(crate) fn enqueue(&self, node: &Arc<Node>) {
        self.pending
            .entry(node.id())
            .or_insert_with(|| Arc::downgrade(node));
    }

    /// Empty the queue, keeping the objects that are still live.
    pub(crate) fn take_pending(&self) -> Vec<Arc<Node>> {
        let ids: Vec<NodeId> = self.pending.iter().map(|e| *e.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .filter_map(|(_, weak)| weak.upgrade())
            .filter(|node| {
                node.as_object()
                    .is_some_and(|obj| obj.status() == ObjectStatus::Ok)
            })
            .collect()
    }

    /// React to an object's count dropping to its recursive contribution.
    pub(crate) fn candidate(self: &Arc<Self>, node: &Arc<Node>, sink: &mut ExceptionSink) {
        match self.config.scan_policy {
            ScanPolicy::Eager => {
                cycle::scan(node, self, true, sink);
            }
            ScanPolicy::SafePoint => {
                log::trace!("queueing {} for the next safe point", node.id());
                self.enqueue(node);
            }
        }
    }
}

/// Allocator and collector for objects that share a configuration.
///
/// # Example
///
/// ```
/// use heartwood::{ClassDescriptor, ExceptionSink, Heap};
///
/// let heap = Heap::default();
/// let class = ClassDescriptor::builder("Node").build();
/// let mut sink = ExceptionSink::new();
///
/// let obj = heap.construct(&class, None, &mut sink).unwrap();
/// assert_eq!(heap.stats().live_objects, 1);
///
/// obj.deref(&mut sink);
/// assert_eq!(heap.stats().live_objects, 0);
/// assert!(sink.is_empty());
/// ```
#[derive(Clone)]
pub struct Heap {
    shared: Arc<HeapShared>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Heap {
    /// Create a heap with the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            shared: Arc::new(HeapShared {
                config,
                counters: Counters::default(),
                pending: DashMap::new(),
            }),
        }
    }

    /// This heap's configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// A snapshot of the heap counters.
    pub fn stats(&self) -> HeapStats {
        let c = &self.shared.counters;
        HeapStats {
            live_objects: c.live_objects.load(Ordering::Relaxed),
            live_sets: c.live_sets.load(Ordering::Relaxed),
            scans: c.scans.load(Ordering::Relaxed),
            scans_skipped: c.scans_skipped.load(Ordering::Relaxed),
            scans_abandoned: c.scans_abandoned.load(Ordering::Relaxed),
            scans_deferred: c.scans_deferred.load(Ordering::Relaxed),
            sets_built: c.sets_built.load(Ordering::Relaxed),
            cycle_collected: c.cycle_collected.load(Ordering::Relaxed),
            deleted: c.deleted.load(Ordering::Relaxed),
        }
    }

    /// Allocate an object without running any constructor.
    pub fn new_object(&self, class: &Arc<ClassDescriptor>, program: Option<ProgramRef>) -> ObjectRef {
        ObjectRef::allocate(class, &self.shared, program)
    }

    /// Allocate an object and run its constructor chain, base class first.
    ///
    /// If any constructor raises, the object is obliterated (no destructor
    /// runs, every member it acquired is released) and `None` is returned.
    pub fn construct(
        &self,
        class: &Arc<ClassDescriptor>,
        program: Option<ProgramRef>,
        sink: &mut ExceptionSink,
    ) -> Option<ObjectRef> {
        let obj = self.new_object(class, program);
        if class.run_constructors(&obj, sink) {
            Some(obj)
        } else {
            log::debug!("constructor of '{}' raised; obliterating", class.name());
            obj.obliterate(sink);
            None
        }
    }

    /// Scan the object graph reachable from `obj`, building recursive sets
    /// for every cycle found and collecting any set with no outside holder.
    pub fn scan(&self, obj: &ObjectRef, sink: &mut ExceptionSink) -> ScanOutcome {
        cycle::scan(obj.as_node().node(), &self.shared, true, sink)
    }

    /// Check every queued candidate and deferred scan. Returns the number
    /// of objects collected.
    pub fn safe_point(&self, sink: &mut ExceptionSink) -> usize {
        let mut collected = 0;
        for node in self.shared.take_pending() {
            if let ScanOutcome::Completed { collected: n, .. } =
                cycle::scan(&node, &self.shared, true, sink)
            {
                collected += n;
            }
        }
        log::debug!("safe point collected {} objects", collected);
        collected
    }

    /// Number of objects waiting for a rescan.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }
}
