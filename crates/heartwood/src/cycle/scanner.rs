//! Strongly-connected-component walk over object member edges

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::rset::RecursiveSet;
use super::section::SectionGuard;
use super::collect_set;
use crate::error::ExceptionSink;
use crate::heap::{Counters, HeapShared};
use crate::node::{Node, NodeBody, NodeId, Value};
use crate::object::{ObjectState, ObjectStatus};

/// Result of a cycle scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The start object was deleted or already being scanned by another thread
    Skipped,
    /// The walk exceeded `max_scan_objects`; nothing was changed
    Abandoned,
    /// The walk reached an object another thread is scanning. Records on
    /// paths through it were left as they were and the start object was
    /// queued for a rescan
    Deferred,
    /// The walk finished
    Completed {
        /// Recursive sets created
        sets_built: usize,
        /// Objects deleted as members of unreachable sets
        collected: usize,
    },
}

struct Visit {
    node: Arc<Node>,
    // None for objects another thread is scanning, or that are deleted;
    // such objects are walked as if they had no members.
    section: Option<SectionGuard>,
    // Live, but marked by another thread's scan.
    blocked: bool,
    targets: Vec<Arc<Node>>,
    edges: Vec<usize>,
    index: usize,
    low: usize,
    on_stack: bool,
}

struct Abandon;

/// One pass of the walk. Holds a section on every object it expands until
/// the recursion records have been rewritten.
struct Pass<'h> {
    heap: &'h Arc<HeapShared>,
    visits: Vec<Visit>,
    index_of: HashMap<NodeId, usize>,
    stack: Vec<usize>,
    sccs: Vec<Vec<usize>>,
    deferred: bool,
}

impl<'h> Pass<'h> {
    fn new(heap: &'h Arc<HeapShared>) -> Self {
        Self {
            heap,
            visits: Vec::new(),
            index_of: HashMap::new(),
            stack: Vec::new(),
            sccs: Vec::new(),
            deferred: false,
        }
    }

    fn open(&mut self, node: &Arc<Node>) -> Result<usize, Abandon> {
        if self.visits.len() >= self.heap.config.max_scan_objects {
            return Err(Abandon);
        }
        let section = SectionGuard::try_enter(node);
        let blocked = section.is_none()
            && node.as_object().is_some_and(|obj| {
                obj.status() == ObjectStatus::Ok && !obj.in_destructor.load(Ordering::Acquire)
            });
        let targets = if section.is_some() {
            member_edges(node)
        } else {
            Vec::new()
        };
        let index = self.visits.len();
        log::trace!("scan visit {} ({} edges)", node.id(), targets.len());
        self.visits.push(Visit {
            node: Arc::clone(node),
            section,
            blocked,
            targets,
            edges: Vec::new(),
            index,
            low: index,
            on_stack: true,
        });
        self.index_of.insert(node.id(), index);
        self.stack.push(index);
        Ok(index)
    }

    /// Iterative Tarjan from `root`.
    fn walk(&mut self, root: usize) -> Result<(), Abandon> {
        let mut calls: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some(&(v, pos)) = calls.last() {
            if pos < self.visits[v].targets.len() {
                if let Some(top) = calls.last_mut() {
                    top.1 += 1;
                }
                let target = Arc::clone(&self.visits[v].targets[pos]);
                match self.index_of.get(&target.id()).copied() {
                    None => {
                        let w = self.open(&target)?;
                        self.visits[v].edges.push(w);
                        calls.push((w, 0));
                    }
                    Some(w) => {
                        self.visits[v].edges.push(w);
                        if self.visits[w].on_stack {
                            self.visits[v].low = self.visits[v].low.min(self.visits[w].index);
                        }
                    }
                }
                continue;
            }

            calls.pop();
            if let Some(&(parent, _)) = calls.last() {
                self.visits[parent].low = self.visits[parent].low.min(self.visits[v].low);
            }
            if self.visits[v].low == self.visits[v].index {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.visits[w].on_stack = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                self.sccs.push(scc);
            }
        }
        Ok(())
    }

    fn is_cyclic(&self, scc: &[usize]) -> bool {
        scc.len() > 1 || self.visits[scc[0]].edges.contains(&scc[0])
    }

    /// Rewrite recursion records from the components found. Returns the
    /// sets now assigned and every object whose old set went stale.
    ///
    /// A component that reaches a blocked object has an incomplete picture
    /// of its edges, so its records are left alone and the pass is marked
    /// deferred. Components come out of the walk successors first, so
    /// taint only needs to look at earlier components.
    fn assign(&mut self) -> (Vec<Arc<RecursiveSet>>, usize, Vec<Arc<Node>>) {
        let mut assigned = Vec::new();
        let mut built = 0;
        let mut stale = Vec::new();
        let mut tainted = vec![false; self.visits.len()];
        let mut deferred = false;

        for scc in &self.sccs {
            let reaches_blocked = scc.iter().any(|&v| {
                self.visits[v].blocked || self.visits[v].edges.iter().any(|&w| tainted[w])
            });
            if reaches_blocked {
                for &v in scc {
                    tainted[v] = true;
                }
                deferred = true;
                continue;
            }

            if !self.is_cyclic(scc) {
                let visit = &self.visits[scc[0]];
                if visit.section.is_some() {
                    stale.extend(clear_recursion(&visit.node));
                }
                continue;
            }

            let members: HashSet<usize> = scc.iter().copied().collect();
            let mut rcount: HashMap<usize, usize> = HashMap::new();
            for &v in scc {
                for &w in &self.visits[v].edges {
                    if members.contains(&w) {
                        *rcount.entry(w).or_default() += 1;
                    }
                }
            }

            let set = match self.confirm(scc) {
                Some(set) => set,
                None => {
                    let nodes: Vec<Arc<Node>> =
                        scc.iter().map(|&v| Arc::clone(&self.visits[v].node)).collect();
                    built += 1;
                    RecursiveSet::new(&nodes, self.heap)
                }
            };
            for &v in scc {
                let Some(obj) = self.visits[v].node.as_object() else {
                    continue;
                };
                let mut recursion = obj.recursion.lock();
                recursion.rcount = rcount.get(&v).copied().unwrap_or(0);
                let same = recursion.set.as_ref().is_some_and(|s| Arc::ptr_eq(s, &set));
                if same {
                    continue;
                }
                set.assign();
                let old = recursion.set.replace(Arc::clone(&set));
                drop(recursion);
                if let Some(old) = old {
                    stale.extend(old.members());
                    old.release();
                }
            }
            assigned.push(set);
        }

        stale.retain(|n| match self.index_of.get(&n.id()) {
            Some(&i) => self.visits[i].section.is_none(),
            None => true,
        });
        self.deferred = deferred;
        (assigned, built, stale)
    }

    /// The existing set, if the component matches it exactly.
    fn confirm(&self, scc: &[usize]) -> Option<Arc<RecursiveSet>> {
        let first = self.visits[scc[0]].node.as_object()?;
        let set = first.recursion.lock().set.clone()?;
        if set.len() != scc.len() {
            return None;
        }
        let all_in = scc.iter().all(|&v| {
            self.visits[v].node.as_object().is_some_and(|obj| {
                obj.recursion
                    .lock()
                    .set
                    .as_ref()
                    .is_some_and(|s| Arc::ptr_eq(s, &set))
            })
        });
        all_in.then_some(set)
    }
}

/// Clear an object's recursion record. Returns the members of the set it
/// left, which must be rescanned.
fn clear_recursion(node: &Arc<Node>) -> Vec<Arc<Node>> {
    let Some(obj) = node.as_object() else {
        return Vec::new();
    };
    let old = {
        let mut recursion = obj.recursion.lock();
        recursion.rcount = 0;
        recursion.set.take()
    };
    match old {
        Some(old) => {
            let members = old.members();
            old.release();
            members
        }
        None => Vec::new(),
    }
}

/// Object edges leaving `node`: each member that is an object, and the
/// objects inside member containers nobody else holds.
fn member_edges(node: &Arc<Node>) -> Vec<Arc<Node>> {
    let mut out = Vec::new();
    let Some(obj) = node.as_object() else {
        return out;
    };
    let state = obj.state.read();
    if let ObjectState::Live { members, .. } = &*state {
        for value in members.values() {
            value_edges(value, &mut out);
        }
    }
    out
}

fn value_edges(value: &Value, out: &mut Vec<Arc<Node>>) {
    let Some(node) = value.as_node() else {
        return;
    };
    match &node.node().body {
        NodeBody::Object(_) => out.push(Arc::clone(node.node())),
        // A shared container may be held from outside the graph, so its
        // contents count as externally reachable.
        NodeBody::List(items) if node.is_unique() => {
            for item in items.read().iter() {
                value_edges(item, out);
            }
        }
        NodeBody::Hash(map) if node.is_unique() => {
            for item in map.read().values() {
                value_edges(item, out);
            }
        }
        _ => {}
    }
}

/// Scan from `start`, then rescan every object whose set went stale.
///
/// With `collect`, every set confirmed or built whose members are only
/// referenced from inside it is deleted as a group. An eager collecting
/// scan also retries whatever earlier scans had to defer.
pub(crate) fn scan(
    start: &Arc<Node>,
    heap: &Arc<HeapShared>,
    collect: bool,
    sink: &mut ExceptionSink,
) -> ScanOutcome {
    let mut tally = Tally::default();
    let outcome = run(vec![Arc::clone(start)], heap, collect, &mut tally, sink);
    if collect && heap.eager() {
        let retry = heap.take_pending();
        if !retry.is_empty() {
            log::trace!("retrying {} deferred scans", retry.len());
            run(retry, heap, collect, &mut tally, sink);
        }
    }

    match outcome {
        Some(ScanOutcome::Completed { .. }) => ScanOutcome::Completed {
            sets_built: tally.sets_built,
            collected: tally.collected,
        },
        Some(other) => other,
        None => ScanOutcome::Skipped,
    }
}

#[derive(Default)]
struct Tally {
    sets_built: usize,
    collected: usize,
}

/// Work through `work` and every stale object it uncovers. Returns the
/// outcome of the first pass.
fn run(
    mut work: Vec<Arc<Node>>,
    heap: &Arc<HeapShared>,
    collect: bool,
    tally: &mut Tally,
    sink: &mut ExceptionSink,
) -> Option<ScanOutcome> {
    let mut outcome = None;
    let mut seen: HashSet<NodeId> = HashSet::new();

    while let Some(node) = work.pop() {
        if !seen.insert(node.id()) {
            continue;
        }
        let result = scan_once(&node, heap);
        let first = outcome.is_none();
        match result {
            PassResult::Skipped { blocked } => {
                Counters::bump(&heap.counters.scans_skipped);
                if blocked {
                    heap.enqueue(&node);
                }
                if first {
                    outcome = Some(ScanOutcome::Skipped);
                }
            }
            PassResult::Abandoned => {
                Counters::bump(&heap.counters.scans_abandoned);
                log::debug!("scan from {} abandoned", node.id());
                if first {
                    outcome = Some(ScanOutcome::Abandoned);
                }
            }
            PassResult::Done {
                sets,
                built,
                stale,
                deferred,
            } => {
                Counters::bump(&heap.counters.scans);
                if deferred {
                    Counters::bump(&heap.counters.scans_deferred);
                    log::debug!("scan from {} reached a busy object; deferring", node.id());
                    heap.enqueue(&node);
                }
                if first {
                    outcome = Some(if deferred {
                        ScanOutcome::Deferred
                    } else {
                        ScanOutcome::Completed {
                            sets_built: 0,
                            collected: 0,
                        }
                    });
                }
                tally.sets_built += built;
                if collect {
                    for set in &sets {
                        tally.collected += collect_set(set, sink);
                    }
                }
                work.extend(stale);
            }
        }
    }
    outcome
}

/// Scan each node that is still a live object.
pub(crate) fn rescan(
    nodes: Vec<Arc<Node>>,
    heap: &Arc<HeapShared>,
    collect: bool,
    sink: &mut ExceptionSink,
) {
    for node in nodes {
        let live = node
            .as_object()
            .is_some_and(|obj| !obj.in_destructor.load(Ordering::Acquire));
        if live {
            scan(&node, heap, collect, sink);
        }
    }
}

enum PassResult {
    Skipped {
        blocked: bool,
    },
    Abandoned,
    Done {
        sets: Vec<Arc<RecursiveSet>>,
        built: usize,
        stale: Vec<Arc<Node>>,
        deferred: bool,
    },
}

fn scan_once(start: &Arc<Node>, heap: &Arc<HeapShared>) -> PassResult {
    let mut pass = Pass::new(heap);
    let root = match pass.open(start) {
        Ok(root) => root,
        Err(Abandon) => return PassResult::Abandoned,
    };
    if pass.visits[root].section.is_none() {
        return PassResult::Skipped {
            blocked: pass.visits[root].blocked,
        };
    }
    if pass.walk(root).is_err() {
        return PassResult::Abandoned;
    }
    let (sets, built, stale) = pass.assign();
    log::trace!(
        "scan from {} visited {} objects, {} cyclic components",
        start.id(),
        pass.visits.len(),
        sets.len()
    );
    let deferred = pass.deferred;
    // Sections are released here, before any collection runs destructors.
    drop(pass);
    PassResult::Done {
        sets,
        built,
        stale,
        deferred,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;
    use crate::lock::LockChain;
    use crate::object::{Access, ClassDescriptor, ObjectRef};
    use crate::{Heap, RuntimeConfig};

    fn link(from: &ObjectRef, name: &str, to: &ObjectRef, sink: &mut ExceptionSink) {
        let mut chain = LockChain::new();
        assert!(from.set_member(name, to.clone().into_value(), Access::Internal, &mut chain, sink));
    }

    /// Mark `obj` as being scanned by another thread until the returned
    /// sender fires.
    fn hold_section(obj: &ObjectRef) -> (mpsc::Sender<()>, thread::JoinHandle<()>) {
        let node = Arc::clone(obj.as_node().node());
        let (ready_tx, ready_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = thread::spawn(move || {
            let guard = SectionGuard::try_enter(&node);
            ready_tx.send(guard.is_some()).ok();
            release_rx.recv().ok();
            drop(guard);
        });
        assert_eq!(ready_rx.recv(), Ok(true));
        (release_tx, holder)
    }

    #[test]
    fn test_chain_without_cycle_builds_nothing() {
        let heap = Heap::new(RuntimeConfig::new().without_assign_scan());
        let class = ClassDescriptor::builder("Link").build();
        let mut sink = ExceptionSink::new();
        let a = heap.new_object(&class, None);
        let b = heap.new_object(&class, None);
        let c = heap.new_object(&class, None);
        link(&a, "next", &b, &mut sink);
        link(&b, "next", &c, &mut sink);

        assert_eq!(
            heap.scan(&a, &mut sink),
            ScanOutcome::Completed {
                sets_built: 0,
                collected: 0
            }
        );
        assert!(a.recursive_set().is_none());
    }

    #[test]
    fn test_triangle_rcounts() {
        let heap = Heap::new(RuntimeConfig::new().without_assign_scan());
        let class = ClassDescriptor::builder("Tri").build();
        let mut sink = ExceptionSink::new();
        let a = heap.new_object(&class, None);
        let b = heap.new_object(&class, None);
        let c = heap.new_object(&class, None);
        link(&a, "next", &b, &mut sink);
        link(&b, "next", &c, &mut sink);
        link(&c, "next", &a, &mut sink);
        link(&c, "again", &a, &mut sink);

        heap.scan(&b, &mut sink);
        let set = a.recursive_set().unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.assign_count(), 3);
        assert_eq!(a.recursive_count(), 2);
        assert_eq!(b.recursive_count(), 1);
        assert!(set.contains(&c));
    }

    #[test]
    fn test_rescan_confirms_existing_set() {
        let heap = Heap::new(RuntimeConfig::new().without_assign_scan());
        let class = ClassDescriptor::builder("Pair").build();
        let mut sink = ExceptionSink::new();
        let a = heap.new_object(&class, None);
        let b = heap.new_object(&class, None);
        link(&a, "peer", &b, &mut sink);
        link(&b, "peer", &a, &mut sink);

        heap.scan(&a, &mut sink);
        let first = a.recursive_set().unwrap();
        assert_eq!(
            heap.scan(&b, &mut sink),
            ScanOutcome::Completed {
                sets_built: 0,
                collected: 0
            }
        );
        assert!(Arc::ptr_eq(&first, &b.recursive_set().unwrap()));
        assert_eq!(heap.stats().live_sets, 1);
    }

    #[test]
    fn test_cycle_through_unique_list() {
        let heap = Heap::new(RuntimeConfig::new().without_assign_scan());
        let class = ClassDescriptor::builder("Parent").build();
        let mut sink = ExceptionSink::new();
        let mut chain = LockChain::new();
        let parent = heap.new_object(&class, None);
        let child = heap.new_object(&class, None);
        let children = Value::list(vec![child.clone().into_value()]);
        parent.set_member("children", children, Access::Internal, &mut chain, &mut sink);
        link(&child, "parent", &parent, &mut sink);

        heap.scan(&parent, &mut sink);
        assert_eq!(parent.recursive_set().map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_limit_abandons_scan() {
        let heap = Heap::new(
            RuntimeConfig::new()
                .without_assign_scan()
                .with_max_scan_objects(1),
        );
        let class = ClassDescriptor::builder("Pair").build();
        let mut sink = ExceptionSink::new();
        let a = heap.new_object(&class, None);
        let b = heap.new_object(&class, None);
        link(&a, "peer", &b, &mut sink);
        link(&b, "peer", &a, &mut sink);

        assert_eq!(heap.scan(&a, &mut sink), ScanOutcome::Abandoned);
        assert!(a.recursive_set().is_none());
        assert_eq!(heap.stats().scans_abandoned, 1);
    }

    #[test]
    fn test_busy_member_leaves_set_in_place() {
        let heap = Heap::new(RuntimeConfig::new().without_assign_scan());
        let class = ClassDescriptor::builder("Pair").build();
        let mut sink = ExceptionSink::new();
        let a = heap.new_object(&class, None);
        let b = heap.new_object(&class, None);
        link(&a, "peer", &b, &mut sink);
        link(&b, "peer", &a, &mut sink);
        heap.scan(&a, &mut sink);
        let set = a.recursive_set().unwrap();

        let (release, holder) = hold_section(&b);
        assert_eq!(heap.scan(&a, &mut sink), ScanOutcome::Deferred);
        release.send(()).unwrap();
        holder.join().unwrap();

        let (release, holder) = hold_section(&a);
        assert_eq!(heap.scan(&b, &mut sink), ScanOutcome::Deferred);
        release.send(()).unwrap();
        holder.join().unwrap();

        assert!(Arc::ptr_eq(&set, &a.recursive_set().unwrap()));
        assert!(Arc::ptr_eq(&set, &b.recursive_set().unwrap()));
        assert_eq!(a.recursive_count(), 1);
        assert!(heap.pending_count() >= 1);
        assert!(heap.stats().scans_deferred >= 2);

        let (wa, wb) = (a.watch(), b.watch());
        a.deref(&mut sink);
        b.deref(&mut sink);
        assert_eq!(wa.status(), None);
        assert_eq!(wb.status(), None);
        assert_eq!(heap.stats().cycle_collected, 2);
        assert_eq!(heap.pending_count(), 0);
        assert!(sink.is_empty());
    }
}
