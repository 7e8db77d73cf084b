//! Cycle detection and collection
//!
//! Reference counting alone never frees objects that point at each other.
//! The scanner walks member edges from a candidate object, finds strongly
//! connected components, and records each cycle as a [`RecursiveSet`],
//! storing in every member how many of its references come from inside
//! the set. When a member's count later drops to exactly that number, its
//! set is checked: if every member is referenced only from inside, the
//! whole set is deleted as a group.
//!
//! Anything reachable from a program global, a variable, or any other
//! holder outside the set carries an extra reference and is never
//! collected.

mod rset;
mod scanner;
mod section;

pub use rset::RecursiveSet;
pub use scanner::ScanOutcome;

pub(crate) use scanner::{rescan, scan};

use std::sync::Arc;

use crate::error::ExceptionSink;
use crate::heap::Counters;
use crate::node::Node;

/// Remove every member of `node`'s recursive set from that set. Returns
/// the former members so they can be rescanned.
pub(crate) fn dissolve(node: &Arc<Node>) -> Vec<Arc<Node>> {
    let Some(obj) = node.as_object() else {
        return Vec::new();
    };
    let Some(set) = obj.recursion.lock().set.clone() else {
        return Vec::new();
    };
    let members = set.members();
    for member in &members {
        let Some(member_obj) = member.as_object() else {
            continue;
        };
        let held = {
            let mut recursion = member_obj.recursion.lock();
            let same = recursion.set.as_ref().is_some_and(|s| Arc::ptr_eq(s, &set));
            if same {
                recursion.set = None;
                recursion.rcount = 0;
            }
            same
        };
        if held {
            set.release();
        }
    }
    log::debug!("dissolved recursive set {} ({} objects)", set.id(), members.len());
    members
}

/// Delete every member of `set` if none of them has an outside holder.
/// Returns the number of objects deleted.
///
/// All destructors run before any member is retired, so a destructor may
/// still read the other members of its cycle.
pub(crate) fn collect_set(set: &Arc<RecursiveSet>, sink: &mut ExceptionSink) -> usize {
    if !set.can_delete() || !set.begin_collect() {
        return 0;
    }
    let claimed: Vec<Arc<Node>> = set
        .members()
        .into_iter()
        .filter(|n| n.as_object().is_some_and(|obj| obj.claim()))
        .collect();
    log::debug!(
        "collecting recursive set {} ({} objects)",
        set.id(),
        claimed.len()
    );

    for node in &claimed {
        if let Some(obj) = node.as_object() {
            obj.run_destructors(node, sink);
        }
    }
    let retired: Vec<_> = claimed
        .iter()
        .map(|node| node.as_object().and_then(|obj| obj.retire()))
        .collect();
    for node in &claimed {
        if let Some(obj) = node.as_object() {
            let held = obj.recursion.lock().set.take();
            if let Some(held) = held {
                held.release();
            }
        }
    }

    let mut collected = 0;
    for (node, retired) in claimed.iter().zip(retired) {
        let (Some(obj), Some(retired)) = (node.as_object(), retired) else {
            continue;
        };
        obj.release_contents(retired, sink);
        obj.finish_deletion();
        Counters::bump(&obj.heap.counters.cycle_collected);
        collected += 1;
    }
    for node in &claimed {
        if let Some(obj) = node.as_object() {
            obj.structural_release();
        }
    }
    collected
}
