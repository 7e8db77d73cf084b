//! Per-object scan markers

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::node::Node;
use crate::object::ObjectStatus;
use crate::thread::current_tid;

/// Exclusive right to rewrite an object's recursion record during a scan.
///
/// Entering never blocks: an object marked by another thread, deleted, or
/// mid-destructor is reported as unavailable and the scan treats it as
/// opaque. The marking thread may re-enter.
pub(crate) struct SectionGuard {
    node: Arc<Node>,
    owned: bool,
}

impl SectionGuard {
    pub(crate) fn try_enter(node: &Arc<Node>) -> Option<Self> {
        let obj = node.as_object()?;
        if obj.status() == ObjectStatus::Deleted || obj.in_destructor.load(Ordering::Acquire) {
            return None;
        }
        let me = current_tid().as_u64();
        let owned = match obj
            .rsection
            .compare_exchange(0, me, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(holder) if holder == me => false,
            Err(_) => return None,
        };
        Some(Self {
            node: Arc::clone(node),
            owned,
        })
    }
}

impl Drop for SectionGuard {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        if let Some(obj) = self.node.as_object() {
            obj.rsection.store(0, Ordering::Release);
        }
    }
}
