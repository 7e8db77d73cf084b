//! Process-wide wait-for graph

use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::tiered::Shared;
use crate::error::{CoreError, Result};
use crate::thread::Tid;

/// Which mutex each blocked thread is waiting for.
///
/// Checks and insertions are serialized by `gate`, so of two threads about
/// to wait on each other the second always sees the first.
pub(crate) struct WaitGraph {
    blocked: DashMap<Tid, Arc<Shared>>,
    gate: Mutex<()>,
}

static GRAPH: OnceLock<WaitGraph> = OnceLock::new();

pub(crate) fn wait_graph() -> &'static WaitGraph {
    GRAPH.get_or_init(|| WaitGraph {
        blocked: DashMap::new(),
        gate: Mutex::new(()),
    })
}

impl WaitGraph {
    /// Record that `me` is about to wait for `target`, held by `owner`,
    /// unless following owners from `owner` leads back to `me`.
    pub(crate) fn block(&self, me: Tid, target: &Arc<Shared>, owner: Tid) -> Result<()> {
        let _gate = self.gate.lock();
        let mut current = owner;
        for _ in 0..=self.blocked.len() {
            if current == me {
                log::warn!(
                    "deadlock: TID {} would wait on {} held by TID {}",
                    me,
                    target.name(),
                    owner
                );
                return Err(CoreError::Deadlock {
                    tid: me.as_u64(),
                    owner: owner.as_u64(),
                    resource: target.name().to_string(),
                });
            }
            let next = self
                .blocked
                .get(&current)
                .and_then(|m| Tid::from_raw(m.owner.load(Ordering::Acquire)));
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
        self.blocked.insert(me, Arc::clone(target));
        Ok(())
    }

    pub(crate) fn unblock(&self, me: Tid) {
        self.blocked.remove(&me);
    }

    pub(crate) fn blocked_on(&self, tid: Tid) -> Option<String> {
        self.blocked.get(&tid).map(|m| m.name().to_string())
    }
}

/// Name of the mutex `tid` is currently blocked on, if any.
pub fn blocked_on(tid: Tid) -> Option<String> {
    wait_graph().blocked_on(tid)
}
