//! Reentrant per-object write lock with owner tracking

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::wait_graph::wait_graph;
use super::LockChain;
use crate::error::{CoreError, ExceptionSink, Result};
use crate::thread::{current_tid, Tid};

#[derive(Default)]
struct GateState {
    owner: Option<Tid>,
    count: usize,
    waiting: usize,
}

pub(crate) struct Shared {
    name: String,
    /// Mirror of `state.owner` readable without the state lock, for the
    /// wait-for walk.
    pub(crate) owner: AtomicU64,
    state: Mutex<GateState>,
    cond: Condvar,
}

impl Shared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// A reentrant mutex that refuses to block when blocking would deadlock.
///
/// The owning thread may enter any number of times and must exit as many
/// times before another thread can acquire it. A thread that would have to
/// wait first checks the process-wide wait-for graph; if the owner is
/// (transitively) waiting on a lock the caller holds, `enter` fails with
/// `THREAD-DEADLOCK` instead of blocking.
#[derive(Clone)]
pub struct TieredMutex {
    shared: Arc<Shared>,
}

impl TieredMutex {
    /// Create an unlocked mutex. The name appears in error messages.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                owner: AtomicU64::new(0),
                state: Mutex::new(GateState::default()),
                cond: Condvar::new(),
            }),
        }
    }

    /// The mutex's name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Acquire the mutex for the calling thread, recording it in `chain`.
    ///
    /// Returns false, with a `THREAD-DEADLOCK` error in `sink`, if waiting
    /// would close a cycle in the wait-for graph.
    pub fn enter(&self, chain: &mut LockChain, sink: &mut ExceptionSink) -> bool {
        match sink.check(self.acquire()) {
            Some(depth) => {
                chain.push(self.clone(), depth);
                true
            }
            None => false,
        }
    }

    /// Release one level of ownership and drop the matching chain entry.
    ///
    /// Returns false, with a `LOCK-ERROR` in `sink`, if the calling thread
    /// is not the owner.
    pub fn exit(&self, chain: &mut LockChain, sink: &mut ExceptionSink) -> bool {
        if sink.check(self.release()).is_none() {
            return false;
        }
        chain.forget(self);
        true
    }

    /// Take ownership, blocking while another thread holds the mutex.
    /// Returns the reentry depth reached.
    pub(crate) fn acquire(&self) -> Result<usize> {
        let me = current_tid();
        let graph = wait_graph();
        let mut state = self.shared.state.lock();
        if state.owner == Some(me) {
            state.count += 1;
            return Ok(state.count);
        }
        while let Some(owner) = state.owner {
            graph.block(me, &self.shared, owner)?;
            state.waiting += 1;
            log::trace!("TID {} waiting for {} held by TID {}", me, self.shared.name, owner);
            self.shared.cond.wait(&mut state);
            state.waiting -= 1;
            graph.unblock(me);
        }
        state.owner = Some(me);
        state.count = 1;
        self.shared.owner.store(me.as_u64(), Ordering::Release);
        log::trace!("TID {} acquired {}", me, self.shared.name);
        Ok(1)
    }

    /// Drop one level of ownership, waking a waiter at the last one.
    pub(crate) fn release(&self) -> Result<()> {
        let me = current_tid();
        let mut state = self.shared.state.lock();
        if state.owner != Some(me) || state.count == 0 {
            return Err(CoreError::NotOwner {
                tid: me.as_u64(),
                resource: self.shared.name.clone(),
            });
        }
        state.count -= 1;
        if state.count == 0 {
            state.owner = None;
            self.shared.owner.store(0, Ordering::Release);
            log::trace!("TID {} released {}", me, self.shared.name);
            if state.waiting > 0 {
                self.shared.cond.notify_one();
            }
        }
        Ok(())
    }

    /// The owning thread, if locked.
    pub fn owner(&self) -> Option<Tid> {
        self.shared.state.lock().owner
    }

    /// How many times the owner has entered without exiting.
    pub fn reentry_count(&self) -> usize {
        self.shared.state.lock().count
    }

    /// Number of threads blocked waiting for this mutex.
    pub fn waiting_count(&self) -> usize {
        self.shared.state.lock().waiting
    }

    /// True if some thread owns the mutex.
    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }

    /// True if both handles refer to the same mutex.
    pub fn ptr_eq(&self, other: &TieredMutex) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for TieredMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TieredMutex")
            .field("name", &self.shared.name)
            .field("owner", &state.owner)
            .field("count", &state.count)
            .field("waiting", &state.waiting)
            .finish()
    }
}
