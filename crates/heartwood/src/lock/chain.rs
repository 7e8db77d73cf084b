//! Per-thread record of held tiered mutexes

use std::fmt;
use std::marker::PhantomData;

use super::TieredMutex;
use crate::error::ExceptionSink;
use crate::object::{ObjectRef, StructuralRef};
use crate::thread::{current_tid, Tid};

struct ChainEntry {
    mutex: TieredMutex,
    depth: usize,
    // Keeps a locked object's allocation accounted while it is held.
    pin: Option<StructuralRef>,
}

/// The locks one thread acquired during one logical operation.
///
/// Dropping the chain releases everything still held in strict reverse
/// order, so early returns and error paths never leave a mutex locked.
/// A chain belongs to the thread that created it and cannot be sent.
///
/// # Example
///
/// ```
/// use heartwood::{ExceptionSink, LockChain, TieredMutex};
///
/// let m = TieredMutex::new("config");
/// let mut sink = ExceptionSink::new();
/// {
///     let mut chain = LockChain::new();
///     assert!(chain.enter(&m, &mut sink));
///     assert!(chain.enter(&m, &mut sink));
///     assert_eq!(m.reentry_count(), 2);
/// }
/// assert!(!m.is_locked());
/// ```
pub struct LockChain {
    tid: Tid,
    entries: Vec<ChainEntry>,
    _not_send: PhantomData<*const ()>,
}

impl Default for LockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl LockChain {
    /// Create an empty chain for the calling thread.
    pub fn new() -> Self {
        Self {
            tid: current_tid(),
            entries: Vec::new(),
            _not_send: PhantomData,
        }
    }

    /// The thread this chain belongs to.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Enter `mutex` and record it.
    pub fn enter(&mut self, mutex: &TieredMutex, sink: &mut ExceptionSink) -> bool {
        mutex.enter(self, sink)
    }

    /// Enter an object's lock, pinning the object while it is held.
    pub fn enter_object(&mut self, obj: &ObjectRef, sink: &mut ExceptionSink) -> bool {
        if !obj.gate().enter(self, sink) {
            return false;
        }
        if let Some(entry) = self.entries.last_mut() {
            entry.pin = Some(obj.structural_ref());
        }
        true
    }

    pub(crate) fn push(&mut self, mutex: TieredMutex, depth: usize) {
        self.entries.push(ChainEntry {
            mutex,
            depth,
            pin: None,
        });
    }

    /// Drop the most recent entry for `mutex` after it has been exited.
    pub(crate) fn forget(&mut self, mutex: &TieredMutex) {
        if let Some(pos) = self.entries.iter().rposition(|e| e.mutex.ptr_eq(mutex)) {
            self.entries.remove(pos);
        }
    }

    /// True if the chain holds `mutex`.
    pub fn holds(&self, mutex: &TieredMutex) -> bool {
        self.entries.iter().any(|e| e.mutex.ptr_eq(mutex))
    }

    /// Reentry depth recorded by the most recent entry for `mutex`.
    pub fn depth_of(&self, mutex: &TieredMutex) -> Option<usize> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.mutex.ptr_eq(mutex))
            .map(|e| e.depth)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release the most recently acquired entry.
    pub fn release_last(&mut self, sink: &mut ExceptionSink) -> bool {
        let Some(entry) = self.entries.pop() else {
            return false;
        };
        sink.check(entry.mutex.release()).is_some()
    }

    /// Release every entry, newest first.
    pub fn unwind(&mut self, sink: &mut ExceptionSink) {
        while let Some(entry) = self.entries.pop() {
            sink.check(entry.mutex.release());
        }
    }
}

impl Drop for LockChain {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let mut sink = ExceptionSink::new();
        self.unwind(&mut sink);
        sink.discard("lock chain unwind");
    }
}

impl fmt::Debug for LockChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockChain")
            .field("tid", &self.tid)
            .field(
                "held",
                &self
                    .entries
                    .iter()
                    .map(|e| (e.mutex.name().to_string(), e.depth))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
