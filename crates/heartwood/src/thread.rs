//! Thread identity used to tag lock owners and scan markers

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A small, process-unique identifier for an OS thread.
///
/// Ids are assigned on first use and never reused, so `0` can serve as
/// "no thread" in atomic fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(u64);

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Tid = Tid(NEXT_TID.fetch_add(1, Ordering::Relaxed));
}

impl Tid {
    /// The raw numeric id (never 0).
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub(crate) fn from_raw(raw: u64) -> Option<Tid> {
        (raw != 0).then_some(Tid(raw))
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The id of the calling thread.
pub fn current_tid() -> Tid {
    CURRENT.with(|t| *t)
}
