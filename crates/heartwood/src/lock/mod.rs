//! Tiered locking with deadlock detection
//!
//! [`TieredMutex`] is the per-object write lock; [`LockChain`] records
//! which of them the current thread holds and releases them in reverse
//! order when the operation ends. Before a thread blocks on a mutex, the
//! wait-for graph is checked so lock-ordering deadlocks surface as a
//! `THREAD-DEADLOCK` error at the call that would have closed the cycle.

mod chain;
mod tiered;
mod wait_graph;

pub use chain::LockChain;
pub use tiered::TieredMutex;
pub use wait_graph::blocked_on;
