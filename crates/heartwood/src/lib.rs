//! # Heartwood
//!
//! The memory and concurrency core of a multi-threaded scripting runtime.
//!
//! Heartwood owns the lifetime of every heap value a script can create and
//! the locking that keeps those values consistent when many interpreter
//! threads touch them at once.
//!
//! ## Architecture
//!
//! - **Nodes**: reference-counted heap values ([`NodeRef`], [`Value`])
//! - **Objects**: class instances with a two-state lifecycle, structural
//!   references, private data and class-directed member access
//!   ([`ObjectRef`], [`ClassDescriptor`])
//! - **Cycle collection**: strongly-connected-component scans that find
//!   groups of objects kept alive only by each other ([`RecursiveSet`])
//! - **Locking**: reentrant tiered mutexes with wait-for-graph deadlock
//!   detection and per-operation lock chains ([`TieredMutex`], [`LockChain`])
//! - **Variables**: stack and closure slots, reference aliases and
//!   two-phase teardown ([`VarStack`], [`ClosureRef`])
//!
//! Errors never unwind through the core. Every fallible operation records
//! what went wrong in an [`ExceptionSink`] and returns a sentinel, so locks
//! and references taken along the way are always given back.
//!
//! ## Example
//!
//! ```
//! use heartwood::{Access, ClassDescriptor, ExceptionSink, Heap, LockChain, Value};
//!
//! let heap = Heap::default();
//! let class = ClassDescriptor::builder("Pair").build();
//! let mut sink = ExceptionSink::new();
//!
//! let a = heap.new_object(&class, None);
//! let b = heap.new_object(&class, None);
//! let mut chain = LockChain::new();
//! a.set_member("other", b.clone().into_value(), Access::External, &mut chain, &mut sink);
//! b.set_member("other", a.clone().into_value(), Access::External, &mut chain, &mut sink);
//!
//! let watch = a.watch();
//! a.deref(&mut sink);
//! b.deref(&mut sink);
//! assert!(watch.status().is_none());
//! assert_eq!(heap.stats().cycle_collected, 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod cycle;
pub mod error;
pub mod heap;
pub mod lock;
pub mod node;
pub mod object;
pub mod program;
pub mod thread;
pub mod vars;

// Re-export main types
pub use context::{RuntimeConfig, ScanPolicy};
pub use cycle::{RecursiveSet, ScanOutcome};
pub use error::{CoreError, ErrorRecord, ExceptionSink, Result};
pub use heap::{Heap, HeapStats};
pub use lock::{blocked_on, LockChain, TieredMutex};
pub use node::{Node, NodeId, NodeRef, NodeType, Value};
pub use object::{
    Access, ClassBuilder, ClassDescriptor, ClassId, MethodBody, ObjectRef, ObjectStatus,
    ObjectWatch, PrivateData, StructuralRef,
};
pub use program::{Program, ProgramRef};
pub use thread::{current_tid, Tid};
pub use vars::{
    ClosureEnv, ClosureRef, FrameGuard, LocalVar, RefExpr, TypeConstraint, VarRef, VarStack,
};

/// Heartwood version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }
}
