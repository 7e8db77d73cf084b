//! Execution contexts that own global variables

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::ExceptionSink;
use crate::node::Value;

/// An execution context: the root of every object graph it creates.
///
/// Globals hold ordinary references, so anything reachable from a global
/// always has a holder outside any cycle and is never collected as one.
pub struct Program {
    name: String,
    globals: RwLock<IndexMap<String, Value>>,
}

/// A shared handle to a [`Program`].
#[derive(Clone)]
pub struct ProgramRef(Arc<Program>);

impl ProgramRef {
    /// Create a program with no globals.
    pub fn new(name: impl Into<String>) -> Self {
        ProgramRef(Arc::new(Program {
            name: name.into(),
            globals: RwLock::new(IndexMap::new()),
        }))
    }

    /// The program's name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Bind a global, releasing any previous value.
    pub fn set_global(&self, name: impl Into<String>, value: Value, sink: &mut ExceptionSink) {
        let old = self.0.globals.write().insert(name.into(), value);
        if let Some(old) = old {
            old.discard(sink);
        }
    }

    /// A new reference to a global's value.
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.0.globals.read().get(name).cloned()
    }

    /// Remove a global and hand its reference to the caller.
    pub fn take_global(&self, name: &str) -> Option<Value> {
        self.0.globals.write().shift_remove(name)
    }

    /// Global names in definition order.
    pub fn global_names(&self) -> Vec<String> {
        self.0.globals.read().keys().cloned().collect()
    }

    /// Release every global, most recently defined first.
    pub fn clear_globals(&self, sink: &mut ExceptionSink) {
        let globals = std::mem::take(&mut *self.0.globals.write());
        for (_, value) in globals.into_iter().rev() {
            value.discard(sink);
        }
    }

    /// Number of handles to this program, including those held by objects.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// True if both handles refer to the same program.
    pub fn ptr_eq(&self, other: &ProgramRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ProgramRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.0.name)
            .field("globals", &self.0.globals.read().len())
            .finish()
    }
}
