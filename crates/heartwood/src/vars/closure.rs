//! Heap-resident variables shared between a frame and its closures

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::slot::{RefTarget, Storage, VarRef};
use super::TypeConstraint;
use crate::error::{CoreError, ExceptionSink};
use crate::node::Value;

struct ClosureCell {
    storage: Storage,
    finalized: bool,
}

struct ClosureSlot {
    name: String,
    ty: TypeConstraint,
    is_ref: bool,
    refs: AtomicUsize,
    skip: Arc<AtomicBool>,
    // Held only to read or swap storage, never while following an alias
    // or releasing a value.
    cell: Mutex<ClosureCell>,
}

/// Result of reading a closure slot.
pub(crate) enum ClosureRead {
    Value(Value),
    Alias(RefTarget),
}

/// Result of writing a closure slot: done, or an alias the caller must
/// follow with the value handed back.
pub(crate) enum ClosureWrite {
    Done(bool),
    Alias(RefTarget, Value),
}

/// A counted handle to a closure variable.
///
/// The defining frame and every closure that captured the variable each
/// hold one. Cloning adds a holder; [`ClosureRef::deref`] removes one, and
/// the last removal releases the stored value or alias. Reads and writes
/// are serialized by the slot's own mutex, so handles may be shared freely
/// across threads.
pub struct ClosureRef {
    slot: Arc<ClosureSlot>,
    released: bool,
}

impl ClosureRef {
    fn new(name: String, ty: TypeConstraint, storage: Storage) -> Self {
        let is_ref = matches!(storage, Storage::Ref(_));
        Self {
            slot: Arc::new(ClosureSlot {
                name,
                ty,
                is_ref,
                refs: AtomicUsize::new(1),
                skip: Arc::new(AtomicBool::new(false)),
                cell: Mutex::new(ClosureCell {
                    storage,
                    finalized: false,
                }),
            }),
            released: false,
        }
    }

    /// A closure variable holding `value`.
    pub fn new_value(name: impl Into<String>, ty: TypeConstraint, value: Value) -> Self {
        Self::new(name.into(), ty, Storage::Value(value))
    }

    /// A closure variable aliasing another location.
    pub fn new_ref(name: impl Into<String>, ty: TypeConstraint, vref: VarRef) -> Self {
        Self::new(name.into(), ty, Storage::Ref(vref))
    }

    /// Variable name.
    pub fn name(&self) -> &str {
        &self.slot.name
    }

    /// Declared type.
    pub fn ty(&self) -> TypeConstraint {
        self.slot.ty
    }

    /// True if the variable is an alias.
    pub fn is_ref(&self) -> bool {
        self.slot.is_ref
    }

    /// Number of holders.
    pub fn reference_count(&self) -> usize {
        self.slot.refs.load(Ordering::Acquire)
    }

    /// True once the variable has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.slot.cell.lock().finalized
    }

    /// True if both handles refer to the same variable.
    pub fn ptr_eq(&self, other: &ClosureRef) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    pub(crate) fn skip_flag(&self) -> &Arc<AtomicBool> {
        &self.slot.skip
    }

    pub(crate) fn is_skipped(&self) -> bool {
        self.slot.skip.load(Ordering::Acquire)
    }

    pub(crate) fn read(&self) -> ClosureRead {
        let cell = self.slot.cell.lock();
        match &cell.storage {
            Storage::Value(v) => ClosureRead::Value(v.clone()),
            Storage::Ref(r) => ClosureRead::Alias(r.target()),
        }
    }

    pub(crate) fn write(&self, value: Value, sink: &mut ExceptionSink) -> ClosureWrite {
        let mut cell = self.slot.cell.lock();
        if cell.finalized {
            drop(cell);
            sink.raise(CoreError::Finalized {
                name: self.slot.name.clone(),
            });
            value.discard(sink);
            return ClosureWrite::Done(false);
        }
        match &mut cell.storage {
            Storage::Value(current) => {
                let old = std::mem::replace(current, value);
                drop(cell);
                old.discard(sink);
                ClosureWrite::Done(true)
            }
            Storage::Ref(r) => ClosureWrite::Alias(r.target(), value),
        }
    }

    /// Read the variable. Aliases to another variable need a stack to
    /// resolve and raise `UNDEFINED-VARIABLE` here.
    pub fn eval(&self, sink: &mut ExceptionSink) -> Option<Value> {
        match self.read() {
            ClosureRead::Value(v) => Some(v),
            ClosureRead::Alias(RefTarget::Member {
                object,
                member,
                access,
            }) => RefTarget::eval_member(object, &member, access, sink),
            ClosureRead::Alias(RefTarget::Variable(name)) => {
                sink.raise(CoreError::UndefinedVariable { name });
                None
            }
        }
    }

    /// Assign the variable, checking its declared type. Fails without
    /// touching the stored value once the variable is finalized.
    pub fn assign(&self, value: Value, sink: &mut ExceptionSink) -> bool {
        if let Err(e) = self.slot.ty.check(&self.slot.name, &value) {
            sink.raise(e);
            value.discard(sink);
            return false;
        }
        match self.write(value, sink) {
            ClosureWrite::Done(ok) => ok,
            ClosureWrite::Alias(
                RefTarget::Member {
                    object,
                    member,
                    access,
                },
                value,
            ) => RefTarget::assign_member(object, &member, access, value, sink),
            ClosureWrite::Alias(RefTarget::Variable(name), value) => {
                sink.raise(CoreError::UndefinedVariable { name });
                value.discard(sink);
                false
            }
        }
    }

    /// Second-phase teardown: release the stored value and reject every
    /// later assignment.
    pub fn finalize(&self, sink: &mut ExceptionSink) {
        let old = {
            let mut cell = self.slot.cell.lock();
            if cell.finalized {
                return;
            }
            cell.finalized = true;
            std::mem::replace(&mut cell.storage, Storage::Value(Value::Nothing))
        };
        log::trace!("finalized closure variable '{}'", self.slot.name);
        old.release(sink);
    }

    /// Give back this holder's reference. The last one releases the stored
    /// value or alias. Returns true if this was the last holder.
    pub fn deref(mut self, sink: &mut ExceptionSink) -> bool {
        self.released = true;
        self.release(sink)
    }

    fn release(&self, sink: &mut ExceptionSink) -> bool {
        if self.slot.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return false;
        }
        let old = std::mem::replace(
            &mut self.slot.cell.lock().storage,
            Storage::Value(Value::Nothing),
        );
        old.release(sink);
        true
    }
}

impl Clone for ClosureRef {
    fn clone(&self) -> Self {
        self.slot.refs.fetch_add(1, Ordering::Relaxed);
        Self {
            slot: Arc::clone(&self.slot),
            released: false,
        }
    }
}

impl Drop for ClosureRef {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut sink = ExceptionSink::new();
        self.release(&mut sink);
        sink.discard("implicit closure variable deref");
    }
}

impl fmt::Debug for ClosureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureRef")
            .field("name", &self.slot.name)
            .field("ty", &self.slot.ty)
            .field("is_ref", &self.slot.is_ref)
            .field("refs", &self.reference_count())
            .finish()
    }
}

/// The variables a closure captured, in capture order.
#[derive(Debug, Clone, Default)]
pub struct ClosureEnv {
    vars: Vec<ClosureRef>,
}

impl ClosureEnv {
    pub(crate) fn new(vars: Vec<ClosureRef>) -> Self {
        Self { vars }
    }

    /// Captured variables.
    pub fn vars(&self) -> &[ClosureRef] {
        &self.vars
    }

    /// Look a captured variable up by name.
    pub fn get(&self, name: &str) -> Option<&ClosureRef> {
        self.vars.iter().rev().find(|v| v.name() == name)
    }

    /// Names of the captured variables.
    pub fn names(&self) -> Vec<&str> {
        self.vars.iter().map(ClosureRef::name).collect()
    }

    /// Number of captured variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// True if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Give back every captured reference.
    pub fn release(self, sink: &mut ExceptionSink) {
        for var in self.vars {
            var.deref(sink);
        }
    }
}
