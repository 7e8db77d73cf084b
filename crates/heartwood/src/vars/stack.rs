//! Per-thread variable stack

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::closure::{ClosureEnv, ClosureRead, ClosureRef, ClosureWrite};
use super::slot::{LocalSlot, RefTarget, SkipGuard, Storage, VarRef};
use super::TypeConstraint;
use crate::error::{CoreError, ExceptionSink};
use crate::node::Value;

#[derive(Debug)]
enum Slot {
    Direct(LocalSlot),
    Shared(ClosureRef),
}

impl Slot {
    fn name(&self) -> &str {
        match self {
            Slot::Direct(s) => &s.name,
            Slot::Shared(c) => c.name(),
        }
    }

    fn ty(&self) -> TypeConstraint {
        match self {
            Slot::Direct(s) => s.ty,
            Slot::Shared(c) => c.ty(),
        }
    }

    fn skip_flag(&self) -> &Arc<AtomicBool> {
        match self {
            Slot::Direct(s) => &s.skip,
            Slot::Shared(c) => c.skip_flag(),
        }
    }

    fn is_skipped(&self) -> bool {
        match self {
            Slot::Direct(s) => s.skip.load(Ordering::Acquire),
            Slot::Shared(c) => c.is_skipped(),
        }
    }

    fn release(self, sink: &mut ExceptionSink) {
        match self {
            Slot::Direct(s) => s.storage.release(sink),
            Slot::Shared(c) => {
                c.deref(sink);
            }
        }
    }
}

enum Assigned {
    Done(bool),
    Alias(RefTarget, Value),
}

/// The variables visible to one thread, newest last, grouped into frames.
///
/// Ordinary variables live directly in the stack. Variables declared for
/// closure use are held through a [`ClosureRef`] so closures can share
/// them. Lookup goes newest-first; a variable whose alias is currently
/// being followed is skipped, so an alias that names itself resolves to
/// the next older variable of that name, or to nothing.
///
/// # Example
///
/// ```
/// use heartwood::{ExceptionSink, TypeConstraint, Value, VarStack};
///
/// let mut stack = VarStack::new();
/// let mut sink = ExceptionSink::new();
/// stack.instantiate("x", TypeConstraint::Int, Value::Int(1), &mut sink);
/// {
///     let mut frame = stack.frame_guard();
///     frame.instantiate("x", TypeConstraint::Int, Value::Int(2), &mut sink);
///     assert_eq!(frame.eval("x", &mut sink).and_then(|v| v.as_int()), Some(2));
/// }
/// assert_eq!(stack.eval("x", &mut sink).and_then(|v| v.as_int()), Some(1));
/// ```
#[derive(Debug, Default)]
pub struct VarStack {
    slots: Vec<Slot>,
    frames: Vec<usize>,
}

impl VarStack {
    /// Create an empty stack with no open frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of open frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of instantiated variables.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if no variable is instantiated.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Open a frame.
    pub fn push_frame(&mut self) {
        self.frames.push(self.slots.len());
    }

    /// Close the newest frame, uninstantiating its variables newest first.
    /// Returns false if no frame is open.
    pub fn pop_frame(&mut self, sink: &mut ExceptionSink) -> bool {
        let Some(base) = self.frames.pop() else {
            return false;
        };
        while self.slots.len() > base {
            self.uninstantiate(sink);
        }
        true
    }

    /// Instantiate a variable holding `value`.
    pub fn instantiate(
        &mut self,
        name: impl Into<String>,
        ty: TypeConstraint,
        value: Value,
        sink: &mut ExceptionSink,
    ) -> bool {
        let name = name.into();
        if let Err(e) = ty.check(&name, &value) {
            sink.raise(e);
            value.discard(sink);
            return false;
        }
        self.slots
            .push(Slot::Direct(LocalSlot::new(name, ty, Storage::Value(value))));
        true
    }

    /// Instantiate a variable aliasing another location.
    pub fn instantiate_ref(&mut self, name: impl Into<String>, ty: TypeConstraint, vref: VarRef) {
        self.slots
            .push(Slot::Direct(LocalSlot::new(name.into(), ty, Storage::Ref(vref))));
    }

    /// Instantiate a closure variable holding `value`.
    pub fn instantiate_closure(
        &mut self,
        name: impl Into<String>,
        ty: TypeConstraint,
        value: Value,
        sink: &mut ExceptionSink,
    ) -> bool {
        let name = name.into();
        if let Err(e) = ty.check(&name, &value) {
            sink.raise(e);
            value.discard(sink);
            return false;
        }
        self.slots
            .push(Slot::Shared(ClosureRef::new_value(name, ty, value)));
        true
    }

    /// Instantiate a closure variable aliasing another location.
    pub fn instantiate_closure_ref(&mut self, name: impl Into<String>, ty: TypeConstraint, vref: VarRef) {
        self.slots
            .push(Slot::Shared(ClosureRef::new_ref(name, ty, vref)));
    }

    /// Make a captured variable visible, taking over the reference.
    pub fn push_captured(&mut self, var: ClosureRef) {
        self.slots.push(Slot::Shared(var));
    }

    /// Make every variable of a closure environment visible.
    pub fn install(&mut self, env: &ClosureEnv) {
        for var in env.vars() {
            self.push_captured(var.clone());
        }
    }

    /// Remove the newest variable, releasing what it holds. Returns false
    /// if nothing is left above the open frame.
    pub fn uninstantiate(&mut self, sink: &mut ExceptionSink) -> bool {
        if self.frames.last().is_some_and(|&base| self.slots.len() <= base) {
            return false;
        }
        match self.slots.pop() {
            Some(slot) => {
                slot.release(sink);
                true
            }
            None => false,
        }
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .rposition(|s| !s.is_skipped() && s.name() == name)
    }

    /// True if a variable with this name is visible.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Names of visible variables, newest first.
    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().rev().map(Slot::name).collect()
    }

    /// Read a variable, following aliases.
    ///
    /// Returns `None` with `UNDEFINED-VARIABLE` in `sink` if no variable of
    /// that name is visible.
    pub fn eval(&self, name: &str, sink: &mut ExceptionSink) -> Option<Value> {
        let Some(index) = self.find(name) else {
            sink.raise(CoreError::UndefinedVariable {
                name: name.to_string(),
            });
            return None;
        };
        match &self.slots[index] {
            Slot::Direct(slot) => match &slot.storage {
                Storage::Value(v) => Some(v.clone()),
                Storage::Ref(vref) => {
                    let _skip = SkipGuard::set(&slot.skip);
                    self.eval_target(vref.target(), sink)
                }
            },
            Slot::Shared(var) => match var.read() {
                ClosureRead::Value(v) => Some(v),
                ClosureRead::Alias(target) => {
                    let _skip = SkipGuard::set(var.skip_flag());
                    self.eval_target(target, sink)
                }
            },
        }
    }

    fn eval_target(&self, target: RefTarget, sink: &mut ExceptionSink) -> Option<Value> {
        match target {
            RefTarget::Variable(name) => self.eval(&name, sink),
            RefTarget::Member {
                object,
                member,
                access,
            } => RefTarget::eval_member(object, &member, access, sink),
        }
    }

    /// Assign a variable, following aliases.
    ///
    /// The value must satisfy the declared type of every variable it
    /// passes through. Assigning a finalized variable raises
    /// `DESTRUCTOR-ERROR` and leaves it untouched.
    pub fn assign(&mut self, name: &str, value: Value, sink: &mut ExceptionSink) -> bool {
        let Some(index) = self.find(name) else {
            sink.raise(CoreError::UndefinedVariable {
                name: name.to_string(),
            });
            value.discard(sink);
            return false;
        };
        if let Err(e) = self.slots[index].ty().check(name, &value) {
            sink.raise(e);
            value.discard(sink);
            return false;
        }

        let assigned = match &mut self.slots[index] {
            Slot::Direct(slot) => {
                if slot.finalized {
                    sink.raise(CoreError::Finalized {
                        name: slot.name.clone(),
                    });
                    value.discard(sink);
                    return false;
                }
                match &mut slot.storage {
                    Storage::Value(current) => {
                        let old = std::mem::replace(current, value);
                        old.discard(sink);
                        Assigned::Done(true)
                    }
                    Storage::Ref(vref) => Assigned::Alias(vref.target(), value),
                }
            }
            Slot::Shared(var) => match var.write(value, sink) {
                ClosureWrite::Done(ok) => Assigned::Done(ok),
                ClosureWrite::Alias(target, value) => Assigned::Alias(target, value),
            },
        };

        match assigned {
            Assigned::Done(ok) => ok,
            Assigned::Alias(target, value) => {
                let _skip = SkipGuard::set(self.slots[index].skip_flag());
                self.assign_target(target, value, sink)
            }
        }
    }

    fn assign_target(&mut self, target: RefTarget, value: Value, sink: &mut ExceptionSink) -> bool {
        match target {
            RefTarget::Variable(name) => self.assign(&name, value, sink),
            RefTarget::Member {
                object,
                member,
                access,
            } => RefTarget::assign_member(object, &member, access, value, sink),
        }
    }

    /// Capture the named closure variables for a new closure.
    ///
    /// Fails with `CLOSURE-ERROR` if a name resolves to an ordinary
    /// variable, or `UNDEFINED-VARIABLE` if it is not visible; nothing is
    /// captured in either case.
    pub fn capture(&self, names: &[&str], sink: &mut ExceptionSink) -> Option<ClosureEnv> {
        let mut vars = Vec::with_capacity(names.len());
        for &name in names {
            let captured = match self.find(name).map(|i| &self.slots[i]) {
                Some(Slot::Shared(var)) => Ok(var.clone()),
                Some(Slot::Direct(_)) => Err(CoreError::NotShared {
                    name: name.to_string(),
                }),
                None => Err(CoreError::UndefinedVariable {
                    name: name.to_string(),
                }),
            };
            match captured {
                Ok(var) => vars.push(var),
                Err(e) => {
                    sink.raise(e);
                    for var in vars {
                        var.deref(sink);
                    }
                    return None;
                }
            }
        }
        Some(ClosureEnv::new(vars))
    }

    /// Second phase of teardown: release every value still held and make
    /// every variable reject further assignment.
    pub fn finalize_all(&mut self, sink: &mut ExceptionSink) {
        for slot in self.slots.iter_mut().rev() {
            match slot {
                Slot::Direct(local) => local.finalize(sink),
                Slot::Shared(var) => var.finalize(sink),
            }
        }
    }

    /// Uninstantiate everything and close all frames.
    pub fn clear(&mut self, sink: &mut ExceptionSink) {
        self.frames.clear();
        while let Some(slot) = self.slots.pop() {
            slot.release(sink);
        }
    }
}

impl Drop for VarStack {
    fn drop(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        let mut sink = ExceptionSink::new();
        self.clear(&mut sink);
        sink.discard("variable stack teardown");
    }
}
