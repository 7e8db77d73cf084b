//! Stack-resident variable slots and reference aliases

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::TypeConstraint;
use crate::error::ExceptionSink;
use crate::lock::LockChain;
use crate::node::Value;
use crate::object::{Access, ObjectRef, StructuralRef};
use crate::program::ProgramRef;

/// What a reference variable aliases.
#[derive(Debug)]
pub enum RefExpr {
    /// Another variable, looked up by name when the alias is used
    Variable(String),
    /// A member of an object; the alias holds a reference to the object
    Member {
        /// Object whose member is aliased
        object: ObjectRef,
        /// Member name
        member: String,
    },
}

/// A pass-by-reference binding: the aliased expression plus the context
/// it was created in.
///
/// The owning object is pinned structurally and, when it is the aliased
/// object, grants access to private members.
#[derive(Debug)]
pub struct VarRef {
    expr: RefExpr,
    object: Option<StructuralRef>,
    program: Option<ProgramRef>,
}

/// An owned copy of an alias target, taken so no slot lock is held while
/// the alias is followed.
pub(crate) enum RefTarget {
    Variable(String),
    Member {
        object: ObjectRef,
        member: String,
        access: Access,
    },
}

impl VarRef {
    /// Alias another variable.
    pub fn variable(name: impl Into<String>) -> Self {
        Self::new(RefExpr::Variable(name.into()))
    }

    /// Alias a member of `object`, taking over the reference.
    pub fn member(object: ObjectRef, member: impl Into<String>) -> Self {
        Self::new(RefExpr::Member {
            object,
            member: member.into(),
        })
    }

    fn new(expr: RefExpr) -> Self {
        Self {
            expr,
            object: None,
            program: None,
        }
    }

    /// Record the object whose method created the alias.
    pub fn with_object(mut self, owner: &ObjectRef) -> Self {
        self.object = Some(owner.structural_ref());
        self
    }

    /// Record the program the alias was created in.
    pub fn with_program(mut self, program: ProgramRef) -> Self {
        self.program = Some(program);
        self
    }

    /// The aliased expression.
    pub fn expr(&self) -> &RefExpr {
        &self.expr
    }

    /// The program the alias was created in.
    pub fn program(&self) -> Option<&ProgramRef> {
        self.program.as_ref()
    }

    fn access_for(&self, target: &ObjectRef) -> Access {
        match &self.object {
            Some(pin) if pin.is_for(target) => Access::Internal,
            _ => Access::External,
        }
    }

    pub(crate) fn target(&self) -> RefTarget {
        match &self.expr {
            RefExpr::Variable(name) => RefTarget::Variable(name.clone()),
            RefExpr::Member { object, member } => RefTarget::Member {
                object: object.clone(),
                member: member.clone(),
                access: self.access_for(object),
            },
        }
    }

    /// Release the aliased expression and the context holds.
    pub(crate) fn release(self, sink: &mut ExceptionSink) {
        if let RefExpr::Member { object, .. } = self.expr {
            object.deref(sink);
        }
    }
}

impl RefTarget {
    /// Read a member target. Variable targets are resolved by the stack.
    pub(crate) fn eval_member(object: ObjectRef, member: &str, access: Access, sink: &mut ExceptionSink) -> Option<Value> {
        let value = object.get_member(member, access, sink);
        object.deref(sink);
        value
    }

    /// Assign through a member target under a chain of its own.
    pub(crate) fn assign_member(
        object: ObjectRef,
        member: &str,
        access: Access,
        value: Value,
        sink: &mut ExceptionSink,
    ) -> bool {
        let mut chain = LockChain::new();
        let ok = object.set_member(member, value, access, &mut chain, sink);
        chain.unwind(sink);
        object.deref(sink);
        ok
    }
}

/// Value or alias held by a slot.
pub(crate) enum Storage {
    Value(Value),
    Ref(VarRef),
}

impl Storage {
    pub(crate) fn release(self, sink: &mut ExceptionSink) {
        match self {
            Storage::Value(v) => v.discard(sink),
            Storage::Ref(r) => r.release(sink),
        }
    }
}

/// A variable living directly on its thread's stack.
pub(crate) struct LocalSlot {
    pub(crate) name: String,
    pub(crate) ty: TypeConstraint,
    pub(crate) storage: Storage,
    pub(crate) skip: Arc<AtomicBool>,
    pub(crate) finalized: bool,
}

impl LocalSlot {
    pub(crate) fn new(name: String, ty: TypeConstraint, storage: Storage) -> Self {
        Self {
            name,
            ty,
            storage,
            skip: Arc::new(AtomicBool::new(false)),
            finalized: false,
        }
    }

    /// Second-phase teardown: release the value and refuse later writes.
    pub(crate) fn finalize(&mut self, sink: &mut ExceptionSink) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        let old = std::mem::replace(&mut self.storage, Storage::Value(Value::Nothing));
        old.release(sink);
    }
}

/// Sets a skip flag for as long as an alias is being followed, so a
/// lookup that reaches the same variable again treats it as absent.
///
/// The guard holds its own handle to the flag, leaving the stack free to
/// be mutated while an assignment follows the alias.
pub(crate) struct SkipGuard(Arc<AtomicBool>);

impl SkipGuard {
    pub(crate) fn set(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::Release);
        Self(Arc::clone(flag))
    }
}

impl Drop for SkipGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl fmt::Debug for LocalSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = match &self.storage {
            Storage::Value(v) => format!("{:?}", v),
            Storage::Ref(r) => format!("ref {:?}", r.expr()),
        };
        f.debug_struct("LocalSlot")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("storage", &storage)
            .field("finalized", &self.finalized)
            .finish()
    }
}
