//! Local and closure variables
//!
//! A [`LocalVar`] is the compiled declaration of a variable: its name, its
//! declared type, and whether any closure captures it. Instantiating it
//! pushes a slot onto the thread's [`VarStack`]. Variables that closures
//! capture get a heap-resident [`ClosureRef`] slot instead of a stack one,
//! so the frame and the closures share a single value.
//!
//! Either kind of slot may hold a value or a [`VarRef`] alias to another
//! variable or to an object member.

mod closure;
mod frame;
mod slot;
mod stack;

pub use closure::{ClosureEnv, ClosureRef};
pub use frame::FrameGuard;
pub use slot::{RefExpr, VarRef};
pub use stack::VarStack;

use crate::error::{CoreError, ExceptionSink, Result};
use crate::node::{NodeType, Value};

/// Declared type of a variable. `NOTHING` satisfies every constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeConstraint {
    /// No constraint
    #[default]
    Any,
    /// Integer
    Int,
    /// Float
    Float,
    /// Boolean
    Bool,
    /// String
    String,
    /// List
    List,
    /// Hash
    Hash,
    /// Object of any class
    Object,
}

impl TypeConstraint {
    /// Name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            TypeConstraint::Any => "any",
            TypeConstraint::Int => "int",
            TypeConstraint::Float => "float",
            TypeConstraint::Bool => "bool",
            TypeConstraint::String => "string",
            TypeConstraint::List => "list",
            TypeConstraint::Hash => "hash",
            TypeConstraint::Object => "object",
        }
    }

    /// True if `value` may be stored under this constraint.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (TypeConstraint::Any, _) | (_, Value::Nothing) => true,
            (TypeConstraint::Int, Value::Int(_)) => true,
            (TypeConstraint::Float, Value::Float(_)) => true,
            (TypeConstraint::Bool, Value::Bool(_)) => true,
            (ty, Value::Node(node)) => matches!(
                (ty, node.node_type()),
                (TypeConstraint::String, NodeType::String)
                    | (TypeConstraint::List, NodeType::List)
                    | (TypeConstraint::Hash, NodeType::Hash)
                    | (TypeConstraint::Object, NodeType::Object)
            ),
            _ => false,
        }
    }

    pub(crate) fn check(self, name: &str, value: &Value) -> Result<()> {
        if self.accepts(value) {
            return Ok(());
        }
        Err(CoreError::TypeMismatch {
            name: name.to_string(),
            expected: self.name(),
            got: value.type_name(),
        })
    }
}

/// Compiled declaration of a local variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVar {
    name: String,
    ty: TypeConstraint,
    closure_use: bool,
}

impl LocalVar {
    /// Declare a variable that lives on the stack.
    pub fn new(name: impl Into<String>, ty: TypeConstraint) -> Self {
        Self {
            name: name.into(),
            ty,
            closure_use: false,
        }
    }

    /// Mark the variable as captured by some closure. Set during parsing,
    /// before the variable is ever instantiated.
    pub fn set_closure_use(&mut self) {
        self.closure_use = true;
    }

    /// True if some closure captures this variable.
    pub fn closure_use(&self) -> bool {
        self.closure_use
    }

    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type.
    pub fn ty(&self) -> TypeConstraint {
        self.ty
    }

    /// Push a slot holding `value`.
    pub fn instantiate(&self, stack: &mut VarStack, value: Value, sink: &mut ExceptionSink) -> bool {
        if self.closure_use {
            stack.instantiate_closure(self.name.as_str(), self.ty, value, sink)
        } else {
            stack.instantiate(self.name.as_str(), self.ty, value, sink)
        }
    }

    /// Push a slot aliasing another location.
    pub fn instantiate_ref(&self, stack: &mut VarStack, vref: VarRef) {
        if self.closure_use {
            stack.instantiate_closure_ref(self.name.as_str(), self.ty, vref);
        } else {
            stack.instantiate_ref(self.name.as_str(), self.ty, vref);
        }
    }

    /// Pop the newest slot.
    pub fn uninstantiate(&self, stack: &mut VarStack, sink: &mut ExceptionSink) -> bool {
        stack.uninstantiate(sink)
    }

    /// Read the variable's current value.
    pub fn eval(&self, stack: &VarStack, sink: &mut ExceptionSink) -> Option<Value> {
        stack.eval(&self.name, sink)
    }

    /// Assign the variable.
    pub fn assign(&self, stack: &mut VarStack, value: Value, sink: &mut ExceptionSink) -> bool {
        stack.assign(&self.name, value, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_satisfies_any_type() {
        for ty in [TypeConstraint::Int, TypeConstraint::Hash, TypeConstraint::Object] {
            assert!(ty.accepts(&Value::Nothing));
        }
    }

    #[test]
    fn test_node_types_checked() {
        assert!(TypeConstraint::String.accepts(&Value::from("s")));
        assert!(!TypeConstraint::List.accepts(&Value::from("s")));
        assert!(TypeConstraint::List.accepts(&Value::list(vec![])));
        assert!(!TypeConstraint::Int.accepts(&Value::Float(1.0)));

        let err = TypeConstraint::Int.check("n", &Value::Bool(true)).unwrap_err();
        assert_eq!(err.kind(), "RUNTIME-TYPE-ERROR");
    }

    #[test]
    fn test_closure_use_selects_slot_kind() {
        let mut sink = ExceptionSink::new();
        let mut stack = VarStack::new();
        let plain = LocalVar::new("plain", TypeConstraint::Any);
        let mut shared = LocalVar::new("shared", TypeConstraint::Any);
        shared.set_closure_use();

        assert!(plain.instantiate(&mut stack, Value::Int(1), &mut sink));
        assert!(shared.instantiate(&mut stack, Value::Int(2), &mut sink));
        assert!(stack.capture(&["shared"], &mut sink).is_some());
        assert!(stack.capture(&["plain"], &mut sink).is_none());

        assert!(shared.assign(&mut stack, Value::Int(3), &mut sink));
        assert_eq!(shared.eval(&stack, &mut sink).and_then(|v| v.as_int()), Some(3));
    }
}
