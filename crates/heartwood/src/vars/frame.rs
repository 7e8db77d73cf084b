//! RAII guard for automatic frame cleanup

use super::VarStack;
use crate::error::ExceptionSink;

/// Guard that pops a frame when dropped.
///
/// Errors raised while the frame's variables are released go to the log
/// when the guard is simply dropped; call [`FrameGuard::finish`] to collect
/// them instead.
///
/// # Example
///
/// ```
/// use heartwood::{ExceptionSink, TypeConstraint, Value, VarStack};
///
/// let mut stack = VarStack::new();
/// let mut sink = ExceptionSink::new();
/// stack.instantiate("x", TypeConstraint::Any, Value::Int(1), &mut sink);
///
/// {
///     let mut frame = stack.frame_guard();
///     frame.instantiate("y", TypeConstraint::Any, Value::Int(2), &mut sink);
///     assert!(frame.contains("y"));
/// }
/// assert!(!stack.contains("y"));
/// assert!(stack.contains("x"));
/// ```
pub struct FrameGuard<'a> {
    stack: &'a mut VarStack,
    popped: bool,
}

impl VarStack {
    /// Push a frame now and pop it when the guard goes away.
    pub fn frame_guard(&mut self) -> FrameGuard<'_> {
        self.push_frame();
        FrameGuard {
            stack: self,
            popped: false,
        }
    }
}

impl FrameGuard<'_> {
    /// Pop the frame now, reporting release errors to `sink`.
    pub fn finish(mut self, sink: &mut ExceptionSink) {
        self.popped = true;
        self.stack.pop_frame(sink);
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if self.popped {
            return;
        }
        let mut sink = ExceptionSink::new();
        self.stack.pop_frame(&mut sink);
        sink.discard("frame guard");
    }
}

impl std::ops::Deref for FrameGuard<'_> {
    type Target = VarStack;

    fn deref(&self) -> &Self::Target {
        self.stack
    }
}

impl std::ops::DerefMut for FrameGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Value;
    use crate::vars::TypeConstraint;

    #[test]
    fn test_guard_pops_frame() {
        let mut stack = VarStack::new();
        let initial_depth = stack.depth();
        {
            let guard = stack.frame_guard();
            assert_eq!(guard.depth(), initial_depth + 1);
        }
        assert_eq!(stack.depth(), initial_depth);
    }

    #[test]
    fn test_nested_guards() {
        let mut stack = VarStack::new();
        let mut sink = ExceptionSink::new();
        stack.instantiate("a", TypeConstraint::Any, Value::Int(1), &mut sink);
        {
            let mut outer = stack.frame_guard();
            outer.instantiate("b", TypeConstraint::Any, Value::Int(2), &mut sink);
            {
                let mut inner = outer.frame_guard();
                inner.instantiate("c", TypeConstraint::Any, Value::Int(3), &mut sink);
                assert!(inner.contains("a"));
                assert!(inner.contains("c"));
            }
            assert!(!outer.contains("c"));
            assert!(outer.contains("b"));
        }
        assert_eq!(stack.names(), vec!["a"]);
    }

    #[test]
    fn test_finish_releases_into_sink() {
        let mut stack = VarStack::new();
        let mut sink = ExceptionSink::new();
        let held = Value::string("frame local");
        {
            let mut guard = stack.frame_guard();
            guard.instantiate("s", TypeConstraint::String, held.clone(), &mut sink);
            assert_eq!(held.as_node().unwrap().reference_count(), 2);
            guard.finish(&mut sink);
        }
        assert_eq!(held.as_node().unwrap().reference_count(), 1);
        assert_eq!(stack.depth(), 0);
        assert!(sink.is_empty());
    }
}
