//! Variable stack and closure tests

use std::thread;

use heartwood::*;
use pretty_assertions::assert_eq;

fn int_of(stack: &VarStack, name: &str) -> Option<i64> {
    stack.eval(name, &mut ExceptionSink::new()).and_then(|v| v.as_int())
}

// ═══════════════════════════════════════════════════════════════════════
// Lookup and aliases
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_undefined_variable() {
    let stack = VarStack::new();
    let mut sink = ExceptionSink::new();
    assert!(stack.eval("ghost", &mut sink).is_none());
    assert!(sink.contains_kind("UNDEFINED-VARIABLE"));
}

#[test]
fn test_self_reference_reads_as_undefined() {
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();
    let x = LocalVar::new("x", TypeConstraint::Any);
    x.instantiate_ref(&mut stack, VarRef::variable("x"));

    assert!(x.eval(&stack, &mut sink).is_none());
    assert!(!x.assign(&mut stack, Value::Int(1), &mut sink));
    assert_eq!(
        sink.iter().filter(|e| e.kind() == "UNDEFINED-VARIABLE").count(),
        2
    );
}

#[test]
fn test_alias_of_shadowed_name_reaches_outer() {
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();
    stack.instantiate("total", TypeConstraint::Int, Value::Int(10), &mut sink);
    {
        let mut frame = stack.frame_guard();
        frame.instantiate_ref("total", TypeConstraint::Int, VarRef::variable("total"));
        assert_eq!(int_of(&frame, "total"), Some(10));
        assert!(frame.assign("total", Value::Int(11), &mut sink));
    }
    assert_eq!(int_of(&stack, "total"), Some(11));
    assert!(sink.is_empty());
}

#[test]
fn test_alias_chain() {
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();
    stack.instantiate("a", TypeConstraint::Any, Value::Int(1), &mut sink);
    stack.instantiate_ref("b", TypeConstraint::Any, VarRef::variable("a"));
    stack.instantiate_ref("c", TypeConstraint::Any, VarRef::variable("b"));

    assert!(stack.assign("c", Value::Int(3), &mut sink));
    assert_eq!(int_of(&stack, "a"), Some(3));
    assert_eq!(int_of(&stack, "c"), Some(3));
}

#[test]
fn test_alias_type_checked_at_each_step() {
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();
    stack.instantiate("loose", TypeConstraint::Any, Value::Int(1), &mut sink);
    stack.instantiate_ref("strict", TypeConstraint::Int, VarRef::variable("loose"));

    assert!(!stack.assign("strict", Value::from("text"), &mut sink));
    assert!(sink.contains_kind("RUNTIME-TYPE-ERROR"));
    assert_eq!(int_of(&stack, "loose"), Some(1));
}

#[test]
fn test_member_alias_uses_owner_access() {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Vault").private_member("secret").build();
    let obj = heap.new_object(&class, None);
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();

    stack.instantiate_ref(
        "inside",
        TypeConstraint::Any,
        VarRef::member(obj.clone(), "secret").with_object(&obj),
    );
    stack.instantiate_ref("outside", TypeConstraint::Any, VarRef::member(obj.clone(), "secret"));

    assert!(stack.assign("inside", Value::Int(42), &mut sink));
    assert_eq!(int_of(&stack, "inside"), Some(42));
    assert!(sink.is_empty());

    assert!(stack.eval("outside", &mut sink).is_none());
    assert!(sink.contains_kind("PRIVATE-MEMBER"));

    assert_eq!(obj.structural_count(), 2);
    let mut teardown = ExceptionSink::new();
    stack.clear(&mut teardown);
    assert_eq!(obj.structural_count(), 1);
    assert_eq!(obj.reference_count(), 1);
}

#[test]
fn test_member_alias_to_deleted_object() {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Gone").build();
    let obj = heap.new_object(&class, None);
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();

    stack.instantiate_ref("m", TypeConstraint::Any, VarRef::member(obj.clone(), "m"));
    assert!(obj.delete(&mut sink));
    assert!(!stack.assign("m", Value::Int(1), &mut sink));
    assert!(sink.contains_kind("OBJECT-ALREADY-DELETED"));
}

// ═══════════════════════════════════════════════════════════════════════
// Closures
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_captured_variable_outlives_frame() {
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();
    let payload = Value::string("kept alive");
    let mut var = LocalVar::new("s", TypeConstraint::String);
    var.set_closure_use();

    let env = {
        let mut frame = stack.frame_guard();
        assert!(var.instantiate(&mut frame, payload.clone(), &mut sink));
        frame.capture(&["s"], &mut sink).unwrap()
    };
    assert!(!stack.contains("s"));
    assert_eq!(payload.as_node().unwrap().reference_count(), 2);

    let captured = env.get("s").unwrap();
    assert_eq!(captured.reference_count(), 1);
    assert!(captured.eval(&mut sink).unwrap().identical(&payload));

    env.release(&mut sink);
    assert_eq!(payload.as_node().unwrap().reference_count(), 1);
}

#[test]
fn test_closure_and_frame_share_value() {
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();
    stack.instantiate_closure("n", TypeConstraint::Int, Value::Int(1), &mut sink);
    let env = stack.capture(&["n"], &mut sink).unwrap();

    // The closure body runs against its own stack.
    let mut body = VarStack::new();
    body.install(&env);
    assert!(body.assign("n", Value::Int(2), &mut sink));
    assert_eq!(int_of(&stack, "n"), Some(2));

    body.clear(&mut sink);
    env.release(&mut sink);
    assert!(sink.is_empty());
}

#[test]
fn test_finalized_closure_rejects_assignment() {
    let mut sink = ExceptionSink::new();
    let payload = Value::string("state");
    let var = ClosureRef::new_value("v", TypeConstraint::Any, payload.clone());
    let other = var.clone();

    var.finalize(&mut sink);
    assert_eq!(payload.as_node().unwrap().reference_count(), 1);

    assert!(!other.assign(Value::Int(5), &mut sink));
    assert!(sink.contains_kind("DESTRUCTOR-ERROR"));
    assert!(other.eval(&mut sink).unwrap().is_nothing());
    assert!(other.is_finalized());
}

#[test]
fn test_closure_ref_alias_to_stack_variable() {
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();
    stack.instantiate("x", TypeConstraint::Any, Value::Int(0), &mut sink);
    stack.instantiate_closure_ref("y", TypeConstraint::Any, VarRef::variable("x"));

    assert!(stack.assign("y", Value::Int(5), &mut sink));
    assert_eq!(int_of(&stack, "x"), Some(5));
    assert_eq!(int_of(&stack, "y"), Some(5));
}

#[test]
fn test_closure_shared_across_threads() {
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();
    stack.instantiate_closure("slot", TypeConstraint::Int, Value::Int(-1), &mut sink);
    let env = stack.capture(&["slot"], &mut sink).unwrap();

    let workers: Vec<_> = (0..4i64)
        .map(|i| {
            let env = env.clone();
            thread::spawn(move || {
                let mut sink = ExceptionSink::new();
                let mut body = VarStack::new();
                body.install(&env);
                let ok = body.assign("slot", Value::Int(i), &mut sink);
                body.clear(&mut sink);
                env.release(&mut sink);
                ok
            })
        })
        .collect();
    for w in workers {
        assert!(w.join().unwrap());
    }

    let last = int_of(&stack, "slot").unwrap();
    assert!((0..4).contains(&last));
    assert_eq!(env.get("slot").unwrap().reference_count(), 2);
}

#[test]
fn test_stack_finalize_then_pop() {
    let mut stack = VarStack::new();
    let mut sink = ExceptionSink::new();
    let payload = Value::list(vec![Value::Int(1)]);
    stack.push_frame();
    stack.instantiate("l", TypeConstraint::List, payload.clone(), &mut sink);
    stack.finalize_all(&mut sink);
    assert_eq!(payload.as_node().unwrap().reference_count(), 1);

    assert!(!stack.assign("l", Value::list(vec![]), &mut sink));
    assert!(sink.contains_kind("DESTRUCTOR-ERROR"));
    assert!(stack.pop_frame(&mut sink));
    assert!(stack.is_empty());
}
