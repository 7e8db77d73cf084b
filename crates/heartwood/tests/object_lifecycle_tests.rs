//! Object lifecycle tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use heartwood::*;
use pretty_assertions::assert_eq;

struct Handle {
    releases: Arc<AtomicUsize>,
}

impl PrivateData for Handle {
    fn release(&self, _sink: &mut ExceptionSink) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

fn counting_destructor(name: &str, runs: &Arc<AtomicUsize>) -> Arc<ClassDescriptor> {
    let counter = Arc::clone(runs);
    ClassDescriptor::builder(name)
        .destructor(move |_this, _sink| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
}

// ═══════════════════════════════════════════════════════════════════════
// Construction
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_constructors_run_base_first() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (o1, o2) = (Arc::clone(&order), Arc::clone(&order));
    let base = ClassDescriptor::builder("Base")
        .constructor(move |_this, _sink| o1.lock().push("Base"))
        .build();
    let derived = ClassDescriptor::builder("Derived")
        .parent(&base)
        .constructor(move |_this, _sink| o2.lock().push("Derived"))
        .build();

    let heap = Heap::default();
    let mut sink = ExceptionSink::new();
    let obj = heap.construct(&derived, None, &mut sink).unwrap();
    assert_eq!(*order.lock(), vec!["Base", "Derived"]);
    assert!(derived.inherits(&base));
    assert_eq!(obj.status(), ObjectStatus::Ok);
}

#[test]
fn test_failed_constructor_obliterates() {
    let heap = Heap::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let sample = Value::string("acquired in constructor");
    let held = sample.clone();
    let class = ClassDescriptor::builder("Broken")
        .constructor(move |this, sink| {
            let mut chain = LockChain::new();
            this.set_member("s", held.clone(), Access::Internal, &mut chain, sink);
            sink.raise_kind("CONSTRUCTOR-FAILED", "no luck");
        })
        .destructor(move |_this, _sink| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let mut sink = ExceptionSink::new();
    assert!(heap.construct(&class, None, &mut sink).is_none());
    assert!(sink.contains_kind("CONSTRUCTOR-FAILED"));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let stats = heap.stats();
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.live_objects, 0);
    // Only the closure captured in the class still holds the string.
    assert_eq!(sample.as_node().unwrap().reference_count(), 2);
}

#[test]
fn test_obliterate_with_other_holders_only_drops_reference() {
    let heap = Heap::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let class = counting_destructor("Kept", &runs);
    let mut sink = ExceptionSink::new();

    let obj = heap.new_object(&class, None);
    let keeper = obj.clone();
    obj.obliterate(&mut sink);
    assert_eq!(keeper.reference_count(), 1);
    assert_eq!(keeper.status(), ObjectStatus::Ok);

    keeper.deref(&mut sink);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// ═══════════════════════════════════════════════════════════════════════
// Deletion
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_many_refs_destructor_runs_once() {
    let heap = Heap::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let class = counting_destructor("Popular", &runs);
    let mut sink = ExceptionSink::new();

    let obj = heap.new_object(&class, None);
    let refs: Vec<ObjectRef> = (0..10).map(|_| obj.clone()).collect();
    assert_eq!(obj.reference_count(), 11);
    for r in refs {
        r.deref(&mut sink);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(obj.deref(&mut sink));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_delete_with_outstanding_references() {
    let heap = Heap::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let class = counting_destructor("Doomed", &runs);
    let mut sink = ExceptionSink::new();
    let mut chain = LockChain::new();

    let obj = heap.new_object(&class, None);
    obj.set_member("n", Value::Int(1), Access::External, &mut chain, &mut sink);
    let other = obj.clone();
    assert!(obj.delete(&mut sink));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    assert!(other.get_member("n", Access::External, &mut sink).is_none());
    assert!(sink.contains_kind("OBJECT-ALREADY-DELETED"));
    assert!(other.member_names(Access::External, &mut ExceptionSink::new()).is_none());

    let watch = obj.watch();
    obj.deref(&mut sink);
    other.deref(&mut sink);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(watch.status(), None);
}

#[test]
fn test_private_data_released_once() {
    let heap = Heap::default();
    let base = ClassDescriptor::builder("Stream").build();
    let derived = ClassDescriptor::builder("FileStream").parent(&base).build();
    let releases = Arc::new(AtomicUsize::new(0));
    let mut sink = ExceptionSink::new();

    let obj = heap.new_object(&derived, None);
    let data: Arc<dyn PrivateData> = Arc::new(Handle {
        releases: Arc::clone(&releases),
    });
    assert!(obj.set_private_data(&derived, data, &mut sink));
    assert!(obj.get_private_data(base.id()).is_some());
    assert!(obj.get_private_data(derived.id()).is_some());

    obj.deref(&mut sink);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_object_holds_program_until_deleted() {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Scripted").build();
    let program = ProgramRef::new("main");
    let mut sink = ExceptionSink::new();

    let obj = heap.new_object(&class, Some(program.clone()));
    assert_eq!(program.holders(), 2);
    assert!(obj.program().is_some_and(|p| p.ptr_eq(&program)));

    obj.deref(&mut sink);
    assert_eq!(program.holders(), 1);
}

#[test]
fn test_structural_ref_survives_deletion() {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Pinned").build();
    let mut sink = ExceptionSink::new();

    let obj = heap.new_object(&class, None);
    let watch = obj.watch();
    let pin = obj.structural_ref();
    obj.deref(&mut sink);

    assert_eq!(watch.status(), Some(ObjectStatus::Deleted));
    assert_eq!(heap.stats().live_objects, 1);
    drop(pin);
    assert_eq!(watch.status(), None);
    assert_eq!(heap.stats().live_objects, 0);
}

// ═══════════════════════════════════════════════════════════════════════
// Member access
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_private_member_rejected_from_outside() {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Account").private_member("balance").build();
    let mut sink = ExceptionSink::new();
    let mut chain = LockChain::new();
    let obj = heap.new_object(&class, None);

    assert!(obj.set_member("balance", Value::Int(10), Access::Internal, &mut chain, &mut sink));
    assert!(obj.get_member("balance", Access::External, &mut sink).is_none());
    assert!(sink.contains_kind("PRIVATE-MEMBER"));

    let mut inside = ExceptionSink::new();
    let balance = obj.get_member("balance", Access::Internal, &mut inside);
    assert_eq!(balance.and_then(|v| v.as_int()), Some(10));
    assert_eq!(obj.member_names(Access::External, &mut inside), Some(vec![]));
}

#[test]
fn test_undeclared_member_rejected_when_public_members_declared() {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Point")
        .public_member("x")
        .public_member("y")
        .build();
    let mut sink = ExceptionSink::new();
    let mut chain = LockChain::new();
    let obj = heap.new_object(&class, None);

    assert!(obj.set_member("x", Value::Int(1), Access::External, &mut chain, &mut sink));
    assert!(!obj.set_member("z", Value::Int(1), Access::External, &mut chain, &mut sink));
    assert!(sink.contains_kind("INVALID-MEMBER"));
    assert!(chain.is_empty());
}

#[test]
fn test_missing_member_reads_as_nothing() {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Open").build();
    let mut sink = ExceptionSink::new();
    let obj = heap.new_object(&class, None);
    assert!(obj
        .get_member("absent", Access::External, &mut sink)
        .is_some_and(|v| v.is_nothing()));
    assert!(sink.is_empty());
}

#[test]
fn test_merge_and_key_order() {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Record").build();
    let mut sink = ExceptionSink::new();
    let mut chain = LockChain::new();
    let obj = heap.new_object(&class, None);

    let data = Value::hash([("b", Value::Int(2)), ("a", Value::Int(1))]);
    assert!(obj.merge(&data, Access::External, &mut chain, &mut sink));
    assert_eq!(obj.first_key(Access::External, &mut sink).as_deref(), Some("b"));
    assert_eq!(obj.last_key(Access::External, &mut sink).as_deref(), Some("a"));

    let copy = obj.copy_data(&mut sink).unwrap();
    assert_eq!(copy, data);

    assert!(!obj.merge(&Value::Int(3), Access::External, &mut chain, &mut sink));
    assert!(sink.contains_kind("RUNTIME-TYPE-ERROR"));
}

#[test]
fn test_key_ends_skip_private_members_from_outside() {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Guarded")
        .private_member("secret")
        .private_member("trailer")
        .build();
    let mut sink = ExceptionSink::new();
    let mut chain = LockChain::new();
    let obj = heap.new_object(&class, None);

    assert!(obj.set_member("secret", Value::Int(1), Access::Internal, &mut chain, &mut sink));
    assert!(obj.set_member("name", Value::from("n"), Access::External, &mut chain, &mut sink));
    assert!(obj.set_member("trailer", Value::Int(2), Access::Internal, &mut chain, &mut sink));

    assert_eq!(obj.first_key(Access::External, &mut sink).as_deref(), Some("name"));
    assert_eq!(obj.last_key(Access::External, &mut sink).as_deref(), Some("name"));
    assert_eq!(obj.first_key(Access::Internal, &mut sink).as_deref(), Some("secret"));
    assert_eq!(obj.last_key(Access::Internal, &mut sink).as_deref(), Some("trailer"));
    assert_eq!(
        obj.member_names(Access::External, &mut sink),
        Some(vec!["name".to_string()])
    );
    assert!(sink.is_empty());
}

#[test]
fn test_take_member_hands_over_reference() {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Bag").build();
    let mut sink = ExceptionSink::new();
    let mut chain = LockChain::new();
    let obj = heap.new_object(&class, None);
    let item = Value::string("item");

    obj.set_member("item", item.clone(), Access::External, &mut chain, &mut sink);
    let taken = obj.take_member("item", Access::External, &mut chain, &mut sink).unwrap();
    assert!(taken.identical(&item));
    assert_eq!(item.as_node().unwrap().reference_count(), 2);
    assert_eq!(obj.member_names(Access::External, &mut sink), Some(vec![]));
}

#[test]
fn test_concurrent_member_writes() -> anyhow::Result<()> {
    let heap = Heap::default();
    let class = ClassDescriptor::builder("Shared").build();
    let obj = heap.new_object(&class, None);

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let obj = obj.clone();
            thread::spawn(move || {
                let mut sink = ExceptionSink::new();
                let mut chain = LockChain::new();
                for i in 0..100 {
                    let name = format!("t{}_{}", t, i);
                    obj.set_member(&name, Value::Int(i), Access::External, &mut chain, &mut sink);
                }
                obj.deref(&mut sink);
                sink.len()
            })
        })
        .collect();
    for w in workers {
        let errors = w.join().map_err(|_| anyhow::anyhow!("worker panicked"))?;
        assert_eq!(errors, 0);
    }

    let mut sink = ExceptionSink::new();
    let names = obj.member_names(Access::External, &mut sink).unwrap_or_default();
    assert_eq!(names.len(), 400);
    assert_eq!(obj.reference_count(), 1);
    Ok(())
}
