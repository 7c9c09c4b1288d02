use std::sync::atomic::{AtomicUsize, Ordering};

use assert_call::{call, CallRecorder};

use crate::{Container, Error, List, Owner, Value, VarDefault};

fn owner() -> Owner<'static> {
    Owner {
        id: "c1",
        class: "Cart",
    }
}

#[test]
fn get_absent_is_nil_and_not_dirty() {
    let mut c = Container::new();
    let v = c.get("x", &VarDefault::Absent, owner());
    assert!(matches!(v, Ok(Value::Nil)));
    assert!(!c.is_changed());
    assert!(c.contains("x"));
}

#[test]
fn get_computes_default_once() {
    static CALLS: AtomicUsize = AtomicUsize::new(0);
    let default = VarDefault::factory(|| {
        CALLS.fetch_add(1, Ordering::SeqCst);
        Value::list(["a"])
    });
    let mut c = Container::new();
    let first = c.get("tags", &default, owner()).unwrap();
    let second = c.get("tags", &default, owner()).unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(first.observed_names(), vec!["tags"]);
    assert!(!c.is_changed());
}

#[test]
fn default_factory_receives_owner() {
    let mut cr = CallRecorder::new();
    let default = VarDefault::with_owner(|owner| {
        call!("{}:{}", owner.class, owner.id);
        Value::Int(1)
    });
    let mut c = Container::new();
    assert_eq!(c.get("n", &default, owner()).unwrap(), Value::Int(1));
    cr.verify("Cart:c1");
}

#[test]
fn composite_literal_default_is_rejected() {
    let mut c = Container::new();
    let r = c.get("items", &VarDefault::literal(serde_json::json!([])), owner());
    assert!(matches!(r, Err(Error::InvalidDefaultFactory { name }) if name == "items"));
    let r = c.get("count", &VarDefault::literal(3), owner());
    assert_eq!(r.unwrap(), Value::Int(3));
}

#[test]
fn set_marks_dirty() {
    let mut c = Container::new();
    c.set("count", 1);
    c.set("count", 2);
    assert_eq!(c.changeset().iter().collect::<Vec<_>>(), vec!["count"]);
    assert_eq!(c.peek("count"), Some(Value::Int(2)));
    c.reset_changeset();
    assert!(!c.is_changed());
}

#[test]
fn replaced_value_no_longer_marks() {
    let mut c = Container::new();
    let old = List::new();
    c.set("tags", old.clone());
    c.set("tags", List::new());
    c.reset_changeset();

    old.push(1);
    assert!(!c.is_changed());
    assert_eq!(old.observer_count(), 0);
}

#[test]
fn replaced_value_silences_nested_handles() {
    let mut c = Container::new();
    c.set("items", Value::from_json(serde_json::json!([[1]])));
    let inner = c
        .peek("items")
        .and_then(|items| items.as_list().and_then(|l| l.get(0)))
        .unwrap_or_default();
    assert_eq!(inner.observed_names(), vec!["items"]);

    c.set("items", Value::from_json(serde_json::json!([2])));
    c.reset_changeset();
    if let Some(inner) = inner.as_list() {
        inner.push(9);
    }
    assert!(!c.is_changed());

    if let Some(items) = c.peek("items").as_ref().and_then(Value::as_list) {
        items.push(3);
    }
    assert!(c.changeset().contains("items"));
}

#[test]
fn replacing_one_name_keeps_other_names_bound() {
    let mut c = Container::new();
    let list = List::new();
    c.set("a", list.clone());
    c.set("b", list.clone());
    let nested = list.slice(..);
    c.set("a", 1);
    c.reset_changeset();

    nested.push(1);
    assert_eq!(c.changeset().iter().collect::<Vec<_>>(), vec!["b"]);
}

#[test]
fn reassigning_same_value_keeps_binding() {
    let mut c = Container::new();
    let list = List::new();
    c.set("tags", list.clone());
    c.set("tags", list.clone());
    c.reset_changeset();

    list.push(1);
    assert!(c.changeset().contains("tags"));
}

#[test]
fn mark_dirty_without_assignment() {
    let c = Container::new();
    c.mark_dirty(["a", "b", "a"]);
    assert_eq!(c.changeset().len(), 2);
}

#[test]
fn cleanup_detaches_only_own_observer() {
    let mut c1 = Container::new();
    let mut c2 = Container::new();
    let list = List::new();
    c1.set("tags", list.clone());
    c2.set("tags", list.clone());
    c2.reset_changeset();

    c1.cleanup();
    assert!(!c1.is_changed());
    assert!(!c1.contains("tags"));

    list.push(1);
    assert!(!c1.is_changed());
    assert!(c2.is_changed());
    assert_eq!(list.observer_count(), 1);
}

#[test]
fn container_is_reusable_after_cleanup() {
    let mut c = Container::new();
    let list = List::new();
    c.set("tags", list.clone());
    c.cleanup();

    c.set("tags", list.clone());
    c.reset_changeset();
    list.push(1);
    assert!(c.is_changed());
}
