use std::{cell::RefCell, rc::Rc};

use assert_call::{call, CallRecorder};
use serde_json::{json, Value};

use super::*;

fn record(v: &VersionedVariable) {
    v.on_change(|new, old, source| call!("{} {} -> {}", source, old, new));
}

type Outbox = Rc<RefCell<Vec<(Value, Reply)>>>;

fn outbox() -> (Outbox, impl Fn() -> Box<dyn FnOnce(Value, Reply)>) {
    let outbox = Outbox::default();
    let o = outbox.clone();
    let send = move || {
        let o = o.clone();
        Box::new(move |payload: Value, reply: Reply| o.borrow_mut().push((payload, reply)))
            as Box<dyn FnOnce(Value, Reply)>
    };
    (outbox, send)
}

#[test]
fn new_is_confirmed() {
    let v = VersionedVariable::new(json!(1));
    assert_eq!(v.value(), json!(1));
    assert_eq!(v.confirmed_value(), json!(1));
    assert_eq!(v.version(), 0);
    assert_eq!(v.confirmed_version(), 0);
    assert!(!v.is_pending());
}

#[test]
fn set_optimistic_increments_version() {
    let v = VersionedVariable::new(json!(0));
    for i in 1..=5 {
        assert!(v.set_optimistic(json!(i)));
    }
    assert_eq!(v.version(), 5);
    assert!(v.confirmed_version() <= v.version());
    assert!(v.is_pending());
    assert_eq!(v.confirmed_value(), json!(0));
}

#[test]
fn set_optimistic_same_value_is_noop() {
    let mut cr = CallRecorder::new();
    let v = VersionedVariable::new(json!({ "a": [1, 2] }));
    record(&v);
    assert!(!v.set_optimistic(json!({ "a": [1, 2] })));
    cr.verify(());
    assert_eq!(v.version(), 0);
}

#[test]
fn set_optimistic_notifies() {
    let mut cr = CallRecorder::new();
    let v = VersionedVariable::new(json!(1));
    record(&v);
    v.set_optimistic(json!(2));
    cr.verify("optimistic 1 -> 2");
}

#[test]
fn set_sends_version_tag() {
    let (outbox, send) = outbox();
    let v = VersionedVariable::new(json!("a"));
    v.set(json!("b"), send());
    let sent = outbox.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, json!({ "value": "b", "version": 1 }));
}

#[test]
fn set_same_value_does_not_send() {
    let (outbox, send) = outbox();
    let v = VersionedVariable::new(json!("a"));
    v.set(json!("a"), send());
    assert!(outbox.borrow().is_empty());
}

#[test]
fn reply_confirms() {
    let mut cr = CallRecorder::new();
    let (outbox, send) = outbox();
    let v = VersionedVariable::new(json!(1));
    record(&v);
    v.set(json!(2), send());
    cr.verify("optimistic 1 -> 2");

    let (_, reply) = outbox.borrow_mut().pop().unwrap();
    reply(json!(2));
    cr.verify("confirmed 2 -> 2");
    assert!(!v.is_pending());
    assert_eq!(v.confirmed_version(), 1);
    assert_eq!(v.confirmed_value(), json!(2));
}

#[test]
fn reply_can_correct_value() {
    let (outbox, send) = outbox();
    let v = VersionedVariable::new(json!("draft"));
    v.set(json!("  Hello "), send());
    let (_, reply) = outbox.borrow_mut().pop().unwrap();
    reply(json!("Hello"));
    assert_eq!(v.value(), json!("Hello"));
    assert!(!v.is_pending());
}

#[test]
fn stale_reply_is_discarded() {
    let mut cr = CallRecorder::new();
    let (outbox, send) = outbox();
    let v = VersionedVariable::new(json!(0));
    v.set(json!(1), send());
    v.set_optimistic(json!(2));
    record(&v);

    let (_, reply) = outbox.borrow_mut().pop().unwrap();
    reply(json!(1));
    cr.verify(());
    assert_eq!(v.value(), json!(2));
    assert_eq!(v.confirmed_value(), json!(0));
    assert_eq!(v.confirmed_version(), 0);
    assert!(v.is_pending());
}

#[test]
fn replies_out_of_order() {
    let (outbox, send) = outbox();
    let v = VersionedVariable::new(json!(0));
    v.set(json!(1), send());
    v.set(json!(2), send());
    let (_, second) = outbox.borrow_mut().pop().unwrap();
    let (_, first) = outbox.borrow_mut().pop().unwrap();

    second(json!(2));
    assert!(!v.is_pending());
    first(json!(1));
    assert_eq!(v.value(), json!(2));
    assert_eq!(v.confirmed_version(), 2);
}

#[test]
fn reply_after_drop_is_ignored() {
    let (outbox, send) = outbox();
    let v = VersionedVariable::new(json!(0));
    v.set(json!(1), send());
    drop(v);
    let (_, reply) = outbox.borrow_mut().pop().unwrap();
    reply(json!(1));
}

#[test]
fn server_set_rejected_while_pending() {
    let v = VersionedVariable::new(json!(0));
    v.set_optimistic(json!(1));
    assert!(!v.server_set(json!(9)));
    assert_eq!(v.value(), json!(1));
}

#[test]
fn server_set_accepted_when_idle() {
    let mut cr = CallRecorder::new();
    let v = VersionedVariable::new(json!(0));
    record(&v);
    assert!(v.server_set(json!(9)));
    cr.verify("server 0 -> 9");
    assert_eq!(v.confirmed_value(), json!(9));
    assert!(v.server_set(json!(9)));
    cr.verify(());
}

#[test]
fn confirm_supersedes_pending() {
    let mut cr = CallRecorder::new();
    let v = VersionedVariable::new(json!(0));
    v.set_optimistic(json!(1));
    v.set_optimistic(json!(2));
    record(&v);
    v.confirm(json!(3));
    cr.verify("confirmed 2 -> 3");
    assert!(!v.is_pending());
    assert_eq!(v.version(), 2);
    assert_eq!(v.confirmed_version(), 2);
    assert_eq!(v.confirmed_value(), json!(3));
}

#[test]
fn callback_may_mutate_its_own_variable() {
    let v = VersionedVariable::new(json!(0));
    let v0 = v.clone();
    v.on_change(move |new, _, _| {
        if new == &json!(1) {
            v0.set_optimistic(json!(2));
        }
    });
    v.set_optimistic(json!(1));
    assert_eq!(v.value(), json!(2));
    assert_eq!(v.version(), 2);
}
