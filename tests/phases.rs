use std::{cell::RefCell, rc::Rc, time::Duration};

use optistate::{
    AuthorityPush, DependencyGraph, Offline, Phase, Registry, Surface, SurfaceConfig,
    TraceDelegate,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const CONFIG: &str = r#"{
    "phases": [
        { "field": "drawer", "async": "items", "duration_ms": 200 },
        { "field": "toast", "phase_field": "toast_state", "duration_ms": 100, "exit_duration_ms": 40 }
    ]
}"#;

fn surface() -> Surface {
    let config = SurfaceConfig::from_json(CONFIG).unwrap();
    let registry = Registry::new(config, DependencyGraph::new()).unwrap();
    Surface::builder(registry, Offline)
        .state(json!({ "drawer": null, "items": null, "toast": null }))
        .delegate("drawer", TraceDelegate)
        .delegate("toast", TraceDelegate)
        .mount()
}

fn push(s: &mut Surface, state: Value, version: u64) {
    s.apply_push(AuthorityPush::new(state, version));
}

/// Records every distinct value the phase field of `drawer` takes.
fn record_drawer(s: &mut Surface) -> Rc<RefCell<Vec<String>>> {
    let seen = Rc::new(RefCell::new(Vec::<String>::new()));
    let sink = seen.clone();
    s.observe(move |state| {
        let phase = state["drawer_phase"].as_str().unwrap_or_default().to_owned();
        let mut seen = sink.borrow_mut();
        if seen.last() != Some(&phase) {
            seen.push(phase);
        }
    });
    seen
}

#[test]
fn phase_fields_start_idle() {
    let s = surface();
    assert_eq!(s.get("drawer_phase"), Some(&json!("idle")));
    assert_eq!(s.get("toast_state"), Some(&json!("idle")));
    assert_eq!(s.get("toast_phase"), None);
    assert_eq!(s.next_deadline(), None);
}

#[test]
fn fallback_timer_completes_the_enter() {
    let mut s = surface();
    push(&mut s, json!({ "drawer": 1 }), 1);
    assert_eq!(s.phase("drawer"), Some(Phase::Entering));
    assert_eq!(s.next_deadline(), Some(Duration::from_millis(250)));

    assert!(!s.advance(Duration::from_millis(249)));
    assert!(s.advance(Duration::from_millis(1)));
    assert_eq!(s.phase("drawer"), Some(Phase::Loading));
    assert_eq!(s.next_deadline(), None);

    push(&mut s, json!({ "items": [1, 2] }), 2);
    assert_eq!(s.phase("drawer"), Some(Phase::Visible));
    assert!(s.machine("drawer").unwrap().is_async_ready());

    push(&mut s, json!({ "drawer": null }), 3);
    assert_eq!(s.get("drawer_phase"), Some(&json!("exiting")));
    assert!(s.advance(Duration::from_millis(200)));
    assert_eq!(s.get("drawer_phase"), Some(&json!("idle")));
}

#[test]
fn content_arriving_during_enter_skips_loading() {
    let mut s = surface();
    let seen = record_drawer(&mut s);
    push(&mut s, json!({ "drawer": 1 }), 1);
    push(&mut s, json!({ "items": [] }), 2);
    assert_eq!(s.phase("drawer"), Some(Phase::Entering));

    assert!(s.transition_end("drawer"));
    assert_eq!(s.phase("drawer"), Some(Phase::Visible));
    assert_eq!(*seen.borrow(), ["entering", "visible"]);
}

#[test]
fn reopen_during_exit_skips_idle() {
    let mut s = surface();
    let seen = record_drawer(&mut s);
    push(&mut s, json!({ "drawer": 1 }), 1);
    assert!(s.transition_end("drawer"));
    push(&mut s, json!({ "drawer": null }), 2);
    assert!(!s.advance(Duration::from_millis(100)));

    push(&mut s, json!({ "drawer": 2 }), 3);
    assert_eq!(s.phase("drawer"), Some(Phase::Entering));
    assert!(s.advance(Duration::from_millis(1000)));
    assert_eq!(s.phase("drawer"), Some(Phase::Loading));
    assert_eq!(*seen.borrow(), ["entering", "loading", "exiting", "entering", "loading"]);
}

#[test]
fn transition_end_outside_entering_is_ignored() {
    let mut s = surface();
    assert!(!s.transition_end("drawer"));
    assert!(!s.transition_end("unknown"));
    assert_eq!(s.phase("drawer"), Some(Phase::Idle));
}

#[test]
fn machines_keep_their_own_timers() {
    let mut s = surface();
    push(&mut s, json!({ "drawer": 1, "toast": "saved" }), 1);
    assert_eq!(s.next_deadline(), Some(Duration::from_millis(150)));

    assert!(s.advance(Duration::from_millis(150)));
    assert_eq!(s.phase("toast"), Some(Phase::Visible));
    assert_eq!(s.phase("drawer"), Some(Phase::Entering));

    push(&mut s, json!({ "toast": null }), 2);
    assert_eq!(s.get("toast_state"), Some(&json!("exiting")));
    assert_eq!(s.next_deadline(), Some(Duration::from_millis(40)));
    assert!(s.advance(Duration::from_millis(40)));
    assert_eq!(s.phase("toast"), Some(Phase::Idle));
    assert_eq!(s.next_deadline(), Some(Duration::from_millis(60)));
}

#[test]
fn local_open_is_animated_before_the_authority_answers() {
    let mut s = surface();
    assert!(s.set_optimistic("drawer", json!(1)));
    assert_eq!(s.phase("drawer"), Some(Phase::Entering));
    assert!(s.is_pending("drawer"));

    push(&mut s, json!({ "drawer": null }), 0);
    assert_eq!(s.phase("drawer"), Some(Phase::Entering));
    assert!(!s.set_optimistic("drawer_phase", json!("visible")));
}

#[test]
fn reopen_with_items_loaded_skips_loading() {
    let mut s = surface();
    let seen = record_drawer(&mut s);
    push(&mut s, json!({ "drawer": 1, "items": [1] }), 1);
    assert!(s.transition_end("drawer"));
    push(&mut s, json!({ "drawer": null }), 2);
    assert!(s.advance(Duration::from_millis(200)));

    push(&mut s, json!({ "drawer": 2 }), 3);
    assert!(s.transition_end("drawer"));
    assert_eq!(s.phase("drawer"), Some(Phase::Visible));
    assert_eq!(*seen.borrow(), ["entering", "visible", "exiting", "idle", "entering", "visible"]);
}
