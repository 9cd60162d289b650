use std::time::Duration;

use pretty_assertions::assert_eq;

use super::*;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[test]
fn fires_when_due() {
    let mut timers = Timers::new();
    let id = timers.schedule(ms(100));
    assert!(timers.advance(ms(99)).is_empty());
    assert!(timers.is_scheduled(id));
    assert_eq!(timers.advance(ms(1)), [id]);
    assert!(!timers.is_scheduled(id));
    assert!(timers.is_empty());
}

#[test]
fn fires_in_deadline_order() {
    let mut timers = Timers::new();
    let late = timers.schedule(ms(300));
    let early = timers.schedule(ms(100));
    let tie = timers.schedule(ms(100));
    assert_eq!(timers.next_deadline(), Some(ms(100)));
    assert_eq!(timers.advance(ms(500)), [early, tie, late]);
    assert_eq!(timers.now(), ms(500));
}

#[test]
fn cancelled_timer_never_fires() {
    let mut timers = Timers::new();
    let id = timers.schedule(ms(10));
    assert!(timers.cancel(id));
    assert!(!timers.cancel(id));
    assert!(timers.advance(ms(20)).is_empty());
}

#[test]
fn ids_are_not_reused() {
    let mut timers = Timers::new();
    let old = timers.schedule(ms(10));
    timers.cancel(old);
    let new = timers.schedule(ms(10));
    assert_ne!(old, new);
    assert!(!timers.cancel(old));
    assert!(timers.is_scheduled(new));
    assert_eq!(timers.advance(ms(10)), [new]);
}

#[test]
fn schedule_is_relative_to_now() {
    let mut timers = Timers::new();
    timers.advance(ms(1000));
    let id = timers.schedule(ms(50));
    assert_eq!(timers.next_deadline(), Some(ms(1050)));
    assert!(timers.advance_to(ms(1049)).is_empty());
    assert_eq!(timers.advance_to(ms(1050)), [id]);
}

#[test]
fn clock_does_not_move_backwards() {
    let mut timers = Timers::new();
    timers.advance(ms(100));
    timers.advance_to(ms(50));
    assert_eq!(timers.now(), ms(100));
}

#[test]
fn clear_drops_everything() {
    let mut timers = Timers::new();
    let a = timers.schedule(ms(1));
    timers.schedule(ms(2));
    timers.clear();
    assert_eq!(timers.len(), 0);
    assert!(!timers.is_scheduled(a));
    assert!(timers.advance(ms(10)).is_empty());
}
