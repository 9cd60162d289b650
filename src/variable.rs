use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use parse_display::Display;
use serde_json::{json, Value};

#[cfg(test)]
mod tests;

/// Where a value change came from.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display(style = "snake_case")]
pub enum Source {
    /// A local edit that the authority has not yet seen.
    Optimistic,
    /// The authority accepted a local edit.
    Confirmed,
    /// The authority pushed a value while nothing was pending locally.
    Server,
}

/// One-shot continuation handed to a send function.
pub type Reply = Box<dyn FnOnce(Value)>;

type ChangeFn = Box<dyn FnMut(&Value, &Value, Source)>;

/// An optimistic value with tentative and confirmed versions.
///
/// Cloning a `VersionedVariable` creates a new handle to the **same** value.
///
/// # Invariants
///
/// 1. `confirmed_version() <= version()`.
/// 2. `is_pending()` is `true` iff at least one local mutation has not been
///    acknowledged by the authority.
#[derive(Clone)]
pub struct VersionedVariable(Rc<VariableNode>);

struct VariableNode {
    data: RefCell<VariableData>,
    on_change: RefCell<Option<ChangeFn>>,
}

struct VariableData {
    value: Value,
    confirmed_value: Value,
    version: u64,
    confirmed_version: u64,
}

impl VersionedVariable {
    /// Create a confirmed variable holding `seed`.
    pub fn new(seed: Value) -> Self {
        Self(Rc::new(VariableNode {
            data: RefCell::new(VariableData {
                confirmed_value: seed.clone(),
                value: seed,
                version: 0,
                confirmed_version: 0,
            }),
            on_change: RefCell::new(None),
        }))
    }

    /// Install the change callback, replacing any previous one.
    ///
    /// The callback receives `(new, old, source)`.
    pub fn on_change(&self, f: impl FnMut(&Value, &Value, Source) + 'static) {
        *self.0.on_change.borrow_mut() = Some(Box::new(f));
    }

    pub fn value(&self) -> Value {
        self.0.data.borrow().value.clone()
    }
    pub fn confirmed_value(&self) -> Value {
        self.0.data.borrow().confirmed_value.clone()
    }
    pub fn version(&self) -> u64 {
        self.0.data.borrow().version
    }
    pub fn confirmed_version(&self) -> u64 {
        self.0.data.borrow().confirmed_version
    }
    pub fn is_pending(&self) -> bool {
        let data = self.0.data.borrow();
        data.version != data.confirmed_version
    }

    /// Apply a local edit without contacting the authority.
    ///
    /// Returns `false` if `value` equals the current value.
    pub fn set_optimistic(&self, value: Value) -> bool {
        self.0.set_optimistic(value).is_some()
    }

    /// Apply a local edit and send it to the authority.
    ///
    /// `send` receives `{"value": .., "version": ..}` and a [`Reply`]. The reply is
    /// honored only if no newer local edit happened in the meantime.
    pub fn set(&self, value: Value, send: impl FnOnce(Value, Reply)) {
        let Some(version) = self.0.set_optimistic(value.clone()) else {
            return;
        };
        let node = Rc::downgrade(&self.0);
        send(
            json!({ "value": value, "version": version }),
            Box::new(move |reply| VariableNode::reply(node, version, reply)),
        );
    }

    /// Apply an authoritative value unless a local edit is pending.
    ///
    /// Returns whether the value was accepted.
    pub fn server_set(&self, value: Value) -> bool {
        let old = {
            let mut data = self.0.data.borrow_mut();
            if data.version != data.confirmed_version {
                return false;
            }
            data.confirmed_value = value.clone();
            if data.value == value {
                return true;
            }
            std::mem::replace(&mut data.value, value.clone())
        };
        self.0.notify(&value, &old, Source::Server);
        true
    }

    /// Settle the variable on `value`, discarding any pending local edit.
    pub fn confirm(&self, value: Value) {
        let old = {
            let mut data = self.0.data.borrow_mut();
            data.confirmed_version = data.version;
            data.confirmed_value = value.clone();
            if data.value == value {
                return;
            }
            std::mem::replace(&mut data.value, value.clone())
        };
        self.0.notify(&value, &old, Source::Confirmed);
    }
}

impl VariableNode {
    fn set_optimistic(&self, value: Value) -> Option<u64> {
        let (old, version) = {
            let mut data = self.data.borrow_mut();
            if data.value == value {
                return None;
            }
            data.version += 1;
            (
                std::mem::replace(&mut data.value, value.clone()),
                data.version,
            )
        };
        self.notify(&value, &old, Source::Optimistic);
        Some(version)
    }

    fn reply(node: Weak<Self>, version: u64, value: Value) {
        let Some(node) = node.upgrade() else {
            return;
        };
        let old = {
            let mut data = node.data.borrow_mut();
            if data.version != version {
                tracing::trace!(version, current = data.version, "stale reply discarded");
                return;
            }
            data.confirmed_version = version;
            data.confirmed_value = value.clone();
            std::mem::replace(&mut data.value, value.clone())
        };
        node.notify(&value, &old, Source::Confirmed);
    }

    fn notify(&self, new: &Value, old: &Value, source: Source) {
        let Some(mut f) = self.on_change.borrow_mut().take() else {
            return;
        };
        f(new, old, source);
        let mut slot = self.on_change.borrow_mut();
        if slot.is_none() {
            *slot = Some(f);
        }
    }
}

impl std::fmt::Debug for VersionedVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.data.try_borrow() {
            Ok(data) => f
                .debug_struct("VersionedVariable")
                .field("value", &data.value)
                .field("confirmed_value", &data.confirmed_value)
                .field("version", &data.version)
                .field("confirmed_version", &data.confirmed_version)
                .finish(),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}
