//! Optimistic client state reconciled with a remote authority.
//!
//! - [`VersionedVariable`] and [`VariableStore`]: per-field optimistic values
//!   gated by version counters.
//! - [`DependencyGraph`]: incremental recomputation of derived fields.
//! - [`PhaseStateMachine`]: open/close lifecycle of animatable fields.
//! - [`Surface`]: the reconciliation cycle tying them together.

extern crate self as optistate;

mod action;
mod directory;
mod graph;
pub mod path;
mod phase;
mod registry;
mod store;
mod surface;
#[cfg(doctest)]
mod tests_readme;
pub mod transport;
mod utils;
mod variable;

pub use action::*;
pub use directory::*;
pub use graph::*;
pub use optistate_macros::FieldSet;
pub use phase::*;
pub use registry::*;
pub use store::*;
pub use surface::{PushHandle, Surface, SurfaceBuilder};
pub use transport::{AuthorityPush, ChannelTransport, Offline, Request, Requests, Transport};
pub use utils::timer::{TimerId, Timers};
pub use variable::*;

pub use serde_json::{json, Value};
