// #![include_doc("../README.md", start)]
//! # optistate
//!
//! `optistate` keeps the client-side state of a UI surface in sync with a remote authority.
//!
//! Local edits show up immediately and are sent to the authority in the background.
//! Every field carries its own version counter, so a reply or push never overwrites a field the user has edited since.
//! Derived fields are recomputed incrementally and animatable fields run through an `idle → entering → loading → visible → exiting` lifecycle.
//!
//! The crate performs no I/O. Requests go through a `Transport` you provide, and replies and pushes are merged when you call `Surface::update`.
//!
//! ## Example
//!
//! ```rust
//! use optistate::*;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FieldSet)]
//! enum Derived {
//!     Doubled,
//! }
//!
//! impl Derive for Derived {
//!     fn deps(&self) -> &'static [&'static str] {
//!         &["count"]
//!     }
//!     fn compute(&self, state: &Value) -> Result<Value, DeriveError> {
//!         Ok(json!(input_i64(state, "count")? * 2))
//!     }
//! }
//!
//! let registry = Registry::new(SurfaceConfig::new(), DependencyGraph::<Derived>::new()).unwrap();
//! let (transport, mut requests) = ChannelTransport::new();
//! let mut surface = Surface::builder(registry, transport)
//!     .state(json!({ "count": 1 }))
//!     .mount();
//!
//! let inc = action_fn("inc", |s| Ok(json!({ "count": input_i64(s, "count")? + 1 })));
//! surface.dispatch(&inc);
//! assert_eq!(surface.get("count"), Some(&json!(2)));
//! assert_eq!(surface.get("doubled"), Some(&json!(4)));
//! assert!(surface.is_pending("count"));
//!
//! // The authority answers with its own snapshot.
//! let request = requests.try_recv().unwrap();
//! assert_eq!(request.payload["name"], "inc");
//! let push = AuthorityPush::new(json!({ "count": 5 }), 1);
//! request.reply(serde_json::to_value(push).unwrap());
//! surface.update();
//! assert_eq!(surface.get("doubled"), Some(&json!(10)));
//! assert!(!surface.is_pending("count"));
//! ```
//!
//! ## Animatable fields
//!
//! Phases are declared in a `SurfaceConfig`, usually loaded from JSON:
//!
//! ```json
//! { "phases": [{ "field": "modal", "async": "detail", "duration_ms": 300 }] }
//! ```
//!
//! The current phase is written to `modal_phase`. Drive the animation clock with `Surface::advance` and report finished enter animations with `Surface::transition_end`.
//!
//! ## License
//!
//! This project is dual licensed under Apache-2.0/MIT.
// #![include_doc("../README.md", end)]
