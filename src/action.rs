use parse_display::Display;
use serde_json::Value;

use crate::{
    path::{flatten_into, FlatState},
    DeriveError,
};


/// A user action: a pure optimistic function plus the request sent to the authority.
pub trait Action {
    fn name(&self) -> &str;

    fn params(&self) -> Value {
        Value::Null
    }

    /// Compute the optimistic delta from the current state.
    ///
    /// The delta is an object whose keys are field names or dotted paths.
    /// Returning an error leaves the local state untouched; the action is still
    /// sent to the authority.
    fn apply(&self, state: &Value) -> Result<Value, ActionError>;
}

/// Failure of an action's optimistic function.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[display("{0}")]
    Input(DeriveError),
    #[display("delta must be an object, got `{0}`")]
    InvalidDelta(Value),
    #[display("{0}")]
    Failed(String),
}

impl std::error::Error for ActionError {}

impl From<DeriveError> for ActionError {
    fn from(value: DeriveError) -> Self {
        Self::Input(value)
    }
}

/// An [`Action`] built from a name and a closure.
///
/// ```
/// use optistate::{action_fn, input_i64, Action};
/// use serde_json::json;
///
/// let increment = action_fn("increment", |s| Ok(json!({ "count": input_i64(s, "count")? + 1 })));
/// assert_eq!(increment.apply(&json!({ "count": 1 })).unwrap(), json!({ "count": 2 }));
/// ```
pub fn action_fn(
    name: impl Into<String>,
    f: impl Fn(&Value) -> Result<Value, ActionError> + 'static,
) -> ActionFn {
    ActionFn {
        name: name.into(),
        params: Value::Null,
        f: Box::new(f),
    }
}

pub struct ActionFn {
    name: String,
    params: Value,
    f: Box<dyn Fn(&Value) -> Result<Value, ActionError>>,
}

impl ActionFn {
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }
}

impl Action for ActionFn {
    fn name(&self) -> &str {
        &self.name
    }
    fn params(&self) -> Value {
        self.params.clone()
    }
    fn apply(&self, state: &Value) -> Result<Value, ActionError> {
        (self.f)(state)
    }
}

impl std::fmt::Debug for ActionFn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionFn")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Expand a delta into leaf paths.
///
/// Top-level keys of the delta are paths; keys nested below them are object keys.
pub(crate) fn delta_paths(delta: Value) -> Result<FlatState, ActionError> {
    let Value::Object(map) = delta else {
        return Err(ActionError::InvalidDelta(delta));
    };
    let mut flat = FlatState::new();
    for (key, value) in map {
        flatten_into(key, &value, &mut flat);
    }
    Ok(flat)
}
