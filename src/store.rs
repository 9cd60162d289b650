use std::collections::HashMap;

use serde_json::Value;

use crate::{
    path::{flatten, unflatten, FlatState},
    VersionedVariable,
};


/// Registry of [`VersionedVariable`]s keyed by dotted path.
///
/// The nested form returned by [`to_state`](Self::to_state) and the flat set of
/// variables are kept isomorphic: each leaf corresponds to exactly one variable.
#[derive(Default)]
pub struct VariableStore {
    vars: HashMap<String, VersionedVariable>,
}

/// Outcome of merging an authoritative snapshot into a [`VariableStore`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerMerge {
    /// Paths whose value changed.
    pub applied: Vec<String>,
    /// Paths left untouched because a local edit is pending.
    pub skipped: Vec<String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with one confirmed variable per leaf of `state`.
    pub fn from_state(state: &Value) -> Self {
        let mut this = Self::new();
        for (path, value) in flatten(state) {
            this.get(&path, value);
        }
        this
    }

    /// Get the variable at `path`, creating it from `seed` (or `null`) if absent.
    pub fn get(&mut self, path: &str, seed: impl Into<Option<Value>>) -> VersionedVariable {
        if let Some(var) = self.vars.get(path) {
            return var.clone();
        }
        let var = VersionedVariable::new(seed.into().unwrap_or(Value::Null));
        self.vars.insert(path.to_owned(), var.clone());
        var
    }

    /// Get the variable at `path` without creating it.
    pub fn variable(&self, path: &str) -> Option<&VersionedVariable> {
        self.vars.get(path)
    }

    /// Drop the variable at `path`. Replies still in flight for it are ignored.
    pub fn remove(&mut self, path: &str) -> Option<VersionedVariable> {
        self.vars.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.vars.contains_key(path)
    }
    pub fn len(&self) -> usize {
        self.vars.len()
    }
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// All paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<_> = self.vars.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Returns `true` if the variable at `path` has an unacknowledged local edit.
    ///
    /// Unknown paths are never pending.
    pub fn is_pending(&self, path: &str) -> bool {
        self.vars.get(path).is_some_and(|var| var.is_pending())
    }

    /// Paths with unacknowledged local edits, sorted.
    pub fn pending_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self
            .vars
            .iter()
            .filter(|(_, var)| var.is_pending())
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort_unstable();
        paths
    }

    /// Merge a nested authoritative snapshot, skipping pending paths.
    ///
    /// Paths without a variable are ignored.
    pub fn server_update(&mut self, snapshot: &Value) -> ServerMerge {
        self.server_update_flat(&flatten(snapshot))
    }

    /// Same as [`server_update`](Self::server_update) for an already flattened snapshot.
    pub fn server_update_flat(&mut self, snapshot: &FlatState) -> ServerMerge {
        let mut merge = ServerMerge::default();
        for (path, value) in snapshot {
            let Some(var) = self.vars.get(path) else {
                continue;
            };
            if var.is_pending() {
                tracing::debug!(%path, "pending path kept over authoritative value");
                merge.skipped.push(path.clone());
                continue;
            }
            let changed = var.value() != *value;
            if var.server_set(value.clone()) && changed {
                merge.applied.push(path.clone());
            }
        }
        merge
    }

    /// Flat mapping of every path to its current value.
    pub fn to_flat(&self) -> FlatState {
        self.vars
            .iter()
            .map(|(path, var)| (path.clone(), var.value()))
            .collect()
    }

    /// Nested snapshot of every current value.
    pub fn to_state(&self) -> Value {
        unflatten(&self.to_flat())
    }
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.paths().into_iter().map(|path| (path, &self.vars[path])))
            .finish()
    }
}
