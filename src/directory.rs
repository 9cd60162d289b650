use std::collections::HashMap;

use derive_ex::Ex;

use crate::{surface::Parked, VariableStore};

/// Session-scoped parking space for unmounted surfaces.
///
/// A surface with an id parks its variables here when it unmounts and picks
/// them up again when a surface with the same id mounts, so pending edits
/// and in-flight requests survive a transient remount.
#[derive(Ex)]
#[derive_ex(Default)]
pub struct Directory {
    parked: HashMap<String, Parked>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.parked.contains_key(id)
    }
    pub fn len(&self) -> usize {
        self.parked.len()
    }
    pub fn is_empty(&self) -> bool {
        self.parked.is_empty()
    }

    /// The parked variables of `id`.
    pub fn store(&self, id: &str) -> Option<&VariableStore> {
        self.parked.get(id).map(|p| &p.store)
    }

    /// Discard the parked state of `id`.
    pub fn remove(&mut self, id: &str) -> bool {
        self.parked.remove(id).is_some()
    }

    pub(crate) fn park(&mut self, id: String, parked: Parked) {
        if self.parked.insert(id.clone(), parked).is_some() {
            tracing::debug!(%id, "replaced parked surface");
        }
    }
    pub(crate) fn take(&mut self, id: &str) -> Option<Parked> {
        self.parked.remove(id)
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.parked.keys().collect();
        ids.sort_unstable();
        f.debug_set().entries(ids).finish()
    }
}
