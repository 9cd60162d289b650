//! Incremental recomputation of derived fields.
//!
//! A derived field is computed by a pure function of the full state snapshot
//! and declares the fields it reads. After a set of fields changes, only the
//! derived fields that transitively depend on them are recomputed, each one
//! after all of its in-set dependencies.

use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    fmt::Debug,
    hash::Hash,
};

use parse_display::Display;
use serde_json::Value;

use crate::path::{get_path, set_path};


/// A closed set of named fields.
///
/// Usually implemented with `#[derive(FieldSet)]`.
pub trait FieldSet: Copy + Eq + Hash + Debug + 'static {
    /// Every field, in declaration order.
    const ALL: &'static [Self];

    /// The state key this field is stored under.
    fn name(&self) -> &'static str;

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.name() == name)
    }
}

/// A derived field: a pure function of the state plus the fields it reads.
pub trait Derive: FieldSet {
    /// Names of the fields `compute` reads. May include other derived fields.
    fn deps(&self) -> &'static [&'static str];

    /// Compute the value from the full state snapshot.
    fn compute(&self, state: &Value) -> Result<Value, DeriveError>;
}

/// Failure of a derive function.
///
/// The field keeps its previous value.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum DeriveError {
    #[display("missing input `{0}`")]
    MissingInput(String),
    #[display("input `{field}` is not {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
    },
    #[display("{0}")]
    Failed(String),
}

impl std::error::Error for DeriveError {}

/// Reads `field` from `state`.
pub fn input<'a>(state: &'a Value, field: &str) -> Result<&'a Value, DeriveError> {
    get_path(state, field).ok_or_else(|| DeriveError::MissingInput(field.to_owned()))
}

pub fn input_i64(state: &Value, field: &str) -> Result<i64, DeriveError> {
    input(state, field)?
        .as_i64()
        .ok_or_else(|| mismatch(field, "an integer"))
}

pub fn input_f64(state: &Value, field: &str) -> Result<f64, DeriveError> {
    input(state, field)?
        .as_f64()
        .ok_or_else(|| mismatch(field, "a number"))
}

pub fn input_str<'a>(state: &'a Value, field: &str) -> Result<&'a str, DeriveError> {
    input(state, field)?
        .as_str()
        .ok_or_else(|| mismatch(field, "a string"))
}

pub fn input_bool(state: &Value, field: &str) -> Result<bool, DeriveError> {
    input(state, field)?
        .as_bool()
        .ok_or_else(|| mismatch(field, "a boolean"))
}

fn mismatch(field: &str, expected: &'static str) -> DeriveError {
    DeriveError::TypeMismatch {
        field: field.to_owned(),
        expected,
    }
}

/// The empty set of derived fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoDerive {}

impl FieldSet for NoDerive {
    const ALL: &'static [Self] = &[];
    fn name(&self) -> &'static str {
        match *self {}
    }
}
impl Derive for NoDerive {
    fn deps(&self) -> &'static [&'static str] {
        match *self {}
    }
    fn compute(&self, _state: &Value) -> Result<Value, DeriveError> {
        match *self {}
    }
}

/// Collects dependency edges before the graph is frozen.
pub struct GraphBuilder<D: Derive> {
    extra: HashMap<D, Vec<String>>,
}

impl<D: Derive> GraphBuilder<D> {
    /// Add dependency edges to `field` on top of the ones it declares.
    pub fn extend<S: Into<String>>(mut self, field: D, deps: impl IntoIterator<Item = S>) -> Self {
        self.extra
            .entry(field)
            .or_default()
            .extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> DependencyGraph<D> {
        let mut deps = HashMap::new();
        let mut dependents: HashMap<String, Vec<D>> = HashMap::new();
        for &field in D::ALL {
            let mut field_deps: Vec<String> = field.deps().iter().map(|&s| s.to_owned()).collect();
            for dep in self.extra.get(&field).into_iter().flatten() {
                if !field_deps.contains(dep) {
                    field_deps.push(dep.clone());
                }
            }
            for dep in &field_deps {
                dependents.entry(dep.clone()).or_default().push(field);
            }
            deps.insert(field, field_deps);
        }
        DependencyGraph {
            deps,
            dependents,
            by_name: D::ALL.iter().map(|&f| (f.name(), f)).collect(),
        }
    }
}

/// Static dependency metadata for a set of derived fields.
///
/// Immutable once built; see [`GraphBuilder`].
pub struct DependencyGraph<D: Derive> {
    deps: HashMap<D, Vec<String>>,
    dependents: HashMap<String, Vec<D>>,
    by_name: HashMap<&'static str, D>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

impl<D: Derive> DependencyGraph<D> {
    pub fn new() -> Self {
        Self::builder().build()
    }
    pub fn builder() -> GraphBuilder<D> {
        GraphBuilder {
            extra: HashMap::new(),
        }
    }

    pub fn is_derived(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }
    pub fn field(&self, name: &str) -> Option<D> {
        self.by_name.get(name).copied()
    }
    /// Declared and extended dependencies of `field`.
    pub fn deps(&self, field: D) -> &[String] {
        self.deps.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every derived field that transitively depends on a field in `changed`.
    ///
    /// `None` means everything changed and returns every derived field.
    pub fn find_affected_derives(&self, changed: Option<&[&str]>) -> Vec<D> {
        let Some(changed) = changed else {
            return D::ALL.to_vec();
        };
        let mut affected = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&str> = changed.iter().copied().collect();
        while let Some(name) = queue.pop_front() {
            for &field in self.dependents.get(name).into_iter().flatten() {
                if seen.insert(field) {
                    affected.push(field);
                    queue.push_back(field.name());
                }
            }
        }
        affected
    }

    /// Orders `fields` so that each one comes after its dependencies within `fields`.
    ///
    /// A dependency on a field that is still being visited (a cycle) is
    /// treated as already resolved.
    pub fn topological_sort(&self, fields: &[D]) -> Vec<D> {
        let subset: HashSet<D> = fields.iter().copied().collect();
        let mut marks = HashMap::new();
        let mut order = Vec::with_capacity(fields.len());
        for &field in fields {
            self.visit(field, &subset, &mut marks, &mut order);
        }
        order
    }

    fn visit(&self, field: D, subset: &HashSet<D>, marks: &mut HashMap<D, Mark>, order: &mut Vec<D>) {
        match marks.get(&field) {
            Some(Mark::Done) => return,
            Some(Mark::Visiting) => {
                tracing::debug!(field = field.name(), "dependency cycle; back edge ignored");
                return;
            }
            None => {}
        }
        marks.insert(field, Mark::Visiting);
        for dep in self.deps(field) {
            if let Some(dep) = self.field(dep) {
                if subset.contains(&dep) {
                    self.visit(dep, subset, marks, order);
                }
            }
        }
        marks.insert(field, Mark::Done);
        order.push(field);
    }

    /// Recompute the derived fields affected by `changed` and write them into `state`.
    ///
    /// Returns the fields whose value changed, in evaluation order. A failing
    /// derive keeps its previous value and does not stop the others.
    pub fn recompute(&self, state: &mut Value, changed: Option<&[&str]>) -> Vec<D> {
        let order = self.topological_sort(&self.find_affected_derives(changed));
        let mut updated = Vec::new();
        for field in order {
            let name = field.name();
            match field.compute(state) {
                Ok(value) => {
                    if get_path(state, name) != Some(&value) {
                        set_path(state, name, value);
                        updated.push(field);
                    }
                }
                Err(e) => tracing::debug!(field = name, error = %e, "derive failed"),
            }
        }
        updated
    }

    /// Non-derived fields that `name` transitively reads.
    ///
    /// For a non-derived `name` this is `name` itself.
    pub fn sources(&self, name: &str) -> BTreeSet<String> {
        let mut sources = BTreeSet::new();
        let mut seen = HashSet::new();
        self.collect_sources(name, &mut seen, &mut sources);
        sources
    }

    fn collect_sources(&self, name: &str, seen: &mut HashSet<D>, sources: &mut BTreeSet<String>) {
        let Some(field) = self.field(name) else {
            sources.insert(name.to_owned());
            return;
        };
        if !seen.insert(field) {
            return;
        }
        for dep in self.deps(field) {
            self.collect_sources(dep, seen, sources);
        }
    }
}

impl<D: Derive> Default for DependencyGraph<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Derive> Debug for DependencyGraph<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(D::ALL.iter().map(|&field| (field.name(), self.deps(field))))
            .finish()
    }
}
