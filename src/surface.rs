//! The reconciliation cycle of one UI surface.
//!
//! A [`Surface`] owns the local state of one mounted UI instance: a
//! [`VariableStore`] holding the editable fields, the derived fields computed
//! by the registry's [`DependencyGraph`](crate::DependencyGraph), and one
//! [`PhaseStateMachine`] per animatable field.
//!
//! Local edits are applied immediately and sent to the authority through a
//! [`Transport`]. Replies and authoritative pushes are queued and merged by
//! [`Surface::update`]. Merges are gated per field: a field with an
//! unacknowledged local edit is never overwritten by the authority.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet, HashMap, VecDeque},
    rc::{Rc, Weak},
    time::Duration,
};

use serde_json::{json, Map, Value};

use crate::{
    action::delta_paths,
    path::{
        ancestors, flatten, flatten_into, get_path, is_nested, set_path, top_level, touches,
        FlatState,
    },
    transport::{AuthorityPush, Reply, Transport},
    utils::timer::Timers,
    Action, AnimationDelegate, Derive, Directory, FieldSet, NoDerive, NullDelegate, Phase,
    PhaseStateMachine, Registry, Source, Transition, VariableStore, VersionedVariable,
};


type Inbox = Rc<RefCell<VecDeque<Notice>>>;

enum Notice {
    Push(AuthorityPush),
    ActionReply {
        version: u64,
        answer: Value,
    },
    SetReply {
        path: String,
        sent: Value,
        answer: Value,
        target: SetTarget,
    },
}

/// What a set reply settles.
enum SetTarget {
    /// The variable at the set path, through its own reply.
    Variable(Reply),
    /// The leaves of an object value with the versions the request carried.
    Leaves(Vec<(String, u64)>),
}

fn post(inbox: &Weak<RefCell<VecDeque<Notice>>>, notice: Notice) -> bool {
    let Some(inbox) = inbox.upgrade() else {
        return false;
    };
    inbox.borrow_mut().push_back(notice);
    true
}

/// The part of a surface that outlives an unmount.
pub(crate) struct Parked {
    pub(crate) store: VariableStore,
    inbox: Inbox,
    in_flight: BTreeMap<u64, Vec<(String, u64)>>,
    client_version: u64,
    baseline_version: u64,
}

impl Parked {
    fn new(store: VariableStore) -> Self {
        Self {
            store,
            inbox: Rc::new(RefCell::new(VecDeque::new())),
            in_flight: BTreeMap::new(),
            client_version: 0,
            baseline_version: 0,
        }
    }
}

/// Queues authoritative pushes for a surface from outside its owner.
///
/// Pushes are merged on the next [`Surface::update`].
#[derive(Clone)]
pub struct PushHandle(Weak<RefCell<VecDeque<Notice>>>);

impl PushHandle {
    /// Returns `false` if the surface no longer exists.
    pub fn push(&self, push: AuthorityPush) -> bool {
        post(&self.0, Notice::Push(push))
    }
}

impl std::fmt::Debug for PushHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PushHandle")
            .field(&(self.0.strong_count() > 0))
            .finish()
    }
}

pub struct SurfaceBuilder<D: Derive = NoDerive> {
    registry: Rc<Registry<D>>,
    transport: Box<dyn Transport>,
    state: Value,
    delegates: HashMap<String, Box<dyn AnimationDelegate>>,
    id: Option<String>,
    parked: Option<Parked>,
}

impl<D: Derive> SurfaceBuilder<D> {
    /// Initial state. Ignored when a parked surface is restored.
    pub fn state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    /// Animation delegate of the animatable `field`. Defaults to [`NullDelegate`].
    pub fn delegate(
        mut self,
        field: impl Into<String>,
        delegate: impl AnimationDelegate + 'static,
    ) -> Self {
        self.delegates.insert(field.into(), Box::new(delegate));
        self
    }

    /// Give the surface an id and reclaim whatever a previous surface with
    /// that id parked in `directory`.
    pub fn restore(mut self, directory: &mut Directory, id: impl Into<String>) -> Self {
        let id = id.into();
        self.parked = directory.take(&id);
        self.id = Some(id);
        self
    }

    pub fn mount(self) -> Surface<D> {
        let SurfaceBuilder {
            registry,
            transport,
            state,
            mut delegates,
            id,
            parked,
        } = self;
        let restored = parked.is_some();
        let parked = parked.unwrap_or_else(|| {
            let mut store = VariableStore::new();
            if state.is_object() {
                for (path, value) in flatten(&state) {
                    if !registry.is_computed(&path) {
                        store.get(&path, value);
                    }
                }
            } else {
                tracing::debug!(%state, "initial state is not an object; starting empty");
            }
            Parked::new(store)
        });
        let machines = registry
            .phases()
            .iter()
            .map(|config| {
                let delegate = delegates
                    .remove(&config.field)
                    .unwrap_or_else(|| Box::new(NullDelegate));
                PhaseStateMachine::new(config.clone(), delegate)
            })
            .collect();
        for field in delegates.keys() {
            tracing::debug!(%field, "delegate ignored; field is not animated");
        }
        let Parked {
            store,
            inbox,
            in_flight,
            client_version,
            baseline_version,
        } = parked;
        let mut surface = Surface {
            id,
            registry,
            transport,
            state: assemble(&store),
            store,
            machines,
            timers: Timers::new(),
            inbox,
            in_flight,
            client_version,
            baseline_version,
            observers: Vec::new(),
        };
        tracing::debug!(id = surface.id.as_deref(), restored, "surface mounted");
        surface.start();
        surface
    }
}

/// One mounted UI surface.
pub struct Surface<D: Derive = NoDerive> {
    id: Option<String>,
    registry: Rc<Registry<D>>,
    transport: Box<dyn Transport>,
    state: Value,
    store: VariableStore,
    machines: Vec<PhaseStateMachine>,
    timers: Timers,
    inbox: Inbox,
    in_flight: BTreeMap<u64, Vec<(String, u64)>>,
    client_version: u64,
    baseline_version: u64,
    observers: Vec<Box<dyn FnMut(&Value)>>,
}

impl<D: Derive> Surface<D> {
    pub fn builder(
        registry: Rc<Registry<D>>,
        transport: impl Transport + 'static,
    ) -> SurfaceBuilder<D> {
        SurfaceBuilder {
            registry,
            transport: Box::new(transport),
            state: Value::Object(Map::new()),
            delegates: HashMap::new(),
            id: None,
            parked: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
    pub fn registry(&self) -> &Rc<Registry<D>> {
        &self.registry
    }
    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    /// Full local state, including derived and phase fields.
    pub fn state(&self) -> &Value {
        &self.state
    }
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.state, path)
    }

    /// Current phase of the animatable `field`.
    pub fn phase(&self, field: &str) -> Option<Phase> {
        self.machine(field).map(PhaseStateMachine::phase)
    }
    pub fn machine(&self, field: &str) -> Option<&PhaseStateMachine> {
        self.machines.iter().find(|m| m.field() == field)
    }

    pub fn is_pending(&self, path: &str) -> bool {
        self.store.is_pending(path)
    }
    pub fn pending_paths(&self) -> Vec<String> {
        self.store.pending_paths()
    }

    /// Returns `true` if any field that `name` is computed from has an
    /// unacknowledged local edit.
    ///
    /// For a plain field this is the same as [`is_pending`](Self::is_pending)
    /// on it and everything nested in it.
    pub fn has_pending_sources(&self, name: &str) -> bool {
        let mut sources = self.registry.graph().sources(name);
        for machine in &self.machines {
            if sources.contains(machine.phase_field()) {
                sources.insert(machine.field().to_owned());
                sources.extend(machine.async_field().map(str::to_owned));
            }
        }
        self.store
            .pending_paths()
            .iter()
            .any(|path| sources.iter().any(|source| touches(path, source)))
    }

    /// Version tag of the last dispatched action.
    pub fn client_version(&self) -> u64 {
        self.client_version
    }
    /// Highest version tag seen in an authoritative push.
    pub fn baseline_version(&self) -> u64 {
        self.baseline_version
    }
    /// Number of dispatched actions the authority has not settled.
    pub fn pending_requests(&self) -> usize {
        self.in_flight.len()
    }

    /// Deadline of the next animation timer, relative to the surface's clock.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.timers
            .next_deadline()
            .map(|d| d.saturating_sub(self.timers.now()))
    }

    pub fn push_handle(&self) -> PushHandle {
        PushHandle(Rc::downgrade(&self.inbox))
    }

    /// Register a render observer. Called with the full state after every change.
    pub fn observe(&mut self, f: impl FnMut(&Value) + 'static) {
        self.observers.push(Box::new(f));
    }

    /// Apply `action` optimistically and send it to the authority.
    ///
    /// Returns the version tag the request carries. A failing optimistic
    /// function leaves the local state untouched; the request is sent anyway.
    pub fn dispatch<A: Action + ?Sized>(&mut self, action: &A) -> u64 {
        self.client_version += 1;
        let version = self.client_version;
        let span = tracing::debug_span!("dispatch", action = action.name(), version);
        let _enter = span.enter();

        let mut changed = BTreeSet::new();
        match action.apply(&self.state).and_then(delta_paths) {
            Ok(delta) => {
                for (path, value) in delta {
                    changed.extend(self.edit(&path, value));
                }
            }
            Err(e) => tracing::debug!(error = %e, "optimistic update skipped"),
        }
        self.track(version, &changed);
        self.propagate(&changed, Source::Optimistic);

        let inbox = Rc::downgrade(&self.inbox);
        self.transport.send(
            json!({
                "type": "action",
                "name": action.name(),
                "params": action.params(),
                "version": version,
            }),
            Box::new(move |answer| {
                post(&inbox, Notice::ActionReply { version, answer });
            }),
        );
        self.update();
        version
    }

    /// Apply a local edit without contacting the authority.
    ///
    /// The edit is settled together with the next dispatched action.
    pub fn set_optimistic(&mut self, path: &str, value: Value) -> bool {
        let changed = self.edit(path, value);
        self.track(self.client_version + 1, &changed);
        self.propagate(&changed, Source::Optimistic)
    }

    /// Apply a local edit and send it to the authority as a single-field request.
    ///
    /// An object value replaces every variable nested under `path`; the
    /// reply settles each of its leaves.
    pub fn set(&mut self, path: &str, value: Value) -> bool {
        let Some((leaves, removed)) = self.stage(path, &value) else {
            return false;
        };
        let mut changed: BTreeSet<String> = removed.into_iter().collect();
        let inbox = Rc::downgrade(&self.inbox);
        let owned_path = path.to_owned();
        if leaves.len() == 1 && leaves.contains_key(path) {
            let Some(var) = self.store.variable(path).cloned() else {
                return false;
            };
            let before = var.version();
            let transport = &self.transport;
            var.set(value, |mut request, reply| {
                request["type"] = json!("set");
                request["path"] = json!(owned_path);
                let sent = request["value"].clone();
                transport.send(
                    request,
                    Box::new(move |answer| {
                        post(
                            &inbox,
                            Notice::SetReply {
                                path: owned_path,
                                sent,
                                answer,
                                target: SetTarget::Variable(reply),
                            },
                        );
                    }),
                );
            });
            if var.version() != before {
                changed.insert(path.to_owned());
            }
        } else {
            let mut carried = Vec::new();
            for (leaf, leaf_value) in leaves {
                let Some(var) = self.store.variable(&leaf) else {
                    continue;
                };
                if var.set_optimistic(leaf_value) {
                    carried.push((leaf.clone(), var.version()));
                    changed.insert(leaf);
                }
            }
            if !changed.is_empty() {
                let version = carried.iter().map(|&(_, v)| v).max().unwrap_or(0);
                let sent = value.clone();
                self.transport.send(
                    json!({ "type": "set", "path": path, "value": value, "version": version }),
                    Box::new(move |answer| {
                        post(
                            &inbox,
                            Notice::SetReply {
                                path: owned_path,
                                sent,
                                answer,
                                target: SetTarget::Leaves(carried),
                            },
                        );
                    }),
                );
            }
        }
        let changed = self.propagate(&changed, Source::Optimistic);
        self.update();
        changed
    }

    /// Merge an authoritative snapshot.
    ///
    /// Settles every request tagged with `push.version` or lower, moves the
    /// baseline forward, and merges every field without a pending local edit.
    /// Returns whether the local state changed.
    pub fn apply_push(&mut self, push: AuthorityPush) -> bool {
        self.merge_push(push, None)
    }

    /// A value set by a parent surface. Rejected if the field, or anything
    /// nested in it, has a pending local edit.
    pub fn receive_parent_set(&mut self, path: &str, value: Value) -> bool {
        if path.is_empty() || self.registry.is_computed(path) {
            tracing::debug!(path, "parent set of a computed field ignored");
            return false;
        }
        if self
            .store
            .pending_paths()
            .iter()
            .any(|pending| touches(pending, path))
        {
            tracing::debug!(path, "parent set rejected; local edit pending");
            return false;
        }
        let mut snapshot = Value::Object(Map::new());
        set_path(&mut snapshot, path, value);
        let changed = self.merge(&snapshot);
        self.commit(&changed, Source::Server);
        true
    }

    /// Process queued replies and pushes. Returns whether anything was queued.
    pub fn update(&mut self) -> bool {
        let mut is_dirty = false;
        loop {
            let notice = self.inbox.borrow_mut().pop_front();
            let Some(notice) = notice else {
                break;
            };
            is_dirty = true;
            match notice {
                Notice::Push(push) => {
                    self.apply_push(push);
                }
                Notice::ActionReply { version, answer } => self.action_reply(version, answer),
                Notice::SetReply {
                    path,
                    sent,
                    answer,
                    target,
                } => self.set_reply(path, sent, answer, target),
            }
        }
        is_dirty
    }

    /// Advance the animation clock. Returns whether any phase changed.
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        let mut written = Vec::new();
        for id in self.timers.advance(elapsed) {
            for machine in &mut self.machines {
                if let Some(t) = machine.on_timer(id, &mut self.timers) {
                    set_path(&mut self.state, machine.phase_field(), json!(t.to.to_string()));
                    written.push(machine.phase_field().to_owned());
                }
            }
        }
        self.phases_written(written)
    }

    /// The enter animation of `field` finished.
    pub fn transition_end(&mut self, field: &str) -> bool {
        let mut written = Vec::new();
        if let Some(machine) = self.machines.iter_mut().find(|m| m.field() == field) {
            if let Some(t) = machine.on_transition_end(&mut self.timers) {
                set_path(&mut self.state, machine.phase_field(), json!(t.to.to_string()));
                written.push(machine.phase_field().to_owned());
            }
        }
        self.phases_written(written)
    }

    /// Tear the surface down. A surface with an id parks its variables and
    /// in-flight requests in `directory`.
    pub fn unmount(mut self, directory: &mut Directory) {
        for machine in &mut self.machines {
            machine.destroy(&mut self.timers);
        }
        let Some(id) = self.id.take() else {
            return;
        };
        tracing::debug!(%id, pending = self.in_flight.len(), "surface parked");
        directory.park(
            id,
            Parked {
                store: self.store,
                inbox: self.inbox,
                in_flight: self.in_flight,
                client_version: self.client_version,
                baseline_version: self.baseline_version,
            },
        );
    }

    fn start(&mut self) {
        for machine in &self.machines {
            set_path(
                &mut self.state,
                machine.phase_field(),
                json!(Phase::Idle.to_string()),
            );
        }
        self.registry.graph().recompute(&mut self.state, None);
        let names: BTreeSet<String> = self
            .machines
            .iter()
            .flat_map(|m| std::iter::once(m.field()).chain(m.async_field()))
            .map(str::to_owned)
            .collect();
        let written = self.feed(&names, Some(Source::Server));
        self.cascade(written, Some(Source::Server));
        self.update();
    }

    /// Write a local edit into the state and reshape the store around it.
    ///
    /// Afterwards the variables overlapping `path` are exactly the leaves of
    /// `value`. Returns those leaves and the paths of the variables dropped.
    fn stage(&mut self, path: &str, value: &Value) -> Option<(FlatState, Vec<String>)> {
        if path.is_empty() || self.registry.is_computed(path) {
            tracing::debug!(path, "computed field cannot be edited");
            return None;
        }
        let mut leaves = FlatState::new();
        flatten_into(path.to_owned(), value, &mut leaves);
        let removed: Vec<String> = self
            .store
            .paths()
            .into_iter()
            .filter(|&p| touches(p, path) && !leaves.contains_key(p))
            .map(str::to_owned)
            .collect();
        for p in &removed {
            self.forget(p);
        }
        for leaf in leaves.keys() {
            let previous = get_path(&self.state, leaf).cloned();
            self.store.get(leaf, previous);
        }
        set_path(&mut self.state, path, value.clone());
        Some((leaves, removed))
    }

    fn edit(&mut self, path: &str, value: Value) -> BTreeSet<String> {
        let Some((leaves, removed)) = self.stage(path, &value) else {
            return BTreeSet::new();
        };
        let mut changed: BTreeSet<String> = removed.into_iter().collect();
        for (leaf, value) in leaves {
            if self
                .store
                .variable(&leaf)
                .is_some_and(|var| var.set_optimistic(value))
            {
                changed.insert(leaf);
            }
        }
        changed
    }

    /// Drop the variable at `path` together with its in-flight entries.
    fn forget(&mut self, path: &str) {
        self.store.remove(path);
        for entries in self.in_flight.values_mut() {
            entries.retain(|(p, _)| p != path);
        }
    }

    /// Remember which variable versions request `version` carries.
    fn track(&mut self, version: u64, changed: &BTreeSet<String>) {
        let carried: Vec<_> = changed
            .iter()
            .filter_map(|path| Some((path.clone(), self.store.variable(path)?.version())))
            .collect();
        if !carried.is_empty() {
            self.in_flight.entry(version).or_default().extend(carried);
        }
    }

    fn merge_push(&mut self, push: AuthorityPush, answering: Option<u64>) -> bool {
        let span = tracing::debug_span!("push", version = push.version);
        let _enter = span.enter();

        let mut versions: Vec<u64> = self
            .in_flight
            .range(..=push.version)
            .map(|(&version, _)| version)
            .collect();
        versions.extend(answering.filter(|&v| v > push.version));
        let mut changed = self.settle(&versions, Some(&push.state));

        if push.version >= self.baseline_version {
            self.baseline_version = push.version;
        } else {
            tracing::debug!(
                baseline = self.baseline_version,
                "stale push; merging fields without pending edits"
            );
        }
        changed.extend(self.merge(&push.state));
        self.commit(&changed, Source::Server)
    }

    /// Confirm the entries of the given requests whose variable has not been
    /// edited since. Returns the paths whose value changed.
    fn settle(&mut self, versions: &[u64], snapshot: Option<&Value>) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for version in versions {
            let Some(entries) = self.in_flight.remove(version) else {
                continue;
            };
            for (path, var_version) in entries {
                let Some(var) = self.store.variable(&path) else {
                    continue;
                };
                if var.version() != var_version {
                    continue;
                }
                let old = var.value();
                let value = snapshot
                    .and_then(|s| authoritative_value(s, &path))
                    .unwrap_or_else(|| old.clone());
                var.confirm(value);
                if var.value() != old {
                    changed.insert(path);
                }
            }
        }
        changed
    }

    /// Undo the entries of request `version` whose variable has not been edited since.
    fn revert(&mut self, version: u64) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        for (path, var_version) in self.in_flight.remove(&version).unwrap_or_default() {
            let Some(var) = self.store.variable(&path) else {
                continue;
            };
            if var.version() != var_version {
                continue;
            }
            let old = var.value();
            var.confirm(var.confirmed_value());
            if var.value() != old {
                changed.insert(path);
            }
        }
        changed
    }

    /// Merge `snapshot` into the store, skipping computed fields and every
    /// leaf that overlaps a pending edit.
    ///
    /// Variables a snapshot leaf replaces are dropped, so the store keeps one
    /// variable per leaf.
    fn merge(&mut self, snapshot: &Value) -> BTreeSet<String> {
        let mut changed = BTreeSet::new();
        if !snapshot.is_object() {
            tracing::debug!(%snapshot, "snapshot is not an object; ignored");
            return changed;
        }
        let pending = self.store.pending_paths();
        let mut known = FlatState::new();
        for (path, value) in flatten(snapshot) {
            if self.registry.is_computed(&path) {
                continue;
            }
            if pending.iter().any(|p| *p != path && touches(p, &path)) {
                tracing::debug!(%path, "overlaps a pending edit; kept local");
                continue;
            }
            let replaced: Vec<String> = self
                .store
                .paths()
                .into_iter()
                .filter(|&p| p != path && touches(p, &path))
                .map(str::to_owned)
                .collect();
            if !replaced.is_empty() {
                for p in replaced {
                    self.forget(&p);
                    changed.insert(p);
                }
                set_path(&mut self.state, &path, value.clone());
            }
            if self.store.contains(&path) {
                known.insert(path, value);
            } else {
                self.store.get(&path, value);
                changed.insert(path);
            }
        }
        let merge = self.store.server_update_flat(&known);
        changed.extend(merge.applied);
        changed
    }

    fn action_reply(&mut self, version: u64, answer: Value) {
        if let Some(push) = AuthorityPush::from_reply(&answer) {
            self.merge_push(push, Some(version));
            return;
        }
        let changed = if let Some(error) = answer.get("error") {
            tracing::debug!(version, %error, "action rejected by the authority");
            self.revert(version)
        } else {
            self.settle(&[version], None)
        };
        self.commit(&changed, Source::Confirmed);
    }

    fn set_reply(&mut self, path: String, sent: Value, answer: Value, target: SetTarget) {
        let push = AuthorityPush::from_reply(&answer);
        let rejected = push.is_none() && answer.get("error").is_some();
        if rejected {
            tracing::debug!(%path, error = %answer["error"], "set rejected by the authority");
        }
        let accepted = match &push {
            Some(push) => authoritative_value(&push.state, &path).unwrap_or(sent),
            None => answer.get("value").cloned().unwrap_or(sent),
        };
        let mut changed = BTreeSet::new();
        match target {
            SetTarget::Variable(reply) => {
                let var = self.store.variable(&path).cloned();
                let old = var.as_ref().map(VersionedVariable::value);
                if rejected {
                    reply(var.as_ref().map_or(Value::Null, VersionedVariable::confirmed_value));
                } else {
                    reply(accepted);
                }
                if var.as_ref().map(VersionedVariable::value) != old {
                    changed.insert(path);
                }
            }
            SetTarget::Leaves(entries) => {
                for (leaf, version) in entries {
                    let Some(var) = self.store.variable(&leaf) else {
                        continue;
                    };
                    if var.version() != version {
                        continue;
                    }
                    let old = var.value();
                    let value = if rejected {
                        var.confirmed_value()
                    } else {
                        leaf.strip_prefix(path.as_str())
                            .and_then(|rest| rest.strip_prefix('.'))
                            .and_then(|rest| get_path(&accepted, rest))
                            .cloned()
                            .unwrap_or(Value::Null)
                    };
                    var.confirm(value);
                    if var.value() != old {
                        changed.insert(leaf);
                    }
                }
            }
        }
        self.commit(&changed, Source::Confirmed);
        if let Some(push) = push {
            self.apply_push(push);
        }
    }

    /// Copy changed variables, and every variable nested in them, into the state.
    fn commit(&mut self, changed: &BTreeSet<String>, source: Source) -> bool {
        if changed.is_empty() {
            return false;
        }
        for path in self.store.paths() {
            if !ancestors(path).any(|a| changed.contains(a)) {
                continue;
            }
            if let Some(var) = self.store.variable(path) {
                place(&mut self.state, path, var.value());
            }
        }
        self.propagate(changed, source)
    }

    /// Notify phase machines, recompute derived fields, and render.
    fn propagate(&mut self, changed: &BTreeSet<String>, source: Source) -> bool {
        if changed.is_empty() {
            return false;
        }
        let names: BTreeSet<String> = changed
            .iter()
            .flat_map(|path| ancestors(path))
            .map(str::to_owned)
            .collect();
        let mut inputs = self.feed(&names, Some(source));
        inputs.extend(names);
        self.cascade(inputs, Some(source));
        self.render();
        true
    }

    /// Feed the machines whose field or async field overlaps `names`.
    ///
    /// Returns the phase fields that were written.
    fn feed(&mut self, names: &BTreeSet<String>, source: Option<Source>) -> Vec<String> {
        let mut written = Vec::new();
        for machine in &mut self.machines {
            let overlaps = |field: &str| names.iter().any(|name| touches(name, field));
            let value = Some(machine.field())
                .filter(|&f| overlaps(f))
                .map(|f| get_path(&self.state, f).cloned().unwrap_or(Value::Null));

            let mut last = None;
            if let Some(value) = value {
                last = machine.on_value_change(&value, source, &mut self.timers);
            }
            // Content still present from an earlier opening counts as arrived.
            let entered = last.is_some_and(|t: Transition| t.to == Phase::Entering);
            let async_value = machine
                .async_field()
                .filter(|&f| entered || overlaps(f))
                .map(|f| get_path(&self.state, f).cloned().unwrap_or(Value::Null));
            if let Some(value) = async_value {
                last = machine.on_async_change(&value, &mut self.timers).or(last);
            }
            if let Some(t) = last {
                set_path(&mut self.state, machine.phase_field(), json!(t.to.to_string()));
                written.push(machine.phase_field().to_owned());
            }
        }
        written
    }

    /// Recompute derived fields depending on `inputs`, feeding machines whose
    /// fields are derived, until no phase changes.
    fn cascade(&mut self, mut inputs: Vec<String>, source: Option<Source>) {
        for _ in 0..=self.machines.len() {
            if inputs.is_empty() {
                return;
            }
            let names: Vec<&str> = inputs.iter().map(String::as_str).collect();
            let updated = self.registry.graph().recompute(&mut self.state, Some(&names));
            let derived: BTreeSet<String> =
                updated.iter().map(|f| f.name().to_owned()).collect();
            inputs = self.feed(&derived, source);
        }
    }

    fn phases_written(&mut self, written: Vec<String>) -> bool {
        if written.is_empty() {
            return false;
        }
        self.cascade(written, None);
        self.render();
        true
    }

    fn render(&mut self) {
        for observer in &mut self.observers {
            observer(&self.state);
        }
    }
}

impl<D: Derive> std::fmt::Debug for Surface<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("client_version", &self.client_version)
            .field("baseline_version", &self.baseline_version)
            .field("pending", &self.store.pending_paths())
            .finish_non_exhaustive()
    }
}

/// Value of `path` in `snapshot`, if the snapshot covers its top-level field.
fn authoritative_value(snapshot: &Value, path: &str) -> Option<Value> {
    snapshot.get(top_level(path))?;
    Some(get_path(snapshot, path).cloned().unwrap_or(Value::Null))
}

/// Like [`set_path`], but a nested `null` is not materialized under a parent
/// that does not contain it.
fn place(state: &mut Value, path: &str, value: Value) {
    if value.is_null() && is_nested(path) && get_path(state, path).is_none() {
        return;
    }
    set_path(state, path, value);
}

fn assemble(store: &VariableStore) -> Value {
    let mut state = Value::Object(Map::new());
    for (path, value) in store.to_flat() {
        place(&mut state, &path, value);
    }
    state
}
