//! Systems and the ordered system manager.
//!
//! A system declares its queries up front via [`SystemConfig`]; registration
//! resolves each declaration to a shared query in the index, attaches
//! listeners for the requested reactive buckets, and collects mandatory
//! queries. On each world tick the manager runs executable systems in
//! ascending `(priority, registration order)`, timing each run and clearing
//! the system's buckets after its own execute.
//!
//! Systems receive `&mut World` directly during execute; the manager takes
//! the system out of its slot for the duration of the call, so there is no
//! aliasing between the running system and the world that owns it.

use std::any::{Any, TypeId};

use serde::Serialize;

use crate::event::{ChangedFilter, Listen, ListenerId};
use crate::query::{QueryId, Term};
use crate::world::World;

// ---------------------------------------------------------------------------
// QuerySpec / SystemConfig
// ---------------------------------------------------------------------------

/// One query declaration in a system's configuration.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// Local name the system uses to address this query.
    pub name: String,
    /// The predicate terms.
    pub terms: Vec<Term>,
    /// When `true`, the system is skipped while this query is empty.
    pub mandatory: bool,
    /// Reactive bucket interest.
    pub listen: Listen,
}

impl QuerySpec {
    /// A plain query declaration with no reactive interest.
    pub fn new(name: &str, terms: Vec<Term>) -> Self {
        Self {
            name: name.to_owned(),
            terms,
            mandatory: false,
            listen: Listen::none(),
        }
    }

    /// Skip the system while this query is empty.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Collect entities newly matching the query.
    pub fn listen_added(mut self) -> Self {
        self.listen.added = true;
        self
    }

    /// Collect entities leaving the query.
    pub fn listen_removed(mut self) -> Self {
        self.listen.removed = true;
        self
    }

    /// Collect entities whose matched components are mutably accessed; marks
    /// the shared query reactive.
    pub fn listen_changed(mut self, filter: ChangedFilter) -> Self {
        self.listen.changed = Some(filter);
        self
    }
}

/// A system's static declaration: display name plus query declarations.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Display name, used in logs and statistics.
    pub name: String,
    /// Query declarations, resolved at registration.
    pub queries: Vec<QuerySpec>,
}

impl SystemConfig {
    /// A configuration with no queries.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            queries: Vec::new(),
        }
    }

    /// Append a query declaration.
    pub fn query(mut self, spec: QuerySpec) -> Self {
        self.queries.push(spec);
        self
    }
}

// ---------------------------------------------------------------------------
// QueryBinding / SystemQueries
// ---------------------------------------------------------------------------

/// A resolved query declaration: the shared query plus the listener handle
/// for this system's buckets.
#[derive(Debug, Clone, Copy)]
pub struct QueryBinding {
    /// The shared query in the world's index.
    pub query: QueryId,
    /// This system's listener on the query, if any bucket was requested.
    pub listener: Option<ListenerId>,
    /// Whether the query gates execution.
    pub mandatory: bool,
}

/// The resolved query declarations of one system, addressed by local name.
#[derive(Debug, Clone, Default)]
pub struct SystemQueries {
    entries: Vec<(String, QueryBinding)>,
}

impl SystemQueries {
    pub(crate) fn push(&mut self, name: String, binding: QueryBinding) {
        self.entries.push((name, binding));
    }

    /// The binding registered under `name`.
    pub fn get(&self, name: &str) -> Option<&QueryBinding> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
    }

    /// All bindings, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryBinding)> {
        self.entries.iter().map(|(n, b)| (n.as_str(), b))
    }
}

// ---------------------------------------------------------------------------
// System trait
// ---------------------------------------------------------------------------

/// Per-run context handed to [`System::execute`].
pub struct SystemRun<'a> {
    /// Milliseconds elapsed since the previous tick.
    pub delta: f64,
    /// The world clock reading for this tick, in milliseconds.
    pub time: f64,
    /// The system's resolved queries.
    pub queries: &'a SystemQueries,
}

/// A unit of behavior with declared queries and an execute step.
///
/// `init` runs once at registration, after queries are resolved. `execute`
/// runs every tick in priority order; a system whose behavior is purely
/// reactive bookkeeping can override [`executes`](System::executes) to stay
/// out of the ordered execution list while keeping its buckets.
pub trait System: Any {
    /// The static query configuration.
    fn config(&self) -> SystemConfig;

    /// One-time setup after registration.
    fn init(&mut self, world: &mut World, queries: &SystemQueries) {
        let _ = (world, queries);
    }

    /// One tick of behavior.
    fn execute(&mut self, world: &mut World, run: &SystemRun<'_>);

    /// Whether this system takes part in the ordered execution list.
    fn executes(&self) -> bool {
        true
    }
}

/// Registration attributes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemAttributes {
    /// Execution priority; lower runs earlier. Ties break by registration
    /// order.
    pub priority: i32,
}

impl SystemAttributes {
    /// Attributes with the given priority.
    pub fn priority(priority: i32) -> Self {
        Self { priority }
    }
}

// ---------------------------------------------------------------------------
// SystemMeta / SystemSlot / SystemManager
// ---------------------------------------------------------------------------

/// Bookkeeping the manager holds per registered system.
#[derive(Debug)]
pub(crate) struct SystemMeta {
    pub(crate) name: String,
    pub(crate) type_id: TypeId,
    pub(crate) priority: i32,
    pub(crate) enabled: bool,
    pub(crate) executes: bool,
    pub(crate) queries: SystemQueries,
    pub(crate) executions: u64,
    pub(crate) last_duration_ms: f64,
}

pub(crate) struct SystemSlot {
    pub(crate) system: Box<dyn System>,
    pub(crate) meta: SystemMeta,
}

/// Execution statistics for one system.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    /// Display name from the system's configuration.
    pub name: String,
    /// Registration priority.
    pub priority: i32,
    /// Whether the system is currently playing.
    pub enabled: bool,
    /// Whether the system participates in the ordered execution list.
    pub executes: bool,
    /// Ticks on which the system actually ran.
    pub executions: u64,
    /// Wall-clock duration of the last run, in milliseconds.
    pub last_duration_ms: f64,
    /// Canonical keys of the system's declared queries, in declaration order.
    pub queries: Vec<String>,
}

/// Owns registered systems and their execution order.
#[derive(Default)]
pub struct SystemManager {
    slots: Vec<Option<SystemSlot>>,
    /// Indices of executable systems, ascending `(priority, registration)`.
    order: Vec<usize>,
}

impl SystemManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Whether a system of this concrete type is already registered.
    pub(crate) fn contains(&self, type_id: TypeId) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|slot| slot.meta.type_id == type_id)
    }

    /// Insert a slot and rebuild the execution order.
    pub(crate) fn insert(&mut self, slot: SystemSlot) {
        self.slots.push(Some(slot));
        self.rebuild_order();
    }

    fn rebuild_order(&mut self) {
        let mut order: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.as_ref().is_some_and(|s| s.meta.executes))
            .map(|(i, _)| i)
            .collect();
        order.sort_by_key(|&i| {
            let slot = self.slots[i].as_ref().expect("ordered slot is present");
            (slot.meta.priority, i)
        });
        self.order = order;
    }

    /// The execution order as a detached index list.
    pub(crate) fn execution_order(&self) -> Vec<usize> {
        self.order.clone()
    }

    /// Take a system out of its slot for the duration of a run.
    pub(crate) fn take(&mut self, index: usize) -> Option<SystemSlot> {
        self.slots.get_mut(index)?.take()
    }

    /// Put a system back after a run.
    pub(crate) fn restore(&mut self, index: usize, slot: SystemSlot) {
        self.slots[index] = Some(slot);
    }

    /// Find a slot index by concrete type.
    pub(crate) fn index_of(&self, type_id: TypeId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.meta.type_id == type_id))
    }

    /// Borrow a registered system by concrete type.
    pub(crate) fn get<S: System>(&self) -> Option<&S> {
        self.slots.iter().flatten().find_map(|slot| {
            (slot.meta.type_id == TypeId::of::<S>())
                .then(|| (slot.system.as_ref() as &dyn Any).downcast_ref::<S>())
                .flatten()
        })
    }

    /// Set the enabled flag of a system by concrete type. Returns `false` if
    /// no such system is registered.
    pub(crate) fn set_enabled(&mut self, type_id: TypeId, enabled: bool) -> bool {
        for slot in self.slots.iter_mut().flatten() {
            if slot.meta.type_id == type_id {
                slot.meta.enabled = enabled;
                return true;
            }
        }
        false
    }

    /// Display names of all registered systems, in registration order.
    pub(crate) fn names(&self) -> Vec<String> {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.meta.name.clone())
            .collect()
    }

    /// Execution statistics for every registered system; `describe` renders
    /// a query id into its canonical key.
    pub(crate) fn stats_with(&self, describe: impl Fn(QueryId) -> String) -> Vec<SystemStats> {
        self.slots
            .iter()
            .flatten()
            .map(|s| SystemStats {
                name: s.meta.name.clone(),
                priority: s.meta.priority,
                enabled: s.meta.enabled,
                executes: s.meta.executes,
                executions: s.meta.executions,
                last_duration_ms: s.meta.last_duration_ms,
                queries: s
                    .meta
                    .queries
                    .iter()
                    .map(|(_, binding)| describe(binding.query))
                    .collect(),
            })
            .collect()
    }

    /// Number of registered systems.
    pub(crate) fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }
}

impl std::fmt::Debug for SystemManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemManager")
            .field("systems", &self.names())
            .field("order", &self.order)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
