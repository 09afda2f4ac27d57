//! Reactive event buckets for queries.
//!
//! Each query keeps a table of listeners (one per listening system query
//! declaration). A listener states its interest -- entity added, entity
//! removed, component changed (any matched component or a type subset) -- and
//! accumulates matching entities into per-tick buckets, de-duplicated by
//! entity identity. The table tracks how many events were fired and how many
//! listener deliveries happened.
//!
//! Buckets are cleared per listening system at the end of that system's own
//! execute, so a bucket always holds everything accumulated since the
//! system's previous run.

use crate::component::ComponentTypeId;
use crate::entity::EntityId;

// ---------------------------------------------------------------------------
// ListenerId
// ---------------------------------------------------------------------------

/// Handle to one listener registered on a query's event table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u32);

// ---------------------------------------------------------------------------
// ChangedFilter / Listen
// ---------------------------------------------------------------------------

/// What a listener's `changed` bucket accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangedFilter {
    /// Any mutation of a component required by the query.
    Any,
    /// Only mutations of the listed component types.
    Types(Vec<ComponentTypeId>),
}

impl ChangedFilter {
    fn accepts(&self, ty: ComponentTypeId) -> bool {
        match self {
            ChangedFilter::Any => true,
            ChangedFilter::Types(types) => types.contains(&ty),
        }
    }
}

/// A listener's declared interest.
#[derive(Debug, Clone, Default)]
pub struct Listen {
    /// Collect entities newly matching the query.
    pub added: bool,
    /// Collect entities leaving the query.
    pub removed: bool,
    /// Collect entities whose matched components were mutably accessed.
    pub changed: Option<ChangedFilter>,
}

impl Listen {
    /// No interest at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether any bucket is requested.
    pub fn any(&self) -> bool {
        self.added || self.removed || self.changed.is_some()
    }
}

// ---------------------------------------------------------------------------
// QueryEvents
// ---------------------------------------------------------------------------

struct ListenerState {
    interest: Listen,
    added: Vec<EntityId>,
    removed: Vec<EntityId>,
    changed: Vec<EntityId>,
}

/// Per-query listener table with fire/handled counters.
#[derive(Default)]
pub struct QueryEvents {
    listeners: Vec<ListenerState>,
    fired: u64,
    handled: u64,
}

const EMPTY: &[EntityId] = &[];

impl QueryEvents {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a listener and return its handle.
    pub(crate) fn add_listener(&mut self, interest: Listen) -> ListenerId {
        let id = ListenerId(self.listeners.len() as u32);
        self.listeners.push(ListenerState {
            interest,
            added: Vec::new(),
            removed: Vec::new(),
            changed: Vec::new(),
        });
        id
    }

    /// Dispatch an entity-added event into every interested bucket.
    pub(crate) fn entity_added(&mut self, entity: EntityId) {
        self.fired += 1;
        for listener in &mut self.listeners {
            if listener.interest.added {
                self.handled += 1;
                push_unique(&mut listener.added, entity);
            }
        }
    }

    /// Dispatch an entity-removed event into every interested bucket.
    pub(crate) fn entity_removed(&mut self, entity: EntityId) {
        self.fired += 1;
        for listener in &mut self.listeners {
            if listener.interest.removed {
                self.handled += 1;
                push_unique(&mut listener.removed, entity);
            }
        }
    }

    /// Dispatch a component-changed event; listeners filtering by type only
    /// accept mutations of the listed types.
    pub(crate) fn component_changed(&mut self, entity: EntityId, ty: ComponentTypeId) {
        self.fired += 1;
        for listener in &mut self.listeners {
            if let Some(filter) = &listener.interest.changed {
                if filter.accepts(ty) {
                    self.handled += 1;
                    push_unique(&mut listener.changed, entity);
                }
            }
        }
    }

    /// The `added` bucket of a listener.
    pub(crate) fn added(&self, id: ListenerId) -> &[EntityId] {
        self.listeners
            .get(id.0 as usize)
            .map_or(EMPTY, |l| l.added.as_slice())
    }

    /// The `removed` bucket of a listener.
    pub(crate) fn removed(&self, id: ListenerId) -> &[EntityId] {
        self.listeners
            .get(id.0 as usize)
            .map_or(EMPTY, |l| l.removed.as_slice())
    }

    /// The `changed` bucket of a listener.
    pub(crate) fn changed(&self, id: ListenerId) -> &[EntityId] {
        self.listeners
            .get(id.0 as usize)
            .map_or(EMPTY, |l| l.changed.as_slice())
    }

    /// Clear all three buckets of one listener.
    pub(crate) fn clear(&mut self, id: ListenerId) {
        if let Some(listener) = self.listeners.get_mut(id.0 as usize) {
            listener.added.clear();
            listener.removed.clear();
            listener.changed.clear();
        }
    }

    /// Total events dispatched through this table.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Total listener deliveries (one per interested listener per event).
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for QueryEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEvents")
            .field("listeners", &self.listeners.len())
            .field("fired", &self.fired)
            .field("handled", &self.handled)
            .finish()
    }
}

fn push_unique(bucket: &mut Vec<EntityId>, entity: EntityId) {
    if !bucket.contains(&entity) {
        bucket.push(entity);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
