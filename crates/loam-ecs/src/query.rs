//! Queries and the canonical query index.
//!
//! A query is the incrementally maintained set of entities matching an
//! inclusion list plus an exclusion list. Queries are shared: two term lists
//! with the same canonical key resolve to the same [`QueryId`], so every
//! consumer observes one membership list.
//!
//! Canonicalization works over sorted registration ids rather than names,
//! which makes the key total over any registrable set and immune to name
//! collisions.

use std::collections::HashMap;

use crate::component::ComponentTypeId;
use crate::entity::EntityId;
use crate::event::QueryEvents;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Term / not()
// ---------------------------------------------------------------------------

/// One predicate term: require a component, or require its absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Term {
    /// The entity must carry this component type.
    With(ComponentTypeId),
    /// The entity must not carry this component type.
    Without(ComponentTypeId),
}

impl From<ComponentTypeId> for Term {
    fn from(id: ComponentTypeId) -> Self {
        Term::With(id)
    }
}

/// Negative-predicate sentinel: `[pos.into(), not(frozen)]` matches entities
/// carrying `pos` but not `frozen`.
pub fn not(id: ComponentTypeId) -> Term {
    Term::Without(id)
}

// ---------------------------------------------------------------------------
// QueryId / QueryKey
// ---------------------------------------------------------------------------

/// Handle to a shared query in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueryId(pub(crate) u32);

/// The canonical identity of a query: sorted inclusion and exclusion id sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub(crate) with: Vec<ComponentTypeId>,
    pub(crate) without: Vec<ComponentTypeId>,
}

impl QueryKey {
    /// Canonicalize a term list. Duplicate terms collapse; an empty inclusion
    /// set is a fatal argument error.
    pub fn from_terms(terms: &[Term]) -> Result<Self, EcsError> {
        let mut with = Vec::new();
        let mut without = Vec::new();
        for term in terms {
            match *term {
                Term::With(id) => {
                    if !with.contains(&id) {
                        with.push(id);
                    }
                }
                Term::Without(id) => {
                    if !without.contains(&id) {
                        without.push(id);
                    }
                }
            }
        }
        if with.is_empty() {
            return Err(EcsError::EmptyQuery);
        }
        with.sort();
        without.sort();
        Ok(Self { with, without })
    }

    /// Required component types, sorted.
    pub fn with(&self) -> &[ComponentTypeId] {
        &self.with
    }

    /// Excluded component types, sorted.
    pub fn without(&self) -> &[ComponentTypeId] {
        &self.without
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A live query: canonical key, current membership, reactivity flag, and the
/// listener table.
pub struct Query {
    pub(crate) key: QueryKey,
    pub(crate) entities: Vec<EntityId>,
    pub(crate) reactive: bool,
    pub(crate) events: QueryEvents,
}

impl Query {
    pub(crate) fn new(key: QueryKey) -> Self {
        Self {
            key,
            entities: Vec::new(),
            reactive: false,
            events: QueryEvents::new(),
        }
    }

    /// Whether an entity with the given attached types matches this query.
    pub(crate) fn matches(&self, types: &[ComponentTypeId]) -> bool {
        self.key.with.iter().all(|t| types.contains(t))
            && !self.key.without.iter().any(|t| types.contains(t))
    }

    /// The canonical key.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Current membership, in insertion order.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Whether any listener observes component mutations on this query.
    pub fn is_reactive(&self) -> bool {
        self.reactive
    }

    /// The listener table.
    pub fn events(&self) -> &QueryEvents {
        &self.events
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.key)
            .field("entities", &self.entities.len())
            .field("reactive", &self.reactive)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// QueryIndex
// ---------------------------------------------------------------------------

/// Mapping from canonical key to the single shared [`Query`] instance.
#[derive(Debug, Default)]
pub struct QueryIndex {
    queries: Vec<Query>,
    by_key: HashMap<QueryKey, QueryId>,
}

impl QueryIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The id for a key, if a query with that key already exists.
    pub(crate) fn lookup(&self, key: &QueryKey) -> Option<QueryId> {
        self.by_key.get(key).copied()
    }

    /// Insert a fully seeded query and return its id.
    pub(crate) fn insert(&mut self, query: Query) -> QueryId {
        let id = QueryId(self.queries.len() as u32);
        self.by_key.insert(query.key.clone(), id);
        self.queries.push(query);
        id
    }

    pub(crate) fn get(&self, id: QueryId) -> &Query {
        &self.queries[id.0 as usize]
    }

    pub(crate) fn get_mut(&mut self, id: QueryId) -> &mut Query {
        &mut self.queries[id.0 as usize]
    }

    /// Iterate all queries mutably, with their ids.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (QueryId, &mut Query)> {
        self.queries
            .iter_mut()
            .enumerate()
            .map(|(i, q)| (QueryId(i as u32), q))
    }

    /// Iterate all queries, with their ids.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (QueryId, &Query)> {
        self.queries
            .iter()
            .enumerate()
            .map(|(i, q)| (QueryId(i as u32), q))
    }

    /// Number of distinct queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Whether the index holds no queries.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
