//! The [`World`] is the public façade of the runtime: it owns the kind and
//! component registries, the entity store and uuid index, the query index,
//! the system manager, and the deferred-removal queues, and it drives the
//! tick loop.
//!
//! # Consistency
//!
//! The world maintains one invariant across every operation: queries always
//! reflect the current component composition of live entities. Component
//! attachment and detachment run the incremental maintenance protocol;
//! entity teardown leaves every query before instances are disposed; and the
//! end-of-tick drains flush deferred despawns before deferred component
//! removals, in insertion order.
//!
//! # Example
//!
//! ```
//! use loam_ecs::prelude::*;
//!
//! let mut world = World::new();
//! let position = world.register_component(
//!     ComponentType::new("position").schema(Schema::new().number("x", 0.0).number("y", 0.0)),
//! );
//!
//! let e = world.create_entity();
//! world.add_component(e, position, Props::new().set("x", 3.0));
//!
//! let q = world.query(&[position.into()]).unwrap();
//! assert_eq!(world.entities_in(q), &[e]);
//! assert_eq!(world.get_component(e, position).unwrap().number("x"), Some(3.0));
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::component::{
    CloneFn, ComponentRegistry, ComponentType, ComponentTypeId, ComponentValue, CopyFn, DefaultFn,
    KindId, KindRegistry, Props,
};
use crate::entity::{EntityId, EntitySlot, EntityStore, EntityUuid, Lifecycle};
use crate::pool::PoolStats;
use crate::query::{Query, QueryId, QueryIndex, QueryKey, Term};
use crate::system::{
    QueryBinding, System, SystemAttributes, SystemManager, SystemMeta, SystemQueries, SystemRun,
    SystemSlot, SystemStats,
};
use crate::EcsError;

const NO_ENTITIES: &[EntityId] = &[];
const NO_TYPES: &[ComponentTypeId] = &[];

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of the world's monotonic time, in milliseconds.
///
/// The default implementation counts from world construction; tests inject a
/// manual clock to make timing deterministic.
pub trait Clock {
    /// The current reading, in milliseconds.
    fn now(&self) -> f64;
}

/// Monotonic wall clock counting milliseconds since construction.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// A clock whose origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Entity slot counts by lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct EntityStats {
    /// Entities visible to queries.
    pub active: usize,
    /// Entities constructed but not yet added to the world.
    pub detached: usize,
    /// Entities scheduled for teardown (including system-state ghosts).
    pub removed: usize,
    /// Total slots in the arena.
    pub slots: usize,
    /// Slots sitting in the free list.
    pub free: usize,
}

/// Per-component-type counters.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentTypeStats {
    /// Registered name.
    pub name: String,
    /// Instances currently attached to entities.
    pub live: usize,
    /// Pool counters, if the type is pooled.
    pub pool: Option<PoolStats>,
}

/// Per-query counters.
#[derive(Debug, Clone, Serialize)]
pub struct QueryStats {
    /// Canonical key rendered with component names (`a-b-!c`).
    pub key: String,
    /// Current membership size.
    pub entities: usize,
    /// Whether the query announces component mutations.
    pub reactive: bool,
    /// Registered listeners.
    pub listeners: usize,
    /// Events dispatched through the query's table so far.
    pub events_fired: u64,
}

/// A serializable snapshot of world state, suitable for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct WorldStats {
    /// Entity slot counts.
    pub entities: EntityStats,
    /// Per-component-type counters, in registration order.
    pub components: Vec<ComponentTypeStats>,
    /// Per-query counters.
    pub queries: Vec<QueryStats>,
    /// Per-system execution counters.
    pub systems: Vec<SystemStats>,
}

// ---------------------------------------------------------------------------
// WorldBuilder
// ---------------------------------------------------------------------------

type CreatedHook = Box<dyn FnOnce(&World, &str)>;

/// Configures a [`World`] before construction: the clock, additional schema
/// kinds, and the `world-created` notification hook.
///
/// ```
/// use loam_ecs::prelude::*;
///
/// let world = World::builder()
///     .on_created(|_world, version| println!("world ready, core {version}"))
///     .build();
/// # let _ = world;
/// ```
pub struct WorldBuilder {
    clock: Box<dyn Clock>,
    kinds: KindRegistry,
    created_hooks: Vec<CreatedHook>,
}

impl WorldBuilder {
    fn new() -> Self {
        Self {
            clock: Box::new(MonotonicClock::new()),
            kinds: KindRegistry::with_builtins(),
            created_hooks: Vec::new(),
        }
    }

    /// Inject the time source used for tick deltas and system timing.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Register a custom schema kind alongside the built-ins.
    ///
    /// The [`KindId`] is looked up after construction via
    /// [`World::kind`].
    pub fn register_kind(
        mut self,
        name: &str,
        default: DefaultFn,
        clone: CloneFn,
        copy: CopyFn,
    ) -> Self {
        self.kinds.register(name, default, clone, copy);
        self
    }

    /// Attach a listener invoked once with the constructed world and the
    /// core's version string.
    pub fn on_created(mut self, hook: impl FnOnce(&World, &str) + 'static) -> Self {
        self.created_hooks.push(Box::new(hook));
        self
    }

    /// Construct the world and fire the `world-created` notification.
    pub fn build(self) -> World {
        let last_time = self.clock.now();
        let world = World {
            kinds: self.kinds,
            registry: ComponentRegistry::new(),
            entities: EntityStore::new(),
            uuid_index: HashMap::new(),
            queries: QueryIndex::new(),
            systems: SystemManager::new(),
            despawn_queue: Vec::new(),
            component_removal_queue: Vec::new(),
            enabled: true,
            clock: self.clock,
            last_time,
        };
        for hook in self.created_hooks {
            hook(&world, crate::VERSION);
        }
        world
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

/// The top-level container: entities, components, queries, systems, and the
/// tick loop.
pub struct World {
    kinds: KindRegistry,
    registry: ComponentRegistry,
    entities: EntityStore,
    uuid_index: HashMap<EntityUuid, EntityId>,
    queries: QueryIndex,
    systems: SystemManager,
    /// Entities scheduled for teardown at the end of the current tick.
    despawn_queue: Vec<EntityId>,
    /// Entities with pending component removals to drain.
    component_removal_queue: Vec<EntityId>,
    enabled: bool,
    clock: Box<dyn Clock>,
    last_time: f64,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("entities", &self.entity_count())
            .field("component_types", &self.registry.len())
            .field("queries", &self.queries.len())
            .field("systems", &self.systems.len())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// A world with the default clock and built-in kinds.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start configuring a world.
    pub fn builder() -> WorldBuilder {
        WorldBuilder::new()
    }

    // -- registries ---------------------------------------------------------

    /// Read-only access to the kind registry.
    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    /// Look up a schema kind by name.
    pub fn kind(&self, name: &str) -> Option<KindId> {
        self.kinds.lookup(name)
    }

    /// Read-only access to the component registry.
    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// Look up a component type by its registered name.
    pub fn component_type(&self, name: &str) -> Option<ComponentTypeId> {
        self.registry.lookup(name)
    }

    /// Register a component type. Re-registering a name logs a warning and
    /// returns the existing id.
    pub fn register_component(&mut self, ty: ComponentType) -> ComponentTypeId {
        self.registry.register(ty, &self.kinds)
    }

    /// Register a system with the given attributes.
    ///
    /// Resolves the system's query configuration against the shared index,
    /// attaches reactive listeners, calls `init`, and inserts the system
    /// into the execution order. Registering the same system type twice logs
    /// a warning and is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EmptyQuery`] if any declared query has an empty
    /// inclusion set.
    pub fn register_system<S: System>(
        &mut self,
        mut system: S,
        attrs: SystemAttributes,
    ) -> Result<(), EcsError> {
        let type_id = TypeId::of::<S>();
        let config = system.config();
        if self.systems.contains(type_id) {
            tracing::warn!(system = %config.name, "system type already registered, ignoring");
            return Ok(());
        }

        let mut queries = SystemQueries::default();
        for spec in &config.queries {
            let qid = self.query(&spec.terms)?;
            let listener = if spec.listen.any() {
                let query = self.queries.get_mut(qid);
                if spec.listen.changed.is_some() {
                    query.reactive = true;
                }
                Some(query.events.add_listener(spec.listen.clone()))
            } else {
                None
            };
            queries.push(
                spec.name.clone(),
                QueryBinding {
                    query: qid,
                    listener,
                    mandatory: spec.mandatory,
                },
            );
        }

        system.init(self, &queries);
        let executes = system.executes();
        self.systems.insert(SystemSlot {
            system: Box::new(system),
            meta: SystemMeta {
                name: config.name,
                type_id,
                priority: attrs.priority,
                enabled: true,
                executes,
                queries,
                executions: 0,
                last_duration_ms: 0.0,
            },
        });
        Ok(())
    }

    /// Borrow a registered system by concrete type.
    pub fn get_system<S: System>(&self) -> Option<&S> {
        self.systems.get::<S>()
    }

    /// Display names of all registered systems, in registration order.
    pub fn system_names(&self) -> Vec<String> {
        self.systems.names()
    }

    /// Resume a stopped system. Returns `false` if the type is unknown.
    pub fn play_system<S: System>(&mut self) -> bool {
        self.systems.set_enabled(TypeId::of::<S>(), true)
    }

    /// Pause a system; it is skipped on subsequent ticks. Returns `false` if
    /// the type is unknown.
    pub fn stop_system<S: System>(&mut self) -> bool {
        self.systems.set_enabled(TypeId::of::<S>(), false)
    }

    // -- entity lifecycle ---------------------------------------------------

    /// Create an entity that is immediately visible to queries.
    pub fn create_entity(&mut self) -> EntityId {
        let entity = self.create_detached_entity();
        self.add_entity(entity)
    }

    /// Create an entity in the `Detached` state: it exists, carries a uuid,
    /// and accepts components, but no query sees it until
    /// [`add_entity`](Self::add_entity).
    pub fn create_detached_entity(&mut self) -> EntityId {
        let entity = self.entities.acquire();
        if let Some(slot) = self.entities.get(entity) {
            self.uuid_index.insert(slot.uuid, entity);
        }
        entity
    }

    /// Adopt a detached entity into the world, seeding it into every
    /// matching query. Adding an already-tracked entity logs a warning and
    /// returns it unchanged.
    pub fn add_entity(&mut self, entity: EntityId) -> EntityId {
        let Some(slot) = self.entities.get_mut(entity) else {
            tracing::warn!(entity = %entity, "add_entity: stale entity handle");
            return entity;
        };
        if slot.state != Lifecycle::Detached {
            tracing::warn!(entity = %entity, "add_entity: entity already tracked by the world");
            return entity;
        }
        slot.state = Lifecycle::Active;
        let types = slot.types.clone();
        for ty in types {
            if let Some(slot) = self.entities.get_mut(entity) {
                notify_added(&mut self.queries, slot, entity, ty);
            }
        }
        entity
    }

    /// Whether the handle refers to a live (non-dead) entity.
    pub fn is_alive(&self, entity: EntityId) -> bool {
        self.entities.get(entity).is_some()
    }

    /// The lifecycle state of an entity, if the handle is live.
    pub fn lifecycle(&self, entity: EntityId) -> Option<Lifecycle> {
        self.entities.get(entity).map(|s| s.state)
    }

    /// The stable uuid of an entity.
    pub fn uuid(&self, entity: EntityId) -> Option<EntityUuid> {
        self.entities.get(entity).map(|s| s.uuid)
    }

    /// Look up an entity by its uuid.
    pub fn entity_by_uuid(&self, uuid: &EntityUuid) -> Option<EntityId> {
        self.uuid_index.get(uuid).copied()
    }

    /// Number of entities tracked by the world (active plus removed ghosts).
    pub fn entity_count(&self) -> usize {
        self.entities.count_in(Lifecycle::Active) + self.entities.count_in(Lifecycle::Removed)
    }

    /// Handles of all active entities.
    pub fn active_entities(&self) -> Vec<EntityId> {
        self.entities.ids_in(Lifecycle::Active)
    }

    /// Dispose an entity.
    ///
    /// Immediate disposal tears the entity down in place; deferred disposal
    /// enqueues it for the end-of-tick drain. Either way, an entity whose
    /// system-state counter is non-zero persists as a ghost until the last
    /// system-state component is explicitly removed. Disposing an already
    /// removed or dead entity is a no-op.
    pub fn despawn(&mut self, entity: EntityId, immediate: bool) {
        let Some(slot) = self.entities.get_mut(entity) else {
            return;
        };
        if matches!(slot.state, Lifecycle::Removed | Lifecycle::Dead) {
            return;
        }
        slot.state = Lifecycle::Removed;
        if immediate {
            self.finalize_despawn(entity);
        } else {
            self.despawn_queue.push(entity);
        }
    }

    // -- components ---------------------------------------------------------

    /// Construct a loose instance of a registered type, from the type's pool
    /// when one exists.
    pub fn create_component(&mut self, ty: ComponentTypeId) -> Option<ComponentValue> {
        let info = self.registry.info(ty)?.clone();
        Some(match self.registry.pool_mut(ty) {
            Some(pool) => pool.acquire(&self.kinds),
            None => ComponentValue::from_defaults(info, &self.kinds),
        })
    }

    /// Attach a component to an entity.
    ///
    /// Silently idempotent if the type is already attached. The instance is
    /// populated from schema defaults, then every schema field present in
    /// `props` is copied in under its kind's semantics. Attaching to an
    /// active entity runs the query maintenance protocol; attaching an
    /// unregistered type logs a warning and is ignored.
    pub fn add_component(&mut self, entity: EntityId, ty: ComponentTypeId, props: Props) {
        let Some(info) = self.registry.info(ty).cloned() else {
            tracing::warn!(component = ?ty, "add_component: unknown component type, ignoring");
            return;
        };
        let Some(slot) = self.entities.get_mut(entity) else {
            tracing::warn!(entity = %entity, "add_component: stale entity handle, ignoring");
            return;
        };
        if slot.state == Lifecycle::Removed {
            tracing::warn!(
                entity = %entity,
                component = %info.name,
                "add_component: entity is scheduled for disposal, ignoring"
            );
            return;
        }
        if slot.components.contains_key(&ty) {
            return;
        }

        let mut value = match self.registry.pool_mut(ty) {
            Some(pool) => pool.acquire(&self.kinds),
            None => ComponentValue::from_defaults(Arc::clone(&info), &self.kinds),
        };
        if !props.is_empty() {
            value.apply_props(&props, &self.kinds);
        }

        slot.types.push(ty);
        slot.components.insert(ty, value);
        if info.system_state {
            slot.system_state_count += 1;
        }
        self.registry.live_inc(ty);

        if slot.state == Lifecycle::Active {
            notify_added(&mut self.queries, slot, entity, ty);
        }
    }

    /// Attach an already-constructed instance. Used by entity copy/clone.
    fn add_component_value(&mut self, entity: EntityId, value: ComponentValue) {
        let ty = value.type_id();
        let system_state = value.info().system_state;
        let Some(slot) = self.entities.get_mut(entity) else {
            dispose_instance(&mut self.registry, &self.kinds, value);
            return;
        };
        if slot.components.contains_key(&ty) {
            dispose_instance(&mut self.registry, &self.kinds, value);
            return;
        }
        slot.types.push(ty);
        slot.components.insert(ty, value);
        if system_state {
            slot.system_state_count += 1;
        }
        self.registry.live_inc(ty);
        if slot.state == Lifecycle::Active {
            notify_added(&mut self.queries, slot, entity, ty);
        }
    }

    /// Detach a component from an entity.
    ///
    /// On first detachment the type leaves the entity's composition and the
    /// query maintenance protocol runs; the instance is then either disposed
    /// (immediate) or parked in the pending-removal set until the end-of-tick
    /// drain. Returns `true` iff a detachment or a pending finalization
    /// occurred; removing an absent type is a silent no-op.
    pub fn remove_component(
        &mut self,
        entity: EntityId,
        ty: ComponentTypeId,
        immediate: bool,
    ) -> bool {
        let system_state = self
            .registry
            .info(ty)
            .map(|i| i.system_state)
            .unwrap_or(false);
        let Some(slot) = self.entities.get_mut(entity) else {
            return false;
        };

        if slot.components.contains_key(&ty) {
            if let Some(pos) = slot.types.iter().position(|&t| t == ty) {
                slot.types.remove(pos);
            }
            if slot.state == Lifecycle::Active {
                notify_removed(&mut self.queries, slot, entity, ty);
            }
            // Capture the instance before any further map mutation; disposal
            // always operates on this instance.
            let Some(instance) = slot.components.remove(&ty) else {
                return false;
            };
            // Deferred detachment only applies to active entities; a
            // detached or dying entity has no tick boundary to wait for.
            let defer = !immediate && slot.state == Lifecycle::Active;
            if defer {
                slot.pending.insert(ty, instance);
                slot.pending_types.push(ty);
                if !self.component_removal_queue.contains(&entity) {
                    self.component_removal_queue.push(entity);
                }
            } else {
                dispose_instance(&mut self.registry, &self.kinds, instance);
            }
            self.registry.live_dec(ty);

            let mut finalize = false;
            if system_state {
                slot.system_state_count -= 1;
                finalize = slot.system_state_count == 0 && slot.state != Lifecycle::Active;
            }
            if finalize {
                self.finalize_despawn(entity);
            }
            return true;
        }

        // Already detached this tick; finalize the parked instance.
        if immediate {
            if let Some(instance) = slot.pending.remove(&ty) {
                if let Some(pos) = slot.pending_types.iter().position(|&t| t == ty) {
                    slot.pending_types.remove(pos);
                }
                dispose_instance(&mut self.registry, &self.kinds, instance);
                return true;
            }
        }
        false
    }

    /// Detach every component currently attached, including system-state
    /// components (explicit removal is always allowed).
    pub fn remove_all_components(&mut self, entity: EntityId, immediate: bool) {
        let Some(slot) = self.entities.get(entity) else {
            return;
        };
        let types = slot.types.clone();
        for ty in types {
            self.remove_component(entity, ty, immediate);
        }
    }

    /// An immutable view of a live component.
    pub fn get_component(&self, entity: EntityId, ty: ComponentTypeId) -> Option<&ComponentValue> {
        self.entities.get(entity)?.components.get(&ty)
    }

    /// A mutable handle to a live component.
    ///
    /// Obtaining the handle on an active entity announces
    /// `COMPONENT_CHANGED` to every reactive query that requires the type.
    /// The handle is valid until the next structural change to the same
    /// entity; callers must not retain it across ticks.
    pub fn get_component_mut(
        &mut self,
        entity: EntityId,
        ty: ComponentTypeId,
    ) -> Option<&mut ComponentValue> {
        let slot = self.entities.get(entity)?;
        if slot.state == Lifecycle::Active && slot.components.contains_key(&ty) {
            let interested: Vec<QueryId> = slot.queries.clone();
            for qid in interested {
                let query = self.queries.get_mut(qid);
                if query.reactive && query.key.with.contains(&ty) {
                    query.events.component_changed(entity, ty);
                }
            }
        }
        self.entities.get_mut(entity)?.components.get_mut(&ty)
    }

    /// A component detached this tick and awaiting the end-of-tick drain.
    pub fn get_removed_component(
        &self,
        entity: EntityId,
        ty: ComponentTypeId,
    ) -> Option<&ComponentValue> {
        self.entities.get(entity)?.pending.get(&ty)
    }

    /// The entity's live component instances, in attachment order.
    pub fn components_of(&self, entity: EntityId) -> Vec<&ComponentValue> {
        match self.entities.get(entity) {
            Some(slot) => slot
                .types
                .iter()
                .filter_map(|t| slot.components.get(t))
                .collect(),
            None => Vec::new(),
        }
    }

    /// The entity's attached component types, in attachment order.
    pub fn component_types(&self, entity: EntityId) -> &[ComponentTypeId] {
        self.entities
            .get(entity)
            .map_or(NO_TYPES, |s| s.types.as_slice())
    }

    /// Whether the component type is currently attached.
    pub fn has_component(&self, entity: EntityId, ty: ComponentTypeId) -> bool {
        self.entities
            .get(entity)
            .is_some_and(|s| s.components.contains_key(&ty))
    }

    /// Whether the component type is parked in the pending-removal set.
    pub fn has_removed_component(&self, entity: EntityId, ty: ComponentTypeId) -> bool {
        self.entities
            .get(entity)
            .is_some_and(|s| s.pending.contains_key(&ty))
    }

    /// Whether every listed type is attached.
    pub fn has_all_components(&self, entity: EntityId, types: &[ComponentTypeId]) -> bool {
        types.iter().all(|&t| self.has_component(entity, t))
    }

    /// Whether any listed type is attached.
    pub fn has_any_components(&self, entity: EntityId, types: &[ComponentTypeId]) -> bool {
        types.iter().any(|&t| self.has_component(entity, t))
    }

    /// Copy every component of `source` onto `target`: shared types are
    /// overwritten under per-kind `copy`, missing types are attached as
    /// deep clones.
    pub fn copy_components(&mut self, target: EntityId, source: EntityId) {
        let Some(src) = self.entities.get(source) else {
            return;
        };
        let snapshot: Vec<ComponentValue> = src
            .types
            .iter()
            .filter_map(|t| src.components.get(t))
            .map(|c| c.clone_with(&self.kinds))
            .collect();
        for value in snapshot {
            let ty = value.type_id();
            if self.has_component(target, ty) {
                if let Some(slot) = self.entities.get_mut(target) {
                    if let Some(existing) = slot.components.get_mut(&ty) {
                        existing.copy_from(&value, &self.kinds);
                    }
                }
            } else {
                self.add_component_value(target, value);
            }
        }
    }

    /// Create a detached deep copy of an entity's components.
    pub fn clone_entity(&mut self, source: EntityId) -> Option<EntityId> {
        self.entities.get(source)?;
        let clone = self.create_detached_entity();
        self.copy_components(clone, source);
        Some(clone)
    }

    // -- queries ------------------------------------------------------------

    /// Resolve a term list to the shared query with the same canonical key,
    /// creating and silently seeding it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::EmptyQuery`] when the inclusion set is empty, or
    /// [`EcsError::UnknownComponent`] when a term references a type this
    /// world never registered.
    pub fn query(&mut self, terms: &[Term]) -> Result<QueryId, EcsError> {
        let key = QueryKey::from_terms(terms)?;
        for &ty in key.with().iter().chain(key.without()) {
            if self.registry.info(ty).is_none() {
                return Err(EcsError::UnknownComponent(ty));
            }
        }
        if let Some(id) = self.queries.lookup(&key) {
            return Ok(id);
        }
        let qid = self.queries.insert(Query::new(key));
        for entity in self.entities.ids_in(Lifecycle::Active) {
            let Some(slot) = self.entities.get_mut(entity) else {
                continue;
            };
            let query = self.queries.get_mut(qid);
            if query.matches(&slot.types) {
                query.entities.push(entity);
                slot.queries.push(qid);
            }
        }
        Ok(qid)
    }

    /// Current membership of a query, in insertion order.
    pub fn entities_in(&self, id: QueryId) -> &[EntityId] {
        self.queries.get(id).entities()
    }

    /// Read-only access to a query.
    pub fn query_info(&self, id: QueryId) -> &Query {
        self.queries.get(id)
    }

    /// The `added` bucket of a system's resolved query.
    pub fn query_added(&self, binding: &QueryBinding) -> &[EntityId] {
        match binding.listener {
            Some(listener) => self.queries.get(binding.query).events().added(listener),
            None => NO_ENTITIES,
        }
    }

    /// The `removed` bucket of a system's resolved query.
    pub fn query_removed(&self, binding: &QueryBinding) -> &[EntityId] {
        match binding.listener {
            Some(listener) => self.queries.get(binding.query).events().removed(listener),
            None => NO_ENTITIES,
        }
    }

    /// The `changed` bucket of a system's resolved query.
    pub fn query_changed(&self, binding: &QueryBinding) -> &[EntityId] {
        match binding.listener {
            Some(listener) => self.queries.get(binding.query).events().changed(listener),
            None => NO_ENTITIES,
        }
    }

    // -- tick loop ----------------------------------------------------------

    /// Step the world, deriving `delta` from the clock.
    pub fn execute(&mut self) {
        let time = self.clock.now();
        let delta = time - self.last_time;
        self.execute_with(delta, time);
    }

    /// Step the world with an explicit delta and time (milliseconds).
    ///
    /// Runs every enabled, executable system in ascending
    /// `(priority, registration order)`, skipping systems whose mandatory
    /// queries are empty; clears each system's reactive buckets after its
    /// own execute; then drains deferred despawns followed by deferred
    /// component removals. A stopped world returns without stepping.
    pub fn execute_with(&mut self, delta: f64, time: f64) {
        if !self.enabled {
            return;
        }
        self.last_time = time;

        for index in self.systems.execution_order() {
            let Some(mut slot) = self.systems.take(index) else {
                continue;
            };
            let can_run = slot.meta.enabled && self.mandatory_satisfied(&slot.meta.queries);
            if can_run {
                let started = self.clock.now();
                self.run_slot(&mut slot, delta, time);
                slot.meta.last_duration_ms = self.clock.now() - started;
                slot.meta.executions += 1;
                self.clear_buckets(&slot.meta.queries);
            }
            self.systems.restore(index, slot);
        }

        self.drain_despawn_queue();
        self.drain_component_removal_queue();
    }

    /// Force-run a single system, ignoring its enabled flag. No drains run.
    pub fn run_system<S: System>(&mut self, delta: f64, time: f64) {
        let Some(index) = self.systems.index_of(TypeId::of::<S>()) else {
            return;
        };
        let Some(mut slot) = self.systems.take(index) else {
            return;
        };
        let started = self.clock.now();
        self.run_slot(&mut slot, delta, time);
        slot.meta.last_duration_ms = self.clock.now() - started;
        slot.meta.executions += 1;
        self.clear_buckets(&slot.meta.queries);
        self.systems.restore(index, slot);
    }

    /// Run one system, catching panics at the system boundary so a failing
    /// system aborts its own execute without taking down the tick.
    fn run_slot(&mut self, slot: &mut SystemSlot, delta: f64, time: f64) {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let SystemSlot { system, meta } = slot;
            let run = SystemRun {
                delta,
                time,
                queries: &meta.queries,
            };
            system.execute(self, &run);
        }));
        if outcome.is_err() {
            tracing::error!(system = %slot.meta.name, "system panicked during execute; continuing tick");
        }
    }

    /// Stop the world: subsequent ticks skip execution and drains until
    /// [`play`](Self::play). Mutations are still accepted.
    pub fn stop(&mut self) {
        self.enabled = false;
    }

    /// Resume a stopped world.
    pub fn play(&mut self) {
        self.enabled = true;
    }

    /// Whether ticks currently execute.
    pub fn is_playing(&self) -> bool {
        self.enabled
    }

    /// A serializable snapshot of entity, component, query, and system
    /// counters.
    pub fn stats(&self) -> WorldStats {
        WorldStats {
            entities: EntityStats {
                active: self.entities.count_in(Lifecycle::Active),
                detached: self.entities.count_in(Lifecycle::Detached),
                removed: self.entities.count_in(Lifecycle::Removed),
                slots: self.entities.slot_count(),
                free: self.entities.free_count(),
            },
            components: self
                .registry
                .infos()
                .iter()
                .map(|info| ComponentTypeStats {
                    name: info.name.clone(),
                    live: self.registry.live_count(info.id),
                    pool: self.registry.pool(info.id).map(|p| p.stats()),
                })
                .collect(),
            queries: self
                .queries
                .iter()
                .map(|(_, q)| QueryStats {
                    key: self.describe_key(q.key()),
                    entities: q.entities().len(),
                    reactive: q.is_reactive(),
                    listeners: q.events().listener_count(),
                    events_fired: q.events().fired(),
                })
                .collect(),
            systems: self
                .systems
                .stats_with(|qid| self.describe_key(self.queries.get(qid).key())),
        }
    }

    // -- internals ----------------------------------------------------------

    fn mandatory_satisfied(&self, queries: &SystemQueries) -> bool {
        queries
            .iter()
            .filter(|(_, b)| b.mandatory)
            .all(|(_, b)| !self.queries.get(b.query).entities.is_empty())
    }

    fn clear_buckets(&mut self, queries: &SystemQueries) {
        for (_, binding) in queries.iter() {
            if let Some(listener) = binding.listener {
                self.queries.get_mut(binding.query).events.clear(listener);
            }
        }
    }

    /// Tear an entity down: leave every query (announcing the removal),
    /// dispose non-system-state components directly, flush the pending set,
    /// and release the slot unless system-state components keep the entity
    /// as a ghost.
    fn finalize_despawn(&mut self, entity: EntityId) {
        let Some(slot) = self.entities.get_mut(entity) else {
            return;
        };
        let query_refs = std::mem::take(&mut slot.queries);
        for qid in query_refs {
            let query = self.queries.get_mut(qid);
            if let Some(pos) = query.entities.iter().position(|&e| e == entity) {
                query.entities.remove(pos);
                query.events.entity_removed(entity);
            }
        }

        let Some(slot) = self.entities.get_mut(entity) else {
            return;
        };
        // The per-component query protocol must not run for a dying entity;
        // instances are disposed directly.
        let types = slot.types.clone();
        for ty in types {
            let keep = self
                .registry
                .info(ty)
                .map(|i| i.system_state)
                .unwrap_or(false);
            if keep {
                continue;
            }
            if let Some(pos) = slot.types.iter().position(|&t| t == ty) {
                slot.types.remove(pos);
            }
            if let Some(instance) = slot.components.remove(&ty) {
                self.registry.live_dec(ty);
                dispose_instance(&mut self.registry, &self.kinds, instance);
            }
        }

        while let Some(ty) = slot.pending_types.pop() {
            if let Some(instance) = slot.pending.remove(&ty) {
                dispose_instance(&mut self.registry, &self.kinds, instance);
            }
        }

        if slot.system_state_count == 0 {
            let uuid = slot.uuid;
            self.uuid_index.remove(&uuid);
            self.entities.release(entity);
        }
    }

    fn drain_despawn_queue(&mut self) {
        let queue = std::mem::take(&mut self.despawn_queue);
        for entity in queue {
            if self.entities.get(entity).is_some() {
                self.finalize_despawn(entity);
            }
        }
    }

    fn drain_component_removal_queue(&mut self) {
        let queue = std::mem::take(&mut self.component_removal_queue);
        for entity in queue {
            loop {
                let Some(ty) = self
                    .entities
                    .get_mut(entity)
                    .and_then(|slot| slot.pending_types.pop())
                else {
                    break;
                };
                self.remove_component(entity, ty, true);
            }
        }
    }

    fn describe_key(&self, key: &QueryKey) -> String {
        let mut parts: Vec<String> = key
            .with()
            .iter()
            .filter_map(|t| self.registry.info(*t).map(|i| i.name.clone()))
            .chain(
                key.without()
                    .iter()
                    .filter_map(|t| self.registry.info(*t).map(|i| format!("!{}", i.name))),
            )
            .collect();
        parts.sort();
        parts.join("-")
    }
}

// ---------------------------------------------------------------------------
// Query maintenance protocol
// ---------------------------------------------------------------------------

/// Incremental maintenance after component `ty` was attached to `entity`.
///
/// For every indexed query: an excluded type evicts the entity; a required
/// type admits it once the full predicate matches.
fn notify_added(
    queries: &mut QueryIndex,
    slot: &mut EntitySlot,
    entity: EntityId,
    ty: ComponentTypeId,
) {
    for (qid, query) in queries.iter_mut() {
        if query.key.without.contains(&ty) {
            if let Some(pos) = query.entities.iter().position(|&e| e == entity) {
                query.entities.remove(pos);
                query.events.entity_removed(entity);
                if let Some(back) = slot.queries.iter().position(|&q| q == qid) {
                    slot.queries.remove(back);
                }
            }
        } else if query.key.with.contains(&ty)
            && query.matches(&slot.types)
            && !query.entities.contains(&entity)
        {
            query.entities.push(entity);
            query.events.entity_added(entity);
            slot.queries.push(qid);
        }
    }
}

/// Incremental maintenance after component `ty` left `entity`'s composition.
///
/// For every indexed query: losing an excluded type may admit the entity;
/// losing a required type evicts it.
fn notify_removed(
    queries: &mut QueryIndex,
    slot: &mut EntitySlot,
    entity: EntityId,
    ty: ComponentTypeId,
) {
    for (qid, query) in queries.iter_mut() {
        if query.key.without.contains(&ty)
            && !query.entities.contains(&entity)
            && query.matches(&slot.types)
        {
            query.entities.push(entity);
            query.events.entity_added(entity);
            slot.queries.push(qid);
        } else if query.key.with.contains(&ty) && !query.matches(&slot.types) {
            if let Some(pos) = query.entities.iter().position(|&e| e == entity) {
                query.entities.remove(pos);
                query.events.entity_removed(entity);
                if let Some(back) = slot.queries.iter().position(|&q| q == qid) {
                    slot.queries.remove(back);
                }
            }
        }
    }
}

/// Return an instance to its type's pool, or drop it for unpooled types.
fn dispose_instance(
    registry: &mut ComponentRegistry,
    kinds: &KindRegistry,
    instance: ComponentValue,
) {
    let ty = instance.type_id();
    if let Some(pool) = registry.pool_mut(ty) {
        pool.release(instance, kinds);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Schema;

    fn setup() -> (World, ComponentTypeId, ComponentTypeId) {
        let mut world = World::new();
        let position = world.register_component(
            ComponentType::new("position").schema(Schema::new().number("x", 0.0).number("y", 0.0)),
        );
        let velocity = world.register_component(
            ComponentType::new("velocity")
                .schema(Schema::new().number("dx", 0.0).number("dy", 0.0)),
        );
        (world, position, velocity)
    }

    #[test]
    fn add_and_get_component() {
        let (mut world, position, _) = setup();
        let e = world.create_entity();
        world.add_component(e, position, Props::new().set("x", 2.0));
        let c = world.get_component(e, position).unwrap();
        assert_eq!(c.number("x"), Some(2.0));
        assert_eq!(c.number("y"), Some(0.0));
    }

    #[test]
    fn duplicate_attach_is_idempotent() {
        let (mut world, position, _) = setup();
        let e = world.create_entity();
        world.add_component(e, position, Props::new().set("x", 1.0));
        world.add_component(e, position, Props::new().set("x", 9.0));
        assert_eq!(world.get_component(e, position).unwrap().number("x"), Some(1.0));
        assert_eq!(world.component_types(e).len(), 1);
    }

    #[test]
    fn remove_absent_component_is_noop() {
        let (mut world, position, _) = setup();
        let e = world.create_entity();
        assert!(!world.remove_component(e, position, true));
    }

    #[test]
    fn query_membership_tracks_composition() {
        let (mut world, position, velocity) = setup();
        let q = world.query(&[position.into(), velocity.into()]).unwrap();

        let e = world.create_entity();
        world.add_component(e, position, Props::new());
        assert!(world.entities_in(q).is_empty());

        world.add_component(e, velocity, Props::new());
        assert_eq!(world.entities_in(q), &[e]);

        world.remove_component(e, velocity, true);
        assert!(world.entities_in(q).is_empty());
    }

    #[test]
    fn queries_are_shared_per_canonical_key() {
        let (mut world, position, velocity) = setup();
        let a = world.query(&[position.into(), velocity.into()]).unwrap();
        let b = world.query(&[velocity.into(), position.into()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn not_term_excludes_entities() {
        let (mut world, position, velocity) = setup();
        let q = world
            .query(&[position.into(), crate::query::not(velocity)])
            .unwrap();

        let plain = world.create_entity();
        world.add_component(plain, position, Props::new());
        let moving = world.create_entity();
        world.add_component(moving, position, Props::new());
        world.add_component(moving, velocity, Props::new());

        assert_eq!(world.entities_in(q), &[plain]);

        // Removing the excluded component admits the entity.
        world.remove_component(moving, velocity, true);
        assert_eq!(world.entities_in(q), &[plain, moving]);
    }

    #[test]
    fn detached_entities_are_invisible_until_added() {
        let (mut world, position, _) = setup();
        let q = world.query(&[position.into()]).unwrap();

        let e = world.create_detached_entity();
        world.add_component(e, position, Props::new());
        assert!(world.entities_in(q).is_empty());

        world.add_entity(e);
        assert_eq!(world.entities_in(q), &[e]);
    }

    #[test]
    fn deferred_removal_keeps_component_readable() {
        let (mut world, position, _) = setup();
        let e = world.create_entity();
        world.add_component(e, position, Props::new().set("x", 5.0));

        world.remove_component(e, position, false);
        assert!(!world.has_component(e, position));
        assert!(world.has_removed_component(e, position));
        assert_eq!(
            world.get_removed_component(e, position).unwrap().number("x"),
            Some(5.0)
        );

        world.execute_with(16.0, 16.0);
        assert!(!world.has_removed_component(e, position));
    }

    #[test]
    fn deferred_despawn_finalizes_on_drain() {
        let (mut world, position, _) = setup();
        let q = world.query(&[position.into()]).unwrap();
        let e = world.create_entity();
        world.add_component(e, position, Props::new());

        world.despawn(e, false);
        assert_eq!(world.lifecycle(e), Some(Lifecycle::Removed));
        assert_eq!(world.entities_in(q), &[e]);

        world.execute_with(16.0, 16.0);
        assert!(!world.is_alive(e));
        assert!(world.entities_in(q).is_empty());
    }

    #[test]
    fn immediate_despawn_releases_slot() {
        let (mut world, position, _) = setup();
        let e = world.create_entity();
        world.add_component(e, position, Props::new());
        let uuid = world.uuid(e).unwrap();

        world.despawn(e, true);
        assert!(!world.is_alive(e));
        assert!(world.entity_by_uuid(&uuid).is_none());
        assert!(world.get_component(e, position).is_none());
    }

    #[test]
    fn uuid_lookup_roundtrip() {
        let (mut world, _, _) = setup();
        let e = world.create_entity();
        let uuid = world.uuid(e).unwrap();
        assert_eq!(world.entity_by_uuid(&uuid), Some(e));
    }

    #[test]
    fn stopped_world_skips_drains() {
        let (mut world, position, _) = setup();
        let e = world.create_entity();
        world.add_component(e, position, Props::new());
        world.despawn(e, false);

        world.stop();
        world.execute_with(16.0, 16.0);
        assert!(world.is_alive(e), "stopped world must not drain");

        world.play();
        world.execute_with(16.0, 32.0);
        assert!(!world.is_alive(e));
    }

    #[test]
    fn clone_entity_is_detached_and_independent() {
        let (mut world, position, _) = setup();
        let q = world.query(&[position.into()]).unwrap();
        let e = world.create_entity();
        world.add_component(e, position, Props::new().set("x", 7.0));

        let twin = world.clone_entity(e).unwrap();
        assert_eq!(world.lifecycle(twin), Some(Lifecycle::Detached));
        assert_eq!(world.entities_in(q), &[e]);
        assert_eq!(
            world.get_component(twin, position).unwrap().number("x"),
            Some(7.0)
        );

        world
            .get_component_mut(twin, position)
            .unwrap()
            .set("x", 1.0);
        assert_eq!(world.get_component(e, position).unwrap().number("x"), Some(7.0));
    }

    #[test]
    fn pool_recycles_released_instances() {
        let (mut world, position, _) = setup();
        let e = world.create_entity();
        world.add_component(e, position, Props::new().set("x", 3.0));
        world.remove_component(e, position, true);

        // The recycled instance must come back reset to defaults.
        world.add_component(e, position, Props::new());
        assert_eq!(world.get_component(e, position).unwrap().number("x"), Some(0.0));

        let stats = world.stats();
        let pos_stats = &stats.components[0];
        let pool = pos_stats.pool.as_ref().unwrap();
        assert_eq!(pool.total, pool.used + pool.free);
    }

    #[test]
    fn world_created_hook_receives_version() {
        use std::cell::Cell;
        use std::rc::Rc;

        let seen = Rc::new(Cell::new(false));
        let flag = Rc::clone(&seen);
        let _world = World::builder()
            .on_created(move |world, version| {
                assert_eq!(version, crate::VERSION);
                assert_eq!(world.entity_count(), 0);
                flag.set(true);
            })
            .build();
        assert!(seen.get());
    }
}
