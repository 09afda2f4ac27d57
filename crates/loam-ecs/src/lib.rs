//! Loam ECS -- a reactive entity-component-system runtime with schema-driven
//! components, pooled storage, and incrementally maintained queries.
//!
//! Entities carry plain-data components described by runtime schemas; systems
//! iterate entities matching declarative queries on each tick of the world
//! clock. Queries are maintained incrementally as components attach and
//! detach (including negative predicates), and reactive systems receive
//! per-tick `added` / `removed` / `changed` buckets. Structural changes can
//! be deferred to the end of the tick, and component instances recycle
//! through per-type pools.
//!
//! # Quick Start
//!
//! ```
//! use loam_ecs::prelude::*;
//!
//! let mut world = World::new();
//! let position = world.register_component(
//!     ComponentType::new("position").schema(Schema::new().number("x", 0.0).number("y", 0.0)),
//! );
//! let frozen = world.register_component(ComponentType::tag("frozen"));
//!
//! let e = world.create_entity();
//! world.add_component(e, position, Props::new().set("x", 1.0));
//!
//! let movable = world.query(&[position.into(), not(frozen)]).unwrap();
//! assert_eq!(world.entities_in(movable), &[e]);
//! assert_eq!(world.get_component(e, position).unwrap().number("x"), Some(1.0));
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity;
pub mod event;
pub mod pool;
pub mod query;
pub mod system;
pub mod world;

/// The crate version reported to `world-created` listeners.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by structural misuse of the runtime.
///
/// Lifecycle and registration misuse (duplicate registrations, stale entity
/// handles, re-attached components) is recovered locally with a warning so
/// the tick can continue; only structurally invalid arguments surface here.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// A query's inclusion set was empty.
    #[error("query requires at least one included component type")]
    EmptyQuery,

    /// A term referenced a component type the registry does not know.
    #[error("component type {0:?} is not registered")]
    UnknownComponent(component::ComponentTypeId),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{
        ComponentType, ComponentTypeId, ComponentValue, KindId, Props, Schema, Value,
    };
    pub use crate::entity::{EntityId, EntityUuid, Lifecycle};
    pub use crate::event::{ChangedFilter, Listen};
    pub use crate::query::{not, QueryId, Term};
    pub use crate::system::{
        QueryBinding, QuerySpec, System, SystemAttributes, SystemConfig, SystemQueries, SystemRun,
    };
    pub use crate::world::{Clock, MonotonicClock, World, WorldBuilder};
    pub use crate::EcsError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
