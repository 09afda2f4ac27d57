//! Per-type recycling pools for component instances.
//!
//! Every pooled component type owns a [`ComponentPool`] holding a *base
//! prototype* (the instance produced by schema defaults) and a free list.
//! Acquire pops a reset instance; release copies the prototype back over the
//! instance before returning it to the free list, so acquired items always
//! start from defaults. When the free list runs dry the pool expands by
//! `ceil(0.2 * total) + 1`.
//!
//! Pools are not thread-safe; the world is single-threaded by contract.

use serde::Serialize;

use crate::component::{ComponentValue, KindRegistry};

// ---------------------------------------------------------------------------
// PoolStats
// ---------------------------------------------------------------------------

/// Conservation counters for one pool: `total == used + free` at every
/// observable point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Instances ever created by this pool.
    pub total: usize,
    /// Instances currently held by entities.
    pub used: usize,
    /// Instances sitting on the free list.
    pub free: usize,
}

// ---------------------------------------------------------------------------
// ComponentPool
// ---------------------------------------------------------------------------

/// Free-list recycler for component instances of a single type.
#[derive(Debug)]
pub struct ComponentPool {
    prototype: ComponentValue,
    free: Vec<ComponentValue>,
    total: usize,
}

impl ComponentPool {
    /// A pool whose base prototype is the given defaults-populated instance.
    pub(crate) fn new(prototype: ComponentValue) -> Self {
        Self {
            prototype,
            free: Vec::new(),
            total: 0,
        }
    }

    /// Pop an instance whose fields equal the base prototype, expanding the
    /// pool if the free list is empty. Amortized O(1).
    pub(crate) fn acquire(&mut self, kinds: &KindRegistry) -> ComponentValue {
        if self.free.is_empty() {
            self.expand(kinds);
        }
        // expand() guarantees at least one free instance.
        self.free.pop().expect("pool expansion produced no items")
    }

    /// Copy the base prototype over `instance`, then return it to the free
    /// list.
    pub(crate) fn release(&mut self, mut instance: ComponentValue, kinds: &KindRegistry) {
        instance.copy_from(&self.prototype, kinds);
        self.free.push(instance);
    }

    /// Grow the free list by `ceil(0.2 * total) + 1`.
    fn expand(&mut self, kinds: &KindRegistry) {
        let grow = (self.total + 4) / 5 + 1;
        for _ in 0..grow {
            self.free.push(self.prototype.clone_with(kinds));
        }
        self.total += grow;
    }

    /// Conservation counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.total,
            used: self.total - self.free.len(),
            free: self.free.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
