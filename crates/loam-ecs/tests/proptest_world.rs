//! Property tests for the world: random operation sequences must keep the
//! query index consistent with entity composition, and pool counters must
//! conserve.

use loam_ecs::prelude::*;
use proptest::prelude::*;

/// Operations the generator may perform on the world.
#[derive(Debug, Clone)]
enum WorldOp {
    Create,
    CreateDetached,
    AddA(usize),
    AddB(usize),
    RemoveA { index: usize, immediate: bool },
    RemoveB { index: usize, immediate: bool },
    MutateA(usize),
    Despawn { index: usize, immediate: bool },
    Tick,
}

fn op_strategy() -> impl Strategy<Value = WorldOp> {
    prop_oneof![
        3 => Just(WorldOp::Create),
        1 => Just(WorldOp::CreateDetached),
        3 => (0..64usize).prop_map(WorldOp::AddA),
        3 => (0..64usize).prop_map(WorldOp::AddB),
        2 => (0..64usize, proptest::bool::ANY)
            .prop_map(|(index, immediate)| WorldOp::RemoveA { index, immediate }),
        2 => (0..64usize, proptest::bool::ANY)
            .prop_map(|(index, immediate)| WorldOp::RemoveB { index, immediate }),
        1 => (0..64usize).prop_map(WorldOp::MutateA),
        2 => (0..64usize, proptest::bool::ANY)
            .prop_map(|(index, immediate)| WorldOp::Despawn { index, immediate }),
        2 => Just(WorldOp::Tick),
    ]
}

struct Fixture {
    world: World,
    a: ComponentTypeId,
    b: ComponentTypeId,
    q_a: QueryId,
    q_b: QueryId,
    q_a_not_b: QueryId,
}

impl Fixture {
    fn new() -> Self {
        let mut world = World::new();
        let a = world
            .register_component(ComponentType::new("a").schema(Schema::new().number("v", 0.0)));
        let b = world.register_component(ComponentType::tag("b"));
        let q_a = world.query(&[a.into()]).unwrap();
        let q_b = world.query(&[b.into()]).unwrap();
        let q_a_not_b = world.query(&[a.into(), not(b)]).unwrap();
        Self {
            world,
            a,
            b,
            q_a,
            q_b,
            q_a_not_b,
        }
    }

    /// Membership of every query must equal the predicate recomputed from
    /// scratch over the active entity list, and memberships must be
    /// duplicate-free.
    ///
    /// Mid-tick, an entity scheduled for deferred disposal may legitimately
    /// linger in query memberships; only at a tick boundary must every
    /// member be active.
    fn assert_queries_consistent(&self, at_tick_boundary: bool) {
        let world = &self.world;
        let active = world.active_entities();
        let cases = [
            (self.q_a, vec![self.a], vec![]),
            (self.q_b, vec![self.b], vec![]),
            (self.q_a_not_b, vec![self.a], vec![self.b]),
        ];
        for (query, with, without) in &cases {
            let members = world.entities_in(*query);
            for &e in &active {
                let expected = with.iter().all(|&t| world.has_component(e, t))
                    && !without.iter().any(|&t| world.has_component(e, t));
                assert_eq!(
                    members.contains(&e),
                    expected,
                    "query membership diverged from composition for {e:?}"
                );
            }
            let mut seen = Vec::new();
            for &e in members {
                if at_tick_boundary {
                    assert!(active.contains(&e), "query holds non-active entity {e:?}");
                } else {
                    assert!(
                        matches!(
                            world.lifecycle(e),
                            Some(Lifecycle::Active | Lifecycle::Removed)
                        ),
                        "query holds dead or detached entity {e:?}"
                    );
                }
                assert!(!seen.contains(&e), "query holds duplicate entity {e:?}");
                seen.push(e);
            }
        }
    }

    fn assert_pools_conserve(&self) {
        for stats in self.world.stats().components {
            if let Some(pool) = stats.pool {
                assert_eq!(pool.total, pool.used + pool.free);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn random_ops_keep_queries_consistent(
        ops in prop::collection::vec(op_strategy(), 1..80),
    ) {
        let mut fx = Fixture::new();
        let mut handles: Vec<EntityId> = Vec::new();
        let mut tick: u32 = 0;

        for op in ops {
            match op {
                WorldOp::Create => handles.push(fx.world.create_entity()),
                WorldOp::CreateDetached => handles.push(fx.world.create_detached_entity()),
                WorldOp::AddA(i) => {
                    if let Some(&e) = pick(&handles, i) {
                        fx.world.add_component(e, fx.a, Props::new().set("v", i as f64));
                    }
                }
                WorldOp::AddB(i) => {
                    if let Some(&e) = pick(&handles, i) {
                        fx.world.add_component(e, fx.b, Props::new());
                    }
                }
                WorldOp::RemoveA { index, immediate } => {
                    if let Some(&e) = pick(&handles, index) {
                        fx.world.remove_component(e, fx.a, immediate);
                    }
                }
                WorldOp::RemoveB { index, immediate } => {
                    if let Some(&e) = pick(&handles, index) {
                        fx.world.remove_component(e, fx.b, immediate);
                    }
                }
                WorldOp::MutateA(i) => {
                    if let Some(&e) = pick(&handles, i) {
                        if let Some(c) = fx.world.get_component_mut(e, fx.a) {
                            c.set("v", -1.0);
                        }
                    }
                }
                WorldOp::Despawn { index, immediate } => {
                    if let Some(&e) = pick(&handles, index) {
                        fx.world.despawn(e, immediate);
                    }
                }
                WorldOp::Tick => {
                    tick += 1;
                    fx.world.execute_with(16.0, f64::from(tick) * 16.0);
                    fx.assert_queries_consistent(true);
                }
            }

            // Active-entity consistency holds at every observable point, not
            // just tick boundaries.
            fx.assert_queries_consistent(false);
            fx.assert_pools_conserve();
        }

        // Finish with a drain so deferred work also lands consistently.
        tick += 1;
        fx.world.execute_with(16.0, f64::from(tick) * 16.0);
        fx.assert_queries_consistent(true);
        fx.assert_pools_conserve();
    }

    /// Deferred and immediate removal converge to the same final membership.
    #[test]
    fn deferred_matches_immediate_membership(
        removals in prop::collection::vec((0..12usize, proptest::bool::ANY), 1..12),
    ) {
        fn run(removals: &[(usize, bool)], force_immediate: bool) -> Vec<u32> {
            let mut fx = Fixture::new();
            let mut entities = Vec::new();
            for _ in 0..12 {
                let e = fx.world.create_entity();
                fx.world.add_component(e, fx.a, Props::new());
                fx.world.add_component(e, fx.b, Props::new());
                entities.push(e);
            }
            for &(index, immediate) in removals {
                let immediate = force_immediate || immediate;
                fx.world.remove_component(entities[index], fx.a, immediate);
            }
            fx.world.execute_with(16.0, 16.0);
            fx.world.entities_in(fx.q_a).iter().map(|e| e.index()).collect()
        }

        prop_assert_eq!(run(&removals, false), run(&removals, true));
    }
}

fn pick<T>(items: &[T], index: usize) -> Option<&T> {
    if items.is_empty() {
        None
    } else {
        items.get(index % items.len())
    }
}
