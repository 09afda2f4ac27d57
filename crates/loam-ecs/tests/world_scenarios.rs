//! End-to-end scenarios exercising the world façade: lifecycle, query
//! seeding, reactive buckets, system-state ghosts, and execution order.

use loam_ecs::prelude::*;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A reactive system that snapshots its buckets on every run.
struct BucketLog {
    terms: Vec<Term>,
    listen: Listen,
    /// One `(added, removed, changed)` snapshot per execution.
    ticks: Vec<(Vec<EntityId>, Vec<EntityId>, Vec<EntityId>)>,
}

impl BucketLog {
    fn new(terms: Vec<Term>, listen: Listen) -> Self {
        Self {
            terms,
            listen,
            ticks: Vec::new(),
        }
    }
}

impl System for BucketLog {
    fn config(&self) -> SystemConfig {
        let mut spec = QuerySpec::new("watched", self.terms.clone());
        if self.listen.added {
            spec = spec.listen_added();
        }
        if self.listen.removed {
            spec = spec.listen_removed();
        }
        if let Some(filter) = &self.listen.changed {
            spec = spec.listen_changed(filter.clone());
        }
        SystemConfig::new("bucket-log").query(spec)
    }

    fn execute(&mut self, world: &mut World, run: &SystemRun<'_>) {
        let binding = *run.queries.get("watched").unwrap();
        self.ticks.push((
            world.query_added(&binding).to_vec(),
            world.query_removed(&binding).to_vec(),
            world.query_changed(&binding).to_vec(),
        ));
    }
}

// ---------------------------------------------------------------------------
// 1. Lifecycle
// ---------------------------------------------------------------------------

#[test]
fn lifecycle_attach_read_detach() {
    let mut world = World::new();
    let pos = world.register_component(
        ComponentType::new("pos").schema(Schema::new().number("x", 0.0).number("y", 0.0)),
    );

    let e = world.create_entity();
    world.add_component(e, pos, Props::new());
    assert!(world.has_component(e, pos));
    assert_eq!(world.get_component(e, pos).unwrap().number("x"), Some(0.0));

    world.remove_component(e, pos, true);
    assert!(!world.has_component(e, pos));
}

// ---------------------------------------------------------------------------
// 2. Query seeding
// ---------------------------------------------------------------------------

#[test]
fn queries_seed_from_existing_entities() {
    let mut world = World::new();
    let a = world.register_component(ComponentType::tag("a"));
    let b = world.register_component(ComponentType::tag("b"));

    let e1 = world.create_entity();
    world.add_component(e1, a, Props::new());
    let e2 = world.create_entity();
    world.add_component(e2, a, Props::new());
    world.add_component(e2, b, Props::new());
    let e3 = world.create_entity();
    world.add_component(e3, b, Props::new());

    let q_a = world.query(&[a.into()]).unwrap();
    let q_a_not_b = world.query(&[a.into(), not(b)]).unwrap();
    let q_b = world.query(&[b.into()]).unwrap();

    assert_eq!(world.entities_in(q_a), &[e1, e2]);
    assert_eq!(world.entities_in(q_a_not_b), &[e1]);
    assert_eq!(world.entities_in(q_b), &[e2, e3]);
}

// ---------------------------------------------------------------------------
// 3. Reactive added/removed
// ---------------------------------------------------------------------------

#[test]
fn reactive_added_then_removed_across_ticks() {
    let mut world = World::new();
    let a = world.register_component(ComponentType::tag("a"));
    world
        .register_system(
            BucketLog::new(
                vec![a.into()],
                Listen {
                    added: true,
                    removed: true,
                    changed: None,
                },
            ),
            SystemAttributes::default(),
        )
        .unwrap();

    let e1 = world.create_entity();
    world.add_component(e1, a, Props::new());
    world.execute_with(1.0, 1.0);

    world.remove_component(e1, a, false);
    world.execute_with(1.0, 2.0);

    let log = world.get_system::<BucketLog>().unwrap();
    let (added_t1, removed_t1, _) = &log.ticks[0];
    assert_eq!(added_t1, &vec![e1]);
    assert!(removed_t1.is_empty());

    // Buckets were cleared after the first run.
    let (added_t2, removed_t2, _) = &log.ticks[1];
    assert!(added_t2.is_empty());
    assert_eq!(removed_t2, &vec![e1]);
}

// ---------------------------------------------------------------------------
// 4. Changed filter
// ---------------------------------------------------------------------------

#[test]
fn changed_bucket_filters_by_component_type() {
    let mut world = World::new();
    let a = world.register_component(
        ComponentType::new("a").schema(Schema::new().number("v", 0.0)),
    );
    let b = world.register_component(
        ComponentType::new("b").schema(Schema::new().number("v", 0.0)),
    );
    world
        .register_system(
            BucketLog::new(
                vec![a.into(), b.into()],
                Listen {
                    added: false,
                    removed: false,
                    changed: Some(ChangedFilter::Types(vec![a])),
                },
            ),
            SystemAttributes::default(),
        )
        .unwrap();

    let e2 = world.create_entity();
    world.add_component(e2, a, Props::new());
    world.add_component(e2, b, Props::new());

    // Mutating only the unfiltered component leaves the bucket empty.
    world.get_component_mut(e2, b).unwrap().set("v", 1.0);
    world.execute_with(1.0, 1.0);

    // Mutating the filtered component fills it.
    world.get_component_mut(e2, a).unwrap().set("v", 1.0);
    world.execute_with(1.0, 2.0);

    // Two mutations in one tick still record the entity once.
    world.get_component_mut(e2, a).unwrap().set("v", 2.0);
    world.get_component_mut(e2, a).unwrap().set("v", 3.0);
    world.execute_with(1.0, 3.0);

    let log = world.get_system::<BucketLog>().unwrap();
    assert!(log.ticks[0].2.is_empty());
    assert_eq!(log.ticks[1].2, vec![e2]);
    assert_eq!(log.ticks[2].2, vec![e2]);
}

// ---------------------------------------------------------------------------
// 5. System-state ghost
// ---------------------------------------------------------------------------

#[test]
fn system_state_component_blocks_final_disposal() {
    let mut world = World::new();
    let a = world.register_component(ComponentType::tag("a"));
    let state = world.register_component(ComponentType::tag("state").system_state());

    let e1 = world.create_entity();
    world.add_component(e1, state, Props::new());
    world.add_component(e1, a, Props::new());
    let uuid = world.uuid(e1).unwrap();

    world.despawn(e1, false);
    world.execute_with(1.0, 1.0);

    // Ghost: still addressable, normal components gone, state kept.
    assert!(world.is_alive(e1));
    assert_eq!(world.lifecycle(e1), Some(Lifecycle::Removed));
    assert_eq!(world.entity_by_uuid(&uuid), Some(e1));
    assert!(!world.has_component(e1, a));
    assert!(world.has_component(e1, state));

    // Removing the last system-state component completes disposal.
    world.remove_component(e1, state, true);
    assert!(!world.is_alive(e1));
    assert!(world.entity_by_uuid(&uuid).is_none());
}

// ---------------------------------------------------------------------------
// 6. Priority order
// ---------------------------------------------------------------------------

mod priority {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub struct S1 {
        pub log: Rc<RefCell<Vec<&'static str>>>,
    }
    pub struct S2 {
        pub log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl System for S1 {
        fn config(&self) -> SystemConfig {
            SystemConfig::new("s1")
        }
        fn execute(&mut self, _world: &mut World, _run: &SystemRun<'_>) {
            self.log.borrow_mut().push("s1");
        }
    }

    impl System for S2 {
        fn config(&self) -> SystemConfig {
            SystemConfig::new("s2")
        }
        fn execute(&mut self, _world: &mut World, _run: &SystemRun<'_>) {
            self.log.borrow_mut().push("s2");
        }
    }

    fn run_with_priorities(p1: i32, p2: i32) -> Vec<&'static str> {
        let mut world = World::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        world
            .register_system(
                S1 {
                    log: Rc::clone(&log),
                },
                SystemAttributes::priority(p1),
            )
            .unwrap();
        world
            .register_system(
                S2 {
                    log: Rc::clone(&log),
                },
                SystemAttributes::priority(p2),
            )
            .unwrap();
        world.execute_with(1.0, 1.0);
        let result = log.borrow().clone();
        result
    }

    #[test]
    fn lower_priority_number_runs_first() {
        assert_eq!(run_with_priorities(10, 1), vec!["s2", "s1"]);
    }

    #[test]
    fn swapping_priorities_reverses_order() {
        assert_eq!(run_with_priorities(1, 10), vec!["s1", "s2"]);
    }
}

// ---------------------------------------------------------------------------
// P1. Query idempotence
// ---------------------------------------------------------------------------

#[test]
fn equivalent_term_lists_share_one_query() {
    let mut world = World::new();
    let a = world.register_component(ComponentType::tag("a"));
    let b = world.register_component(ComponentType::tag("b"));
    let c = world.register_component(ComponentType::tag("c"));

    let q1 = world.query(&[a.into(), b.into(), not(c)]).unwrap();
    let q2 = world.query(&[not(c), b.into(), a.into()]).unwrap();
    let q3 = world.query(&[b.into(), a.into(), b.into(), not(c)]).unwrap();
    assert_eq!(q1, q2);
    assert_eq!(q1, q3);
}

// ---------------------------------------------------------------------------
// P2. Pool conservation
// ---------------------------------------------------------------------------

#[test]
fn pool_counters_conserve_across_churn() {
    let mut world = World::new();
    let pos = world.register_component(
        ComponentType::new("pos").schema(Schema::new().number("x", 0.0)),
    );

    let mut entities = Vec::new();
    for _ in 0..20 {
        let e = world.create_entity();
        world.add_component(e, pos, Props::new());
        entities.push(e);
    }
    let check = |world: &World| {
        let stats = world.stats();
        let pool = stats.components[0].pool.as_ref().unwrap().clone();
        assert_eq!(pool.total, pool.used + pool.free);
        pool
    };
    check(&world);

    for &e in &entities[..10] {
        world.remove_component(e, pos, true);
    }
    let after_release = check(&world);
    assert!(after_release.free >= 10);

    // release(acquire()) is identity on the pool's counters.
    let before = check(&world);
    let e = world.create_entity();
    world.add_component(e, pos, Props::new());
    world.remove_component(e, pos, true);
    let after = check(&world);
    assert_eq!(before, after);
}

// ---------------------------------------------------------------------------
// P3. Round-trip clone
// ---------------------------------------------------------------------------

#[test]
fn cloned_entities_match_and_diverge_independently() {
    let mut world = World::new();
    let blob = world.register_component(
        ComponentType::new("blob").schema(
            Schema::new()
                .number("n", 1.0)
                .text("label", "spawn")
                .array("items")
                .json("doc"),
        ),
    );

    let e = world.create_entity();
    world.add_component(
        e,
        blob,
        Props::new()
            .set("n", 4.5)
            .set("label", "original")
            .set("items", vec![Value::Number(1.0), Value::Number(2.0)])
            .set("doc", serde_json::json!({"k": [1, 2, 3]})),
    );

    let twin = world.clone_entity(e).unwrap();
    {
        let a = world.get_component(e, blob).unwrap();
        let b = world.get_component(twin, blob).unwrap();
        assert_eq!(a.get("n"), b.get("n"));
        assert_eq!(a.get("label"), b.get("label"));
        assert_eq!(a.get("items"), b.get("items"));
        assert_eq!(a.get("doc"), b.get("doc"));
    }

    world.get_component_mut(twin, blob).unwrap().set("n", 9.0);
    assert_eq!(world.get_component(e, blob).unwrap().number("n"), Some(4.5));
}

// ---------------------------------------------------------------------------
// P4. Not-predicate complement
// ---------------------------------------------------------------------------

#[test]
fn with_and_without_partition_active_entities() {
    let mut world = World::new();
    let base = world.register_component(ComponentType::tag("base"));
    let c = world.register_component(ComponentType::tag("c"));

    let mut all = Vec::new();
    for i in 0..10 {
        let e = world.create_entity();
        world.add_component(e, base, Props::new());
        if i % 3 == 0 {
            world.add_component(e, c, Props::new());
        }
        all.push(e);
    }

    let with_c = world.query(&[base.into(), c.into()]).unwrap();
    let without_c = world.query(&[base.into(), not(c)]).unwrap();

    let mut partition: Vec<EntityId> = world
        .entities_in(with_c)
        .iter()
        .chain(world.entities_in(without_c))
        .copied()
        .collect();
    partition.sort_by_key(|e| e.index());
    all.sort_by_key(|e| e.index());
    assert_eq!(partition, all);

    // No entity sits in both halves.
    for e in world.entities_in(with_c) {
        assert!(!world.entities_in(without_c).contains(e));
    }
}

// ---------------------------------------------------------------------------
// P5. Deferred vs immediate equivalence
// ---------------------------------------------------------------------------

#[test]
fn deferred_and_immediate_disposal_agree_after_drain() {
    fn membership(immediate: bool) -> Vec<usize> {
        let mut world = World::new();
        let a = world.register_component(ComponentType::tag("a"));
        let q = world.query(&[a.into()]).unwrap();

        let mut entities = Vec::new();
        for _ in 0..6 {
            let e = world.create_entity();
            world.add_component(e, a, Props::new());
            entities.push(e);
        }
        world.despawn(entities[1], immediate);
        world.despawn(entities[4], immediate);
        world.execute_with(1.0, 1.0);

        world
            .entities_in(q)
            .iter()
            .map(|e| entities.iter().position(|x| x == e).unwrap())
            .collect()
    }

    assert_eq!(membership(false), membership(true));
}

// ---------------------------------------------------------------------------
// P6. Reactive dedup
// ---------------------------------------------------------------------------

#[test]
fn buckets_record_each_entity_at_most_once_per_tick() {
    let mut world = World::new();
    let a = world.register_component(ComponentType::tag("a"));
    world
        .register_system(
            BucketLog::new(
                vec![a.into()],
                Listen {
                    added: true,
                    removed: true,
                    changed: None,
                },
            ),
            SystemAttributes::default(),
        )
        .unwrap();

    let e = world.create_entity();
    // Join, leave, and re-join the query within a single tick.
    world.add_component(e, a, Props::new());
    world.remove_component(e, a, true);
    world.add_component(e, a, Props::new());
    world.execute_with(1.0, 1.0);

    let log = world.get_system::<BucketLog>().unwrap();
    let (added, removed, _) = &log.ticks[0];
    assert_eq!(added, &vec![e]);
    assert_eq!(removed, &vec![e]);
}
