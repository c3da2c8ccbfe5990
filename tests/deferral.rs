use lattice_ecs::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Counter(u32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tag;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Payload(u64);

#[test]
fn actions_spawn_follow_up_entities_through_the_log() {
    let mut world = World::new();
    for i in 0..5u32 {
        world.spawn().add(Counter(i));
    }

    let stream = world.query::<(Read<Counter>,)>().compile().unwrap();
    stream.for_each(&world, |ctx, (c,): (&Counter,)| {
        let child = ctx.spawn();
        ctx.add_to(child, Payload(c.0 as u64));
    });

    assert_eq!(world.entity_count(), 10);
    let payloads = world.query::<(Read<Payload>,)>().compile().unwrap();
    let mut sum = 0;
    payloads.for_each(&world, |_ctx, (p,): (&Payload,)| sum += p.0);
    assert_eq!(sum, 0 + 1 + 2 + 3 + 4);
}

#[test]
fn action_driven_despawn_applies_after_the_runner() {
    let mut world = World::new();
    for i in 0..6u32 {
        world.spawn().add(Counter(i));
    }

    let stream = world.query::<(Read<Counter>,)>().compile().unwrap();
    let mut visited = 0;
    stream.for_each(&world, |ctx, (c,): (&Counter,)| {
        visited += 1;
        if c.0 % 2 == 0 {
            ctx.despawn();
        }
    });
    // Every entity was still visited; the despawns applied afterwards
    assert_eq!(visited, 6);
    assert_eq!(world.entity_count(), 3);
}

#[test]
fn despawn_collapse_drops_later_ops_against_the_entity() {
    let mut world = World::new();
    let e = world.spawn().id();
    let bystander = world.spawn().id();

    {
        let lock = world.lock();
        lock.add(e, Counter(1));
        lock.despawn(e);
        lock.add(e, Payload(2));
        lock.add(bystander, Payload(3));
    }

    assert!(!world.is_alive(e));
    assert!(world.is_alive(bystander));
    assert_eq!(world.get::<Payload>(bystander), Some(&Payload(3)));

    // No archetype retains the despawned entity under either component
    let counters = world.query::<(Read<Counter>,)>().compile().unwrap();
    assert_eq!(counters.count(&world), 0);
    let payloads = world.query::<(Read<Payload>,)>().compile().unwrap();
    assert_eq!(payloads.count(&world), 1);
}

#[test]
fn deferred_ops_on_one_entity_apply_in_submission_order() {
    let mut world = World::new();
    let e = world.spawn().id();

    {
        let lock = world.lock();
        lock.add(e, Counter(1));
        lock.add(e, Counter(2));
        lock.remove::<Counter>(e);
        lock.add(e, Counter(3));
    }
    assert_eq!(world.get::<Counter>(e), Some(&Counter(3)));
}

#[test]
fn provisional_spawn_accepts_ops_before_materialization() {
    let mut world = World::new();
    let (first, second);
    {
        let lock = world.lock();
        first = lock.spawn();
        second = lock.spawn();
        lock.add(first, Counter(10));
        lock.add(second, Counter(20));
        lock.add_relation(second, first, Payload(1));
        lock.despawn(first);
    }

    // first was spawned, received ops, and was despawned in the same drain
    assert!(!world.is_alive(first));
    assert!(world.is_alive(second));
    assert_eq!(world.get::<Counter>(second), Some(&Counter(20)));
    assert_eq!(
        world.get_relation::<Payload>(second, first),
        Some(&Payload(1))
    );
}

#[test]
fn reentrant_locks_defer_until_the_outermost_release() {
    let mut world = World::new();
    let e = world.spawn().id();

    let outer = world.lock();
    {
        let inner = world.lock();
        inner.add(e, Tag);
    }
    assert!(world.is_locked());
    assert!(!world.has::<Tag>(e));
    drop(outer);
    assert!(!world.is_locked());
    assert!(world.has::<Tag>(e));
}

#[test]
fn stale_deferred_ops_are_dropped_silently() {
    // Drops surface only in the trace log; keep it visible under --nocapture
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::level_filters::LevelFilter::TRACE)
        .with_test_writer()
        .try_init();

    let mut world = World::new();
    let e = world.spawn().id();
    world.despawn(e).unwrap();

    {
        let lock = world.lock();
        // e was already dead before the lock: the op fails at drain and is
        // dropped without surfacing anywhere
        lock.add(e, Counter(1));
        lock.despawn(e);
    }
    assert!(!world.is_alive(e));
    assert_eq!(world.entity_count(), 0);
}

#[test]
fn removes_issued_during_a_runner_take_effect_afterwards() {
    let mut world = World::new();
    for _ in 0..4 {
        world.spawn().add(Counter(0)).add(Tag);
    }

    let stream = world.query::<(Read<Counter>, Read<Tag>)>().compile().unwrap();
    assert_eq!(stream.count(&world), 4);
    stream.for_each(&world, |ctx, _: (&Counter, &Tag)| {
        ctx.remove::<Tag>();
    });

    assert_eq!(stream.count(&world), 0);
    let counters = world.query::<(Read<Counter>,)>().compile().unwrap();
    assert_eq!(counters.count(&world), 4);
}
