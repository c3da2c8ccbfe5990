use lattice_ecs::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Follows(f32);

#[derive(Debug, Clone, Copy, PartialEq)]
struct Name(&'static str);

#[derive(Debug, PartialEq)]
struct Settings {
    volume: u8,
}

#[test]
fn relation_wildcard_enumerates_all_targets() {
    let mut world = World::new();
    let alice = world.spawn().id();
    let bob = world.spawn().id();
    let carol = world.spawn().id();

    let fan = world.spawn().add(Name("fan")).id();
    world.add_relation(fan, alice, Follows(1.0)).unwrap();
    world.add_relation(fan, bob, Follows(0.5)).unwrap();
    world.add_relation(fan, carol, Follows(0.1)).unwrap();

    let stream = world.query::<(Rel<Follows>,)>().compile().unwrap();
    let mut weights = Vec::new();
    stream.for_each(&world, |ctx, (rel,): ((&Follows, EntityId),)| {
        assert_eq!(ctx.entity(), fan);
        weights.push((rel.1, rel.0 .0));
    });
    weights.sort_by(|a, b| a.1.total_cmp(&b.1));
    assert_eq!(weights, vec![(carol, 0.1), (bob, 0.5), (alice, 1.0)]);
}

#[test]
fn related_to_narrows_the_stream_to_one_target() {
    let mut world = World::new();
    let alice = world.spawn().id();
    let bob = world.spawn().id();

    for i in 0..4 {
        let e = world.spawn().add(Name("e")).id();
        world.add_relation(e, alice, Follows(i as f32)).unwrap();
        if i % 2 == 0 {
            world.add_relation(e, bob, Follows(-1.0)).unwrap();
        }
    }

    let all = world.query::<(Rel<Follows>,)>().compile().unwrap();
    assert_eq!(all.count(&world), 4);

    let to_bob = world
        .query::<(Rel<Follows>,)>()
        .related_to::<Follows>(bob)
        .compile()
        .unwrap();
    assert_eq!(to_bob.count(&world), 2);
    let mut seen = 0;
    to_bob.for_each(&world, |_ctx, (rel,): ((&Follows, EntityId),)| {
        assert_eq!(rel.1, bob);
        assert_eq!(rel.0, &Follows(-1.0));
        seen += 1;
    });
    assert_eq!(seen, 2);
}

#[test]
fn two_pinned_relation_slots_stream_their_targets_independently() {
    let mut world = World::new();
    let a = world.spawn().id();
    let b = world.spawn().id();
    let mut members = Vec::new();
    for i in 0..3 {
        let e = world.spawn().id();
        world.add_relation(e, a, Follows(i as f32)).unwrap();
        world.add_relation(e, b, Follows(10.0 + i as f32)).unwrap();
        members.push(e);
    }

    // Successive calls pin successive slots: slot 0 to a, slot 1 to b
    let stream = world
        .query::<(RelMut<Follows>, RelMut<Follows>)>()
        .related_to::<Follows>(a)
        .related_to::<Follows>(b)
        .compile()
        .unwrap();

    let mut invocations = 0;
    stream.for_each(
        &world,
        |_ctx, (to_a, to_b): ((&mut Follows, EntityId), (&mut Follows, EntityId))| {
            assert_eq!(to_a.1, a);
            assert_eq!(to_b.1, b);
            to_a.0 .0 += 100.0;
            to_b.0 .0 += 200.0;
            invocations += 1;
        },
    );
    // One column pairing per slot: no wildcard product
    assert_eq!(invocations, 3);

    for (i, &e) in members.iter().enumerate() {
        assert_eq!(
            world.get_relation::<Follows>(e, a),
            Some(&Follows(100.0 + i as f32))
        );
        assert_eq!(
            world.get_relation::<Follows>(e, b),
            Some(&Follows(210.0 + i as f32))
        );
    }
}

#[test]
fn blit_refuses_relation_selects() {
    let mut world = World::new();
    let hub = world.spawn().id();
    let e = world.spawn().id();
    world.add_relation(e, hub, Follows(1.0)).unwrap();

    // A mutable relation select is not a blit target
    let stream = world.query::<(RelMut<Follows>,)>().compile().unwrap();
    assert_eq!(
        stream.blit(&world, Follows(0.0)),
        Err(EcsError::ComponentNotFound)
    );
    assert_eq!(world.get_relation::<Follows>(e, hub), Some(&Follows(1.0)));
}

#[test]
fn relation_values_can_be_mutated_per_target() {
    let mut world = World::new();
    let hub = world.spawn().id();
    for i in 0..3 {
        let e = world.spawn().id();
        world.add_relation(e, hub, Follows(i as f32)).unwrap();
    }

    let stream = world
        .query::<(RelMut<Follows>,)>()
        .related_to::<Follows>(hub)
        .compile()
        .unwrap();
    stream.for_each(&world, |_ctx, (rel,): ((&mut Follows, EntityId),)| {
        rel.0 .0 *= 2.0;
    });

    let mut values = Vec::new();
    let probe = world.query::<(Rel<Follows>,)>().compile().unwrap();
    probe.for_each(&world, |_ctx, (rel,): ((&Follows, EntityId),)| {
        values.push(rel.0 .0);
    });
    values.sort_by(f32::total_cmp);
    assert_eq!(values, vec![0.0, 2.0, 4.0]);
}

#[test]
fn distinct_targets_mean_distinct_archetypes() {
    let mut world = World::new();
    let a = world.spawn().id();
    let b = world.spawn().id();

    let e1 = world.spawn().id();
    let e2 = world.spawn().id();
    world.add_relation(e1, a, Follows(1.0)).unwrap();
    world.add_relation(e2, b, Follows(1.0)).unwrap();

    // Same component type, different targets: different signatures
    assert_ne!(
        world.locate(e1).unwrap().archetype_id,
        world.locate(e2).unwrap().archetype_id
    );

    // But a wildcard query spans both
    let stream = world.query::<(Rel<Follows>,)>().compile().unwrap();
    assert_eq!(stream.count(&world), 2);
}

#[test]
fn object_links_stream_the_shared_value_per_row() {
    let mut world = World::new();
    let loud = world.register_object(Settings { volume: 11 });
    let quiet = world.register_object(Settings { volume: 2 });

    for _ in 0..3 {
        let e = world.spawn().add(Name("speaker")).id();
        world.add_object(e, loud).unwrap();
    }
    let e = world.spawn().add(Name("whisperer")).id();
    world.add_object(e, quiet).unwrap();

    let stream = world.query::<(Obj<Settings>,)>().compile().unwrap();
    let mut volumes = Vec::new();
    stream.for_each(&world, |_ctx, (settings,): (&Settings,)| {
        volumes.push(settings.volume);
    });
    volumes.sort_unstable();
    assert_eq!(volumes, vec![2, 11, 11, 11]);

    let only_loud = world
        .query::<(Obj<Settings>,)>()
        .object_is::<Settings>(loud)
        .compile()
        .unwrap();
    assert_eq!(only_loud.count(&world), 3);
}

#[test]
fn object_links_can_be_removed_again() {
    let mut world = World::new();
    let settings = world.register_object(Settings { volume: 7 });
    let e = world.spawn().add(Name("speaker")).id();
    world.add_object(e, settings).unwrap();
    assert!(world.has_pattern(e, &KeyPattern::object::<Settings>(settings)));

    let before = world.locate(e).unwrap().archetype_id;
    world.remove_object(e, settings).unwrap();
    assert!(!world.has_pattern(e, &KeyPattern::any_object::<Settings>()));
    assert_ne!(world.locate(e).unwrap().archetype_id, before);

    // The registered value itself outlives the link
    assert_eq!(world.object(settings), Some(&Settings { volume: 7 }));
}

#[test]
fn relations_survive_unrelated_structural_churn() {
    let mut world = World::new();
    let target = world.spawn().id();
    let e = world.spawn().id();
    world.add_relation(e, target, Follows(0.75)).unwrap();

    world.add(e, Name("wanderer")).unwrap();
    world.remove::<Name>(e).unwrap();

    assert_eq!(world.get_relation::<Follows>(e, target), Some(&Follows(0.75)));
    let rels: Vec<_> = world.relations::<Follows>(e).collect();
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].0, target);
}

#[test]
fn despawned_target_leaves_a_detectably_stale_relation() {
    let mut world = World::new();
    let target = world.spawn().id();
    let e = world.spawn().id();
    world.add_relation(e, target, Follows(1.0)).unwrap();
    world.despawn(target).unwrap();

    // The relation key persists; the target id is stale but detectable
    let stream = world.query::<(Rel<Follows>,)>().compile().unwrap();
    let mut seen = 0;
    stream.for_each(&world, |_ctx, (rel,): ((&Follows, EntityId),)| {
        assert!(!world.is_alive(rel.1));
        seen += 1;
    });
    assert_eq!(seen, 1);
}
