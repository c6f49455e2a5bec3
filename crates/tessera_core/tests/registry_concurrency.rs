//! Multi-threaded registry tests: handle/id bijection under churn.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;

use tessera_core::{
    BridgeError, ComponentArena, DVec3, EntitySlotRegistry, EntitySnapshot, Registered, SlotState,
};

const THREADS: usize = 8;

fn snapshot(id: i32) -> EntitySnapshot {
    EntitySnapshot::at(DVec3::new(f64::from(id), 0.0, 0.0), 0.0, 0.0)
}

/// Every active slot maps to exactly one id and back.
fn assert_bijection(registry: &EntitySlotRegistry, arena: &ComponentArena) {
    let mut slots = Vec::new();
    registry.active_slots(&mut slots);
    assert_eq!(slots.len(), registry.active_count());

    let mut ids = HashSet::new();
    for &slot in &slots {
        let slot = slot as usize;
        let id = registry.external_id(slot);
        assert!(ids.insert(id), "id {id} bound to two slots");
        assert_eq!(arena.external_id(slot), id);
        let handle = registry.lookup(id).expect("active id is indexed");
        assert_eq!(handle.slot(), slot);
        assert!(registry.is_current(handle));
    }
}

#[test]
fn test_disjoint_registration_fills_exactly_to_capacity() {
    let arena = ComponentArena::new(256).unwrap();
    let registry = EntitySlotRegistry::new(256, 64, 8);
    let created = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let (arena, registry, created, rejected) = (&arena, &registry, &created, &rejected);
            scope.spawn(move || {
                for i in 0..100 {
                    let id = i32::try_from(t * 1_000 + i).unwrap();
                    match registry.register(arena, id, &snapshot(id)) {
                        Ok(Registered::Created(_)) => {
                            created.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(BridgeError::CapacityExhausted { capacity: 256 }) => {
                            rejected.fetch_add(1, Ordering::Relaxed);
                        }
                        other => panic!("unexpected registration result {other:?}"),
                    }
                }
            });
        }
    });

    assert_eq!(created.load(Ordering::Relaxed), 256);
    assert_eq!(rejected.load(Ordering::Relaxed), THREADS * 100 - 256);
    assert_eq!(registry.active_count(), 256);
    assert_bijection(&registry, &arena);
}

#[test]
fn test_racing_registrations_of_one_id_agree_on_the_slot() {
    for _ in 0..20 {
        let arena = ComponentArena::new(64).unwrap();
        let registry = EntitySlotRegistry::new(64, 16, 64);
        let barrier = Barrier::new(THREADS);

        let handles: Vec<_> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    let (arena, registry, barrier) = (&arena, &registry, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        registry.register(arena, 42, &snapshot(42))
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        let mut created = 0;
        let mut distinct = HashSet::new();
        for result in handles {
            match result {
                Ok(Registered::Created(handle)) => {
                    created += 1;
                    distinct.insert(handle);
                }
                Ok(Registered::Existing(handle)) => {
                    distinct.insert(handle);
                }
                Err(BridgeError::Contention { .. }) => {}
                Err(err) => panic!("unexpected error {err}"),
            }
        }

        assert!(created <= 1);
        assert_eq!(distinct.len(), 1);
        assert_eq!(registry.active_count(), 1);
        assert_bijection(&registry, &arena);
    }
}

#[test]
fn test_register_unregister_storm_keeps_index_consistent() {
    let arena = ComponentArena::new(128).unwrap();
    let registry = EntitySlotRegistry::new(128, 64, 32);

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let (arena, registry) = (&arena, &registry);
            scope.spawn(move || {
                // Overlapping id ranges so threads fight over the same ids.
                let base = i32::try_from(t % 4).unwrap() * 16;
                for round in 0..2_000 {
                    let id = base + (round % 48);
                    if round % 3 == 2 {
                        if let Some(handle) = registry.lookup(id) {
                            registry.unregister(arena, handle, |_| {});
                        }
                    } else {
                        match registry.register(arena, id, &snapshot(id)) {
                            Ok(_)
                            | Err(
                                BridgeError::Contention { .. }
                                | BridgeError::CapacityExhausted { .. },
                            ) => {}
                            Err(err) => panic!("unexpected error {err}"),
                        }
                    }
                }
            });
        }
    });

    assert_bijection(&registry, &arena);
    let active: usize = (0..128)
        .filter(|&slot| registry.state(slot) == SlotState::Active)
        .count();
    assert_eq!(active, registry.active_count());
    assert!((0..128).all(|slot| matches!(
        registry.state(slot),
        SlotState::Active | SlotState::Free
    )));
}

#[test]
fn test_stale_handles_never_unregister_a_reused_slot() {
    let arena = ComponentArena::new(1).unwrap();
    let registry = EntitySlotRegistry::new(1, 4, 8);

    let Registered::Created(first) = registry.register(&arena, 1, &snapshot(1)).unwrap() else {
        panic!("expected a fresh slot");
    };
    assert!(registry.unregister(&arena, first, |_| {}));
    let Registered::Created(second) = registry.register(&arena, 2, &snapshot(2)).unwrap() else {
        panic!("expected a fresh slot");
    };
    assert_eq!(first.index(), second.index());

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            let (arena, registry) = (&arena, &registry);
            scope.spawn(move || assert!(!registry.unregister(arena, first, |_| {})));
        }
    });

    assert!(registry.is_current(second));
    assert_eq!(registry.lookup(2), Some(second));
    assert_eq!(registry.lookup(1), None);
}

#[test]
fn test_stale_unregister_never_blocks_the_live_handle() {
    for _ in 0..200 {
        let arena = ComponentArena::new(1).unwrap();
        let registry = EntitySlotRegistry::new(1, 4, 8);
        let first = registry.register(&arena, 1, &snapshot(1)).unwrap().handle();
        assert!(registry.unregister(&arena, first, |_| {}));
        let second = registry.register(&arena, 2, &snapshot(2)).unwrap().handle();
        assert_eq!(first.index(), second.index());
        let barrier = Barrier::new(THREADS);

        let removed = std::thread::scope(|scope| {
            for _ in 0..THREADS - 1 {
                let (arena, registry, barrier) = (&arena, &registry, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    for _ in 0..64 {
                        assert!(!registry.unregister(arena, first, |_| {}));
                    }
                });
            }
            let (arena, registry, barrier) = (&arena, &registry, &barrier);
            let live = scope.spawn(move || {
                barrier.wait();
                registry.unregister(arena, second, |_| {})
            });
            live.join().unwrap()
        });

        assert!(removed, "live handle lost its unregistration to a stale one");
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.lookup(2), None);
        assert_eq!(registry.state(0), SlotState::Free);
    }
}
