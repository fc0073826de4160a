//! End-to-end coverage of the registry's concurrency protocol with real
//! OS threads: lifecycle ordering, cross-thread marking, the
//! iteration/collection exclusion, refcount teardown, and torn-read
//! checks on the mutator cells.

use promise_registry::test_utils::init_test_logging;
use promise_registry::{
    location, Directory, PromiseId, Registration, State, ThreadRegistry, Waiter,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

fn ids(registry: &ThreadRegistry) -> Vec<PromiseId> {
    let mut out = Vec::new();
    registry.for_promise(|promise| out.push(promise.id()));
    out
}

#[test]
fn single_thread_lifecycle() {
    init_test_logging();
    let registry = ThreadRegistry::new();
    let a = PromiseId::next();
    let b = PromiseId::next();
    let c = PromiseId::next();
    let _key_a = registry.add(a, location!()).unwrap();
    let key_b = registry.add(b, location!()).unwrap();
    let _key_c = registry.add(c, location!()).unwrap();

    assert_eq!(ids(&registry), vec![c, b, a], "insertion is LIFO");

    registry.mark_for_deletion(key_b);
    assert_eq!(
        ids(&registry),
        vec![c, b, a],
        "marked records stay visible until collection"
    );

    registry.garbage_collect();
    assert_eq!(ids(&registry), vec![c, a]);
}

#[test]
fn cross_thread_mark_is_visible_everywhere() {
    init_test_logging();
    let registry = ThreadRegistry::new();
    // The directory's reference keeps the mark on thread U from being
    // the final decrement, which would collect the record right there.
    let dir = Directory::new();
    dir.register(&registry);
    let a = PromiseId::next();
    let key = registry.add(a, location!()).unwrap();

    std::thread::scope(|scope| {
        // Thread U marks; the record is not collected yet.
        scope
            .spawn(|| registry.mark_for_deletion(key))
            .join()
            .unwrap();

        // Thread V still sees the record, in state Deleted.
        scope
            .spawn(|| {
                let mut seen = Vec::new();
                registry.for_promise(|promise| seen.push((promise.id(), promise.state())));
                assert_eq!(seen, vec![(a, State::Deleted)]);
            })
            .join()
            .unwrap();
    });

    registry.garbage_collect();
    assert_eq!(ids(&registry), Vec::new());
    dir.unregister(&registry);
}

#[test]
fn collection_waits_for_iteration() {
    init_test_logging();
    let registry = ThreadRegistry::new();
    // Non-record reference: without it the mark below is the final
    // decrement and collects the record before the walker starts.
    registry.increment_ref();
    let key = registry.add(PromiseId::next(), location!()).unwrap();
    registry.mark_for_deletion(key);

    let walker_done = AtomicBool::new(false);
    let (entered_tx, entered_rx) = mpsc::channel();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            registry.for_promise(|promise| {
                // Still observable while the walk holds the sweep lock.
                assert_eq!(promise.state(), State::Deleted);
                entered_tx.send(()).unwrap();
                std::thread::sleep(Duration::from_millis(100));
                walker_done.store(true, Ordering::SeqCst);
            });
        });

        entered_rx.recv().unwrap();
        // The owner's collection pass must block until the walk is done.
        registry.garbage_collect();
        assert!(
            walker_done.load(Ordering::SeqCst),
            "garbage collection overtook a live iteration"
        );
    });

    assert_eq!(registry.live_count(), 0);
    assert_eq!(registry.occupied_slots(), 0);
    registry.decrement_ref();
}

#[test]
fn refcount_teardown_collects_remaining_records() {
    init_test_logging();
    let dir = Directory::new();

    // Owner thread builds the registry, publishes it, inserts three
    // records, then exits.
    let (registry, keys) = std::thread::spawn(move || {
        let registry = ThreadRegistry::new();
        let keys = (0..3)
            .map(|_| registry.add(PromiseId::next(), location!()).unwrap())
            .collect::<Vec<_>>();
        (registry, keys)
    })
    .join()
    .unwrap();
    dir.register(&registry);

    // The inspector withdraws the registry; records outlive the thread.
    dir.unregister(&registry);
    assert_eq!(registry.live_count(), 3);

    // Marks from a foreign thread; the last one runs the terminal
    // collection pass right there.
    std::thread::spawn(move || {
        for key in keys {
            registry.mark_for_deletion(key);
        }
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.occupied_slots(), 0);
    })
    .join()
    .unwrap();
}

#[test]
fn waiter_writes_race_without_tearing() {
    init_test_logging();
    let handle = Registration::new(location!());
    let async_target = PromiseId::next();
    let sync_target = promise_registry::current_thread_id();
    let registry = promise_registry::current_thread_registry();
    let stop = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                handle.set_async_waiter(async_target);
            }
        });
        scope.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                handle.set_sync_waiter(sync_target);
            }
        });

        for _ in 0..1000 {
            let mut waiter = None;
            registry.for_promise(|promise| {
                if promise.id() == handle.id() {
                    waiter = Some(promise.snapshot().waiter);
                }
            });
            match waiter.expect("registered promise not visible") {
                Waiter::None => {} // before the first store lands
                Waiter::Async(id) => assert_eq!(id, async_target, "torn waiter"),
                Waiter::Sync(id) => assert_eq!(id, sync_target, "torn waiter"),
            }
        }
        stop.store(true, Ordering::Relaxed);
    });
}

#[test]
fn line_updates_race_without_tearing() {
    init_test_logging();
    let location = location!();
    let registered_line = location.line;
    let handle = Registration::new(location);
    let registry = promise_registry::current_thread_registry();
    let stop = AtomicBool::new(false);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            while !stop.load(Ordering::Relaxed) {
                for line in [10, 20, 30] {
                    handle.update_line(line);
                }
            }
        });

        for _ in 0..1000 {
            let mut line = None;
            registry.for_promise(|promise| {
                if promise.id() == handle.id() {
                    line = Some(promise.snapshot().source_location.line);
                }
            });
            let line = line.expect("registered promise not visible");
            assert!(
                [10, 20, 30, registered_line].contains(&line),
                "torn line value: {line}"
            );
        }
        stop.store(true, Ordering::Relaxed);
    });
}

#[test]
fn repeated_collection_is_a_no_op() {
    init_test_logging();
    let registry = ThreadRegistry::new();
    let key = registry.add(PromiseId::next(), location!()).unwrap();
    registry.mark_for_deletion(key);
    registry.garbage_collect();
    let after_first = ids(&registry);
    registry.garbage_collect();
    registry.garbage_collect();
    assert_eq!(ids(&registry), after_first);
}

#[test]
fn iteration_is_repeatable() {
    init_test_logging();
    let registry = ThreadRegistry::new();
    for _ in 0..5 {
        let _ = registry.add(PromiseId::next(), location!()).unwrap();
    }
    assert_eq!(ids(&registry), ids(&registry));
}

#[test]
#[should_panic(expected = "owning thread")]
fn non_owner_collection_with_live_references_is_fatal() {
    let registry = ThreadRegistry::new();
    // A live reference unit; the registry is not in teardown.
    registry.increment_ref();
    std::thread::scope(|scope| {
        scope.spawn(|| registry.garbage_collect());
    });
}

#[test]
fn many_promises_across_collection_cycles() {
    init_test_logging();
    let registry = ThreadRegistry::new();
    for round in 0..10 {
        let keys = (0..100)
            .map(|_| registry.add(PromiseId::next(), location!()).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(registry.live_count(), 100, "round {round}");
        for key in keys {
            registry.mark_for_deletion(key);
        }
        registry.garbage_collect();
        assert_eq!(registry.live_count(), 0, "round {round}");
        assert_eq!(registry.occupied_slots(), 0, "round {round}");
    }
}
