//! End-to-end runs of the local scheduler

use parking_lot::Mutex;
use spindle_core::{scheduler, Fiber, FiberState, Scheduler};
use spindle_runtime::LocalScheduler;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_all_fibers_complete() {
    let runtime = LocalScheduler::new("complete");
    let counter = Arc::new(AtomicUsize::new(0));

    let fibers: Vec<_> = (0..10)
        .map(|_| {
            let c = counter.clone();
            runtime.spawn(move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    runtime.run();

    assert_eq!(counter.load(Ordering::SeqCst), 10);
    assert!(fibers.iter().all(|f| f.state() == FiberState::Term));
    let stats = runtime.stats();
    assert_eq!(stats.fibers_spawned, 10);
    assert_eq!(stats.fibers_completed, 10);
    assert_eq!(stats.switches, 10);
}

#[test]
fn test_yield_to_ready_round_robin() {
    let runtime = LocalScheduler::new("round-robin");
    let order = Arc::new(Mutex::new(Vec::new()));

    for name in ["a", "b", "c"] {
        let order = order.clone();
        runtime.spawn(move || {
            for step in 0..3 {
                order.lock().push(format!("{}{}", name, step));
                if step < 2 {
                    Fiber::yield_to_ready();
                }
            }
        });
    }

    runtime.run();

    assert_eq!(
        *order.lock(),
        vec!["a0", "b0", "c0", "a1", "b1", "c1", "a2", "b2", "c2"]
    );
    assert_eq!(runtime.stats().switches, 9);
}

#[test]
fn test_panic_is_contained() {
    let runtime = LocalScheduler::new("panics");
    let survived = Arc::new(AtomicUsize::new(0));

    let bad = runtime.spawn(|| panic!("callback failed"));
    let s = survived.clone();
    let good = runtime.spawn(move || {
        s.fetch_add(1, Ordering::SeqCst);
    });

    runtime.run();

    assert_eq!(bad.state(), FiberState::Except);
    let failure = bad.failure().unwrap();
    assert_eq!(failure.fiber_id, bad.id());
    assert_eq!(failure.message, "callback failed");

    assert_eq!(good.state(), FiberState::Term);
    assert_eq!(survived.load(Ordering::SeqCst), 1);

    let stats = runtime.stats();
    assert_eq!(stats.fibers_failed, 1);
    assert_eq!(stats.fibers_completed, 1);
}

#[test]
fn test_run_in_driver_fiber() {
    let runtime = LocalScheduler::new("driver");
    let seen = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let seen = seen.clone();
        runtime.spawn(move || {
            let driver = scheduler::scheduling_fiber();
            seen.lock().push((driver.is_root(), driver.uses_caller_entry()));
            Fiber::yield_to_ready();
            assert!(Arc::ptr_eq(&driver, &scheduler::scheduling_fiber()));
        });
    }

    runtime.run_in_fiber();

    assert_eq!(*seen.lock(), vec![(false, true); 3]);
    assert_eq!(runtime.stats().fibers_completed, 3);
    assert!(Fiber::current().is_root());
    assert!(scheduler::current().is_none());
    assert!(scheduler::scheduling_fiber().is_root());
}

#[test]
fn test_spawn_from_inside_fiber() {
    let runtime = LocalScheduler::new("nested");
    let order = Arc::new(Mutex::new(Vec::new()));

    let spawner = runtime.clone();
    let o = order.clone();
    runtime.spawn(move || {
        o.lock().push("parent");
        let o = o.clone();
        spawner.spawn(move || o.lock().push("child"));
    });

    runtime.run();

    assert_eq!(*order.lock(), vec!["parent", "child"]);
    assert_eq!(runtime.stats().fibers_spawned, 2);
}

#[test]
fn test_ambient_scheduler_inside_fiber() {
    let runtime = LocalScheduler::new("ambient");
    let rescheduled = Arc::new(AtomicUsize::new(0));

    let r = rescheduled.clone();
    let fiber = runtime.spawn(move || {
        // Park, then ask the ambient scheduler to resume us.
        if r.fetch_add(1, Ordering::SeqCst) == 0 {
            scheduler::current().unwrap().schedule(Fiber::current());
            Fiber::yield_to_hold();
        }
    });

    runtime.run();

    assert_eq!(fiber.state(), FiberState::Term);
    assert_eq!(rescheduled.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.stats().switches, 2);
}

#[test]
fn test_held_fiber_resumes_on_next_run() {
    let runtime = LocalScheduler::new("held");
    let parked = Arc::new(Mutex::new(None));

    let p = parked.clone();
    let fiber = runtime.spawn(move || {
        *p.lock() = Some(Fiber::current_id().unwrap());
        Fiber::yield_to_hold();
    });

    runtime.run();
    assert_eq!(fiber.state(), FiberState::Hold);
    assert_eq!(*parked.lock(), Some(fiber.id()));
    assert_eq!(runtime.pending(), 0);

    runtime.schedule(fiber.clone());
    runtime.run();
    assert_eq!(fiber.state(), FiberState::Term);
}
