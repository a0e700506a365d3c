//! Process-wide live fiber count
//!
//! Kept in its own test binary so no other test creates fibers concurrently.

use spindle_core::{Fiber, FiberState};
use std::thread;

#[test]
fn test_total_fibers_tracks_creation_and_destruction() {
    // Materialize the root fiber first so it is part of the baseline.
    let root = Fiber::current();
    assert!(root.is_root());
    let baseline = Fiber::total_fibers();

    let fibers: Vec<_> = (0..8).map(|_| Fiber::new(|| {})).collect();
    assert_eq!(Fiber::total_fibers(), baseline + 8);

    for fiber in &fibers[..4] {
        fiber.swap_in();
        assert_eq!(fiber.state(), FiberState::Term);
    }
    // Finished fibers stay alive while someone holds them.
    assert_eq!(Fiber::total_fibers(), baseline + 8);

    drop(fibers);
    assert_eq!(Fiber::total_fibers(), baseline);

    // A panicking callback leaves its fiber alive and counted.
    let failed = Fiber::new(|| panic!("contained"));
    assert_eq!(Fiber::total_fibers(), baseline + 1);
    failed.swap_in();
    assert_eq!(failed.state(), FiberState::Except);
    assert_eq!(Fiber::total_fibers(), baseline + 1);
    drop(failed);
    assert_eq!(Fiber::total_fibers(), baseline);

    // A new thread gets its own root fiber, released when the thread exits.
    thread::spawn(move || {
        let _ = Fiber::current();
        assert_eq!(Fiber::total_fibers(), baseline + 1);
    })
    .join()
    .unwrap();
    assert_eq!(Fiber::total_fibers(), baseline);
}
