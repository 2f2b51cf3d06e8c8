//! Cross-thread behavior of the defer runtime.
//!
//! Every thread owns its continuation stack, frames, and break slot; these
//! tests run the ordering scenarios concurrently and check that no thread
//! ever observes another thread's actions.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Barrier};
use std::thread;

use grapnel_runtime::defer::{self, scope, Flow};

/// Run the LIFO + nesting + break scenarios once, tagging every observation
/// with `salt` so cross-thread leakage would be visible.
fn run_scenarios(salt: usize) {
    // LIFO within one scope.
    let observed = Rc::new(RefCell::new(Vec::new()));
    let out = scope(|s| {
        for i in 0..8 {
            let observed = Rc::clone(&observed);
            s.defer(move || observed.borrow_mut().push(salt + i));
        }
        Flow::Done(())
    });
    assert!(out.is_done());
    let expected: Vec<usize> = (0..8).rev().map(|i| salt + i).collect();
    assert_eq!(*observed.borrow(), expected);

    // Nesting: inner records unwind before outer records.
    let observed = Rc::new(RefCell::new(Vec::new()));
    let out = scope(|outer| {
        let log = Rc::clone(&observed);
        outer.defer(move || log.borrow_mut().push(salt + 100));
        let inner = scope(|inner| {
            for i in [101, 102] {
                let log = Rc::clone(&observed);
                inner.defer(move || log.borrow_mut().push(salt + i));
            }
            Flow::Done(())
        });
        assert!(inner.is_done());
        Flow::Done(())
    });
    assert!(out.is_done());
    assert_eq!(*observed.borrow(), [salt + 102, salt + 101, salt + 100]);

    // Break: unwind through the inner frame, skip its tail, resume after
    // the outer scope.
    let observed = Rc::new(RefCell::new(Vec::new()));
    let out: Flow<Option<()>> = scope(|outer| {
        let target = outer.frame();
        let log = Rc::clone(&observed);
        outer.defer(move || log.borrow_mut().push(salt + 200));
        let inner = scope(|inner| {
            let log = Rc::clone(&observed);
            inner.defer(move || log.borrow_mut().push(salt + 201));
            if salt < usize::MAX {
                return inner.break_to(target);
            }
            observed.borrow_mut().push(salt + 202);
            Flow::Done(())
        });
        match inner {
            Flow::Break(t) => Flow::Break(t),
            Flow::Done(_) => unreachable!("break must propagate"),
        }
    });
    assert!(matches!(out, Flow::Done(None)));
    assert_eq!(*observed.borrow(), [salt + 201, salt + 200]);
    assert!(!defer::break_pending());
    assert_eq!(defer::depth(), 0);
}

#[test]
fn concurrent_threads_keep_their_own_ordering() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 32;

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Force every thread through first-touch initialization at
                // the same moment.
                barrier.wait();
                for round in 0..ROUNDS {
                    run_scenarios(t * 1_000_000 + round * 1_000);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn each_thread_starts_with_an_empty_stack() {
    let handles: Vec<_> = (0..4)
        .map(|_| {
            thread::spawn(|| {
                assert_eq!(defer::depth(), 0);
                let out = scope(|s| {
                    s.defer(|| {});
                    Flow::Done(())
                });
                assert!(out.is_done());
                assert_eq!(defer::depth(), 0);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
