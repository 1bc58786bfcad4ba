use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use coop_sync::execute::Inline;
use coop_sync::queue::{OverflowStrategy, QueueOptions};
use coop_sync::sync::{Grant, Lock};
use futures::executor::LocalPool;
use futures_timer::Delay;

#[test]
fn fifo_execution_order() {
    let mut pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    let order = Rc::new(RefCell::new(Vec::new()));
    for i in 0..4 {
        let order = order.clone();
        let observer = lock.clone();
        lock.enter(move |grant| {
            assert!(observer.is_locked());
            order.borrow_mut().push(i);
            grant.leave().unwrap();
        });
    }

    pool.run_until_stalled();
    assert_eq!(*order.borrow(), [0, 1, 2, 3]);
    assert!(!lock.is_locked());
    assert_eq!(lock.queue_size(), 0);
}

#[test]
fn queue_size_excludes_the_holder() {
    let pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    for _ in 0..4 {
        lock.enter(|_grant| {});
    }

    // One token was admitted on the spot, three are waiting.
    assert!(lock.is_locked());
    assert_eq!(lock.queue_size(), 3);
}

#[test]
fn callbacks_are_deferred_by_default() {
    let mut pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    lock.enter(move |grant| {
        flag.set(true);
        grant.leave().unwrap();
    });

    // Held immediately, but the callback waits for the next pool turn.
    assert!(lock.is_locked());
    assert!(!ran.get());

    pool.run_until_stalled();
    assert!(ran.get());
    assert!(!lock.is_locked());
}

#[test]
fn inline_strategy_runs_within_enter() {
    let pool = LocalPool::new();
    let lock = Lock::builder(pool.spawner())
        .executor(Rc::new(Inline))
        .build();

    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    lock.enter(move |grant| {
        flag.set(true);
        grant.leave().unwrap();
    });

    assert!(ran.get());
    assert!(!lock.is_locked());
}

#[test]
fn overflow_reject_incoming_cancels_the_newcomer() {
    let mut pool = LocalPool::new();
    let lock = Lock::builder(pool.spawner()).max_queue_size(3).build();

    let ran = Rc::new(RefCell::new(Vec::new()));
    let _holder = lock.enter(|_grant| {});

    let queued: Vec<_> = ["a", "b", "c"]
        .iter()
        .map(|name| {
            let ran = ran.clone();
            lock.enter(move |grant| {
                ran.borrow_mut().push(*name);
                grant.leave().unwrap();
            })
        })
        .collect();

    let ran_d = ran.clone();
    let d = lock.enter(move |grant| {
        ran_d.borrow_mut().push("d");
        grant.leave().unwrap();
    });

    assert!(d.is_canceled());
    assert_eq!(lock.queue_size(), 3);
    assert!(queued.iter().all(|token| !token.is_canceled()));

    // The holder never leaves, so nothing may run — least of all "d".
    pool.run_until_stalled();
    assert!(ran.borrow().is_empty());
}

#[test]
fn overflow_drop_oldest_evicts_the_head() {
    let mut pool = LocalPool::new();
    let lock = Lock::builder(pool.spawner())
        .max_queue_size(3)
        .overflow_strategy(OverflowStrategy::DropOldest)
        .build();

    let parked: Rc<RefCell<Option<Grant>>> = Rc::new(RefCell::new(None));
    let slot = parked.clone();
    lock.enter(move |grant| {
        *slot.borrow_mut() = Some(grant);
    });
    pool.run_until_stalled();

    let order = Rc::new(RefCell::new(Vec::new()));
    let tokens: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|name| {
            let order = order.clone();
            lock.enter(move |grant| {
                order.borrow_mut().push(*name);
                grant.leave().unwrap();
            })
        })
        .collect();

    assert!(tokens[0].is_canceled());
    assert_eq!(lock.queue_size(), 3);

    parked.borrow_mut().take().unwrap().leave().unwrap();
    pool.run_until_stalled();
    assert_eq!(*order.borrow(), ["b", "c", "d"]);
}

#[test]
fn overflow_drop_newest_evicts_the_tail() {
    let mut pool = LocalPool::new();
    let lock = Lock::builder(pool.spawner())
        .max_queue_size(3)
        .overflow_strategy(OverflowStrategy::DropNewest)
        .build();

    let parked: Rc<RefCell<Option<Grant>>> = Rc::new(RefCell::new(None));
    let slot = parked.clone();
    lock.enter(move |grant| {
        *slot.borrow_mut() = Some(grant);
    });
    pool.run_until_stalled();

    let order = Rc::new(RefCell::new(Vec::new()));
    let tokens: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|name| {
            let order = order.clone();
            lock.enter(move |grant| {
                order.borrow_mut().push(*name);
                grant.leave().unwrap();
            })
        })
        .collect();

    assert!(tokens[2].is_canceled());
    assert!(!tokens[3].is_canceled());

    parked.borrow_mut().take().unwrap().leave().unwrap();
    pool.run_until_stalled();
    assert_eq!(*order.borrow(), ["a", "b", "d"]);
}

#[test]
fn zero_queue_capacity_rejects_every_waiter() {
    let pool = LocalPool::new();
    let lock = Lock::builder(pool.spawner())
        .max_queue_size(0)
        .overflow_strategy(OverflowStrategy::DropOldest)
        .build();

    let _holder = lock.enter(|_grant| {});
    let waiter = lock.enter(|_grant| {});

    assert!(waiter.is_canceled());
    assert_eq!(lock.queue_size(), 0);
}

#[test]
fn leave_with_foreign_token_is_an_error() {
    let pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    let holder = lock.enter(|_grant| {});
    let foreign = lock.enter(|_grant| {});

    assert!(lock.leave(&foreign).is_err());
    // The failed release left everything as it was.
    assert!(lock.is_locked());
    assert_eq!(lock.queue_size(), 1);

    lock.leave(&holder).unwrap();
}

#[test]
fn leave_on_a_free_lock_is_an_error() {
    let pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());
    let other = Lock::new(pool.spawner());

    let stray = other.enter(|_grant| {});
    assert!(lock.leave(&stray).is_err());
    assert!(!lock.is_locked());
}

#[test]
fn leave_accepts_the_holder_token_from_outside() {
    let mut pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    let holder = lock.enter(|_grant| {});
    pool.run_until_stalled();
    assert!(lock.is_locked());

    lock.leave(&holder).unwrap();
    assert!(!lock.is_locked());

    // A second release with the same token no longer names the holder.
    assert!(lock.leave(&holder).is_err());
}

#[test]
fn leave_aborting_cancels_every_waiter() {
    let mut pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    let ran = Rc::new(RefCell::new(Vec::new()));
    let ran_holder = ran.clone();
    let holder = lock.enter(move |_grant| {
        ran_holder.borrow_mut().push("holder");
    });

    let queued: Vec<_> = (0..3)
        .map(|_| {
            let ran = ran.clone();
            lock.enter(move |grant| {
                ran.borrow_mut().push("waiter");
                grant.leave().unwrap();
            })
        })
        .collect();

    lock.leave_aborting(&holder).unwrap();
    assert!(!lock.is_locked());
    assert_eq!(lock.queue_size(), 0);
    assert!(queued.iter().all(|token| token.is_canceled()));

    // The holder was admitted before the abort, so its callback still runs;
    // the aborted waiters never do.
    pool.run_until_stalled();
    assert_eq!(*ran.borrow(), ["holder"]);
}

#[test]
fn timeout_cancels_a_queued_token() {
    let mut pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    let _holder = lock.enter(|_grant| {});

    let ran = Rc::new(Cell::new(false));
    let flag = ran.clone();
    let waiter = lock.enter_timeout(
        move |_grant| flag.set(true),
        Duration::from_millis(20),
    );
    assert!(!waiter.is_canceled());

    pool.run_until(Delay::new(Duration::from_millis(150)));
    assert!(waiter.is_canceled());
    assert!(!ran.get());
    assert_eq!(lock.queue_size(), 0);
}

#[test]
fn timer_firing_after_admission_is_a_noop() {
    let mut pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    let ran = Rc::new(Cell::new(0));
    lock.enter(|grant| {
        grant.leave().unwrap();
    });
    let flag = ran.clone();
    let second = lock.enter_timeout(
        move |grant| {
            flag.set(flag.get() + 1);
            grant.leave().unwrap();
        },
        Duration::from_millis(30),
    );

    pool.run_until_stalled();
    assert_eq!(ran.get(), 1);
    assert!(!second.is_canceled());

    // Let the now-stale timer expire; the admitted token must be untouched.
    pool.run_until(Delay::new(Duration::from_millis(150)));
    assert!(!second.is_canceled());
    assert_eq!(ran.get(), 1);
}

#[test]
fn reentrant_enter_from_a_callback() {
    let mut pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    let order = Rc::new(RefCell::new(Vec::new()));
    let outer_order = order.clone();
    let reentrant = lock.clone();
    lock.enter(move |grant| {
        outer_order.borrow_mut().push("outer");
        let inner_order = outer_order.clone();
        reentrant.enter(move |inner| {
            inner_order.borrow_mut().push("inner");
            inner.leave().unwrap();
        });
        grant.leave().unwrap();
    });

    pool.run_until_stalled();
    assert_eq!(*order.borrow(), ["outer", "inner"]);
}

#[test]
fn option_mutation_trims_only_on_reduce_queue() {
    let pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    let _holder = lock.enter(|_grant| {});
    let tokens: Vec<_> = (0..5).map(|_| lock.enter(|_grant| {})).collect();
    assert_eq!(lock.queue_size(), 5);

    lock.set_options(QueueOptions {
        max_queue_size: Some(2),
        overflow_strategy: OverflowStrategy::DropOldest,
    });
    // Mutating options never trims by itself.
    assert_eq!(lock.queue_size(), 5);

    let victims = lock.reduce_queue();
    assert_eq!(victims.len(), 3);
    assert_eq!(lock.queue_size(), 2);
    assert!(tokens[..3].iter().all(|token| token.is_canceled()));
    assert!(tokens[3..].iter().all(|token| !token.is_canceled()));
}

#[test]
fn tokens_carry_identity_and_timing() {
    let pool = LocalPool::new();
    let lock = Lock::new(pool.spawner());

    let first = lock.enter(|_grant| {});
    let second = lock.enter(|_grant| {});

    assert_ne!(first.id(), second.id());
    assert!(first.start() <= Instant::now());
    assert!(first.elapsed() < Duration::from_secs(5));
    assert!(!first.is_canceled());
}
