//! Execution strategies for admitted callbacks.
//!
//! Admitting a token means running its callback, and *when* that happens is
//! the one timing decision the primitives leave open. [`Inline`] runs the
//! callback on the spot, within the stack of whatever call performed the
//! admission. [`NextTick`] defers it by spawning a task onto the event loop,
//! so it runs on a later turn once the admitting call has returned.
//!
//! The lock defaults to [`NextTick`] — an `enter` on a free lock must not
//! call back into user code before the caller's own stack has unwound. The
//! reset event defaults to [`Inline`] so that `set` releases its waiters
//! before returning. Custom strategies can be injected through the builders;
//! whatever the strategy does, each job it receives must be run exactly
//! once.

use std::fmt;
use std::rc::Rc;

use futures_task::LocalSpawn;
use futures_util::task::LocalSpawnExt;

/// An admitted callback, ready to run.
pub type Job = Box<dyn FnOnce() + 'static>;

/// Strategy deciding when an admitted callback runs.
pub trait Execute {
    /// Runs `job`, now or later. Must run it exactly once.
    fn run(&self, job: Job);
}

/// Runs callbacks synchronously, within the admitting call.
#[derive(Clone, Copy, Default, Debug)]
pub struct Inline;

impl Execute for Inline {
    fn run(&self, job: Job) {
        job()
    }
}

/// Defers callbacks to the next turn of the event loop by spawning them
/// onto a [`LocalSpawn`] handle.
#[derive(Clone)]
pub struct NextTick {
    spawner: Rc<dyn LocalSpawn>,
}

impl NextTick {
    /// Creates a strategy deferring onto `spawner`.
    pub fn new(spawner: impl LocalSpawn + 'static) -> NextTick {
        NextTick {
            spawner: Rc::new(spawner),
        }
    }

    pub(crate) fn from_shared(spawner: Rc<dyn LocalSpawn>) -> NextTick {
        NextTick { spawner }
    }
}

impl Execute for NextTick {
    fn run(&self, job: Job) {
        // Spawning only fails once the executor has shut down, at which
        // point the callback could never run and exactly-once delivery is
        // already lost. Surface that loudly instead of dropping the job.
        if let Err(err) = self.spawner.spawn_local(async move { job() }) {
            panic!("cannot defer callback onto the event loop: {}", err)
        }
    }
}

impl fmt::Debug for NextTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NextTick").finish()
    }
}
