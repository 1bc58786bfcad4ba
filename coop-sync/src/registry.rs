//! A name-keyed registry of shared locks.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use futures_task::LocalSpawn;

use crate::queue::QueueOptions;
use crate::sync::Lock;

/// Maps string names to lazily created [`Lock`] instances.
///
/// The registry is plain data with an explicit lifecycle: pass it to
/// whatever needs named locks instead of reaching for process-global state.
/// A lock is created on the first [`get`](LockRegistry::get) of its name,
/// using the registry's default options, and lives until it is explicitly
/// [`remove`](LockRegistry::remove)d — handles obtained earlier keep
/// working either way, since every `get` with the same name returns a
/// handle to the same underlying lock.
///
/// # Examples
///
/// ```
/// use coop_sync::registry::LockRegistry;
/// use futures::executor::LocalPool;
///
/// let mut pool = LocalPool::new();
/// let registry = LockRegistry::new(pool.spawner());
///
/// let lock = registry.get("flush");
/// lock.enter(|grant| {
///     grant.leave().unwrap();
/// });
/// // Another `get` observes the same instance.
/// assert!(registry.get("flush").is_locked());
///
/// pool.run_until_stalled();
/// assert!(!registry.get("flush").is_locked());
/// ```
pub struct LockRegistry {
    spawner: Rc<dyn LocalSpawn>,
    defaults: QueueOptions,
    locks: RefCell<HashMap<String, Lock>>,
}

impl LockRegistry {
    /// Creates an empty registry; locks it creates schedule onto `spawner`.
    pub fn new(spawner: impl LocalSpawn + 'static) -> LockRegistry {
        LockRegistry::with_defaults(spawner, QueueOptions::default())
    }

    /// Creates an empty registry whose locks are created with `defaults`.
    pub fn with_defaults(
        spawner: impl LocalSpawn + 'static,
        defaults: QueueOptions,
    ) -> LockRegistry {
        LockRegistry {
            spawner: Rc::new(spawner),
            defaults,
            locks: RefCell::new(HashMap::new()),
        }
    }

    /// Returns the lock registered under `name`, creating it on first use.
    pub fn get(&self, name: &str) -> Lock {
        if let Some(lock) = self.locks.borrow().get(name) {
            return lock.clone();
        }
        let lock = Lock::with_options(self.spawner.clone(), self.defaults);
        self.locks
            .borrow_mut()
            .entry(name.to_owned())
            .or_insert(lock)
            .clone()
    }

    /// Removes and returns the lock registered under `name`. Previously
    /// obtained handles stay functional; the name is simply free again.
    pub fn remove(&self, name: &str) -> Option<Lock> {
        self.locks.borrow_mut().remove(name)
    }

    /// Returns whether a lock is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.locks.borrow().contains_key(name)
    }

    /// Number of registered locks.
    pub fn len(&self) -> usize {
        self.locks.borrow().len()
    }

    /// Returns whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.locks.borrow().is_empty()
    }

    /// The options new locks are created with.
    pub fn defaults(&self) -> QueueOptions {
        self.defaults
    }
}

impl fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("len", &self.locks.borrow().len())
            .field("defaults", &self.defaults)
            .finish()
    }
}
