//! A callback-admitting mutual-exclusion lock for cooperative schedulers.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use futures_task::LocalSpawn;
use futures_timer::Delay;
use futures_util::task::LocalSpawnExt;

use crate::error::ReleaseError;
use crate::execute::{Execute, NextTick};
use crate::queue::{FifoOverflow, OverflowStrategy, QueueOptions, QueuePolicy};
use crate::token::{Token, TokenId};

struct LockState {
    /// The token holding the lock. `Some` iff the lock is held; a token is
    /// never simultaneously current and queued.
    current: Option<Rc<Token>>,
    /// Waiting tokens in arrival order.
    queue: VecDeque<Rc<Token>>,
    options: QueueOptions,
    next_id: u64,
}

impl LockState {
    fn allocate_id(&mut self) -> TokenId {
        let id = TokenId::new(self.next_id);
        self.next_id += 1;
        id
    }
}

struct Inner {
    state: RefCell<LockState>,
    spawner: Rc<dyn LocalSpawn>,
    exec: Rc<dyn Execute>,
    policy: Rc<dyn QueuePolicy>,
}

/// A mutual-exclusion lock that serializes callbacks instead of suspending
/// callers.
///
/// [`enter`](Lock::enter) never blocks: it returns a [`Token`] immediately,
/// and the callback runs once the token is admitted — right away if the lock
/// is free, or after every earlier waiter has left if it is not. Waiters are
/// admitted in strict arrival order. The callback receives a [`Grant`] whose
/// [`leave`](Grant::leave) hands the lock to the next waiter.
///
/// By default callbacks are deferred to the next turn of the event loop
/// (see [`NextTick`]), so an `enter` on a free lock still returns before its
/// callback runs. The lock is nevertheless held from the moment `enter`
/// returns.
///
/// `Lock` is a cheaply clonable handle; clones refer to the same lock.
///
/// # Examples
///
/// ```
/// use coop_sync::sync::Lock;
/// use futures::executor::LocalPool;
///
/// let mut pool = LocalPool::new();
/// let lock = Lock::new(pool.spawner());
///
/// let token = lock.enter(|grant| {
///     // No other callback entered through this lock runs until `leave`.
///     grant.leave().unwrap();
/// });
/// assert!(lock.is_locked());
///
/// pool.run_until_stalled();
/// assert!(!lock.is_locked());
/// assert!(!token.is_canceled());
/// ```
#[derive(Clone)]
pub struct Lock {
    inner: Rc<Inner>,
}

impl Lock {
    /// Creates a lock with default options, scheduling deferred callbacks
    /// and timeout timers onto `spawner`.
    pub fn new(spawner: impl LocalSpawn + 'static) -> Lock {
        Lock::builder(spawner).build()
    }

    /// Creates a lock with the given queue options.
    pub fn with_options(spawner: impl LocalSpawn + 'static, options: QueueOptions) -> Lock {
        Lock::builder(spawner).options(options).build()
    }

    /// Returns a builder for a lock with non-default options or injected
    /// strategies.
    pub fn builder(spawner: impl LocalSpawn + 'static) -> LockBuilder {
        LockBuilder {
            spawner: Rc::new(spawner),
            options: QueueOptions::default(),
            exec: None,
            policy: None,
        }
    }

    /// Requests entry; `callback` runs via the execution strategy once the
    /// request is admitted.
    ///
    /// If the lock is free the token is admitted on the spot; otherwise it
    /// joins the pending queue, subject to the overflow policy. The returned
    /// token reports the request's fate: a token evicted by the policy has
    /// [`is_canceled`](Token::is_canceled) set and its callback never runs.
    pub fn enter<F>(&self, callback: F) -> Rc<Token>
    where
        F: FnOnce(Grant) + 'static,
    {
        self.do_enter(callback, None)
    }

    /// Like [`enter`](Lock::enter), but gives up waiting after `timeout`.
    ///
    /// The timer races queue admission and the first outcome wins: a token
    /// that times out while still queued is removed and canceled, and its
    /// callback never runs; a timer that fires after admission is a no-op.
    /// The timeout governs waiting only — it never interrupts a callback
    /// that has already been admitted.
    pub fn enter_timeout<F>(&self, callback: F, timeout: Duration) -> Rc<Token>
    where
        F: FnOnce(Grant) + 'static,
    {
        self.do_enter(callback, Some(timeout))
    }

    fn do_enter<F>(&self, callback: F, timeout: Option<Duration>) -> Rc<Token>
    where
        F: FnOnce(Grant) + 'static,
    {
        let token = Rc::new(Token::new(self.inner.state.borrow_mut().allocate_id()));

        // The stored callback only holds a weak reference back to the lock;
        // the token is handed in at execution time. A waiter abandoned in
        // the queue therefore never keeps the lock (or itself) alive.
        let inner = Rc::downgrade(&self.inner);
        token.install(Box::new(move |token| callback(Grant { inner, token })));

        let (admitted, victims) = {
            let mut state = self.inner.state.borrow_mut();
            if state.current.is_none() {
                debug_assert!(state.queue.is_empty());
                state.current = Some(token.clone());
                (true, Vec::new())
            } else {
                let LockState { queue, options, .. } = &mut *state;
                let victims = self.inner.policy.reduce(queue, Some(token.clone()), options);
                (false, victims)
            }
        };

        // Finalize evictions outside the state borrow: dropping a victim's
        // callback can run arbitrary destructors of its captures.
        let rejected = victims.iter().any(|victim| Rc::ptr_eq(victim, &token));
        for victim in &victims {
            victim.cancel();
        }

        if admitted {
            self.execute(&token);
        } else if !rejected {
            if let Some(timeout) = timeout {
                self.arm_timer(&token, timeout);
            }
        }
        token
    }

    /// Releases the lock held by `token` and admits the next waiter, if any.
    ///
    /// Fails without touching any state if `token` is not the current
    /// holder; that always signals a caller bug.
    pub fn leave(&self, token: &Rc<Token>) -> Result<(), ReleaseError> {
        self.do_leave(token, false)
    }

    /// Releases the lock held by `token` and cancels every queued waiter
    /// instead of admitting one. None of their callbacks run and the lock
    /// ends up free with an empty queue.
    pub fn leave_aborting(&self, token: &Rc<Token>) -> Result<(), ReleaseError> {
        self.do_leave(token, true)
    }

    fn do_leave(&self, token: &Rc<Token>, abort_pending: bool) -> Result<(), ReleaseError> {
        let (next, aborted) = {
            let mut state = self.inner.state.borrow_mut();
            match &state.current {
                Some(current) if Rc::ptr_eq(current, token) => {}
                _ => return Err(ReleaseError::not_holder()),
            }
            state.current = None;
            if abort_pending {
                (None, state.queue.drain(..).collect::<Vec<_>>())
            } else {
                let next = state.queue.pop_front();
                state.current = next.clone();
                (next, Vec::new())
            }
        };

        for waiter in &aborted {
            waiter.cancel();
        }
        if let Some(next) = next {
            self.execute(&next);
        }
        Ok(())
    }

    /// Returns whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.inner.state.borrow().current.is_some()
    }

    /// Number of waiting tokens. The token holding the lock is not counted.
    pub fn queue_size(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    /// The lock's current queue options.
    pub fn options(&self) -> QueueOptions {
        self.inner.state.borrow().options
    }

    /// Replaces the queue options.
    ///
    /// Takes effect on subsequent admissions only: a queue that the new
    /// bound leaves over capacity is not trimmed until
    /// [`reduce_queue`](Lock::reduce_queue) is called.
    pub fn set_options(&self, options: QueueOptions) {
        self.inner.state.borrow_mut().options = options;
    }

    /// Re-applies the overflow policy to the pending queue, evicting until
    /// it fits the current bound. Returns the canceled victims.
    pub fn reduce_queue(&self) -> Vec<Rc<Token>> {
        let victims = {
            let mut state = self.inner.state.borrow_mut();
            let LockState { queue, options, .. } = &mut *state;
            self.inner.policy.reduce(queue, None, options)
        };
        for victim in &victims {
            victim.cancel();
        }
        victims
    }

    /// Runs the token's callback through the execution strategy.
    fn execute(&self, token: &Rc<Token>) {
        if let Some(job) = token.take_job() {
            let token = token.clone();
            self.inner.exec.run(Box::new(move || job(token)));
        }
    }

    fn arm_timer(&self, token: &Rc<Token>, timeout: Duration) {
        // The deadline is fixed here, not at first poll of the timer task.
        let delay = Delay::new(timeout);
        let inner = Rc::downgrade(&self.inner);
        let id = token.id();
        let result = self.inner.spawner.spawn_local(async move {
            delay.await;
            if let Some(inner) = inner.upgrade() {
                Lock { inner }.cancel_pending(id);
            }
        });
        if let Err(err) = result {
            panic!("cannot arm timeout timer on the event loop: {}", err)
        }
    }

    /// Timeout expiry: cancels the token if — and only if — it is still
    /// waiting. Checking queue membership first makes admission and timeout
    /// mutually exclusive outcomes.
    fn cancel_pending(&self, id: TokenId) {
        let timed_out = {
            let mut state = self.inner.state.borrow_mut();
            match state.queue.iter().position(|token| token.id() == id) {
                Some(index) => state.queue.remove(index),
                None => None,
            }
        };
        if let Some(token) = timed_out {
            token.cancel();
        }
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Lock")
            .field("is_locked", &state.current.is_some())
            .field("queue_size", &state.queue.len())
            .finish()
    }
}

/// Exclusive access granted to a lock callback.
///
/// A `Grant` is the admitted token bound to its lock: consuming it with
/// [`leave`](Grant::leave) or [`leave_aborting`](Grant::leave_aborting)
/// releases the lock. Dropping a `Grant` without leaving keeps the lock held
/// — release is always explicit.
pub struct Grant {
    inner: Weak<Inner>,
    token: Rc<Token>,
}

impl Grant {
    /// The lock this grant belongs to, or `None` if the lock was dropped.
    pub fn lock(&self) -> Option<Lock> {
        self.inner.upgrade().map(|inner| Lock { inner })
    }

    /// The admitted token.
    pub fn token(&self) -> &Rc<Token> {
        &self.token
    }

    /// Releases the lock, admitting the next waiter. Releasing a lock that
    /// has since been dropped is a no-op.
    pub fn leave(self) -> Result<(), ReleaseError> {
        match self.inner.upgrade() {
            Some(inner) => Lock { inner }.leave(&self.token),
            None => Ok(()),
        }
    }

    /// Releases the lock and cancels all queued waiters.
    pub fn leave_aborting(self) -> Result<(), ReleaseError> {
        match self.inner.upgrade() {
            Some(inner) => Lock { inner }.leave_aborting(&self.token),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grant").field("token", &self.token).finish()
    }
}

/// Builder for a [`Lock`] with non-default configuration.
pub struct LockBuilder {
    spawner: Rc<dyn LocalSpawn>,
    options: QueueOptions,
    exec: Option<Rc<dyn Execute>>,
    policy: Option<Rc<dyn QueuePolicy>>,
}

impl LockBuilder {
    /// Bounds the pending queue.
    pub fn max_queue_size(mut self, max: usize) -> LockBuilder {
        self.options.max_queue_size = Some(max);
        self
    }

    /// Sets the eviction rule applied when the bound is hit.
    pub fn overflow_strategy(mut self, strategy: OverflowStrategy) -> LockBuilder {
        self.options.overflow_strategy = strategy;
        self
    }

    /// Replaces the whole option set.
    pub fn options(mut self, options: QueueOptions) -> LockBuilder {
        self.options = options;
        self
    }

    /// Injects an execution strategy. Defaults to [`NextTick`] on the
    /// lock's spawner.
    pub fn executor(mut self, exec: Rc<dyn Execute>) -> LockBuilder {
        self.exec = Some(exec);
        self
    }

    /// Injects a queue policy. Defaults to [`FifoOverflow`].
    pub fn queue_policy(mut self, policy: Rc<dyn QueuePolicy>) -> LockBuilder {
        self.policy = Some(policy);
        self
    }

    /// Builds the lock.
    pub fn build(self) -> Lock {
        let spawner = self.spawner;
        let exec = self
            .exec
            .unwrap_or_else(|| Rc::new(NextTick::from_shared(spawner.clone())));
        let policy = self.policy.unwrap_or_else(|| Rc::new(FifoOverflow));
        Lock {
            inner: Rc::new(Inner {
                state: RefCell::new(LockState {
                    current: None,
                    queue: VecDeque::new(),
                    options: self.options,
                    next_id: 0,
                }),
                spawner,
                exec,
                policy,
            }),
        }
    }
}

impl fmt::Debug for LockBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockBuilder")
            .field("options", &self.options)
            .finish()
    }
}
