//! A signal/reset event that releases waiting callbacks.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use futures_task::LocalSpawn;
use futures_timer::Delay;
use futures_util::task::LocalSpawnExt;

use crate::execute::{Execute, Inline};
use crate::queue::{FifoOverflow, OverflowStrategy, QueueOptions, QueuePolicy};
use crate::token::{Token, TokenId};

/// Configuration of a [`ResetEvent`].
///
/// The queue fields behave exactly as on the lock. `auto_reset_count`
/// bounds how many waiters a single [`set`](ResetEvent::set) releases
/// before the event forces itself back to non-signaled; `None`, the
/// default, releases without bound and leaves the event signaled.
#[derive(Clone, Copy, Default, Debug)]
pub struct EventOptions {
    /// Upper bound on waiting tokens. `None` means unbounded.
    pub max_queue_size: Option<usize>,
    /// Eviction rule applied when an admission hits the bound.
    pub overflow_strategy: OverflowStrategy,
    /// Admissions released per `set` before forcing non-signaled.
    pub auto_reset_count: Option<u64>,
}

impl EventOptions {
    fn queue(&self) -> QueueOptions {
        QueueOptions {
            max_queue_size: self.max_queue_size,
            overflow_strategy: self.overflow_strategy,
        }
    }
}

struct EventState {
    signaled: bool,
    /// Admissions left before the event forces itself non-signaled.
    /// Replenished from `auto_reset_count` by a `set` on a non-signaled
    /// event. `None` means unbounded.
    remaining: Option<u64>,
    queue: VecDeque<Rc<Token>>,
    options: EventOptions,
    next_id: u64,
}

impl EventState {
    fn allocate_id(&mut self) -> TokenId {
        let id = TokenId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Consumes one admission of the auto-reset budget, flipping the event
    /// to non-signaled when the budget runs out.
    fn consume_budget(&mut self) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.signaled = false;
            }
        }
    }
}

struct Inner {
    state: RefCell<EventState>,
    spawner: Rc<dyn LocalSpawn>,
    exec: Rc<dyn Execute>,
    policy: Rc<dyn QueuePolicy>,
}

/// A signal/reset event for cooperative schedulers.
///
/// While the event is non-signaled, [`wait`](ResetEvent::wait) queues its
/// callback. [`set`](ResetEvent::set) signals the event and drains the queue
/// in arrival order; [`reset`](ResetEvent::reset) forces it back to
/// non-signaled. A `wait` against a signaled event runs its callback
/// immediately, before the call returns — unlike the lock, the event
/// executes callbacks synchronously by default.
///
/// With a finite `auto_reset_count`, each `set` releases at most that many
/// waiters and then forces the event non-signaled again, leaving the rest
/// queued. A count of zero is degenerate but honored: `set` releases nobody
/// and the event reverts immediately.
///
/// `ResetEvent` is a cheaply clonable handle; clones refer to the same
/// event.
///
/// # Examples
///
/// ```
/// use coop_sync::sync::ResetEvent;
/// use futures::executor::LocalPool;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let pool = LocalPool::new();
/// let event = ResetEvent::new(pool.spawner());
///
/// let released = Rc::new(Cell::new(0));
/// let seen = released.clone();
/// event.wait(move |_token| seen.set(seen.get() + 1));
/// assert_eq!(released.get(), 0);
///
/// event.set();
/// assert_eq!(released.get(), 1);
/// assert!(event.is_signaled());
/// ```
#[derive(Clone)]
pub struct ResetEvent {
    inner: Rc<Inner>,
}

impl ResetEvent {
    /// Creates a non-signaled event with default options, scheduling
    /// timeout timers (and deferred callbacks, if such a strategy is
    /// injected) onto `spawner`.
    pub fn new(spawner: impl LocalSpawn + 'static) -> ResetEvent {
        ResetEvent::builder(spawner).build()
    }

    /// Creates an event with the given options.
    pub fn with_options(spawner: impl LocalSpawn + 'static, options: EventOptions) -> ResetEvent {
        ResetEvent::builder(spawner).options(options).build()
    }

    /// Returns a builder for an event with non-default configuration.
    pub fn builder(spawner: impl LocalSpawn + 'static) -> ResetEventBuilder {
        ResetEventBuilder {
            spawner: Rc::new(spawner),
            options: EventOptions::default(),
            signaled: false,
            exec: None,
            policy: None,
        }
    }

    /// Requests admission; `callback` runs once the event signals it
    /// through.
    ///
    /// On a signaled event with auto-reset budget remaining (or unbounded)
    /// the callback runs immediately, consuming budget, without touching the
    /// queue. Otherwise the token joins the pending queue, subject to the
    /// overflow policy.
    pub fn wait<F>(&self, callback: F) -> Rc<Token>
    where
        F: FnOnce(Rc<Token>) + 'static,
    {
        self.do_wait(callback, None)
    }

    /// Like [`wait`](ResetEvent::wait), but gives up waiting after
    /// `timeout`. The timer races admission; whichever fires first decides
    /// the token's fate.
    pub fn wait_timeout<F>(&self, callback: F, timeout: Duration) -> Rc<Token>
    where
        F: FnOnce(Rc<Token>) + 'static,
    {
        self.do_wait(callback, Some(timeout))
    }

    fn do_wait<F>(&self, callback: F, timeout: Option<Duration>) -> Rc<Token>
    where
        F: FnOnce(Rc<Token>) + 'static,
    {
        let token = Rc::new(Token::new(self.inner.state.borrow_mut().allocate_id()));

        // The stored callback takes the token as an argument rather than
        // capturing it, so a queued waiter holds no reference to itself.
        token.install(Box::new(callback));

        let (admitted, victims) = {
            let mut state = self.inner.state.borrow_mut();
            if state.signaled && state.remaining != Some(0) {
                state.consume_budget();
                (true, Vec::new())
            } else {
                let queue_options = state.options.queue();
                let EventState { queue, .. } = &mut *state;
                let victims = self
                    .inner
                    .policy
                    .reduce(queue, Some(token.clone()), &queue_options);
                (false, victims)
            }
        };

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

    /// Signals the event and drains the pending queue in arrival order.
    ///
    /// With a finite auto-reset budget the drain stops once the budget is
    /// spent, forcing the event back to non-signaled and leaving the
    /// remaining waiters queued — `set` can therefore return with the event
    /// non-signaled. A `set` on an already-signaled event does not replenish
    /// the budget.
    pub fn set(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if !state.signaled {
                state.signaled = true;
                state.remaining = state.options.auto_reset_count;
            }
        }
        self.drain();
    }

    /// Forces the event to non-signaled. Queued waiters stay queued.
    pub fn reset(&self) {
        self.inner.state.borrow_mut().signaled = false;
    }

    /// Returns whether the event is signaled.
    pub fn is_signaled(&self) -> bool {
        self.inner.state.borrow().signaled
    }

    /// Number of waiting tokens.
    pub fn queue_size(&self) -> usize {
        self.inner.state.borrow().queue.len()
    }

    /// The event's current options.
    pub fn options(&self) -> EventOptions {
        self.inner.state.borrow().options
    }

    /// Replaces the options.
    ///
    /// Queue bounds apply to subsequent admissions only (see
    /// [`reduce_queue`](ResetEvent::reduce_queue)); a new `auto_reset_count`
    /// takes effect at the next replenishing `set`, leaving any in-flight
    /// budget untouched.
    pub fn set_options(&self, options: EventOptions) {
        self.inner.state.borrow_mut().options = options;
    }

    /// Re-applies the overflow policy to the pending queue, evicting until
    /// it fits the current bound. Returns the canceled victims.
    pub fn reduce_queue(&self) -> Vec<Rc<Token>> {
        let victims = {
            let mut state = self.inner.state.borrow_mut();
            let queue_options = state.options.queue();
            let EventState { queue, .. } = &mut *state;
            self.inner.policy.reduce(queue, None, &queue_options)
        };
        for victim in &victims {
            victim.cancel();
        }
        victims
    }

    /// Admits queued tokens while the event stays signaled and budget
    /// remains. State is re-read every iteration: callbacks run outside the
    /// borrow and may themselves wait, set or reset.
    fn drain(&self) {
        loop {
            let next = {
                let mut state = self.inner.state.borrow_mut();
                if !state.signaled {
                    break;
                }
                if state.remaining == Some(0) {
                    state.signaled = false;
                    break;
                }
                match state.queue.pop_front() {
                    None => break,
                    Some(token) => {
                        state.consume_budget();
                        token
                    }
                }
            };
            self.execute(&next);
        }
    }

    fn execute(&self, token: &Rc<Token>) {
        if let Some(job) = token.take_job() {
            let token = token.clone();
            self.inner.exec.run(Box::new(move || job(token)));
        }
    }

    fn arm_timer(&self, token: &Rc<Token>, timeout: Duration) {
        let delay = Delay::new(timeout);
        let inner = Rc::downgrade(&self.inner);
        let id = token.id();
        let result = self.inner.spawner.spawn_local(async move {
            delay.await;
            if let Some(inner) = inner.upgrade() {
                ResetEvent { inner }.cancel_pending(id);
            }
        });
        if let Err(err) = result {
            panic!("cannot arm timeout timer on the event loop: {}", err)
        }
    }

    /// Timeout expiry: cancels the token only while it is still queued, so
    /// that admission and timeout stay mutually exclusive.
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

impl fmt::Debug for ResetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("ResetEvent")
            .field("is_signaled", &state.signaled)
            .field("queue_size", &state.queue.len())
            .finish()
    }
}

/// Builder for a [`ResetEvent`] with non-default configuration.
pub struct ResetEventBuilder {
    spawner: Rc<dyn LocalSpawn>,
    options: EventOptions,
    signaled: bool,
    exec: Option<Rc<dyn Execute>>,
    policy: Option<Rc<dyn QueuePolicy>>,
}

impl ResetEventBuilder {
    /// Bounds the pending queue.
    pub fn max_queue_size(mut self, max: usize) -> ResetEventBuilder {
        self.options.max_queue_size = Some(max);
        self
    }

    /// Sets the eviction rule applied when the bound is hit.
    pub fn overflow_strategy(mut self, strategy: OverflowStrategy) -> ResetEventBuilder {
        self.options.overflow_strategy = strategy;
        self
    }

    /// Bounds the number of admissions released per `set`.
    pub fn auto_reset_count(mut self, count: u64) -> ResetEventBuilder {
        self.options.auto_reset_count = Some(count);
        self
    }

    /// Replaces the whole option set.
    pub fn options(mut self, options: EventOptions) -> ResetEventBuilder {
        self.options = options;
        self
    }

    /// Starts the event out signaled, with a full auto-reset budget.
    pub fn initially_signaled(mut self, signaled: bool) -> ResetEventBuilder {
        self.signaled = signaled;
        self
    }

    /// Injects an execution strategy. Defaults to [`Inline`].
    pub fn executor(mut self, exec: Rc<dyn Execute>) -> ResetEventBuilder {
        self.exec = Some(exec);
        self
    }

    /// Injects a queue policy. Defaults to [`FifoOverflow`].
    pub fn queue_policy(mut self, policy: Rc<dyn QueuePolicy>) -> ResetEventBuilder {
        self.policy = Some(policy);
        self
    }

    /// Builds the event.
    pub fn build(self) -> ResetEvent {
        let exec = self.exec.unwrap_or_else(|| Rc::new(Inline));
        let policy = self.policy.unwrap_or_else(|| Rc::new(FifoOverflow));
        let remaining = if self.signaled {
            self.options.auto_reset_count
        } else {
            None
        };
        ResetEvent {
            inner: Rc::new(Inner {
                state: RefCell::new(EventState {
                    signaled: self.signaled,
                    remaining,
                    queue: VecDeque::new(),
                    options: self.options,
                    next_id: 0,
                }),
                spawner: self.spawner,
                exec,
                policy,
            }),
        }
    }
}

impl fmt::Debug for ResetEventBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetEventBuilder")
            .field("options", &self.options)
            .field("initially_signaled", &self.signaled)
            .finish()
    }
}
