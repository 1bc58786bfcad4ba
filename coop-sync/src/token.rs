//! Admission tokens handed out by the synchronization primitives.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// The stored form of an admission callback. The token is passed back in at
/// execution time rather than captured, so a pending token never owns a
/// reference to itself or to its primitive.
pub(crate) type TokenJob = Box<dyn FnOnce(Rc<Token>) + 'static>;

/// Identifier of a [`Token`], unique within its owning primitive.
///
/// Identifiers are allocated from a monotonic per-instance counter and are
/// never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TokenId(u64);

impl TokenId {
    pub(crate) fn new(value: u64) -> TokenId {
        TokenId(value)
    }
}

/// One admission request against a lock or a reset event.
///
/// A token is created by every `enter`/`wait` call and carries the request's
/// identity, its cancellation flag and the callback to run once the request
/// is admitted. Tokens are never reused: once the callback has run, or once
/// the token has been canceled by a timeout or a queue eviction, the token is
/// spent.
///
/// Cancellation is not an error. A canceled request simply never runs its
/// callback; [`Token::is_canceled`] is the only signal of that outcome.
pub struct Token {
    id: TokenId,
    start: Instant,
    canceled: Cell<bool>,
    job: RefCell<Option<TokenJob>>,
}

impl Token {
    pub(crate) fn new(id: TokenId) -> Token {
        Token {
            id,
            start: Instant::now(),
            canceled: Cell::new(false),
            job: RefCell::new(None),
        }
    }

    /// Stores the callback to run on admission.
    /// Installed exactly once, right after construction.
    pub(crate) fn install(&self, job: TokenJob) {
        *self.job.borrow_mut() = Some(job);
    }

    /// Takes the callback out for execution. Returns `None` if the token was
    /// canceled in the meantime.
    pub(crate) fn take_job(&self) -> Option<TokenJob> {
        self.job.borrow_mut().take()
    }

    /// Marks the token as canceled and discards its callback.
    ///
    /// Idempotent. Does not remove the token from any queue; the owning
    /// primitive performs the removal before calling this.
    pub(crate) fn cancel(&self) {
        self.canceled.set(true);
        // Dropping the job releases whatever the callback captured. Callers
        // invoke `cancel` outside of any state borrow since those captures
        // may own handles back into the primitive; the borrow here ends
        // before the destructors run for the same reason.
        let job = self.job.borrow_mut().take();
        drop(job);
    }

    /// The token's identifier.
    pub fn id(&self) -> TokenId {
        self.id
    }

    /// The instant at which the request was made.
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Time elapsed since the request was made.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Returns whether the request was canceled by a timeout or evicted from
    /// a bounded queue. Set at most once and never reset.
    pub fn is_canceled(&self) -> bool {
        self.canceled.get()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("id", &self.id)
            .field("is_canceled", &self.canceled.get())
            .finish()
    }
}
