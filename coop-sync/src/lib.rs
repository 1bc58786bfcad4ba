//! Cooperative synchronization primitives for single-threaded executors.
//!
//! This crate provides a mutual-exclusion lock and a signal/reset event for
//! runtimes where true parallelism does not exist but callback interleavings
//! do: asynchronous completions land in unpredictable order, and these
//! primitives impose a deterministic one. Neither primitive ever blocks.
//! An entry or wait call returns an admission token immediately and the
//! supplied callback runs once the token is admitted — in strict arrival
//! order, one at a time for the lock, or in a signaled burst for the event.
//!
//! Both primitives share one queue engine: a pending queue with an optional
//! bound and a pluggable overflow policy, timeout-driven cancellation that
//! races admission, and a pluggable execution strategy deciding whether
//! admitted callbacks run synchronously or on the next turn of the event
//! loop. Cancellation is never an error — an evicted or timed-out token
//! simply reports [`Token::is_canceled`] and its callback never runs.
//!
//! The event loop is whatever [`LocalSpawn`](futures_task::LocalSpawn)
//! implementation is handed to the constructors, such as
//! `futures::executor::LocalPool`'s spawner.
//!
//! # Examples
//!
//! ```
//! use coop_sync::sync::Lock;
//! use futures::executor::LocalPool;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let mut pool = LocalPool::new();
//! let lock = Lock::new(pool.spawner());
//!
//! let order = Rc::new(RefCell::new(Vec::new()));
//! for i in 0..3 {
//!     let order = order.clone();
//!     lock.enter(move |grant| {
//!         order.borrow_mut().push(i);
//!         grant.leave().unwrap();
//!     });
//! }
//!
//! pool.run_until_stalled();
//! assert_eq!(*order.borrow(), [0, 1, 2]);
//! ```

#![warn(missing_docs)]

pub mod execute;
pub mod queue;
pub mod registry;
pub mod sync;

mod error;
mod token;

pub use crate::error::ReleaseError;
pub use crate::token::{Token, TokenId};
