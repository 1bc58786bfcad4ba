//! The synchronization primitives: a mutual-exclusion [`Lock`] and a
//! signal/reset [`ResetEvent`].

mod lock;
mod reset_event;

pub use self::lock::{Grant, Lock, LockBuilder};
pub use self::reset_event::{EventOptions, ResetEvent, ResetEventBuilder};
