//! Error types.

use std::error::Error;
use std::fmt;

/// The error returned when releasing a lock with a token that does not hold
/// it.
///
/// This always signals a bug in the caller — every release must present the
/// token that was granted the lock. The failed call leaves the lock state
/// untouched.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ReleaseError {
    _priv: (),
}

impl ReleaseError {
    pub(crate) fn not_holder() -> ReleaseError {
        ReleaseError { _priv: () }
    }
}

impl fmt::Debug for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReleaseError")
            .field(&"token is not the current holder")
            .finish()
    }
}

impl fmt::Display for ReleaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("token is not the current holder of the lock")
    }
}

impl Error for ReleaseError {}
