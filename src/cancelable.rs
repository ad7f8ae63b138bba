//! Shared cancellation tokens.
//!
//! Every suspended continuation in this crate captures a `Cancelable` by
//! value and consults it before touching any flow state. Canceling a
//! token never aborts I/O that is already in flight; it only causes the
//! completion that would have been delivered to be absorbed silently.

use std::cell::Cell;
use std::rc::Rc;

/// A cheaply clonable advisory cancellation flag.
///
/// All clones observe the same flag. A flow installs a fresh token in an
/// operation slot each time the slot is armed, which invalidates any
/// continuation still holding a token from an earlier arming of that
/// slot.
#[derive(Clone, Debug, Default)]
pub struct Cancelable {
    flag: Rc<Cell<bool>>,
}

impl Cancelable {
    /// Creates a live token.
    pub fn new() -> Cancelable {
        Cancelable::default()
    }

    /// Creates a token that is already canceled.
    ///
    /// Returned by operations that are rejected outright, so callers
    /// always get a token they can poll.
    pub fn already_canceled() -> Cancelable {
        let token = Cancelable::new();
        token.cancel();
        token
    }

    /// Cancels the token. Idempotent; canceling after the guarded
    /// completion has already run has no effect.
    pub fn cancel(&self) {
        self.flag.set(true);
    }

    /// Whether any clone of this token has been canceled.
    pub fn canceled(&self) -> bool {
        self.flag.get()
    }
}
