//! Reusable cancellation handle.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Lifecycle of a [`CancelToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    /// Ready to be cancelled; in-flight calls keep running.
    Armed,
    /// Cancellation was requested; in-flight calls stop at their next await.
    Cancelled,
}

#[derive(Debug)]
struct Slot {
    state: CancelState,
    signal: CancellationToken,
}

impl Slot {
    fn armed() -> Self {
        Self {
            state: CancelState::Armed,
            signal: CancellationToken::new(),
        }
    }
}

/// Handle used to request early termination of a call.
///
/// Clones share state, so one clone can be handed to a call while another
/// cancels it. When a call fails the token is rearmed, making it reusable for
/// the next call without creating a new one.
///
/// # Example
///
/// ```
/// use courier_core::{CancelState, CancelToken};
///
/// let token = CancelToken::new();
/// token.cancel();
/// assert_eq!(token.state(), CancelState::Cancelled);
/// token.rearm();
/// assert_eq!(token.state(), CancelState::Armed);
/// ```
#[derive(Debug, Clone)]
pub struct CancelToken {
    slot: Arc<Mutex<Slot>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Creates an armed token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(Slot::armed())),
        }
    }

    /// Requests cancellation of every call currently observing this token.
    pub fn cancel(&self) {
        let mut slot = self.lock();
        slot.state = CancelState::Cancelled;
        slot.signal.cancel();
        trace!("cancel token fired");
    }

    /// Resets the token so it can be passed to another call.
    ///
    /// Calls that already observed the previous signal stay cancelled.
    pub fn rearm(&self) {
        let mut slot = self.lock();
        if slot.state == CancelState::Cancelled {
            *slot = Slot::armed();
            trace!("cancel token rearmed");
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> CancelState {
        self.lock().state
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called and the token
    /// has not been rearmed since.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state() == CancelState::Cancelled
    }

    /// Returns the signal of the current arming, for racing against I/O.
    pub(crate) fn signal(&self) -> CancellationToken {
        self.lock().signal.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
