//! External cancellation signals.

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/// A cancellation signal that can be observed by in-flight dials.
///
/// Clones share the same signal. Canceling is sticky and may happen from any
/// thread; a dial that is parked waiting for a connection to establish
/// returns promptly once the token fires, independent of its configured
/// timeout.
///
/// # Examples
///
/// ```no_run
/// use std::thread;
/// use std::time::Duration;
/// use parley::{CancelToken, Dialer, Stack};
///
/// # fn main() -> std::io::Result<()> {
/// let stack = Stack::new()?;
/// let token = CancelToken::new();
///
/// let canceler = token.clone();
/// thread::spawn(move || {
///     thread::sleep(Duration::from_millis(100));
///     canceler.cancel();
/// });
///
/// let err = Dialer::default()
///     .dial_with_cancel(&stack, "203.0.113.1:9", &token)
///     .unwrap_err();
/// assert!(parley::error::is_canceled(&err));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    // Dropping the sender disconnects `rx`, which is how the signal fires:
    // a disconnected channel is permanently "ready" for every observer.
    tx: Mutex<Option<Sender<Infallible>>>,
    rx: Receiver<Infallible>,
}

impl CancelToken {
    /// Creates a token in the not-canceled state.
    pub fn new() -> CancelToken {
        let (tx, rx) = bounded::<Infallible>(0);
        CancelToken {
            inner: Arc::new(Inner {
                tx: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    /// Fires the signal. Idempotent.
    pub fn cancel(&self) {
        self.inner.tx.lock().unwrap().take();
    }

    /// Returns true once [`cancel`] has been called on any clone.
    ///
    /// [`cancel`]: CancelToken::cancel
    pub fn is_canceled(&self) -> bool {
        matches!(self.inner.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// A channel that becomes ready when the token fires, for use in
    /// `select!` arms.
    pub(crate) fn done(&self) -> &Receiver<Infallible> {
        &self.inner.rx
    }
}

impl Default for CancelToken {
    fn default() -> CancelToken {
        CancelToken::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_across_clones() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_canceled());
        token.cancel();
        assert!(other.is_canceled());
        // Idempotent.
        other.cancel();
        assert!(token.is_canceled());
    }

    #[test]
    fn done_becomes_ready_on_cancel() {
        let token = CancelToken::new();
        assert!(token.done().try_recv() == Err(TryRecvError::Empty));
        token.cancel();
        assert!(token.done().try_recv() == Err(TryRecvError::Disconnected));
    }
}
