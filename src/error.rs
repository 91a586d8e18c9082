//! Classifying the errors this crate produces.
//!
//! Everything is surfaced as [`std::io::Error`], but the interesting cases
//! carry a typed payload so callers can tell them apart:
//!
//! * a local deadline fired ([`is_timeout`]) — retrying is reasonable;
//! * the descriptor was closed out from under the operation ([`is_closed`])
//!   — retrying is not;
//! * an external cancellation signal fired ([`is_canceled`]).
//!
//! `WouldBlock` never escapes this crate; it is consumed by the retry loops
//! in `raw::fd`.

use std::error::Error;
use std::fmt;
use std::io;

/// A local read or write deadline expired before the operation could finish.
#[derive(Debug)]
pub(crate) struct TimeoutError;

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i/o timeout")
    }
}

impl Error for TimeoutError {}

/// The operation ran on, or was interrupted by, a closed descriptor.
#[derive(Debug)]
pub(crate) struct ClosedError;

impl fmt::Display for ClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "use of closed connection")
    }
}

impl Error for ClosedError {}

/// An external cancellation signal fired while the operation was in flight.
#[derive(Debug)]
pub(crate) struct CanceledError;

impl fmt::Display for CanceledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation canceled")
    }
}

impl Error for CanceledError {}

/// Every candidate address was tried and none produced a connection.
#[derive(Debug)]
pub(crate) struct NoSuitableAddress;

impl fmt::Display for NoSuitableAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no suitable address found")
    }
}

impl Error for NoSuitableAddress {}

pub(crate) fn timeout() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, TimeoutError)
}

pub(crate) fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, ClosedError)
}

pub(crate) fn canceled() -> io::Error {
    io::Error::new(io::ErrorKind::Other, CanceledError)
}

pub(crate) fn no_suitable_address() -> io::Error {
    io::Error::new(io::ErrorKind::AddrNotAvailable, NoSuitableAddress)
}

pub(crate) fn missing_address() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "missing address")
}

/// Wrap a native error with the name of the failing operation.
pub(crate) fn wrap(op: &str, err: io::Error) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {}", op, err))
}

fn payload_is<T: Error + 'static>(err: &io::Error) -> bool {
    err.get_ref().map_or(false, |inner| inner.is::<T>())
}

/// Returns true if the error was produced by a local deadline expiring.
///
/// A native `TimedOut` error reported by the OS (a dropped handshake, say)
/// does not count; only deadlines set through this crate do.
pub fn is_timeout(err: &io::Error) -> bool {
    payload_is::<TimeoutError>(err)
}

/// Returns true if the error was produced by the descriptor being closed,
/// either before the operation started or while it was blocked.
pub fn is_closed(err: &io::Error) -> bool {
    payload_is::<ClosedError>(err)
}

/// Returns true if the error was produced by an external [`CancelToken`]
/// firing.
///
/// [`CancelToken`]: crate::CancelToken
pub fn is_canceled(err: &io::Error) -> bool {
    payload_is::<CanceledError>(err)
}

/// Returns true if a dial failed because no candidate address was usable.
pub fn is_no_suitable_address(err: &io::Error) -> bool {
    payload_is::<NoSuitableAddress>(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifications_are_disjoint() {
        let t = timeout();
        let c = closed();
        let x = canceled();
        assert!(is_timeout(&t) && !is_closed(&t) && !is_canceled(&t));
        assert!(is_closed(&c) && !is_timeout(&c) && !is_canceled(&c));
        assert!(is_canceled(&x) && !is_timeout(&x) && !is_closed(&x));
    }

    #[test]
    fn native_timed_out_is_not_a_local_timeout() {
        let e = wrap("connect", io::Error::new(io::ErrorKind::TimedOut, "ETIMEDOUT"));
        assert_eq!(e.kind(), io::ErrorKind::TimedOut);
        assert!(!is_timeout(&e));
        assert!(is_timeout(&timeout()));
    }

    #[test]
    fn wrap_keeps_the_kind() {
        let e = wrap(
            "connect",
            io::Error::new(io::ErrorKind::ConnectionRefused, "nope"),
        );
        assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused);
        assert!(e.to_string().starts_with("connect:"));
    }
}
