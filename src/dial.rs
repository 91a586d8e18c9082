//! Establishing outbound connections.
//!
//! A dial resolves its target into candidate addresses, splits them by
//! address family, and races the two families: the primary family starts
//! immediately, the fallback family after a short delay (or at once if the
//! primary side has already failed). The first connection wins and the loser
//! is always closed.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, never, select, SendError};
use log::{debug, trace};

use crate::addr;
use crate::cancel::CancelToken;
use crate::config::SocketConfig;
use crate::error;
use crate::raw::NetFd;
use crate::reactor::Handle;
use crate::stack::Stack;
use crate::tcp::TcpStream;

/// How long the winning family gets a head start before the other family's
/// candidates are tried in parallel.
const FALLBACK_DELAY: Duration = Duration::from_millis(300);

/// When an overall deadline is split across candidates, no single candidate
/// gets less than this unless the whole budget is smaller.
const SANE_MINIMUM: Duration = Duration::from_secs(2);

/// Configures and performs outbound dials on a [`Stack`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use parley::{Dialer, Stack};
///
/// # fn main() -> std::io::Result<()> {
/// let stack = Stack::new()?;
/// let mut stream = Dialer::default()
///     .timeout(Duration::from_secs(5))
///     .dial(&stack, "example.com:80")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Dialer {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    fallback_delay: Duration,
    config: SocketConfig,
}

impl Default for Dialer {
    fn default() -> Dialer {
        Dialer {
            timeout: None,
            deadline: None,
            fallback_delay: FALLBACK_DELAY,
            config: SocketConfig::default(),
        }
    }
}

// ===== impl Dialer =====

impl Dialer {
    /// A dialer with no timeout and the default fallback delay.
    pub fn new() -> Dialer {
        Dialer::default()
    }

    /// Bound the whole dial, including resolution and every candidate
    /// attempt, to `timeout` from the moment `dial` is called.
    pub fn timeout(mut self, timeout: Duration) -> Dialer {
        self.timeout = Some(timeout);
        self
    }

    /// Bound the whole dial to an absolute point in time. When both a
    /// timeout and a deadline are set, the earlier one wins.
    pub fn deadline(mut self, deadline: Instant) -> Dialer {
        self.deadline = Some(deadline);
        self
    }

    /// Head start given to the primary address family before fallback
    /// candidates are raced. Defaults to 300ms.
    pub fn fallback_delay(mut self, delay: Duration) -> Dialer {
        self.fallback_delay = delay;
        self
    }

    /// Socket options applied to the winning connection.
    pub fn config(mut self, config: SocketConfig) -> Dialer {
        self.config = config;
        self
    }

    /// Dial `target` on `stack`, racing address families as configured.
    pub fn dial<A: ToSocketAddrs>(&self, stack: &Stack, target: A) -> io::Result<TcpStream> {
        self.dial_with_cancel(stack, target, &CancelToken::new())
    }

    /// Dial, additionally observing `cancel`. A canceled dial fails with an
    /// error distinguishable from a timeout ([`error::is_canceled`]) and
    /// returns promptly even if candidates are mid-handshake.
    pub fn dial_with_cancel<A: ToSocketAddrs>(
        &self,
        stack: &Stack,
        target: A,
        cancel: &CancelToken,
    ) -> io::Result<TcpStream> {
        if cancel.is_canceled() {
            return Err(error::canceled());
        }
        let deadline = self.effective_deadline();
        let (primary, fallback) = addr::partition(addr::resolve(target)?);
        debug!(
            "dialing: {} primary, {} fallback candidates",
            primary.len(),
            fallback.len()
        );

        let handle = stack.handle();
        let config = &self.config;
        let dial_list = |addrs: &[SocketAddr], deadline: Option<Instant>, cancel: &CancelToken| {
            dial_serial(
                addrs,
                deadline,
                cancel,
                &|a: &SocketAddr, d: Option<Instant>, c: &CancelToken| {
                    dial_single(&handle, config, a, d, c)
                },
            )
        };
        dial_parallel(
            &primary,
            &fallback,
            self.fallback_delay,
            deadline,
            cancel,
            &dial_list,
        )
    }

    fn effective_deadline(&self) -> Option<Instant> {
        let from_timeout = self.timeout.map(|t| Instant::now() + t);
        match (from_timeout, self.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Race the primary candidates against the fallback candidates.
///
/// The fallback side starts after `fallback_delay`, or immediately once the
/// primary side has failed. The first success wins; the losing side's
/// connection, should it arrive later, is closed. When both sides fail, the
/// primary side's error is reported.
fn dial_parallel<C, F>(
    primary: &[SocketAddr],
    fallback: &[SocketAddr],
    fallback_delay: Duration,
    deadline: Option<Instant>,
    cancel: &CancelToken,
    dial_list: &F,
) -> io::Result<C>
where
    C: Send,
    F: Fn(&[SocketAddr], Option<Instant>, &CancelToken) -> io::Result<C> + Sync,
{
    if fallback.is_empty() {
        return dial_list(primary, deadline, cancel);
    }

    thread::scope(|s| {
        let (res_tx, res_rx) = bounded::<(bool, io::Result<C>)>(0);
        let racer_cancel = CancelToken::new();

        {
            let res_tx = res_tx.clone();
            let racer_cancel = racer_cancel.clone();
            s.spawn(move || {
                let res = dial_list(primary, deadline, &racer_cancel);
                // A loser that connected anyway is closed here.
                if let Err(SendError((_, Ok(conn)))) = res_tx.send((true, res)) {
                    drop(conn);
                }
            });
        }

        let start_fallback = || {
            let res_tx = res_tx.clone();
            let racer_cancel = racer_cancel.clone();
            s.spawn(move || {
                let res = dial_list(fallback, deadline, &racer_cancel);
                if let Err(SendError((_, Ok(conn)))) = res_tx.send((false, res)) {
                    drop(conn);
                }
            });
        };

        let fallback_timer = after(fallback_delay);
        let no_timer = never();
        let mut fallback_started = false;
        let mut primary_err: Option<io::Error> = None;
        let mut fallback_err: Option<io::Error> = None;

        loop {
            // The delay timer only participates until the fallback side has
            // been started.
            let timer = if fallback_started {
                &no_timer
            } else {
                &fallback_timer
            };
            select! {
                recv(res_rx) -> msg => {
                    // At least one sender lives on our stack.
                    let (was_primary, res) = msg.unwrap();
                    match res {
                        Ok(conn) => {
                            trace!(
                                "dial won by {} side",
                                if was_primary { "primary" } else { "fallback" }
                            );
                            racer_cancel.cancel();
                            return Ok(conn);
                        }
                        Err(e) if was_primary => {
                            primary_err = Some(e);
                            if !fallback_started {
                                fallback_started = true;
                                start_fallback();
                            }
                        }
                        Err(e) => fallback_err = Some(e),
                    }
                    if primary_err.is_some() && fallback_err.is_some() {
                        // Primary failures are the more relevant report.
                        return Err(primary_err.take().unwrap());
                    }
                }
                recv(timer) -> _ => {
                    fallback_started = true;
                    start_fallback();
                }
                recv(cancel.done()) -> _ => {
                    racer_cancel.cancel();
                    return Err(error::canceled());
                }
            }
        }
    })
}

/// Try each candidate in order, splitting whatever time remains across the
/// candidates left. The first failure is remembered and reported if nothing
/// later succeeds.
fn dial_serial<C, F>(
    addrs: &[SocketAddr],
    deadline: Option<Instant>,
    cancel: &CancelToken,
    dial_one: &F,
) -> io::Result<C>
where
    F: Fn(&SocketAddr, Option<Instant>, &CancelToken) -> io::Result<C>,
{
    let mut first_err: Option<io::Error> = None;
    for (i, candidate) in addrs.iter().enumerate() {
        if cancel.is_canceled() {
            return Err(error::canceled());
        }
        let partial = match partial_deadline(Instant::now(), deadline, addrs.len() - i) {
            Ok(d) => d,
            Err(e) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
                break;
            }
        };
        match dial_one(candidate, partial, cancel) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                trace!("candidate {} failed: {}", candidate, e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
    }
    Err(first_err.unwrap_or_else(error::missing_address))
}

/// Deadline for one candidate when `addrs_remaining` are still to be tried
/// before `deadline`. The budget is divided evenly, but no candidate gets
/// less than [`SANE_MINIMUM`] unless less than that remains overall.
fn partial_deadline(
    now: Instant,
    deadline: Option<Instant>,
    addrs_remaining: usize,
) -> io::Result<Option<Instant>> {
    let deadline = match deadline {
        None => return Ok(None),
        Some(d) => d,
    };
    if deadline <= now {
        return Err(error::timeout());
    }
    let remaining = deadline - now;
    let mut timeout = remaining / addrs_remaining as u32;
    if timeout < SANE_MINIMUM {
        timeout = remaining.min(SANE_MINIMUM);
    }
    Ok(Some(now + timeout))
}

/// Dial one address: create the non-blocking socket, drive the handshake to
/// completion, then apply socket options.
fn dial_single(
    handle: &Handle,
    config: &SocketConfig,
    addr: &SocketAddr,
    deadline: Option<Instant>,
    cancel: &CancelToken,
) -> io::Result<TcpStream> {
    let sock = mio::net::TcpStream::connect(*addr).map_err(|e| error::wrap("connect", e))?;
    let fd = NetFd::new(sock, handle.clone())?;
    fd.connect(deadline, Some(cancel))?;
    let stream = TcpStream::from_netfd(fd);
    config.apply_stream(&stream)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    use std::sync::Arc;

    #[derive(Debug)]
    struct TestConn {
        open: Arc<AtomicUsize>,
    }

    impl TestConn {
        fn open(counter: &Arc<AtomicUsize>) -> TestConn {
            counter.fetch_add(1, SeqCst);
            TestConn {
                open: counter.clone(),
            }
        }
    }

    impl Drop for TestConn {
        fn drop(&mut self) {
            self.open.fetch_sub(1, SeqCst);
        }
    }

    fn addrs(n: usize, v6: bool) -> Vec<SocketAddr> {
        (0..n)
            .map(|i| {
                if v6 {
                    format!("[2001:db8::{}]:80", i + 1).parse().unwrap()
                } else {
                    format!("10.0.0.{}:80", i + 1).parse().unwrap()
                }
            })
            .collect()
    }

    #[test]
    fn partial_deadline_divides_the_budget() {
        let now = Instant::now();
        assert_eq!(partial_deadline(now, None, 3).unwrap(), None);

        // Plenty of time: divided evenly.
        let d = now + Duration::from_secs(12);
        let p = partial_deadline(now, Some(d), 1).unwrap().unwrap();
        assert_eq!(p - now, Duration::from_secs(12));
        let p = partial_deadline(now, Some(d), 2).unwrap().unwrap();
        assert_eq!(p - now, Duration::from_secs(6));
        let p = partial_deadline(now, Some(d), 3).unwrap().unwrap();
        assert_eq!(p - now, Duration::from_secs(4));

        // Division would go below the sane minimum: clamp up to it.
        let d = now + Duration::from_secs(4);
        let p = partial_deadline(now, Some(d), 4).unwrap().unwrap();
        assert_eq!(p - now, Duration::from_secs(2));

        // Less than the minimum remains overall: the candidate gets it all.
        let d = now + Duration::from_millis(500);
        let p = partial_deadline(now, Some(d), 4).unwrap().unwrap();
        assert_eq!(p, d);

        // Already expired.
        let err = partial_deadline(now, Some(now), 1).unwrap_err();
        assert!(crate::error::is_timeout(&err));
    }

    #[test]
    fn serial_prefers_the_first_error() {
        let calls = AtomicUsize::new(0);
        let err = dial_serial(
            &addrs(3, false),
            None,
            &CancelToken::new(),
            &|_: &SocketAddr, _: Option<Instant>, _: &CancelToken| -> io::Result<TestConn> {
                let i = calls.fetch_add(1, SeqCst);
                Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("refused #{}", i),
                ))
            },
        )
        .unwrap_err();
        assert_eq!(calls.load(SeqCst), 3);
        assert_eq!(err.to_string(), "refused #0");
    }

    #[test]
    fn serial_with_no_candidates_reports_missing_address() {
        let dial_one =
            |_: &SocketAddr, _: Option<Instant>, _: &CancelToken| -> io::Result<TestConn> {
                unreachable!()
            };
        let err = dial_serial(&[], None, &CancelToken::new(), &dial_one).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn instant_primary_success_never_starts_fallback() {
        let open = Arc::new(AtomicUsize::new(0));
        let fallback_dialed = AtomicUsize::new(0);
        let conn = dial_parallel(
            &addrs(1, false),
            &addrs(1, true),
            Duration::from_millis(200),
            None,
            &CancelToken::new(),
            &|list: &[SocketAddr], _: Option<Instant>, _: &CancelToken| {
                if list[0].is_ipv6() {
                    fallback_dialed.fetch_add(1, SeqCst);
                }
                Ok(TestConn::open(&open))
            },
        )
        .unwrap();
        assert_eq!(fallback_dialed.load(SeqCst), 0);
        assert_eq!(open.load(SeqCst), 1);
        drop(conn);
        assert_eq!(open.load(SeqCst), 0);
    }

    #[test]
    fn fallback_starts_after_the_delay() {
        let open = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        let conn = dial_parallel(
            &addrs(1, false),
            &addrs(1, true),
            Duration::from_millis(100),
            None,
            &CancelToken::new(),
            &|list: &[SocketAddr], _: Option<Instant>, cancel: &CancelToken| {
                if list[0].is_ipv4() {
                    // The slow side: park until the race is decided.
                    while !cancel.is_canceled() {
                        thread::sleep(Duration::from_millis(5));
                        if start.elapsed() > Duration::from_secs(5) {
                            panic!("racer never canceled");
                        }
                    }
                    return Err(error::canceled());
                }
                Ok(TestConn::open(&open))
            },
        )
        .unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(2000), "{:?}", elapsed);
        drop(conn);
        assert_eq!(open.load(SeqCst), 0);
    }

    #[test]
    fn primary_failure_starts_fallback_immediately() {
        let open = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();
        let _conn = dial_parallel(
            &addrs(1, false),
            &addrs(1, true),
            // Far longer than the test is willing to wait.
            Duration::from_secs(30),
            None,
            &CancelToken::new(),
            &|list: &[SocketAddr], _: Option<Instant>, _: &CancelToken| {
                if list[0].is_ipv4() {
                    return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
                }
                Ok(TestConn::open(&open))
            },
        )
        .unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn both_sides_failing_reports_the_primary_error() {
        let err = dial_parallel(
            &addrs(1, false),
            &addrs(1, true),
            Duration::from_millis(10),
            None,
            &CancelToken::new(),
            &|list: &[SocketAddr], _: Option<Instant>, _: &CancelToken| -> io::Result<TestConn> {
                Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    if list[0].is_ipv4() {
                        "primary refused"
                    } else {
                        "fallback refused"
                    },
                ))
            },
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "primary refused");
    }

    #[test]
    fn slow_loser_is_closed_when_it_finishes() {
        let open = Arc::new(AtomicUsize::new(0));
        let winner = dial_parallel(
            &addrs(1, false),
            &addrs(1, true),
            Duration::from_millis(10),
            None,
            &CancelToken::new(),
            &|list: &[SocketAddr], _: Option<Instant>, _: &CancelToken| {
                if list[0].is_ipv4() {
                    // Lose the race, but connect anyway.
                    thread::sleep(Duration::from_millis(80));
                }
                Ok(TestConn::open(&open))
            },
        )
        .unwrap();
        // Both sides connected; the loser was closed on arrival.
        assert_eq!(open.load(SeqCst), 1);
        drop(winner);
        assert_eq!(open.load(SeqCst), 0);
    }

    #[test]
    fn cancellation_returns_within_a_bounded_delay() {
        let cancel = CancelToken::new();
        let canceler = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceler.cancel();
        });

        let start = Instant::now();
        let err = dial_parallel(
            &addrs(1, false),
            &addrs(1, true),
            Duration::from_secs(30),
            None,
            &cancel,
            &|_: &[SocketAddr], _: Option<Instant>, cancel: &CancelToken| -> io::Result<TestConn> {
                while !cancel.is_canceled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(error::canceled())
            },
        )
        .unwrap_err();
        assert!(crate::error::is_canceled(&err));
        assert!(start.elapsed() < Duration::from_millis(150));
    }
}
