pub(crate) mod timer;
pub(crate) mod wait;

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::{Arc, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, trace};
use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;

use self::timer::TimerHandle;
use self::wait::WaitState;

/// The readiness poller.
///
/// One dedicated thread blocks on the foreign event primitive with a short
/// bounded timeout and translates each reported descriptor into ready-flag
/// updates and condvar broadcasts on its wait state. The descriptor registry
/// is owned here and shared with I/O handles through [`Handle`].
pub(crate) struct Reactor {
    inner: Arc<Inner>,
    thread: Option<JoinHandle<()>>,
}

/// A weak reference to the reactor, held by every registered descriptor.
#[derive(Clone)]
pub(crate) struct Handle {
    inner: Weak<Inner>,
}

struct Inner {
    /// Registration half of the foreign event primitive.
    registry: mio::Registry,

    /// ABA guard counter
    next_aba_guard: AtomicUsize,

    /// Dispatch slab for readiness events
    io_dispatch: RwLock<Slab<ScheduledIo>>,

    /// Set to ask the poller thread to exit.
    shutdown: AtomicBool,

    /// Used to interrupt a poll that is mid-wait.
    wakeup: Waker,

    timers: TimerHandle,
}

struct ScheduledIo {
    aba_guard: usize,
    wait: Arc<WaitState>,
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub(crate) enum Direction {
    Read,
    Write,
}

const TOKEN_SHIFT: usize = 22;

// Kind of arbitrary, but this reserves some token space for later usage.
const MAX_SOURCES: usize = (1 << TOKEN_SHIFT) - 1;
const TOKEN_WAKEUP: Token = Token(MAX_SOURCES);

/// Bounded poll timeout so shutdown is observed promptly even without a
/// wakeup.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

// ===== impl Reactor =====

impl Reactor {
    /// Creates the poller and starts its thread, returning any error that
    /// happened during creation. No I/O can proceed without the event
    /// primitive, so a failure here aborts startup.
    pub(crate) fn spawn(timers: TimerHandle) -> io::Result<Reactor> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let wakeup = Waker::new(poll.registry(), TOKEN_WAKEUP)?;

        let inner = Arc::new(Inner {
            registry,
            next_aba_guard: AtomicUsize::new(0),
            io_dispatch: RwLock::new(Slab::with_capacity(1)),
            shutdown: AtomicBool::new(false),
            wakeup,
            timers,
        });

        let thread = {
            let inner = inner.clone();
            thread::Builder::new()
                .name("parley-reactor".into())
                .spawn(move || run(poll, inner))?
        };

        Ok(Reactor {
            inner,
            thread: Some(thread),
        })
    }

    pub(crate) fn handle(&self) -> Handle {
        Handle {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Release);
        let _ = self.inner.wakeup.wake();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Reactor")
    }
}

fn run(mut poll: Poll, inner: Arc<Inner>) {
    let mut events = Events::with_capacity(1024);
    while !inner.shutdown.load(Acquire) {
        match poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("poll failed: {}", e);
                break;
            }
        }

        for event in events.iter() {
            let token = event.token();
            if token == TOKEN_WAKEUP {
                continue;
            }
            trace!("event {:?} {:?}", event, token);
            inner.dispatch(token, event);
        }
    }

    // Force-unblock every descriptor still tracked so no caller stays
    // parked on a poller that no longer runs. The handles themselves are
    // released by their owners.
    let io_dispatch = inner.io_dispatch.read().unwrap();
    for (_, io) in io_dispatch.iter() {
        io.wait.unblock();
    }
}

// ===== impl Handle =====

impl Handle {
    /// Register an I/O source with the reactor, allocating its wait state.
    pub(crate) fn add_source<S: Source>(
        &self,
        source: &mut S,
    ) -> io::Result<(usize, Arc<WaitState>)> {
        match self.inner() {
            Some(inner) => inner.add_source(source),
            None => Err(gone()),
        }
    }

    /// Remove a source from the registry and the event primitive. Does not
    /// fail: a descriptor that was never (or is no longer) registered is
    /// ignored.
    pub(crate) fn drop_source(&self, token: usize, fd: RawFd) {
        if let Some(inner) = self.inner() {
            inner.drop_source(token, fd);
        }
    }

    /// Enable or disable write-event interest for one descriptor. Interest
    /// in writes is demand-driven: a perpetually write-ready handle would
    /// otherwise spin the poller.
    pub(crate) fn set_write_interest(&self, token: usize, fd: RawFd, on: bool) -> io::Result<()> {
        match self.inner() {
            Some(inner) => inner.set_write_interest(token, fd, on),
            None => Err(gone()),
        }
    }

    fn inner(&self) -> Option<Arc<Inner>> {
        self.inner.upgrade()
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle")
    }
}

fn gone() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "reactor has shut down")
}

// ===== impl Inner =====

impl Inner {
    fn add_source<S: Source>(&self, source: &mut S) -> io::Result<(usize, Arc<WaitState>)> {
        // A source registered after the shutdown flag is set would miss the
        // poller's final unblock pass and park forever.
        if self.shutdown.load(Acquire) {
            return Err(gone());
        }

        // Get an ABA guard value
        let aba_guard = self.next_aba_guard.fetch_add(1 << TOKEN_SHIFT, Relaxed) & !MAX_SOURCES;

        let wait = WaitState::new(self.timers.clone());

        let key = {
            let mut io_dispatch = self.io_dispatch.write().unwrap();
            if io_dispatch.len() == MAX_SOURCES {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "reactor at max registered I/O resources",
                ));
            }
            io_dispatch.insert(ScheduledIo {
                aba_guard,
                wait: wait.clone(),
            })
        };

        let token = aba_guard | key;
        if let Err(e) = self.registry.register(
            source,
            Token(token),
            Interest::READABLE | Interest::WRITABLE,
        ) {
            self.io_dispatch.write().unwrap().remove(key);
            return Err(e);
        }

        debug!("adding I/O source: {}", key);
        Ok((token, wait))
    }

    fn drop_source(&self, token: usize, fd: RawFd) {
        let key = token & MAX_SOURCES;
        debug!("dropping I/O source: {}", key);
        {
            let mut io_dispatch = self.io_dispatch.write().unwrap();
            let matches = io_dispatch
                .get(key)
                .map_or(false, |io| io.aba_guard == token & !MAX_SOURCES);
            if matches {
                io_dispatch.remove(key);
            }
        }
        let _ = self.registry.deregister(&mut SourceFd(&fd));
    }

    fn set_write_interest(&self, token: usize, fd: RawFd, on: bool) -> io::Result<()> {
        let interest = if on {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        self.registry
            .reregister(&mut SourceFd(&fd), Token(token), interest)
    }

    fn dispatch(&self, token: Token, event: &mio::event::Event) {
        let aba_guard = token.0 & !MAX_SOURCES;
        let key = token.0 & MAX_SOURCES;

        let io_dispatch = self.io_dispatch.read().unwrap();

        // Closed-while-pending race: silently ignore descriptors that are
        // no longer registered, or whose slot has been reused.
        let io = match io_dispatch.get(key) {
            Some(io) => io,
            None => return,
        };
        if aba_guard != io.aba_guard {
            return;
        }

        if event.is_readable() || event.is_read_closed() || event.is_error() {
            io.wait.ready(Direction::Read);
        }
        if event.is_writable() || event.is_write_closed() || event.is_error() {
            io.wait.ready(Direction::Write);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::timer::TimerDriver;

    #[test]
    fn handle_fails_after_reactor_drop() {
        let timers = TimerDriver::new().unwrap();
        let reactor = Reactor::spawn(timers.handle()).unwrap();
        let handle = reactor.handle();
        drop(reactor);

        let mut listener = mio::net::TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(handle.add_source(&mut listener).is_err());
    }

    #[test]
    fn registration_is_refused_once_shutdown_begins() {
        let timers = TimerDriver::new().unwrap();
        let reactor = Reactor::spawn(timers.handle()).unwrap();
        let handle = reactor.handle();

        // The handle is still upgradeable here, so only the flag can refuse.
        reactor.inner.shutdown.store(true, Release);
        let mut listener = mio::net::TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(handle.add_source(&mut listener).is_err());
    }

    #[test]
    fn shutdown_unblocks_registered_waiters() {
        let timers = TimerDriver::new().unwrap();
        let reactor = Reactor::spawn(timers.handle()).unwrap();
        let handle = reactor.handle();

        let mut listener = mio::net::TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let (_token, wait) = handle.add_source(&mut listener).unwrap();

        let parked = wait.clone();
        let waiter = std::thread::spawn(move || parked.wait(Direction::Read));
        std::thread::sleep(Duration::from_millis(30));
        drop(reactor);

        let err = waiter.join().unwrap().unwrap_err();
        assert!(crate::error::is_closed(&err));
    }
}
