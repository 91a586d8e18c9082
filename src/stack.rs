//! The owner of the background threads.

use std::io;
use std::net::ToSocketAddrs;
use std::time::Duration;

use log::debug;

use crate::addr;
use crate::config::SocketConfig;
use crate::dial::Dialer;
use crate::error;
use crate::raw::NetFd;
use crate::reactor::timer::TimerDriver;
use crate::reactor::{Handle, Reactor};
use crate::tcp::{TcpListener, TcpStream};

/// One networking stack: a readiness poller thread plus a deadline timer
/// thread, and the registry of descriptors parked on them.
///
/// Every stream and listener is tied to the `Stack` that created it. Streams
/// may outlive the stack, but once it is dropped their parked operations are
/// unblocked with a "closed" error and no further I/O completes.
///
/// # Examples
///
/// ```no_run
/// use std::io::{Read, Write};
/// use parley::Stack;
///
/// # fn main() -> std::io::Result<()> {
/// let stack = Stack::new()?;
/// let mut stream = stack.dial("example.com:80")?;
/// stream.write_all(b"GET / HTTP/1.0\r\n\r\n")?;
/// let mut body = Vec::new();
/// stream.read_to_end(&mut body)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Stack {
    // Drop order: the reactor goes down first and force-unblocks every
    // registered waiter, then the timer thread is joined. The field is
    // held only for that ordering.
    reactor: Reactor,
    #[allow(dead_code)]
    timers: TimerDriver,
}

impl Stack {
    /// Starts the poller and timer threads.
    pub fn new() -> io::Result<Stack> {
        let timers = TimerDriver::new()?;
        let reactor = Reactor::spawn(timers.handle())?;
        debug!("stack started");
        Ok(Stack { reactor, timers })
    }

    /// Dials `target` with default options. See [`Dialer`] for timeouts,
    /// fallback tuning, cancellation, and socket options.
    pub fn dial<A: ToSocketAddrs>(&self, target: A) -> io::Result<TcpStream> {
        Dialer::default().dial(self, target)
    }

    /// Dials `target`, bounding the whole attempt to `timeout`.
    pub fn dial_timeout<A: ToSocketAddrs>(
        &self,
        target: A,
        timeout: Duration,
    ) -> io::Result<TcpStream> {
        Dialer::default().timeout(timeout).dial(self, target)
    }

    /// Binds a listener to the first workable candidate address.
    pub fn listen<A: ToSocketAddrs>(&self, target: A) -> io::Result<TcpListener> {
        self.listen_with_config(target, &SocketConfig::default())
    }

    /// Binds a listener and applies `config` to the bound socket.
    pub fn listen_with_config<A: ToSocketAddrs>(
        &self,
        target: A,
        config: &SocketConfig,
    ) -> io::Result<TcpListener> {
        let mut first_err: Option<io::Error> = None;
        for candidate in addr::resolve(target)? {
            match mio::net::TcpListener::bind(candidate) {
                Ok(sock) => {
                    let fd = NetFd::new(sock, self.handle())?;
                    let listener = TcpListener::from_netfd(fd);
                    config.apply_listener(&listener)?;
                    return Ok(listener);
                }
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(error::wrap("bind", e));
                    }
                }
            }
        }
        Err(first_err.unwrap_or_else(error::missing_address))
    }

    pub(crate) fn handle(&self) -> Handle {
        self.reactor.handle()
    }
}
