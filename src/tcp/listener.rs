use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use log::trace;

use super::TcpStream;
use crate::error;
use crate::raw::NetFd;
use crate::reactor::wait::Mode;
use crate::reactor::Direction;

/// A TCP socket server, listening for connections.
///
/// A `TcpListener` is created by [`Stack::listen`]. [`accept`] blocks until
/// a connection arrives, the accept deadline expires, or the listener is
/// closed from another thread.
///
/// The socket is closed when the value is dropped.
///
/// [`Stack::listen`]: crate::Stack::listen
/// [`accept`]: TcpListener::accept
///
/// # Examples
///
/// ```no_run
/// use std::io::Write;
/// use parley::Stack;
///
/// fn main() -> std::io::Result<()> {
///     let stack = Stack::new()?;
///     let listener = stack.listen("127.0.0.1:7878")?;
///
///     loop {
///         let (mut stream, peer) = listener.accept()?;
///         println!("connection from {}", peer);
///         stream.write_all(b"Hello, client!")?;
///     }
/// }
/// ```
pub struct TcpListener {
    fd: NetFd<mio::net::TcpListener>,
}

impl TcpListener {
    pub(crate) fn from_netfd(fd: NetFd<mio::net::TcpListener>) -> TcpListener {
        TcpListener { fd }
    }

    /// Accepts one connection, blocking until a peer connects.
    ///
    /// Accepts are serialized: concurrent callers queue on an internal lock.
    /// A connection that is aborted by the peer while it sits in the accept
    /// queue is skipped rather than surfaced as an error.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let _guard = self.fd.lock_read();
        self.fd.prepare(Direction::Read)?;
        loop {
            match self.fd.get_ref().accept() {
                Ok((sock, peer)) => {
                    trace!("accepted connection from {}", peer);
                    let fd = NetFd::new(sock, self.fd.handle())?;
                    return Ok((TcpStream::from_netfd(fd), peer));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.fd.wait_readable()?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionAborted => continue,
                Err(e) => return Err(error::wrap("accept", e)),
            }
        }
    }

    /// Sets the deadline for [`accept`]. `None` clears it. A deadline in
    /// the past unblocks an accept that is already parked.
    ///
    /// [`accept`]: TcpListener::accept
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.fd.set_deadline(deadline, Mode::Read);
    }

    /// Closes the listener, unblocking a parked accept on any thread.
    ///
    /// The first call closes; later calls fail with an error recognized by
    /// [`error::is_closed`].
    ///
    /// [`error::is_closed`]: crate::error::is_closed
    pub fn close(&self) -> io::Result<()> {
        self.fd.close()
    }

    /// Returns the local address that this listener is bound to.
    ///
    /// This can be useful, for example, when binding to port 0 to figure out
    /// which port was actually bound.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.fd.get_ref().local_addr()
    }

    /// Gets the value of the `IP_TTL` option for this socket.
    ///
    /// For more information about this option, see [`set_ttl`].
    ///
    /// [`set_ttl`]: #method.set_ttl
    pub fn ttl(&self) -> io::Result<u32> {
        self.fd.get_ref().ttl()
    }

    /// Sets the value for the `IP_TTL` option on this socket.
    ///
    /// This value sets the time-to-live field that is used in every packet
    /// sent from this socket.
    pub fn set_ttl(&self, ttl: u32) -> io::Result<()> {
        self.fd.get_ref().set_ttl(ttl)
    }
}

impl fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fd.get_ref().fmt(f)
    }
}

#[cfg(unix)]
mod sys {
    use super::TcpListener;
    use std::os::unix::prelude::*;

    impl AsRawFd for TcpListener {
        fn as_raw_fd(&self) -> RawFd {
            self.fd.get_ref().as_raw_fd()
        }
    }
}
