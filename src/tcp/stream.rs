use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Instant;

use crate::raw::NetFd;
use crate::reactor::wait::Mode;

/// A TCP stream between a local and a remote socket.
///
/// A `TcpStream` is created by dialing an endpoint, via [`Stack::dial`] or a
/// [`Dialer`], or by [accepting] a connection from a [listener]. It can be
/// read and written through `std::io::Read` and `std::io::Write`, which are
/// implemented for both `TcpStream` and `&TcpStream` so that a reader and a
/// writer thread can share one connection.
///
/// Calls block, but never indefinitely against the caller's will: each
/// direction carries an optional deadline, and [`close`] unblocks whatever
/// is parked from any thread. A deadline error ([`error::is_timeout`]) is
/// sticky until the deadline is reset; a close error ([`error::is_closed`])
/// is terminal.
///
/// The connection is closed when the value is dropped.
///
/// [`Stack::dial`]: crate::Stack::dial
/// [`Dialer`]: crate::Dialer
/// [accepting]: crate::TcpListener::accept
/// [listener]: crate::TcpListener
/// [`close`]: TcpStream::close
/// [`error::is_timeout`]: crate::error::is_timeout
/// [`error::is_closed`]: crate::error::is_closed
pub struct TcpStream {
    fd: NetFd<mio::net::TcpStream>,
}

impl TcpStream {
    pub(crate) fn from_netfd(fd: NetFd<mio::net::TcpStream>) -> TcpStream {
        TcpStream { fd }
    }

    /// Sets the deadline for both directions. `None` clears it.
    ///
    /// A deadline applies to every current and future operation on the
    /// stream until it is changed again. Setting a deadline in the past
    /// unblocks operations that are already parked.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::io::Read;
    /// use std::time::{Duration, Instant};
    /// use parley::Stack;
    ///
    /// # fn main() -> std::io::Result<()> {
    /// let stack = Stack::new()?;
    /// let mut stream = stack.dial("127.0.0.1:8080")?;
    ///
    /// stream.set_deadline(Some(Instant::now() + Duration::from_secs(5)));
    /// let mut buf = [0; 128];
    /// match stream.read(&mut buf) {
    ///     Err(ref e) if parley::error::is_timeout(e) => println!("no data in 5s"),
    ///     other => { other?; }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.fd.set_deadline(deadline, Mode::Both);
    }

    /// Sets the deadline for reads only.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) {
        self.fd.set_deadline(deadline, Mode::Read);
    }

    /// Sets the deadline for writes only.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) {
        self.fd.set_deadline(deadline, Mode::Write);
    }

    /// Closes the stream, unblocking any operation currently parked on it
    /// from any thread.
    ///
    /// The first call closes; every later call (and every operation after
    /// it) fails with an error recognized by [`error::is_closed`]. Dropping
    /// the stream closes it too.
    ///
    /// [`error::is_closed`]: crate::error::is_closed
    pub fn close(&self) -> io::Result<()> {
        self.fd.close()
    }

    /// Returns the local address that this stream is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.fd.get_ref().local_addr()
    }

    /// Returns the remote address that this stream is connected to.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.fd.get_ref().peer_addr()
    }

    /// Shuts down the read, write, or both halves of this connection.
    ///
    /// This function will cause all pending and future I/O on the specified
    /// portions to return immediately with an appropriate value (see the
    /// documentation of `Shutdown`).
    pub fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        self.fd.get_ref().shutdown(how)
    }

    /// Gets the value of the `TCP_NODELAY` option on this socket.
    ///
    /// For more information about this option, see [`set_nodelay`].
    ///
    /// [`set_nodelay`]: #method.set_nodelay
    pub fn nodelay(&self) -> io::Result<bool> {
        self.fd.get_ref().nodelay()
    }

    /// Sets the value of the `TCP_NODELAY` option on this socket.
    ///
    /// If set, this option disables the Nagle algorithm. This means that
    /// segments are always sent as soon as possible, even if there is only a
    /// small amount of data. When not set, data is buffered until there is a
    /// sufficient amount to send out, thereby avoiding the frequent sending
    /// of small packets.
    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        self.fd.get_ref().set_nodelay(nodelay)
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

// ===== impl Read / Write =====

impl Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fd.read(buf)
    }
}

impl Write for TcpStream {
    /// Writes the whole buffer, blocking between partial transfers. On a
    /// late failure the bytes already written are reported as a short
    /// `Ok(n)`; the error resurfaces on the next call.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.fd.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ===== impl Read / Write for &'a =====

impl<'a> Read for &'a TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.fd.read(buf)
    }
}

impl<'a> Write for &'a TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.fd.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for TcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fd.get_ref().fmt(f)
    }
}

#[cfg(unix)]
mod sys {
    use super::TcpStream;
    use std::os::unix::prelude::*;

    impl AsRawFd for TcpStream {
        fn as_raw_fd(&self) -> RawFd {
            self.fd.get_ref().as_raw_fd()
        }
    }
}
