//! The blocking I/O adapter.
//!
//! [`NetFd`] owns one non-blocking transport handle and its wait state, and
//! wraps each native operation in a retry loop: attempt, and on the
//! would-block sentinel park on the wait state until the poller (or a
//! deadline timer) wakes the caller. Would-block is never surfaced past this
//! module.

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, select};
use log::trace;
use mio::event::Source;

use crate::cancel::CancelToken;
use crate::error;
use crate::reactor::wait::{Mode, WaitState};
use crate::reactor::{Direction, Handle};

pub(crate) struct NetFd<S: Source + AsRawFd> {
    io: S,
    token: usize,
    wait: Arc<WaitState>,
    handle: Handle,
    // Serialize readers and writers separately, like the accept/read and
    // connect/write paths expect.
    read_lock: Mutex<()>,
    write_lock: Mutex<()>,
}

impl<S: Source + AsRawFd> NetFd<S> {
    /// Register `io` with the reactor, creating its wait state.
    pub(crate) fn new(mut io: S, handle: Handle) -> io::Result<NetFd<S>> {
        let (token, wait) = handle.add_source(&mut io)?;
        Ok(NetFd {
            io,
            token,
            wait,
            handle,
            read_lock: Mutex::new(()),
            write_lock: Mutex::new(()),
        })
    }

    pub(crate) fn get_ref(&self) -> &S {
        &self.io
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub(crate) fn set_deadline(&self, t: Option<Instant>, mode: Mode) {
        self.wait.set_deadline(t, mode);
    }

    pub(crate) fn prepare(&self, dir: Direction) -> io::Result<()> {
        self.wait.prepare(dir)
    }

    pub(crate) fn lock_read(&self) -> MutexGuard<'_, ()> {
        self.read_lock.lock().unwrap()
    }

    pub(crate) fn wait_readable(&self) -> io::Result<()> {
        self.wait.wait(Direction::Read)
    }

    /// Park until writable. Write interest is enabled only for the duration
    /// of the wait.
    pub(crate) fn wait_writable(&self) -> io::Result<()> {
        self.handle
            .set_write_interest(self.token, self.io.as_raw_fd(), true)?;
        let res = self.wait.wait(Direction::Write);
        let _ = self
            .handle
            .set_write_interest(self.token, self.io.as_raw_fd(), false);
        res
    }

    /// Wake any parked waiter, then deregister from the poller. Idempotent:
    /// the second close reports a "closed" error and changes nothing.
    ///
    /// The underlying handle stays open until the `NetFd` is dropped, so an
    /// I/O call racing with close observes the closing flag rather than a
    /// dangling descriptor.
    pub(crate) fn close(&self) -> io::Result<()> {
        if !self.wait.unblock() {
            return Err(error::closed());
        }
        self.handle.drop_source(self.token, self.io.as_raw_fd());
        Ok(())
    }

    pub(crate) fn read(&self, buf: &mut [u8]) -> io::Result<usize>
    where
        for<'a> &'a S: Read,
    {
        let _guard = self.read_lock.lock().unwrap();
        // A zero-byte read returns without trying, so that the native call's
        // 0 cannot be mistaken for end-of-stream.
        if buf.is_empty() {
            return Ok(0);
        }
        self.wait.prepare(Direction::Read)?;
        loop {
            match (&self.io).read(buf) {
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait.wait(Direction::Read)?;
                }
                Ok(n) => return Ok(n),
                Err(e) => return Err(error::wrap("read", e)),
            }
        }
    }

    /// Write the whole buffer, parking between partial transfers. Progress
    /// already made is reported even when a later retry fails; the failure
    /// resurfaces on the next call through `prepare`.
    pub(crate) fn write(&self, buf: &[u8]) -> io::Result<usize>
    where
        for<'a> &'a S: Write,
    {
        let _guard = self.write_lock.lock().unwrap();
        self.wait.prepare(Direction::Write)?;
        let mut nn = 0;
        loop {
            match (&self.io).write(&buf[nn..]) {
                Ok(n) => {
                    nn += n;
                    if nn == buf.len() {
                        return Ok(nn);
                    }
                    if n == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "write returned zero bytes",
                        ));
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if let Err(e) = self.wait_writable() {
                        return if nn > 0 { Ok(nn) } else { Err(e) };
                    }
                }
                Err(e) => {
                    return if nn > 0 {
                        Ok(nn)
                    } else {
                        Err(error::wrap("write", e))
                    };
                }
            }
        }
    }
}

impl<S: Source + AsRawFd> Drop for NetFd<S> {
    fn drop(&mut self) {
        // Waiters are woken before the handle itself is released below.
        let _ = self.close();
    }
}

impl<S: Source + AsRawFd> std::fmt::Debug for NetFd<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NetFd {{ token: {} }}", self.token)
    }
}

// ===== connect =====

impl NetFd<mio::net::TcpStream> {
    /// Drive a non-blocking connect to completion.
    ///
    /// Writability alone does not mean the handshake succeeded, so the loop
    /// alternates wait-for-write-ready with a connection-state query until
    /// the socket is connected, failed, or the deadline/cancellation fires.
    pub(crate) fn connect(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> io::Result<()> {
        if let Some(d) = deadline {
            self.wait.set_deadline(Some(d), Mode::Write);
        }
        let ret = self.connect_loop(cancel);
        self.wait.set_deadline(None, Mode::Write);
        ret
    }

    fn connect_loop(&self, cancel: Option<&CancelToken>) -> io::Result<()> {
        match self.probe_connected() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => return Err(e),
        }

        thread::scope(|s| {
            let (done_tx, done_rx) = bounded::<()>(0);
            let (verdict_tx, verdict_rx) = bounded::<Option<io::Error>>(1);

            // The interrupter waits for the cancellation signal and breaks
            // the connect out of its write wait by forcing the write
            // deadline into the past.
            if let Some(token) = cancel {
                let wait = self.wait.clone();
                let token = token.clone();
                s.spawn(move || {
                    select! {
                        recv(token.done()) -> _ => {
                            trace!("connect interrupted by cancellation");
                            wait.set_deadline(Some(Instant::now()), Mode::Write);
                            let _ = verdict_tx.send(Some(error::canceled()));
                        }
                        recv(done_rx) -> _ => {
                            let _ = verdict_tx.send(None);
                        }
                    }
                });
            }

            let mut ret = loop {
                if let Err(e) = self.wait_writable() {
                    break Err(match cancel {
                        Some(token) if token.is_canceled() => error::canceled(),
                        _ => e,
                    });
                }
                match self.probe_connected() {
                    Ok(true) => break Ok(()),
                    Ok(false) => continue,
                    Err(e) => break Err(e),
                }
            };

            drop(done_tx);
            if cancel.is_some() {
                if let Ok(Some(cancel_err)) = verdict_rx.recv() {
                    if ret.is_ok() {
                        // The interrupter poisoned the write deadline, but
                        // the socket finished connecting first. The caller
                        // has already discarded this dial, so report the
                        // cancellation rather than hand back a connection
                        // nobody owns.
                        ret = Err(cancel_err);
                    }
                }
            }
            ret
        })
    }

    /// Query the connection state: `Ok(true)` connected, `Ok(false)` still
    /// in progress, `Err` failed.
    fn probe_connected(&self) -> io::Result<bool> {
        if let Some(e) = self.io.take_error()? {
            return Err(error::wrap("connect", e));
        }
        match self.io.peer_addr() {
            Ok(_) => Ok(true),
            Err(ref e)
                if e.kind() == io::ErrorKind::NotConnected
                    || e.raw_os_error() == Some(libc::EINPROGRESS) =>
            {
                Ok(false)
            }
            Err(e) => Err(error::wrap("connect", e)),
        }
    }
}
