//! Blocking TCP bindings with per-direction deadlines.
//!
//! This module contains the TCP networking types, similar to those found in
//! `std::net`, but backed by a shared readiness poller and extended with
//! deadlines that can be set, reset, and even forced into the past while an
//! operation is blocked.
//!
//! - To connect to an address, use [`Stack::dial`] or a [`Dialer`].
//! - To listen for TCP connections, use [`Stack::listen`] and then
//!   [`TcpListener::accept`].
//! - Once you have a [`TcpStream`], `std::io::Read` and `std::io::Write`
//!   work on it from any thread; a deadline or a concurrent close unblocks
//!   a parked operation.
//!
//! [`Stack::dial`]: crate::Stack::dial
//! [`Stack::listen`]: crate::Stack::listen
//! [`Dialer`]: crate::Dialer
//!
//! # Example
//!
//! ```no_run
//! use std::io::Write;
//! use parley::Stack;
//!
//! fn main() -> std::io::Result<()> {
//!     let stack = Stack::new()?;
//!     let listener = stack.listen("127.0.0.1:7878")?;
//!
//!     // accept connections and process them serially
//!     loop {
//!         let (mut stream, _peer) = listener.accept()?;
//!         stream.write_all(b"Hello, client!")?;
//!     }
//! }
//! ```

mod listener;
mod stream;

pub use self::listener::TcpListener;
pub use self::stream::TcpStream;
