//! # Blocking TCP with deadlines, cancellation, and racing dials
//!
//! The types defined in this crate are designed to closely follow the APIs
//! of the analogous types in `std::net`, with three additions the standard
//! library does not offer:
//!
//! - every stream and listener carries per-direction **deadlines** that can
//!   be set, cleared, or forced into the past while an operation is blocked;
//! - a parked operation can be unblocked from another thread by **closing**
//!   the handle or firing a [`CancelToken`];
//! - [`Dialer`] resolves a host to its candidate addresses and **races**
//!   the two address families, always closing the losing connection.
//!
//! All I/O runs over one shared readiness poller owned by a [`Stack`], so a
//! process pays for two background threads no matter how many connections
//! it holds open.
//!
//! ## Examples
//! __TCP Server__
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
//!
//! __Dial with a timeout__
//! ```no_run
//! use std::time::Duration;
//! use parley::Stack;
//!
//! # fn main() -> std::io::Result<()> {
//! let stack = Stack::new()?;
//! let stream = stack.dial_timeout("example.com:80", Duration::from_secs(5))?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs, missing_debug_implementations)]
#![cfg_attr(test, deny(warnings))]

pub mod error;
pub mod tcp;

mod addr;
mod cancel;
mod config;
mod dial;
mod raw;
mod reactor;
mod stack;

#[doc(inline)]
pub use crate::tcp::{TcpListener, TcpStream};

pub use crate::cancel::CancelToken;
pub use crate::config::SocketConfig;
pub use crate::dial::Dialer;
pub use crate::stack::Stack;
