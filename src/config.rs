//! Socket options applied to dialed and accepted connections.

use std::io;

use crate::error;
use crate::tcp::{TcpListener, TcpStream};

/// Options applied to every connection a [`Dialer`] produces.
///
/// Options can be set programmatically or parsed from textual key/value
/// pairs with [`set`].
///
/// [`Dialer`]: crate::Dialer
/// [`set`]: SocketConfig::set
#[derive(Debug, Clone, Default)]
pub struct SocketConfig {
    nodelay: Option<bool>,
    ttl: Option<u32>,
}

impl SocketConfig {
    /// An empty configuration that leaves every option at its OS default.
    pub fn new() -> SocketConfig {
        SocketConfig::default()
    }

    /// Sets `TCP_NODELAY` on the connection.
    pub fn nodelay(mut self, on: bool) -> SocketConfig {
        self.nodelay = Some(on);
        self
    }

    /// Sets `IP_TTL` on the connection.
    pub fn ttl(mut self, ttl: u32) -> SocketConfig {
        self.ttl = Some(ttl);
        self
    }

    /// Set an option by textual key. Unknown keys and unparsable values are
    /// rejected with `InvalidInput`.
    pub fn set(&mut self, key: &str, value: &str) -> io::Result<()> {
        match key {
            "nodelay" => self.nodelay = Some(parse(key, value)?),
            "ttl" => self.ttl = Some(parse(key, value)?),
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown socket option: {}", key),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn apply_stream(&self, stream: &TcpStream) -> io::Result<()> {
        if let Some(on) = self.nodelay {
            stream
                .set_nodelay(on)
                .map_err(|e| error::wrap("set nodelay", e))?;
        }
        if let Some(ttl) = self.ttl {
            stream.set_ttl(ttl).map_err(|e| error::wrap("set ttl", e))?;
        }
        Ok(())
    }

    // Only ttl applies to a listening socket; nodelay is a stream option.
    pub(crate) fn apply_listener(&self, listener: &TcpListener) -> io::Result<()> {
        if let Some(ttl) = self.ttl {
            listener
                .set_ttl(ttl)
                .map_err(|e| error::wrap("set ttl", e))?;
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> io::Result<T> {
    value.parse().map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("bad value for socket option {}: {}", key, value),
        )
    })
}
