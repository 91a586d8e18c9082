//! Address resolution and candidate-list partitioning.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::error;

/// Resolve `addr` into candidate socket addresses, in resolver order.
pub(crate) fn resolve<A: ToSocketAddrs>(addr: A) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
        .collect();
    if addrs.is_empty() {
        return Err(error::no_suitable_address());
    }
    Ok(addrs)
}

/// Split candidates into a primary list (the family of the first address)
/// and a fallback list (the other family), preserving relative order within
/// each.
pub(crate) fn partition(addrs: Vec<SocketAddr>) -> (Vec<SocketAddr>, Vec<SocketAddr>) {
    let mut primary = Vec::new();
    let mut fallback = Vec::new();
    let lead_v4 = addrs.first().map_or(true, |a| a.is_ipv4());
    for addr in addrs {
        if addr.is_ipv4() == lead_v4 {
            primary.push(addr);
        } else {
            fallback.push(addr);
        }
    }
    (primary, fallback)
}
