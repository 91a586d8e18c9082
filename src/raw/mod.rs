//! Raw blocking adapter over the non-blocking transport.

mod fd;

pub(crate) use self::fd::NetFd;
