//! Asynchronous socket primitives consumed by [`YieldContext`]
//!
//! Every operation has a begin/callback shape: `begin_*` starts the
//! operation and returns immediately; the completion is invoked later,
//! usually on a worker thread, with the outcome. A `begin_*` that returns
//! `Err` must not invoke its completion.
//!
//! [`YieldContext`]: super::YieldContext

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

/// Callback receiving the outcome of one asynchronous operation
pub type Completion<T> = Box<dyn FnOnce(io::Result<T>) + Send + 'static>;

/// A connected byte stream
pub trait AsyncStream: Send + Sync {
    /// Receive up to `max_len` bytes. An empty buffer signals end of stream.
    fn begin_receive(&self, max_len: usize, done: Completion<Vec<u8>>) -> io::Result<()>;

    /// Send all of `data`, completing with the number of bytes written
    fn begin_send(&self, data: Vec<u8>, done: Completion<usize>) -> io::Result<()>;

    fn is_closed(&self) -> bool;

    fn close(&self);
}

pub type SharedStream = Arc<dyn AsyncStream>;

pub trait AsyncListener: Send + Sync {
    fn begin_accept(&self, done: Completion<(SharedStream, SocketAddr)>) -> io::Result<()>;

    fn is_closed(&self) -> bool;
}

pub trait AsyncConnector: Send + Sync {
    fn begin_connect(&self, addr: SocketAddr, done: Completion<SharedStream>) -> io::Result<()>;
}

pub trait AsyncResolver: Send + Sync {
    fn begin_resolve(&self, host: &str, done: Completion<HostEntry>) -> io::Result<()>;
}

/// Result of a host lookup
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostEntry {
    pub host_name: String,
    pub aliases: Vec<String>,
    pub addresses: Vec<IpAddr>,
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is closed")
}
