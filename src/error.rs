//! Error types for the tun stack

use std::io;
use thiserror::Error;

/// Result type alias for stack operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
///
/// Packet parsing never produces one of these: malformed wire bytes are
/// dropped silently and parse functions return `None`. The variants below
/// cover I/O on the packet sink and misuse of the coroutine API.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("an asynchronous operation is already outstanding on this context")]
    OperationPending,

    #[error("coroutine context has been disposed")]
    ContextDisposed,

    #[error("scheduler has been disposed")]
    SchedulerDisposed,

    #[error("coroutine failed: {0}")]
    Coroutine(String),

    #[error("no room for a {needed}-byte header in front of the payload")]
    NoHeaderRoom { needed: usize },
}
