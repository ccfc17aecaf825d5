//! Helpers shared by the demos: TUN device setup and logging.

pub mod network;

pub use network::*;
