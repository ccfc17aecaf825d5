//! Cooperative coroutines over callback-style sockets
//!
//! - [`Scheduler`]: driver thread stepping registered contexts round-robin
//! - [`YieldContext`]: one coroutine plus its socket operations
//! - [`socket`]: the begin/callback primitives the operations consume
//! - [`net`]: tokio implementations of those primitives

pub mod context;
pub mod net;
pub mod registry;
pub mod scheduler;
pub mod socket;

pub use context::{Coroutine, CoroutineState, Slot, StepResult, YieldContext};
pub use net::{IoRuntime, TokioConnector, TokioResolver, TokioTcpListener, TokioTcpStream};
pub use registry::{Registry, RegistryKey};
pub use scheduler::{Scheduler, SchedulerConfig, WeakScheduler};
pub use socket::{
    AsyncConnector, AsyncListener, AsyncResolver, AsyncStream, Completion, HostEntry,
    SharedStream,
};
