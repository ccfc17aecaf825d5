//! A TCP echo server driven by the coroutine scheduler
//!
//! One acceptor coroutine hands every connection to a fresh echo coroutine.
//! Socket calls complete on a tokio runtime; the coroutines themselves only
//! ever run on the scheduler's driver thread.
//!
//! To run this example:
//!
//! ```sh
//! cargo run --example coroutine_echo -- 127.0.0.1:7007
//! nc 127.0.0.1 7007
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};
use tunstack::coroutine::{
    AsyncListener, Coroutine, CoroutineState, IoRuntime, Scheduler, SharedStream, Slot,
    WeakScheduler, YieldContext,
};
use tunstack::{Error, Result};

mod utils;
use utils::network::init_logging;

const CHUNK: usize = 4096;

struct Acceptor {
    listener: Arc<dyn AsyncListener>,
    scheduler: WeakScheduler,
    accepted: Slot<io::Result<(SharedStream, SocketAddr)>>,
}

impl Coroutine for Acceptor {
    fn resume(&mut self, cx: &YieldContext) -> Result<CoroutineState> {
        if let Some(accepted) = self.accepted.take() {
            let (stream, peer) = accepted?;
            info!(%peer, "client connected");
            let scheduler = self.scheduler.upgrade().ok_or(Error::SchedulerDisposed)?;
            scheduler.run(Echo::new(stream, peer))?;
        }
        // A failed start leaves its error in the slot for the next step
        cx.accept(&self.listener, &self.accepted)?;
        Ok(CoroutineState::Yielded)
    }
}

enum EchoState {
    Receive,
    Received,
    Sent,
}

struct Echo {
    stream: SharedStream,
    peer: SocketAddr,
    state: EchoState,
    received: Slot<io::Result<Vec<u8>>>,
    sent: Slot<io::Result<usize>>,
}

impl Echo {
    fn new(stream: SharedStream, peer: SocketAddr) -> Self {
        Echo {
            stream,
            peer,
            state: EchoState::Receive,
            received: Slot::new(),
            sent: Slot::new(),
        }
    }

    fn finish(&self) -> Result<CoroutineState> {
        info!(peer = %self.peer, "client disconnected");
        self.stream.close();
        Ok(CoroutineState::Complete)
    }
}

impl Coroutine for Echo {
    fn resume(&mut self, cx: &YieldContext) -> Result<CoroutineState> {
        match self.state {
            EchoState::Receive => {
                cx.receive(&self.stream, CHUNK, &self.received)?;
                self.state = EchoState::Received;
            }
            EchoState::Received => {
                let data = match self.received.take() {
                    Some(Ok(data)) if !data.is_empty() => data,
                    Some(Err(e)) => {
                        debug!(peer = %self.peer, error = %e, "receive failed");
                        return self.finish();
                    }
                    _ => return self.finish(),
                };
                cx.send(&self.stream, data, &self.sent)?;
                self.state = EchoState::Sent;
            }
            EchoState::Sent => {
                let sent = self
                    .sent
                    .take()
                    .ok_or_else(|| Error::Coroutine("send slot empty".into()))?;
                if let Err(e) = sent {
                    debug!(peer = %self.peer, error = %e, "send failed");
                    return self.finish();
                }
                cx.receive(&self.stream, CHUNK, &self.received)?;
                self.state = EchoState::Received;
            }
        }
        Ok(CoroutineState::Yielded)
    }
}

fn main() -> Result<()> {
    init_logging();

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7007".to_string())
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let runtime = IoRuntime::new(IoRuntime::default_threads())?;
    let listener = runtime.bind(addr)?;
    info!(addr = %listener.local_addr(), "echo server listening");

    let scheduler = Scheduler::new();
    scheduler.run(Acceptor {
        listener: Arc::new(listener),
        scheduler: scheduler.downgrade(),
        accepted: Slot::new(),
    })?;

    while scheduler.is_running() {
        thread::sleep(Duration::from_secs(1));
    }
    Ok(())
}
