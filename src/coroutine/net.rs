//! Tokio-backed socket primitives
//!
//! Each `begin_*` call spawns one task on the I/O runtime and invokes the
//! completion from that task. Pending reads and accepts are parked futures,
//! not blocked threads, so any number of idle connections can wait at once.
//! Closing a stream or listener cancels its in-flight operations with a
//! `NotConnected` error.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace};

use crate::coroutine::socket::{
    closed_error, AsyncConnector, AsyncListener, AsyncResolver, AsyncStream, Completion,
    HostEntry, SharedStream,
};

/// Runtime that completes socket operations for coroutine contexts
///
/// Either owns a multi-threaded tokio runtime or borrows the handle of one
/// the caller already runs. Operations started after an owned runtime has
/// been dropped never complete.
pub struct IoRuntime {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl IoRuntime {
    /// Four threads per available core, counting at least two cores
    pub fn default_threads() -> usize {
        let cores = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores.max(2) * 4
    }

    pub fn new(worker_threads: usize) -> io::Result<Self> {
        let worker_threads = worker_threads.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads)
            .thread_name("socket-io")
            .enable_all()
            .build()?;
        debug!(worker_threads, "socket runtime started");
        Ok(IoRuntime {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    /// Use a runtime owned elsewhere
    pub fn from_handle(handle: Handle) -> Self {
        IoRuntime {
            runtime: None,
            handle,
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Bind a listener on this runtime
    pub fn bind(&self, addr: SocketAddr) -> io::Result<TokioTcpListener> {
        let listener = std::net::TcpListener::bind(addr)?;
        TokioTcpListener::from_std(listener, self.handle.clone())
    }

    pub fn connector(&self) -> TokioConnector {
        TokioConnector::new(self.handle.clone())
    }

    pub fn resolver(&self) -> TokioResolver {
        TokioResolver::new(self.handle.clone())
    }
}

impl Drop for IoRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for IoRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoRuntime")
            .field("owned", &self.runtime.is_some())
            .finish()
    }
}

/// Resolves once `closed` turns true or its sender is gone
async fn closed_signal(mut closed: watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

/// Run `operation` unless `closed` fires first
async fn until_closed<T, F>(closed: watch::Receiver<bool>, operation: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::select! {
        result = operation => result,
        _ = closed_signal(closed) => Err(closed_error()),
    }
}

/// TCP stream driven by the I/O runtime
///
/// Reads and writes use separate halves, so one receive and one send may
/// be outstanding at the same time.
pub struct TokioTcpStream {
    reader: Arc<Mutex<OwnedReadHalf>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    closed: watch::Sender<bool>,
    handle: Handle,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl TokioTcpStream {
    pub fn new(stream: TcpStream, handle: Handle) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Ok(TokioTcpStream {
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            closed,
            handle,
            peer_addr,
            local_addr,
        })
    }

    pub fn shared(stream: TcpStream, handle: Handle) -> io::Result<SharedStream> {
        Ok(Arc::new(Self::new(stream, handle)?))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl AsyncStream for TokioTcpStream {
    fn begin_receive(&self, max_len: usize, done: Completion<Vec<u8>>) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let reader = Arc::clone(&self.reader);
        let closed = self.closed.subscribe();
        self.handle.spawn(async move {
            let mut buffer = vec![0u8; max_len];
            let read = until_closed(closed, async {
                reader.lock().await.read(&mut buffer).await
            })
            .await;
            done(read.map(|n| {
                buffer.truncate(n);
                buffer
            }));
        });
        Ok(())
    }

    fn begin_send(&self, data: Vec<u8>, done: Completion<usize>) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let writer = Arc::clone(&self.writer);
        let closed = self.closed.subscribe();
        self.handle.spawn(async move {
            let written = until_closed(closed, async {
                writer.lock().await.write_all(&data).await?;
                Ok::<_, io::Error>(data.len())
            })
            .await;
            done(written);
        });
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let writer = Arc::clone(&self.writer);
        let peer = self.peer_addr;
        self.handle.spawn(async move {
            if let Err(e) = writer.lock().await.shutdown().await {
                trace!(%peer, error = %e, "stream shutdown failed");
            }
        });
    }
}

/// TCP listener driven by the I/O runtime
pub struct TokioTcpListener {
    listener: Arc<TcpListener>,
    closed: watch::Sender<bool>,
    handle: Handle,
    local_addr: SocketAddr,
}

impl TokioTcpListener {
    pub fn from_std(listener: std::net::TcpListener, handle: Handle) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        let listener = {
            let _entered = handle.enter();
            TcpListener::from_std(listener)?
        };
        let local_addr = listener.local_addr()?;
        let (closed, _) = watch::channel(false);
        Ok(TokioTcpListener {
            listener: Arc::new(listener),
            closed,
            handle,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Refuse further accepts and cancel a pending one
    pub fn close(&self) {
        self.closed.send_replace(true);
    }
}

impl AsyncListener for TokioTcpListener {
    fn begin_accept(&self, done: Completion<(SharedStream, SocketAddr)>) -> io::Result<()> {
        if self.is_closed() {
            return Err(closed_error());
        }
        let listener = Arc::clone(&self.listener);
        let closed = self.closed.subscribe();
        let handle = self.handle.clone();
        self.handle.spawn(async move {
            let accepted = until_closed(closed, async {
                let (stream, peer) = listener.accept().await?;
                trace!(%peer, "connection accepted");
                Ok::<_, io::Error>((TokioTcpStream::shared(stream, handle)?, peer))
            })
            .await;
            done(accepted);
        });
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Outbound TCP connector
pub struct TokioConnector {
    handle: Handle,
    timeout: Option<Duration>,
}

impl TokioConnector {
    pub fn new(handle: Handle) -> Self {
        TokioConnector {
            handle,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl AsyncConnector for TokioConnector {
    fn begin_connect(&self, addr: SocketAddr, done: Completion<SharedStream>) -> io::Result<()> {
        let handle = self.handle.clone();
        let timeout = self.timeout;
        self.handle.spawn(async move {
            let connected = match timeout {
                Some(limit) => match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
                    Ok(connected) => connected,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out", addr),
                    )),
                },
                None => TcpStream::connect(addr).await,
            };
            done(connected.and_then(|stream| TokioTcpStream::shared(stream, handle)));
        });
        Ok(())
    }
}

/// Host lookup through the system resolver
pub struct TokioResolver {
    handle: Handle,
}

impl TokioResolver {
    pub fn new(handle: Handle) -> Self {
        TokioResolver { handle }
    }

    /// Addresses deduplicated in resolver order
    pub async fn lookup(host: &str) -> io::Result<HostEntry> {
        let mut addresses: Vec<IpAddr> = Vec::new();
        for addr in tokio::net::lookup_host((host, 0)).await? {
            if !addresses.contains(&addr.ip()) {
                addresses.push(addr.ip());
            }
        }
        Ok(HostEntry {
            host_name: host.to_string(),
            aliases: Vec::new(),
            addresses,
        })
    }
}

impl AsyncResolver for TokioResolver {
    fn begin_resolve(&self, host: &str, done: Completion<HostEntry>) -> io::Result<()> {
        let host = host.to_string();
        self.handle.spawn(async move { done(Self::lookup(&host).await) });
        Ok(())
    }
}
