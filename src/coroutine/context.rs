//! Per-coroutine execution state
//!
//! A [`YieldContext`] wraps a [`Coroutine`] body and the bookkeeping that
//! lets the scheduler drive it one step at a time. Socket operations on the
//! context start an asynchronous primitive and park the coroutine; the
//! completion stores its outcome in a caller-supplied [`Slot`] and marks the
//! context ready, and the scheduler's driver thread resumes the body on its
//! next pass. Completions never call into the body themselves.
//!
//! At most one operation may be outstanding per context. A body that
//! returns an error or panics is disposed like one that completed.

use std::any::Any;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::coroutine::scheduler::Shared;
use crate::coroutine::socket::{
    closed_error, AsyncConnector, AsyncListener, AsyncResolver, Completion, HostEntry,
    SharedStream,
};
use crate::error::{Error, Result};

const IDLE: u8 = 0;
const WAITING: u8 = 1;
const WOKEN: u8 = 2;
const DISPOSED: u8 = 3;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// What a coroutine body reports after one resume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// More steps follow
    Yielded,
    /// The body is finished
    Complete,
}

/// Outcome of one [`YieldContext::step`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// The body ran one step and has more to do
    Ready,
    /// An operation is still in flight; the body was not run
    Pending,
    /// The body is finished or the context was disposed
    Done,
}

impl StepResult {
    /// 1, 0 or -1
    pub fn code(self) -> i32 {
        match self {
            StepResult::Ready => 1,
            StepResult::Pending => 0,
            StepResult::Done => -1,
        }
    }
}

/// A coroutine body, written as an explicit state machine
///
/// Each call to `resume` runs the body up to its next suspension point:
/// typically it starts one operation on `cx` and returns `Yielded`; the
/// next `resume` happens after that operation has completed. Returning an
/// error ends the coroutine.
pub trait Coroutine: Send + 'static {
    fn resume(&mut self, cx: &YieldContext) -> Result<CoroutineState>;
}

impl<F> Coroutine for F
where
    F: FnMut(&YieldContext) -> Result<CoroutineState> + Send + 'static,
{
    fn resume(&mut self, cx: &YieldContext) -> Result<CoroutineState> {
        self(cx)
    }
}

/// Output slot an operation's completion writes into
pub struct Slot<T> {
    value: Arc<Mutex<Option<T>>>,
}

impl<T> Slot<T> {
    pub fn new() -> Self {
        Slot {
            value: Arc::new(Mutex::new(None)),
        }
    }

    /// Take the stored outcome, leaving the slot empty
    pub fn take(&self) -> Option<T> {
        self.value.lock().take()
    }

    pub fn is_filled(&self) -> bool {
        self.value.lock().is_some()
    }

    pub(crate) fn put(&self, value: T) {
        *self.value.lock() = Some(value);
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Slot {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct ContextInner {
    id: u64,
    state: AtomicU8,
    /// Held while a completion publishes its result and while disposing,
    /// so no slot is written once `dispose` has returned
    gate: Mutex<()>,
    body: Mutex<Option<Box<dyn Coroutine>>>,
    scheduler: Weak<Shared>,
}

/// Handle to a scheduled coroutine
#[derive(Clone)]
pub struct YieldContext {
    inner: Arc<ContextInner>,
}

impl YieldContext {
    pub(crate) fn new(scheduler: Weak<Shared>, body: Box<dyn Coroutine>) -> Self {
        YieldContext {
            inner: Arc::new(ContextInner {
                id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
                state: AtomicU8::new(IDLE),
                gate: Mutex::new(()),
                body: Mutex::new(Some(body)),
                scheduler,
            }),
        }
    }

    /// A context not attached to any scheduler; the caller drives `step`
    pub fn detached<C: Coroutine>(body: C) -> Self {
        Self::new(Weak::new(), Box::new(body))
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == DISPOSED
    }

    /// Whether an operation is in flight and has not completed yet
    pub fn is_pending(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == WAITING
    }

    /// Run the body for one step if it is not waiting on an operation
    ///
    /// Only the scheduler's driver thread calls this for scheduled
    /// contexts. The body is never entered by two threads at once: a call
    /// that finds the body busy reports `Pending`.
    pub fn step(&self) -> StepResult {
        match self.inner.state.load(Ordering::Acquire) {
            DISPOSED => return StepResult::Done,
            WAITING => return StepResult::Pending,
            WOKEN => {
                let _ = self.inner.state.compare_exchange(
                    WOKEN,
                    IDLE,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
            }
            _ => {}
        }

        let mut guard = match self.inner.body.try_lock() {
            Some(guard) => guard,
            None => return StepResult::Pending,
        };
        if self.is_disposed() {
            *guard = None;
            return StepResult::Done;
        }
        let body = match guard.as_mut() {
            Some(body) => body,
            None => return StepResult::Done,
        };

        let resumed = panic::catch_unwind(AssertUnwindSafe(|| body.resume(self)))
            .unwrap_or_else(|payload| Err(Error::Coroutine(panic_message(&*payload))));

        match resumed {
            Ok(CoroutineState::Yielded) => {
                if self.is_disposed() {
                    *guard = None;
                    return StepResult::Done;
                }
                StepResult::Ready
            }
            Ok(CoroutineState::Complete) => {
                *guard = None;
                drop(guard);
                trace!(context = self.id(), "coroutine completed");
                self.dispose();
                StepResult::Done
            }
            Err(e) => {
                *guard = None;
                drop(guard);
                warn!(context = self.id(), error = %e, "coroutine failed");
                self.dispose();
                StepResult::Done
            }
        }
    }

    /// Stop the coroutine and unregister it
    ///
    /// Safe from any thread, including from inside the body. Completions
    /// that fire afterwards leave their slots untouched.
    pub fn dispose(&self) {
        let previous = {
            let _gate = self.inner.gate.lock();
            self.inner.state.swap(DISPOSED, Ordering::AcqRel)
        };
        if previous == DISPOSED {
            return;
        }
        // If the body is running right now, `step` clears it on return.
        if let Some(mut body) = self.inner.body.try_lock() {
            *body = None;
        }
        if let Some(scheduler) = self.inner.scheduler.upgrade() {
            scheduler.remove_id(self.id());
        }
    }

    /// Receive up to `max_len` bytes; a short read is reported as is
    ///
    /// Returns `Ok(false)` when the operation failed to start (the failure
    /// is already in `slot` and the coroutine will be resumed with it).
    pub fn receive(
        &self,
        stream: &SharedStream,
        max_len: usize,
        slot: &Slot<io::Result<Vec<u8>>>,
    ) -> Result<bool> {
        self.start(slot, |done| {
            if stream.is_closed() {
                return Err(closed_error());
            }
            stream.begin_receive(max_len, done)
        })
    }

    /// Receive exactly `len` bytes
    ///
    /// Partial receives are accumulated without resuming the coroutine. The
    /// slot receives the full buffer, a shorter one if the peer closed the
    /// stream first, or the error that interrupted the read.
    pub fn read(
        &self,
        stream: &SharedStream,
        len: usize,
        slot: &Slot<io::Result<Vec<u8>>>,
    ) -> Result<bool> {
        self.start(slot, |done| {
            if stream.is_closed() {
                return Err(closed_error());
            }
            let read = Arc::new(Mutex::new(ReadExact {
                stream: Arc::clone(stream),
                buffer: Vec::with_capacity(len),
                len,
                done: Some(done),
            }));
            ReadExact::issue(&read)
        })
    }

    pub fn send(
        &self,
        stream: &SharedStream,
        data: Vec<u8>,
        slot: &Slot<io::Result<usize>>,
    ) -> Result<bool> {
        self.start(slot, |done| {
            if stream.is_closed() {
                return Err(closed_error());
            }
            stream.begin_send(data, done)
        })
    }

    /// Alias of [`send`](Self::send)
    pub fn write(
        &self,
        stream: &SharedStream,
        data: Vec<u8>,
        slot: &Slot<io::Result<usize>>,
    ) -> Result<bool> {
        self.send(stream, data, slot)
    }

    pub fn connect(
        &self,
        connector: &Arc<dyn AsyncConnector>,
        addr: SocketAddr,
        slot: &Slot<io::Result<SharedStream>>,
    ) -> Result<bool> {
        self.start(slot, |done| connector.begin_connect(addr, done))
    }

    pub fn accept(
        &self,
        listener: &Arc<dyn AsyncListener>,
        slot: &Slot<io::Result<(SharedStream, SocketAddr)>>,
    ) -> Result<bool> {
        self.start(slot, |done| {
            if listener.is_closed() {
                return Err(closed_error());
            }
            listener.begin_accept(done)
        })
    }

    pub fn resolve_addresses(
        &self,
        resolver: &Arc<dyn AsyncResolver>,
        host: &str,
        slot: &Slot<io::Result<Vec<IpAddr>>>,
    ) -> Result<bool> {
        self.start(slot, |done| {
            resolver.begin_resolve(
                host,
                Box::new(move |result: io::Result<HostEntry>| {
                    done(result.map(|entry| entry.addresses))
                }),
            )
        })
    }

    pub fn resolve_host_entry(
        &self,
        resolver: &Arc<dyn AsyncResolver>,
        host: &str,
        slot: &Slot<io::Result<HostEntry>>,
    ) -> Result<bool> {
        self.start(slot, |done| resolver.begin_resolve(host, done))
    }

    /// Mark the context as waiting and start one operation
    fn start<T, F>(&self, slot: &Slot<io::Result<T>>, begin: F) -> Result<bool>
    where
        T: Send + 'static,
        F: FnOnce(Completion<T>) -> io::Result<()>,
    {
        match self.inner.state.compare_exchange(
            IDLE,
            WAITING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(DISPOSED) => return Err(Error::ContextDisposed),
            Err(_) => return Err(Error::OperationPending),
        }

        match begin(self.completion(slot.clone())) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.deliver(slot, Err(e));
                Ok(false)
            }
        }
    }

    fn completion<T: Send + 'static>(&self, slot: Slot<io::Result<T>>) -> Completion<T> {
        let weak = Arc::downgrade(&self.inner);
        Box::new(move |result| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            YieldContext { inner }.deliver(&slot, result);
        })
    }

    /// Publish an outcome and flag the context ready
    ///
    /// Does nothing unless the context is waiting. The slot write and the
    /// `WAITING -> WOKEN` transition happen under the gate, so a concurrent
    /// `dispose` either precedes both or follows both.
    fn deliver<T>(&self, slot: &Slot<io::Result<T>>, result: io::Result<T>) {
        {
            let _gate = self.inner.gate.lock();
            if self.inner.state.load(Ordering::Acquire) != WAITING {
                return;
            }
            slot.put(result);
            self.inner.state.store(WOKEN, Ordering::Release);
        }
        if let Some(scheduler) = self.inner.scheduler.upgrade() {
            scheduler.notify();
        }
    }
}

impl std::fmt::Debug for YieldContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YieldContext")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state.load(Ordering::Relaxed))
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("body panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("body panicked: {}", message)
    } else {
        "body panicked".to_string()
    }
}

/// Receive loop behind [`YieldContext::read`]
struct ReadExact {
    stream: SharedStream,
    buffer: Vec<u8>,
    len: usize,
    done: Option<Completion<Vec<u8>>>,
}

impl ReadExact {
    fn issue(read: &Arc<Mutex<ReadExact>>) -> io::Result<()> {
        let (stream, want) = {
            let state = read.lock();
            (Arc::clone(&state.stream), state.len - state.buffer.len())
        };
        let next = Arc::clone(read);
        stream.begin_receive(want, Box::new(move |result| Self::on_chunk(next, result)))
    }

    fn on_chunk(read: Arc<Mutex<ReadExact>>, result: io::Result<Vec<u8>>) {
        let finished = {
            let mut state = read.lock();
            match result {
                Ok(chunk) if chunk.is_empty() => Some(Ok(std::mem::take(&mut state.buffer))),
                Ok(chunk) => {
                    state.buffer.extend_from_slice(&chunk);
                    if state.buffer.len() >= state.len {
                        Some(Ok(std::mem::take(&mut state.buffer)))
                    } else {
                        None
                    }
                }
                Err(e) => Some(Err(e)),
            }
        };

        let outcome = match finished {
            Some(outcome) => outcome,
            None => match Self::issue(&read) {
                Ok(()) => return,
                Err(e) => Err(e),
            },
        };

        let done = read.lock().done.take();
        if let Some(done) = done {
            done(outcome);
        }
    }
}
