//! Cooperative coroutine scheduler
//!
//! One dedicated driver thread per scheduler walks the registry round-robin
//! and steps each context. Contexts waiting on an operation report
//! `Pending` and are skipped; finished ones are removed. Completion
//! callbacks only flag their context and unpark the driver.
//!
//! The registry, its id lookup and the cursor sit behind one mutex. The
//! driver takes it only to pick the next context, never while a body runs,
//! so bodies may spawn or dispose coroutines freely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, Thread};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::coroutine::context::{Coroutine, StepResult, YieldContext};
use crate::coroutine::registry::{Registry, RegistryKey};
use crate::error::{Error, Result};

/// How long the driver parks when nothing is registered
const EMPTY_PARK: Duration = Duration::from_millis(100);

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum number of steps attempted per pass
    pub min_pass_len: usize,
    /// Pause between passes
    pub idle_interval: Duration,
    /// Name of the driver thread
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_pass_len: 10,
            idle_interval: Duration::from_millis(1),
            thread_name: "yield-scheduler".to_string(),
        }
    }
}

impl SchedulerConfig {
    pub fn min_pass_len(mut self, len: usize) -> Self {
        self.min_pass_len = len;
        self
    }

    pub fn idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

#[derive(Default)]
struct RegistryState {
    contexts: Registry<YieldContext>,
    lookup: HashMap<u64, RegistryKey>,
}

pub(crate) struct Shared {
    config: SchedulerConfig,
    state: Mutex<RegistryState>,
    running: AtomicBool,
    disposed: AtomicBool,
    driver: Mutex<Option<Thread>>,
}

impl Shared {
    pub(crate) fn remove_id(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        match state.lookup.remove(&id) {
            Some(key) => state.contexts.remove(key).is_some(),
            None => false,
        }
    }

    /// Wake the driver for an early pass
    pub(crate) fn notify(&self) {
        if let Some(driver) = self.driver.lock().as_ref() {
            driver.unpark();
        }
    }
}

/// Handle to a coroutine scheduler
///
/// Clones share one registry and one driver thread. The driver stops once
/// [`dispose`](Scheduler::dispose) is called or every handle is dropped.
///
/// Registered bodies are owned by the scheduler, so a body holding a
/// `Scheduler` clone keeps it alive until it completes or `dispose` is
/// called. Bodies that spawn further coroutines should hold a
/// [`WeakScheduler`] instead.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Handle that does not keep the scheduler alive
    pub fn downgrade(&self) -> WeakScheduler {
        WeakScheduler {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Scheduler {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(RegistryState::default()),
                running: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                driver: Mutex::new(None),
            }),
        }
    }

    /// Wrap `body` in a new context and schedule it
    pub fn run<C: Coroutine>(&self, body: C) -> Result<YieldContext> {
        let context = YieldContext::new(Arc::downgrade(&self.shared), Box::new(body));
        self.add(&context)?;
        Ok(context)
    }

    /// Register `context` at the tail of the round-robin order
    ///
    /// Starts the driver thread on first use. Returns `Ok(false)` if the
    /// context is already registered.
    pub fn add(&self, context: &YieldContext) -> Result<bool> {
        if self.is_disposed() {
            return Err(Error::SchedulerDisposed);
        }
        if context.is_disposed() {
            return Err(Error::ContextDisposed);
        }

        {
            let mut state = self.shared.state.lock();
            if state.lookup.contains_key(&context.id()) {
                return Ok(false);
            }
            let key = state.contexts.push_back(context.clone());
            state.lookup.insert(context.id(), key);
        }

        self.ensure_driver()?;
        self.shared.notify();
        Ok(true)
    }

    /// Unregister `context` without disposing it
    pub fn remove(&self, context: &YieldContext) -> bool {
        self.shared.remove_id(context.id())
    }

    pub fn contains(&self, context: &YieldContext) -> bool {
        self.shared.state.lock().lookup.contains_key(&context.id())
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the driver thread is alive
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Stop the driver and dispose every registered context
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let contexts = {
            let mut state = self.shared.state.lock();
            state.lookup.clear();
            state.contexts.drain()
        };
        for context in contexts {
            context.dispose();
        }
        self.shared.notify();
        debug!(thread = %self.shared.config.thread_name, "scheduler disposed");
    }

    fn ensure_driver(&self) -> Result<()> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.shared.config.thread_name.clone())
            .spawn(move || drive(weak));

        match spawned {
            Ok(handle) => {
                *self.shared.driver.lock() = Some(handle.thread().clone());
                info!(thread = %self.shared.config.thread_name, "scheduler driver started");
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(Error::Io(e))
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-owning scheduler handle, see [`Scheduler::downgrade`]
#[derive(Clone, Default)]
pub struct WeakScheduler {
    shared: Weak<Shared>,
}

impl WeakScheduler {
    /// `None` once every [`Scheduler`] handle is gone
    pub fn upgrade(&self) -> Option<Scheduler> {
        self.shared.upgrade().map(|shared| Scheduler { shared })
    }
}

/// Clears the running flag however the driver exits, so the next `add`
/// can start a fresh one
struct DriverGuard {
    shared: Weak<Shared>,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.driver.lock().take();
            shared.running.store(false, Ordering::Release);
        }
    }
}

/// Driver thread body
fn drive(weak: Weak<Shared>) {
    let _guard = DriverGuard {
        shared: weak.clone(),
    };
    loop {
        let Some(shared) = weak.upgrade() else {
            break;
        };
        if shared.disposed.load(Ordering::Acquire) {
            break;
        }

        let registered = shared.state.lock().contexts.len();
        let pass_len = registered.max(shared.config.min_pass_len);

        for _ in 0..pass_len {
            let next = {
                let mut state = shared.state.lock();
                state
                    .contexts
                    .next_round_robin()
                    .map(|(_, context)| context.clone())
            };
            let Some(context) = next else {
                break;
            };

            if context.step() == StepResult::Done {
                shared.remove_id(context.id());
                trace!(context = context.id(), "context removed");
            }
        }

        let park_for = if registered == 0 {
            EMPTY_PARK
        } else {
            shared.config.idle_interval
        };
        drop(shared);
        thread::park_timeout(park_for);
    }
    debug!("scheduler driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coroutine::context::CoroutineState;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    fn counting(steps: usize, counter: Arc<AtomicUsize>) -> impl Coroutine {
        move |_: &YieldContext| -> Result<CoroutineState> {
            let done = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if done >= steps {
                CoroutineState::Complete
            } else {
                CoroutineState::Yielded
            })
        }
    }

    #[test]
    fn test_driver_starts_lazily() {
        let scheduler = Scheduler::new();
        assert!(!scheduler.is_running());

        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.run(counting(3, counter.clone())).unwrap();
        assert!(scheduler.is_running());

        assert!(wait_until(Duration::from_secs(5), || scheduler.is_empty()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        scheduler.dispose();
    }

    #[test]
    fn test_add_is_idempotent() {
        let scheduler = Scheduler::new();
        let context = scheduler
            .run(|_: &YieldContext| -> Result<CoroutineState> { Ok(CoroutineState::Yielded) })
            .unwrap();
        assert!(!scheduler.add(&context).unwrap());
        assert_eq!(scheduler.len(), 1);

        assert!(scheduler.remove(&context));
        assert!(!scheduler.remove(&context));
        assert!(scheduler.add(&context).unwrap());
        scheduler.dispose();
        assert!(context.is_disposed());
    }

    #[test]
    fn test_disposed_context_is_rejected() {
        let scheduler = Scheduler::new();
        let context = YieldContext::detached(|_: &YieldContext| -> Result<CoroutineState> {
            Ok(CoroutineState::Complete)
        });
        context.dispose();
        assert!(matches!(
            scheduler.add(&context),
            Err(Error::ContextDisposed)
        ));
    }

    #[test]
    fn test_dispose_stops_everything() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let context = scheduler.run(counting(usize::MAX, counter)).unwrap();

        scheduler.dispose();
        assert!(context.is_disposed());
        assert!(scheduler.is_empty());
        assert!(matches!(
            scheduler.run(|_: &YieldContext| -> Result<CoroutineState> {
                Ok(CoroutineState::Complete)
            }),
            Err(Error::SchedulerDisposed)
        ));
        assert!(wait_until(Duration::from_secs(5), || !scheduler.is_running()));
    }

    #[test]
    fn test_context_dispose_unregisters() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let context = scheduler.run(counting(usize::MAX, counter)).unwrap();
        assert!(scheduler.contains(&context));

        context.dispose();
        assert!(!scheduler.contains(&context));
        scheduler.dispose();
    }

    #[test]
    fn test_body_can_spawn_children() {
        let scheduler = Scheduler::new();
        let children = Arc::new(AtomicUsize::new(0));
        let handle = scheduler.downgrade();
        let counter = children.clone();
        let mut spawned = 0;

        scheduler
            .run(move |_: &YieldContext| -> Result<CoroutineState> {
                let scheduler = handle.upgrade().ok_or(Error::SchedulerDisposed)?;
                scheduler.run(counting(2, counter.clone()))?;
                spawned += 1;
                Ok(if spawned == 4 {
                    CoroutineState::Complete
                } else {
                    CoroutineState::Yielded
                })
            })
            .unwrap();

        assert!(wait_until(Duration::from_secs(5), || scheduler.is_empty()));
        assert_eq!(children.load(Ordering::SeqCst), 8);
        scheduler.dispose();
    }

    #[test]
    fn test_panicking_body_leaves_driver_running() {
        let scheduler = Scheduler::new();
        scheduler
            .run(|_: &YieldContext| -> Result<CoroutineState> { panic!("body failure") })
            .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.run(counting(1, counter.clone())).unwrap();

        assert!(wait_until(Duration::from_secs(5), || scheduler.is_empty()));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_running());
        scheduler.dispose();
    }

    #[test]
    fn test_driver_guard_clears_running() {
        let scheduler = Scheduler::new();
        scheduler.shared.running.store(true, Ordering::Release);
        drop(DriverGuard {
            shared: Arc::downgrade(&scheduler.shared),
        });
        assert!(!scheduler.is_running());

        // The next add starts a fresh driver
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.run(counting(2, counter.clone())).unwrap();
        assert!(wait_until(Duration::from_secs(5), || scheduler.is_empty()));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        scheduler.dispose();
    }

    #[test]
    fn test_weak_handle_does_not_keep_scheduler_alive() {
        let scheduler = Scheduler::new();
        let weak = scheduler.downgrade();
        let steps = Arc::new(AtomicUsize::new(0));
        let counter = steps.clone();
        let handle = scheduler.downgrade();
        scheduler
            .run(move |_: &YieldContext| -> Result<CoroutineState> {
                if handle.upgrade().is_some() {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                Ok(CoroutineState::Yielded)
            })
            .unwrap();
        assert!(wait_until(Duration::from_secs(5), || steps.load(Ordering::SeqCst) > 0));

        drop(scheduler);
        assert!(wait_until(Duration::from_secs(5), || weak.upgrade().is_none()));
    }

    #[test]
    fn test_config_builder() {
        let config = SchedulerConfig::default()
            .min_pass_len(4)
            .idle_interval(Duration::from_millis(5))
            .thread_name("relay-driver");
        assert_eq!(config.min_pass_len, 4);
        assert_eq!(config.idle_interval, Duration::from_millis(5));
        assert_eq!(config.thread_name, "relay-driver");
    }
}
