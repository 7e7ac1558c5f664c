//! Lifecycle-aware flushing
//!
//! The [`Coordinator`] listens for the host going to the background, obtains
//! extended execution, runs the caller's flush action and gives the execution
//! time back exactly once, whichever of completion, deadline or OS expiration
//! comes first.

pub mod execution;

pub use execution::{
    BackgroundTaskApi, ExpirationHandler, ExtendedExecution, GrantId, ReleaseGuard, WaitGate,
};

use crate::{Config, Error, Result};
use execution::Activation;
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::task::AbortHandle;

const TASK_NAME: &str = "ingest-transport.flush";

/// Host application lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The app moved to the background
    DidEnterBackground,
    /// The app is about to return to the foreground
    WillEnterForeground,
    /// The app is about to terminate
    WillTerminate,
}

/// Receives lifecycle notifications
pub trait LifecycleObserver: Send + Sync {
    /// Handle one notification, on whichever thread the host delivers it
    fn on_lifecycle_event(&self, event: LifecycleEvent);
}

/// Push-based source of lifecycle notifications
pub trait NotificationCenter {
    /// Subscribe `observer` to all future notifications
    fn add_observer(&self, observer: Arc<dyn LifecycleObserver>);
}

/// Caller supplied unit of work run during a background window
pub type FlushAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoordinatorState {
    /// Waiting for a background transition
    Idle = 0,
    /// Extended execution requested
    GrantPending = 1,
    /// Flush running under extended execution
    GrantActive = 2,
    /// Extended execution given back
    Released = 3,
}

impl CoordinatorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::GrantPending,
            2 => Self::GrantActive,
            _ => Self::Released,
        }
    }
}

impl From<CoordinatorState> for u8 {
    fn from(state: CoordinatorState) -> u8 {
        state as u8
    }
}

/// Why a background window ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The flush action finished
    Completed,
    /// The host reported the budget exhausted
    Expired,
    /// The configured deadline or gate wait ran out
    TimedOut,
}

impl std::fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseReason::Completed => f.write_str("completed"),
            ReleaseReason::Expired => f.write_str("expired"),
            ReleaseReason::TimedOut => f.write_str("timed_out"),
        }
    }
}

/// Counters for background windows
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// Background windows started
    pub cycles: u64,
    /// Windows ended by flush completion
    pub completed: u64,
    /// Windows ended by host expiration
    pub expired: u64,
    /// Windows ended by deadline
    pub timed_out: u64,
    /// Grant requests the host declined
    pub grants_refused: u64,
}

#[derive(Default)]
struct Counters {
    cycles: AtomicU64,
    completed: AtomicU64,
    expired: AtomicU64,
    timed_out: AtomicU64,
    grants_refused: AtomicU64,
}

struct Cycle {
    id: u64,
    activation: Activation,
    task: Mutex<Option<AbortHandle>>,
}

impl Cycle {
    fn abort_flush(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}

/// Runtime flush actions are spawned on, owned when none was usable at build time.
struct FlushRuntime {
    handle: Handle,
    owned: Option<Runtime>,
}

impl FlushRuntime {
    fn owned() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ingest-transport-flush")
            .enable_all()
            .build()
            .map_err(|e| Error::Internal(format!("failed to create runtime: {}", e)))?;
        Ok(Self {
            handle: runtime.handle().clone(),
            owned: Some(runtime),
        })
    }

    fn shared(handle: Handle) -> Self {
        Self {
            handle,
            owned: None,
        }
    }
}

impl Drop for FlushRuntime {
    fn drop(&mut self) {
        // The last reference may go away inside async code, where a blocking
        // shutdown panics.
        if let Some(runtime) = self.owned.take() {
            runtime.shutdown_background();
        }
    }
}

struct Inner {
    config: Arc<Config>,
    execution: ExtendedExecution,
    flush: FlushAction,
    runtime: FlushRuntime,
    state: AtomicU8,
    registered: AtomicBool,
    current: Mutex<Option<Arc<Cycle>>>,
    counters: Counters,
}

/// Coordinates flushing with the host's background transitions.
///
/// At most one background window is open at a time; a background signal that
/// arrives while one is open is ignored.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Create a coordinator with a no-op flush action and the platform default execution
    pub fn new(config: Arc<Config>) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Create a coordinator builder
    pub fn builder(config: Arc<Config>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    /// Subscribe to the host's lifecycle notifications.
    ///
    /// Only the first call subscribes; later calls are ignored so a single
    /// background transition can never open two windows.
    pub fn register_for_background_mode(&self, center: &dyn NotificationCenter) {
        if self.inner.registered.swap(true, Ordering::AcqRel) {
            tracing::debug!("already registered for background mode");
            return;
        }
        center.add_observer(Arc::new(Observer(self.inner.clone())));
        tracing::info!(execution = ?self.inner.execution, "registered for background mode");
    }

    /// Whether [`register_for_background_mode`](Self::register_for_background_mode) has run
    pub fn is_registered(&self) -> bool {
        self.inner.registered.load(Ordering::Acquire)
    }

    /// Deliver a lifecycle notification directly
    pub fn handle_event(&self, event: LifecycleEvent) {
        self.inner.on_event(event);
    }

    /// End the open window as if the host's expiration handler fired.
    ///
    /// Returns false when no window is open or it was already released.
    pub fn expire(&self) -> bool {
        let cycle = self
            .inner
            .current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        match cycle {
            Some(cycle) => self.inner.finish(&cycle, ReleaseReason::Expired),
            None => false,
        }
    }

    /// Current state
    pub fn state(&self) -> CoordinatorState {
        self.inner.state()
    }

    /// Snapshot of the window counters
    pub fn stats(&self) -> CoordinatorStats {
        let counters = &self.inner.counters;
        CoordinatorStats {
            cycles: counters.cycles.load(Ordering::Acquire),
            completed: counters.completed.load(Ordering::Acquire),
            expired: counters.expired.load(Ordering::Acquire),
            timed_out: counters.timed_out.load(Ordering::Acquire),
            grants_refused: counters.grants_refused.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.state())
            .field("execution", &self.inner.execution)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn state(&self) -> CoordinatorState {
        CoordinatorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: CoordinatorState, to: CoordinatorState) -> bool {
        self.state
            .compare_exchange(from.into(), to.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn on_event(self: &Arc<Self>, event: LifecycleEvent) {
        tracing::debug!(?event, "lifecycle event");
        match event {
            LifecycleEvent::DidEnterBackground | LifecycleEvent::WillTerminate => {
                self.enter_background()
            }
            LifecycleEvent::WillEnterForeground => {}
        }
    }

    fn enter_background(self: &Arc<Self>) {
        if !self.transition(CoordinatorState::Idle, CoordinatorState::GrantPending) {
            tracing::debug!(state = ?self.state(), "background window already open");
            return;
        }

        let id = self.counters.cycles.fetch_add(1, Ordering::AcqRel) + 1;
        let cycle = Arc::new(Cycle {
            id,
            activation: Activation::new(&self.execution),
            task: Mutex::new(None),
        });
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(cycle.clone());

        let on_expire: ExpirationHandler = {
            let inner = self.clone();
            let cycle = cycle.clone();
            Box::new(move || {
                inner.finish(&cycle, ReleaseReason::Expired);
            })
        };

        let granted = match cycle.activation.acquire(TASK_NAME, on_expire) {
            Ok(()) => true,
            Err(e) => {
                self.counters.grants_refused.fetch_add(1, Ordering::AcqRel);
                tracing::warn!(cycle = id, error = %e, "proceeding without extended execution");
                false
            }
        };

        {
            // `finish` resets the state under the same lock.
            let _current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            if cycle.activation.is_released() {
                // Expired while the grant was being requested.
                return;
            }
            self.transition(CoordinatorState::GrantPending, CoordinatorState::GrantActive);
        }
        tracing::info!(cycle = id, granted, "background window opened");

        let task = self.spawn_flush(&cycle);
        {
            let mut slot = cycle.task.lock().unwrap_or_else(|e| e.into_inner());
            if cycle.activation.is_released() {
                task.abort();
            } else {
                *slot = Some(task.abort_handle());
            }
        }

        if self.execution.blocks_caller() {
            if let Some(false) = self.wait_for_release(&cycle) {
                self.finish(&cycle, ReleaseReason::TimedOut);
            }
        } else if !granted && Handle::try_current().is_err() {
            // No extra time from the host: use what is left of the caller's.
            let _ = self.runtime.handle.block_on(task);
        }
    }

    /// Block the signalling thread on the gate. `None` when blocking here
    /// would stall the runtime the flush needs.
    fn wait_for_release(&self, cycle: &Cycle) -> Option<bool> {
        let timeout = self.config.gate_wait_timeout();
        match Handle::try_current().map(|handle| handle.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => Some(tokio::task::block_in_place(|| {
                cycle.activation.wait(timeout)
            })),
            Ok(_) if self.runtime.handle.runtime_flavor() != RuntimeFlavor::MultiThread => {
                tracing::warn!(
                    cycle = cycle.id,
                    "flush runtime is single threaded, not blocking the signalling thread"
                );
                None
            }
            _ => Some(cycle.activation.wait(timeout)),
        }
    }

    fn spawn_flush(self: &Arc<Self>, cycle: &Arc<Cycle>) -> tokio::task::JoinHandle<()> {
        let inner = self.clone();
        let cycle = cycle.clone();
        let flush = (self.flush)();
        let deadline = self.config.background_timeout();

        self.runtime.handle.spawn(async move {
            let reason = match deadline {
                Some(deadline) => match tokio::time::timeout(deadline, flush).await {
                    Ok(()) => ReleaseReason::Completed,
                    Err(_) => ReleaseReason::TimedOut,
                },
                None => {
                    flush.await;
                    ReleaseReason::Completed
                }
            };
            inner.finish(&cycle, reason);
        })
    }

    /// Close the window for `cycle`; only the first caller has any effect.
    fn finish(&self, cycle: &Arc<Cycle>, reason: ReleaseReason) -> bool {
        if !cycle.activation.release() {
            tracing::debug!(cycle = cycle.id, %reason, "background window already released");
            return false;
        }

        if reason != ReleaseReason::Completed {
            cycle.abort_flush();
        }

        let counter = match reason {
            ReleaseReason::Completed => &self.counters.completed,
            ReleaseReason::Expired => &self.counters.expired,
            ReleaseReason::TimedOut => &self.counters.timed_out,
        };
        counter.fetch_add(1, Ordering::AcqRel);

        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            self.state
                .store(CoordinatorState::Released.into(), Ordering::Release);
            if current.as_ref().is_some_and(|open| Arc::ptr_eq(open, cycle)) {
                *current = None;
            }
            self.state.store(CoordinatorState::Idle.into(), Ordering::Release);
        }

        tracing::info!(cycle = cycle.id, %reason, "background window released");
        true
    }
}

/// Registered with the host; forwards notifications to the shared state.
struct Observer(Arc<Inner>);

impl LifecycleObserver for Observer {
    fn on_lifecycle_event(&self, event: LifecycleEvent) {
        self.0.on_event(event);
    }
}

/// Builder for [`Coordinator`]
pub struct CoordinatorBuilder {
    config: Arc<Config>,
    flush: Option<FlushAction>,
    execution: Option<ExtendedExecution>,
    runtime: Option<Handle>,
}

impl CoordinatorBuilder {
    /// Create a builder for `config`
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            flush: None,
            execution: None,
            runtime: None,
        }
    }

    /// Set the action run during each background window
    pub fn flush<F, Fut>(mut self, flush: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.flush = Some(Arc::new(move || Box::pin(flush()) as BoxFuture<'static, ()>));
        self
    }

    /// Set the extended execution primitive
    pub fn execution(mut self, execution: ExtendedExecution) -> Self {
        self.execution = Some(execution);
        self
    }

    /// Run flush actions on `handle`.
    ///
    /// Without one the coordinator adopts the current multi-threaded runtime,
    /// or starts a private one. A current-thread runtime is never adopted
    /// implicitly, since the wait gate may block its only thread.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the coordinator
    pub fn build(self) -> Result<Coordinator> {
        let current = Handle::try_current()
            .ok()
            .filter(|handle| handle.runtime_flavor() == RuntimeFlavor::MultiThread);
        let runtime = match self.runtime.or(current) {
            Some(handle) => FlushRuntime::shared(handle),
            None => FlushRuntime::owned()?,
        };

        let flush = self
            .flush
            .unwrap_or_else(|| Arc::new(|| Box::pin(async {}) as BoxFuture<'static, ()>));

        Ok(Coordinator {
            inner: Arc::new(Inner {
                config: self.config,
                execution: self
                    .execution
                    .unwrap_or_else(|| ExtendedExecution::for_platform(None)),
                flush,
                runtime,
                state: AtomicU8::new(CoordinatorState::Idle.into()),
                registered: AtomicBool::new(false),
                current: Mutex::new(None),
                counters: Counters::default(),
            }),
        })
    }
}
