//! Extended background execution
//!
//! Two variants sit behind [`ExtendedExecution`]: an OS-issued grant obtained
//! through a host [`BackgroundTaskApi`], and a wait gate that blocks the
//! signalling thread for platforms without such an API. Either way each
//! suspend window is released exactly once.

use crate::error::GrantError;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Opaque identifier for a host-issued background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GrantId(
    /// Raw host identifier
    pub u64,
);

/// Called by the host when the background budget is exhausted
pub type ExpirationHandler = Box<dyn FnOnce() + Send + 'static>;

/// Host primitive for requesting and ending extended background execution.
///
/// Mirrors `beginBackgroundTask(expirationHandler:)` / `endBackgroundTask(_:)`.
/// `end` is called exactly once for every id `begin` returned.
pub trait BackgroundTaskApi: Send + Sync {
    /// Request extended execution; `on_expire` fires if the budget runs out first
    fn begin(&self, name: &str, on_expire: ExpirationHandler) -> Result<GrantId, GrantError>;

    /// Give the execution time back
    fn end(&self, id: GrantId);
}

/// Which extended execution primitive the coordinator uses
#[derive(Clone)]
pub enum ExtendedExecution {
    /// OS background-task grant
    Grant(Arc<dyn BackgroundTaskApi>),
    /// Block the signalling thread on a wait primitive
    Gate,
}

impl ExtendedExecution {
    /// Use an OS grant obtained through `api`
    pub fn grant(api: impl BackgroundTaskApi + 'static) -> Self {
        ExtendedExecution::Grant(Arc::new(api))
    }

    /// Use the wait gate
    pub fn gate() -> Self {
        ExtendedExecution::Gate
    }

    /// Pick the primitive for the target platform.
    ///
    /// watchOS (or the `wait-gate` feature) always gets the gate. Elsewhere the
    /// host API is used when one is supplied.
    pub fn for_platform(api: Option<Arc<dyn BackgroundTaskApi>>) -> Self {
        #[cfg(any(target_os = "watchos", feature = "wait-gate"))]
        {
            let _ = api;
            ExtendedExecution::Gate
        }

        #[cfg(not(any(target_os = "watchos", feature = "wait-gate")))]
        {
            match api {
                Some(api) => ExtendedExecution::Grant(api),
                None => ExtendedExecution::Gate,
            }
        }
    }

    /// Whether the signalling thread blocks until release
    pub fn blocks_caller(&self) -> bool {
        matches!(self, ExtendedExecution::Gate)
    }
}

impl std::fmt::Debug for ExtendedExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtendedExecution::Grant(_) => f.write_str("ExtendedExecution::Grant"),
            ExtendedExecution::Gate => f.write_str("ExtendedExecution::Gate"),
        }
    }
}

/// Release guard state
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
enum GuardState {
    Armed = 0,
    Released = 1,
}

impl From<GuardState> for u8 {
    fn from(state: GuardState) -> u8 {
        state as u8
    }
}

/// One-shot release flag.
///
/// The first caller of [`try_release`](Self::try_release) wins the
/// compare-and-swap; every later call is a no-op returning `false`.
#[derive(Debug)]
pub struct ReleaseGuard {
    state: AtomicU8,
}

impl ReleaseGuard {
    /// Create an armed guard
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(GuardState::Armed.into()),
        }
    }

    /// Move to released; true only for the caller that performed the transition
    pub fn try_release(&self) -> bool {
        self.state
            .compare_exchange(
                GuardState::Armed.into(),
                GuardState::Released.into(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Whether release has happened
    pub fn is_released(&self) -> bool {
        self.state.load(Ordering::Acquire) == u8::from(GuardState::Released)
    }
}

impl Default for ReleaseGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Binary wait primitive used where no grant API exists
#[derive(Debug, Default)]
pub struct WaitGate {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl WaitGate {
    /// Create an unsignalled gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate and wake the waiter
    pub fn signal(&self) {
        let mut signalled = self.signalled.lock().unwrap_or_else(|e| e.into_inner());
        *signalled = true;
        self.condvar.notify_all();
    }

    /// Block until signalled or `timeout` elapses; true if signalled
    pub fn wait(&self, timeout: Duration) -> bool {
        let signalled = self.signalled.lock().unwrap_or_else(|e| e.into_inner());
        let (signalled, _) = self
            .condvar
            .wait_timeout_while(signalled, timeout, |signalled| !*signalled)
            .unwrap_or_else(|e| e.into_inner());
        *signalled
    }
}

enum Primitive {
    Grant {
        api: Arc<dyn BackgroundTaskApi>,
        held: Mutex<Option<GrantId>>,
    },
    Gate(WaitGate),
}

/// Extended execution for one suspend window
pub(crate) struct Activation {
    guard: ReleaseGuard,
    primitive: Primitive,
}

impl Activation {
    pub(crate) fn new(execution: &ExtendedExecution) -> Self {
        let primitive = match execution {
            ExtendedExecution::Grant(api) => Primitive::Grant {
                api: api.clone(),
                held: Mutex::new(None),
            },
            ExtendedExecution::Gate => Primitive::Gate(WaitGate::new()),
        };
        Self {
            guard: ReleaseGuard::new(),
            primitive,
        }
    }

    /// Ask the host for a grant. A no-op for the gate.
    ///
    /// Safe against the expiration handler firing before `begin` returns: if
    /// release already happened, the fresh grant is ended on the spot.
    pub(crate) fn acquire(
        &self,
        name: &str,
        on_expire: ExpirationHandler,
    ) -> Result<(), GrantError> {
        let Primitive::Grant { api, held } = &self.primitive else {
            return Ok(());
        };

        let id = api.begin(name, on_expire)?;
        let mut held = held.lock().unwrap_or_else(|e| e.into_inner());
        if self.guard.is_released() {
            drop(held);
            api.end(id);
        } else {
            *held = Some(id);
        }
        Ok(())
    }

    /// Release the grant or open the gate; true for the one caller that did it
    pub(crate) fn release(&self) -> bool {
        if !self.guard.try_release() {
            return false;
        }

        match &self.primitive {
            Primitive::Grant { api, held } => {
                let id = held.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(id) = id {
                    api.end(id);
                }
            }
            Primitive::Gate(gate) => gate.signal(),
        }
        true
    }

    pub(crate) fn is_released(&self) -> bool {
        self.guard.is_released()
    }

    /// Block until release or `timeout`; returns immediately for grants
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        match &self.primitive {
            Primitive::Gate(gate) => gate.wait(timeout),
            Primitive::Grant { .. } => true,
        }
    }
}
