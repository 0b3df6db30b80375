//! Trailing-edge debouncer for catalog refreshes.
//!
//! Every `trigger` pushes the deadline to `now + window`; the action runs once the
//! deadline passes without another trigger. Time comes from an injected [`Clock`]
//! so behaviour can be driven deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Sink for "the catalog changed, derived state should be refreshed" signals.
pub trait RefreshHook: Send + Sync {
    fn request_refresh(&self);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Action = Box<dyn Fn() + Send + Sync>;

pub struct Debouncer {
    window: Duration,
    clock: Arc<dyn Clock>,
    deadline: Mutex<Option<Instant>>,
    action: Action,
    run_lock: Mutex<()>,
    executions: AtomicU64,
}

impl Debouncer {
    pub fn new<F>(window: Duration, clock: Arc<dyn Clock>, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            window,
            clock,
            deadline: Mutex::new(None),
            action: Box::new(action),
            run_lock: Mutex::new(()),
            executions: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedule (or re-schedule) the action one window from now.
    pub fn trigger(&self) {
        let deadline = self.clock.now() + self.window;
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = Some(deadline);
        debug!("Refresh scheduled in {:?}", self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn is_due(&self) -> bool {
        let now = self.clock.now();
        self.deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|deadline| now >= deadline)
    }

    /// Run the action if the quiet window has elapsed. Returns true if it ran.
    pub fn poll(&self) -> bool {
        let now = self.clock.now();
        let due = {
            let mut deadline = self.deadline.lock().unwrap_or_else(PoisonError::into_inner);
            match *deadline {
                Some(at) if now >= at => {
                    *deadline = None;
                    true
                }
                _ => false,
            }
        };
        if due {
            self.run();
        }
        due
    }

    /// Run a pending action immediately. Returns true if one was pending.
    pub fn flush(&self) -> bool {
        let pending = self
            .deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();
        if pending {
            self.run();
        }
        pending
    }

    /// Number of times the action has run.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Acquire)
    }

    fn run(&self) {
        let _serialized = self.run_lock.lock().unwrap_or_else(PoisonError::into_inner);
        (self.action)();
        self.executions.fetch_add(1, Ordering::AcqRel);
    }
}

impl RefreshHook for Debouncer {
    fn request_refresh(&self) {
        self.trigger();
    }
}

/// Drive a debouncer from the tokio runtime, checking every `tick`.
/// The action runs on the blocking pool.
pub fn spawn_debounce_loop(debouncer: Arc<Debouncer>, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            if !debouncer.is_due() {
                continue;
            }
            let debouncer = debouncer.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || debouncer.poll()).await {
                error!("Debounced refresh failed: {}", e);
            }
        }
    })
}
