use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle};

use crate::runtime::SupervisorEvent;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// One-shot timers that escalate a soft kill to a hard kill.
pub trait KillTimers: Send + Sync {
    /// Arms a timer that reports `target` once `after` has elapsed.
    fn arm(&self, target: KillTarget, after: Duration) -> TimerHandle;

    /// Cancels a timer. Cancelling an expired or unknown timer does nothing.
    fn cancel(&self, handle: TimerHandle);
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a kill timer escalates against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KillTarget {
    /// Every process of an app.
    App(String),

    /// A single process stopped after a watchdog timeout.
    Process {
        /// The owning app.
        app: String,

        /// The process name.
        process: String,
    },
}

/// Identifies one arming of a kill timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// Kill timers running as tokio tasks. Expiries arrive as
/// [`SupervisorEvent::KillTimerExpired`].
#[derive(Debug)]
pub struct TokioKillTimers {
    events: mpsc::UnboundedSender<SupervisorEvent>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, JoinHandle<()>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl KillTarget {
    /// The app the target belongs to.
    pub fn app(&self) -> &str {
        match self {
            KillTarget::App(app) | KillTarget::Process { app, .. } => app,
        }
    }
}

impl TokioKillTimers {
    /// Creates the timer service. Timers must be armed from within a tokio runtime.
    pub fn new(events: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
        Self {
            events,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl KillTimers for TokioKillTimers {
    fn arm(&self, target: KillTarget, after: Duration) -> TimerHandle {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let events = self.events.clone();

        tracing::debug!("arming kill timer {:?} for {:?} in {:?}", handle, target, after);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if events
                .send(SupervisorEvent::KillTimerExpired { target, handle })
                .is_err()
            {
                tracing::debug!("event loop gone, dropping kill timer {:?}", handle);
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|_, task| !task.is_finished());
        pending.insert(handle.0, task);

        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = pending.remove(&handle.0) {
            tracing::debug!("cancelled kill timer {:?}", handle);
            task.abort();
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
