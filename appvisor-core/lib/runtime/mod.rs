//! The supervisor's single-threaded event loop.
//!
//! Child status changes, kill timer expiries, control requests and termination signals are all
//! turned into [`SupervisorEvent`]s and handled strictly one after another, so app state is
//! never touched concurrently.

mod events;

use nix::{
    errno::Errno,
    sys::wait::{waitpid, WaitPidFlag, WaitStatus},
    unistd::Pid,
};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};

use crate::{
    management::{Supervisor, SupervisorOutcome},
    AppvisorError, AppvisorResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use events::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Why the event loop ended.
#[derive(Debug)]
pub enum ExitReason {
    /// Every app stopped after a shutdown request.
    Shutdown,

    /// An app's fault policy asked for a reboot.
    Reboot,

    /// The supervisor hit a fatal error and can no longer be trusted.
    Fatal(AppvisorError),
}

/// Drives a [`Supervisor`] from events.
pub struct EventLoop {
    supervisor: Supervisor,
    shutting_down: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl EventLoop {
    /// Wraps a supervisor.
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            shutting_down: false,
        }
    }

    /// The supervisor being driven.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// The supervisor being driven.
    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    /// Handles one event. Returns the exit reason once the loop should end.
    ///
    /// Errors from a single app are logged; only fatal errors are returned.
    pub fn handle(&mut self, event: SupervisorEvent) -> AppvisorResult<Option<ExitReason>> {
        tracing::trace!("handling {:?}", event);

        let outcome = match event {
            SupervisorEvent::ChildStatus { pid, status } => {
                Self::check(self.supervisor.on_child_exit(pid, status).map(Some))?
            }
            SupervisorEvent::WatchdogTimeout { pid } => {
                Self::check(self.supervisor.on_watchdog_timeout(pid).map(Some))?
            }
            SupervisorEvent::KillTimerExpired { target, handle } => {
                Self::check(self.supervisor.on_kill_timer(&target, handle).map(|()| None))?
            }
            SupervisorEvent::StartApp(name) => {
                if self.shutting_down {
                    tracing::warn!("shutting down, not starting app {}", name);
                } else {
                    Self::check(self.supervisor.start_app(&name).map(|()| None))?;
                }
                None
            }
            SupervisorEvent::StopApp(name) => {
                Self::check(self.supervisor.stop_app(&name).map(|()| None))?
            }
            SupervisorEvent::Shutdown => {
                if self.shutting_down {
                    None
                } else {
                    tracing::info!("shutting down, stopping all apps");
                    self.shutting_down = true;
                    Self::check(self.supervisor.stop_all().map(|()| None))?
                }
            }
        };

        if outcome == Some(SupervisorOutcome::Reboot) {
            return Ok(Some(ExitReason::Reboot));
        }

        if self.shutting_down && self.supervisor.is_idle() {
            tracing::info!("all apps have stopped");
            return Ok(Some(ExitReason::Shutdown));
        }

        Ok(None)
    }

    /// Runs until shutdown or a reboot request.
    ///
    /// Must be called from the process that spawns the apps, since it reaps their children.
    /// `SIGTERM` and `SIGINT` start a shutdown.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
    ) -> AppvisorResult<ExitReason> {
        let mut sigchld = signal(SignalKind::child())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        // Children may have exited before the handler was installed.
        let mut batch = reap_children();

        loop {
            for event in batch.drain(..) {
                if let Some(reason) = self.handle(event)? {
                    return Ok(reason);
                }
            }

            batch = tokio::select! {
                _ = sigchld.recv() => reap_children(),
                _ = sigterm.recv() => vec![SupervisorEvent::Shutdown],
                _ = sigint.recv() => vec![SupervisorEvent::Shutdown],
                event = events.recv() => vec![event.unwrap_or(SupervisorEvent::Shutdown)],
            };
        }
    }

    fn check(
        result: AppvisorResult<Option<SupervisorOutcome>>,
    ) -> AppvisorResult<Option<SupervisorOutcome>> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::error!("{}", e);
                Ok(None)
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Supervises until shutdown, a reboot request or a fatal error.
pub async fn run(
    supervisor: Supervisor,
    events: mpsc::UnboundedReceiver<SupervisorEvent>,
) -> ExitReason {
    match EventLoop::new(supervisor).run(events).await {
        Ok(reason) => reason,
        Err(e) => {
            tracing::error!("supervisor failed: {}", e);
            ExitReason::Fatal(e)
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Collects every pending child status change without blocking.
fn reap_children() -> Vec<SupervisorEvent> {
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    let mut events = Vec::new();

    loop {
        match waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(WaitStatus::StillAlive) | Err(Errno::ECHILD) => break,
            Ok(status) => {
                if let Some((pid, status)) = ExitStatus::from_wait_status(status) {
                    events.push(SupervisorEvent::ChildStatus { pid, status });
                }
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                tracing::warn!("waitpid failed: {}", e);
                break;
            }
        }
    }

    events
}
