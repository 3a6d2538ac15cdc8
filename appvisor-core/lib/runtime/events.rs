use std::fmt;

use nix::{
    sys::{signal::Signal, wait::WaitStatus},
    unistd::Pid,
};

use crate::platform::{KillTarget, TimerHandle};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything the supervisor reacts to. Events are handled one at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// A child changed state.
    ChildStatus {
        /// The child.
        pid: Pid,

        /// What happened to it.
        status: ExitStatus,
    },

    /// A process missed its watchdog deadline.
    WatchdogTimeout {
        /// The process.
        pid: Pid,
    },

    /// A kill timer ran out.
    KillTimerExpired {
        /// What the timer escalates against.
        target: KillTarget,

        /// Which arming fired.
        handle: TimerHandle,
    },

    /// Start an app by name.
    StartApp(String),

    /// Stop an app by name.
    StopApp(String),

    /// Stop every app and exit.
    Shutdown,
}

/// A child status change as reported by `waitpid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited with a code.
    Exited(i32),

    /// Killed by a signal.
    Signaled(Signal),

    /// Stopped by a signal.
    Stopped(Signal),

    /// Resumed after a stop.
    Continued,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ExitStatus {
    /// Whether the process is gone.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExitStatus::Exited(_) | ExitStatus::Signaled(_))
    }

    /// Converts a wait status into the child's pid and status. Statuses that do not describe a
    /// child state change yield `None`.
    pub fn from_wait_status(status: WaitStatus) -> Option<(Pid, ExitStatus)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((pid, ExitStatus::Exited(code))),
            WaitStatus::Signaled(pid, signal, _) => Some((pid, ExitStatus::Signaled(signal))),
            WaitStatus::Stopped(pid, signal) => Some((pid, ExitStatus::Stopped(signal))),
            WaitStatus::Continued(pid) => Some((pid, ExitStatus::Continued)),
            _ => None,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with code {}", code),
            ExitStatus::Signaled(signal) => write!(f, "was killed by {}", signal),
            ExitStatus::Stopped(signal) => write!(f, "was stopped by {}", signal),
            ExitStatus::Continued => write!(f, "was continued"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
