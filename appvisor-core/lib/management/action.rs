use std::{fmt, str::FromStr};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What to do when a process crashes or exits with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Leave the process dead and carry on.
    Ignore,

    /// Start the process again.
    Restart,

    /// Stop and start the whole app.
    RestartApp,

    /// Stop the whole app.
    StopApp,

    /// Reboot the host.
    Reboot,
}

/// What to do when a process misses its watchdog deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    /// Log and carry on.
    Ignore,

    /// Stop the process without restarting it.
    Stop,

    /// Stop the process and start it again once it has exited.
    Restart,

    /// Stop and start the whole app.
    RestartApp,

    /// Stop the whole app.
    StopApp,

    /// Reboot the host.
    Reboot,
}

/// The result of looking an action up in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionLookup<T> {
    /// A recognised action is configured.
    Found(T),

    /// No action is configured.
    NotFound,

    /// Something is configured but it is not a recognised action.
    Error,
}

/// The decision a process event hands to the app's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppFaultAction {
    /// The app dealt with the event itself.
    Handled,

    /// Restart the app.
    RestartApp,

    /// Stop the app.
    StopApp,

    /// Reboot the host.
    Reboot,
}

/// Parse error for action names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAction(pub String);

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for FaultAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(FaultAction::Ignore),
            "restart" => Ok(FaultAction::Restart),
            "restartApp" => Ok(FaultAction::RestartApp),
            "stopApp" => Ok(FaultAction::StopApp),
            "reboot" => Ok(FaultAction::Reboot),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

impl FromStr for WatchdogAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ignore" => Ok(WatchdogAction::Ignore),
            "stop" => Ok(WatchdogAction::Stop),
            "restart" => Ok(WatchdogAction::Restart),
            "restartApp" => Ok(WatchdogAction::RestartApp),
            "stopApp" => Ok(WatchdogAction::StopApp),
            "reboot" => Ok(WatchdogAction::Reboot),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for UnknownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown action '{}'", self.0)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
