use std::{io, path::PathBuf};

use appvisor_utils::UtilsError;
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a supervisor-related operation.
pub type AppvisorResult<T> = Result<T, AppvisorError>;

/// An error that occurred while supervising apps.
#[derive(pretty_error_debug::Debug, Error)]
pub enum AppvisorError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An error from the low-level helpers.
    #[error(transparent)]
    Utils(#[from] UtilsError),

    /// A failed system call.
    #[error("system call failed: {0}")]
    Nix(#[from] nix::Error),

    /// A configuration value is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// A configuration path does not name an app or process node.
    #[error("invalid configuration path '{0}'")]
    InvalidConfigPath(String),

    /// The app is already running.
    #[error("app '{0}' is already running")]
    AppAlreadyRunning(String),

    /// The app is not running.
    #[error("app '{0}' is not running")]
    AppNotRunning(String),

    /// No app with this name is known to the supervisor.
    #[error("app '{0}' not found")]
    AppNotFound(String),

    /// Building or tearing down an app's sandbox failed.
    #[error("sandbox error for app '{app}': {message}")]
    Sandbox {
        /// The app owning the sandbox.
        app: String,

        /// What went wrong.
        message: String,
    },

    /// A process could not be started.
    #[error("failed to start process '{process}' of app '{app}': {reason}")]
    ProcessStart {
        /// The owning app.
        app: String,

        /// The process name.
        process: String,

        /// Why it failed.
        reason: String,
    },

    /// The app lists more supplementary groups than allowed.
    #[error("app '{app}' lists {count} supplementary groups, at most {max} are allowed")]
    TooManyGroups {
        /// The app name.
        app: String,

        /// Number of groups configured.
        count: usize,

        /// The configured ceiling.
        max: usize,
    },

    /// A security label or rule could not be applied.
    #[error("security label error: {0}")]
    Label(String),

    /// A resource limit could not be applied.
    #[error("resource limit error: {0}")]
    ResourceLimit(String),

    /// An internal invariant was violated. The supervisor cannot continue.
    #[error("fatal: {0}")]
    Fatal(String),

    /// The settings file could not be parsed.
    #[error("settings parse error in {path}: {source}")]
    Toml {
        /// The settings file.
        path: PathBuf,

        /// The parse error.
        #[source]
        source: toml::de::Error,
    },

    /// The app configuration tree could not be parsed.
    #[error("config tree parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl AppvisorError {
    /// Creates a sandbox error.
    pub fn sandbox(app: impl Into<String>, message: impl Into<String>) -> Self {
        AppvisorError::Sandbox {
            app: app.into(),
            message: message.into(),
        }
    }

    /// Returns true if the error means the supervisor's view of its apps can no longer be
    /// trusted and the daemon must terminate.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppvisorError::Fatal(_) | AppvisorError::Utils(UtilsError::SignalRefused { .. })
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use nix::errno::Errno;

    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(AppvisorError::Fatal("boom".into()).is_fatal());
        assert!(AppvisorError::Utils(UtilsError::SignalRefused {
            pid: 7,
            signal: "SIGKILL".into(),
            errno: Errno::EPERM,
        })
        .is_fatal());
        assert!(!AppvisorError::AppNotFound("cam".into()).is_fatal());
        assert!(!AppvisorError::sandbox("cam", "mount failed").is_fatal());
    }
}
