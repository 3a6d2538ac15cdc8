use std::io;

use appvisor_core::AppvisorError;
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a CLI operation.
pub type AppvisorCliResult<T> = Result<T, AppvisorCliError>;

/// An error that occurred in the `appvisord` binary.
#[derive(pretty_error_debug::Debug, Error)]
pub enum AppvisorCliError {
    /// An error from the supervisor.
    #[error(transparent)]
    Core(#[from] AppvisorError),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A failed system call.
    #[error("system call failed: {0}")]
    Nix(#[from] nix::Error),

    /// The logging filter could not be parsed.
    #[error("invalid log filter: {0}")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),

    /// Any other error.
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
