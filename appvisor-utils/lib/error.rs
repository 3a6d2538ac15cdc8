use std::{io, path::PathBuf};

use nix::errno::Errno;
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a utils-related operation.
pub type UtilsResult<T> = Result<T, UtilsError>;

/// An error that occurred in one of the low-level helpers.
#[derive(pretty_error_debug::Debug, Error)]
pub enum UtilsError {
    /// An I/O error on a specific path.
    #[error("io error on {path}: {source}")]
    PathIo {
        /// The path being accessed.
        path: PathBuf,

        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The process group does not support freezing.
    #[error("freezing is not supported for group '{0}'")]
    FreezeUnsupported(String),

    /// A line in a cgroup control file could not be parsed.
    #[error("malformed entry '{entry}' in {path}")]
    MalformedEntry {
        /// The control file.
        path: PathBuf,

        /// The offending entry.
        entry: String,
    },

    /// A signal could not be delivered to a process that still exists.
    #[error("failed to deliver signal {signal} to pid {pid}: {errno}")]
    SignalRefused {
        /// The target pid.
        pid: i32,

        /// The signal name.
        signal: String,

        /// The errno returned by `kill`.
        errno: Errno,
    },
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UtilsError {
    /// Wraps an I/O error together with the path it occurred on.
    pub fn path_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        UtilsError::PathIo {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the error is an I/O error of kind `NotFound`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, UtilsError::PathIo { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
