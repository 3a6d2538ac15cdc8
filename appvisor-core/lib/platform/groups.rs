use std::path::PathBuf;

use appvisor_utils::{CgroupTree, FreezeState, UtilsError};
use nix::sys::signal::Signal;

use crate::{AppvisorError, AppvisorResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Freeze, signal and membership primitives over one OS process group per app.
pub trait ProcessGroups: Send + Sync {
    /// Creates the app's group.
    fn create(&self, group: &str) -> AppvisorResult<()>;

    /// Removes the app's group once it is empty.
    fn remove(&self, group: &str) -> AppvisorResult<()>;

    /// Requests a freeze of every member.
    fn freeze(&self, group: &str) -> AppvisorResult<()>;

    /// Reads the freezer state.
    fn freeze_state(&self, group: &str) -> AppvisorResult<FreezeState>;

    /// Thaws the group.
    fn thaw(&self, group: &str) -> AppvisorResult<()>;

    /// Sends `signal` to every member and returns how many were signalled.
    ///
    /// Members that are already gone are skipped. A member that refuses the signal is a fatal
    /// error.
    fn signal_all(&self, group: &str, signal: Signal) -> AppvisorResult<usize>;

    /// Returns true if the group has no members.
    fn is_empty(&self, group: &str) -> AppvisorResult<bool>;

    /// The file a new process writes `0` into to join the group.
    fn procs_file(&self, group: &str) -> PathBuf;
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ProcessGroups for CgroupTree {
    fn create(&self, group: &str) -> AppvisorResult<()> {
        Ok(CgroupTree::create(self, group)?)
    }

    fn remove(&self, group: &str) -> AppvisorResult<()> {
        Ok(CgroupTree::remove(self, group)?)
    }

    fn freeze(&self, group: &str) -> AppvisorResult<()> {
        Ok(CgroupTree::freeze(self, group)?)
    }

    fn freeze_state(&self, group: &str) -> AppvisorResult<FreezeState> {
        Ok(CgroupTree::freeze_state(self, group)?)
    }

    fn thaw(&self, group: &str) -> AppvisorResult<()> {
        Ok(CgroupTree::thaw(self, group)?)
    }

    fn signal_all(&self, group: &str, signal: Signal) -> AppvisorResult<usize> {
        CgroupTree::signal_all(self, group, signal).map_err(|e| match e {
            e @ UtilsError::SignalRefused { .. } => AppvisorError::Fatal(e.to_string()),
            e => e.into(),
        })
    }

    fn is_empty(&self, group: &str) -> AppvisorResult<bool> {
        Ok(CgroupTree::is_empty(self, group)?)
    }

    fn procs_file(&self, group: &str) -> PathBuf {
        CgroupTree::procs_file(self, group)
    }
}
