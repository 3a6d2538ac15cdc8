//! A cgroup-v2 subtree holding one child group per supervised app.
//!
//! Every app's processes live in `<root>/<app>`. The supervisor uses the group to freeze the
//! whole app before signalling it, to broadcast signals to every member, and to decide whether
//! an app still has live processes.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::Pid,
};

use crate::{UtilsError, UtilsResult, CGROUP_EVENTS_FILE, CGROUP_FREEZE_FILE, CGROUP_PROCS_FILE};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The freezer state of a group as reported by `cgroup.events`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeState {
    /// The group is running normally.
    Thawed,

    /// A freeze was requested but not every member has stopped yet.
    Freezing,

    /// Every member of the group is frozen.
    Frozen,
}

/// A cgroup-v2 directory under which app groups are created.
#[derive(Debug, Clone)]
pub struct CgroupTree {
    root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CgroupTree {
    /// Creates a handle on the subtree rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root of the subtree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory of a group.
    pub fn group_dir(&self, group: &str) -> PathBuf {
        self.root.join(group)
    }

    /// The `cgroup.procs` file of a group. Writing `0` into it moves the writer into the group.
    pub fn procs_file(&self, group: &str) -> PathBuf {
        self.group_dir(group).join(CGROUP_PROCS_FILE)
    }

    /// Creates the group directory (and the subtree root) if missing.
    pub fn create(&self, group: &str) -> UtilsResult<()> {
        let dir = self.group_dir(group);
        fs::create_dir_all(&dir).map_err(|e| UtilsError::path_io(&dir, e))?;
        tracing::debug!("created process group {}", dir.display());
        Ok(())
    }

    /// Removes an empty group. A missing group is not an error.
    pub fn remove(&self, group: &str) -> UtilsResult<()> {
        let dir = self.group_dir(group);
        match fs::remove_dir(&dir) {
            Ok(()) => {
                tracing::debug!("removed process group {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UtilsError::path_io(&dir, e)),
        }
    }

    /// Lists the pids that are members of the group. A missing group has no members.
    pub fn pids(&self, group: &str) -> UtilsResult<Vec<i32>> {
        let procs = self.procs_file(group);
        let contents = match fs::read_to_string(&procs) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(UtilsError::path_io(&procs, e)),
        };

        parse_pids(&procs, &contents)
    }

    /// Returns true if the group has no member processes.
    pub fn is_empty(&self, group: &str) -> UtilsResult<bool> {
        Ok(self.pids(group)?.is_empty())
    }

    /// Requests the kernel to freeze every member of the group.
    pub fn freeze(&self, group: &str) -> UtilsResult<()> {
        self.write_freeze(group, "1")
    }

    /// Thaws a previously frozen group.
    pub fn thaw(&self, group: &str) -> UtilsResult<()> {
        self.write_freeze(group, "0")
    }

    /// Reads the current freezer state of the group.
    pub fn freeze_state(&self, group: &str) -> UtilsResult<FreezeState> {
        let events = self.group_dir(group).join(CGROUP_EVENTS_FILE);
        let contents = fs::read_to_string(&events).map_err(|e| UtilsError::path_io(&events, e))?;
        let frozen = contents
            .lines()
            .find_map(|line| line.strip_prefix("frozen "))
            .map(str::trim);

        match frozen {
            Some("1") => Ok(FreezeState::Frozen),
            Some("0") => {
                let requested = fs::read_to_string(self.group_dir(group).join(CGROUP_FREEZE_FILE))
                    .map(|s| s.trim() == "1")
                    .unwrap_or(false);
                Ok(if requested {
                    FreezeState::Freezing
                } else {
                    FreezeState::Thawed
                })
            }
            _ => Err(UtilsError::MalformedEntry {
                path: events,
                entry: contents,
            }),
        }
    }

    /// Sends `signal` to every member of the group and returns how many members were signalled.
    ///
    /// Members that exit between listing and signalling are skipped silently. A member that
    /// exists but refuses the signal is reported as [`UtilsError::SignalRefused`].
    pub fn signal_all(&self, group: &str, signal: Signal) -> UtilsResult<usize> {
        let pids = self.pids(group)?;
        let mut signalled = 0;

        for pid in pids {
            match kill(Pid::from_raw(pid), signal) {
                Ok(()) => signalled += 1,
                Err(Errno::ESRCH) => {
                    tracing::debug!("pid {} exited before it could be signalled", pid);
                }
                Err(errno) => {
                    return Err(UtilsError::SignalRefused {
                        pid,
                        signal: signal.as_str().to_string(),
                        errno,
                    })
                }
            }
        }

        Ok(signalled)
    }

    fn write_freeze(&self, group: &str, value: &str) -> UtilsResult<()> {
        let dir = self.group_dir(group);
        let freeze = dir.join(CGROUP_FREEZE_FILE);
        if !freeze.exists() {
            return Err(UtilsError::FreezeUnsupported(group.to_string()));
        }

        fs::write(&freeze, value).map_err(|e| UtilsError::path_io(&freeze, e))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn parse_pids(path: &Path, contents: &str) -> UtilsResult<Vec<i32>> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            line.parse::<i32>().map_err(|_| UtilsError::MalformedEntry {
                path: path.to_path_buf(),
                entry: line.to_string(),
            })
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_group(group: &str) -> (tempfile::TempDir, CgroupTree) {
        let dir = tempfile::tempdir().unwrap();
        let tree = CgroupTree::new(dir.path());
        tree.create(group).unwrap();
        (dir, tree)
    }

    #[test]
    fn test_missing_group_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tree = CgroupTree::new(dir.path());
        assert!(tree.is_empty("ghost").unwrap());
        assert_eq!(tree.signal_all("ghost", Signal::SIGTERM).unwrap(), 0);
    }

    #[test]
    fn test_pids_are_parsed() {
        let (_dir, tree) = tree_with_group("cam");
        fs::write(tree.procs_file("cam"), "12\n 34\n\n").unwrap();
        assert_eq!(tree.pids("cam").unwrap(), vec![12, 34]);
        assert!(!tree.is_empty("cam").unwrap());
    }

    #[test]
    fn test_malformed_pid_is_rejected() {
        let (_dir, tree) = tree_with_group("cam");
        fs::write(tree.procs_file("cam"), "12\nabc\n").unwrap();
        assert!(matches!(
            tree.pids("cam"),
            Err(UtilsError::MalformedEntry { .. })
        ));
    }

    #[test]
    fn test_freeze_without_freezer_is_unsupported() {
        let (_dir, tree) = tree_with_group("cam");
        assert!(matches!(
            tree.freeze("cam"),
            Err(UtilsError::FreezeUnsupported(_))
        ));
    }

    #[test]
    fn test_freeze_state_transitions() {
        let (_dir, tree) = tree_with_group("cam");
        let group = tree.group_dir("cam");
        fs::write(group.join(CGROUP_FREEZE_FILE), "0").unwrap();
        fs::write(group.join(CGROUP_EVENTS_FILE), "populated 1\nfrozen 0\n").unwrap();
        assert_eq!(tree.freeze_state("cam").unwrap(), FreezeState::Thawed);

        tree.freeze("cam").unwrap();
        assert_eq!(tree.freeze_state("cam").unwrap(), FreezeState::Freezing);

        fs::write(group.join(CGROUP_EVENTS_FILE), "populated 1\nfrozen 1\n").unwrap();
        assert_eq!(tree.freeze_state("cam").unwrap(), FreezeState::Frozen);

        tree.thaw("cam").unwrap();
        assert_eq!(fs::read_to_string(group.join(CGROUP_FREEZE_FILE)).unwrap(), "0");
    }

    #[test]
    fn test_remove_group() {
        let (_dir, tree) = tree_with_group("cam");
        tree.remove("cam").unwrap();
        assert!(!tree.group_dir("cam").exists());
        tree.remove("cam").unwrap();
    }
}
