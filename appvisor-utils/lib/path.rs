//! Well-known file names and paths.

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The live mount table of the calling process.
pub const PROC_MOUNTS_PATH: &str = "/proc/self/mounts";

/// The cgroup file listing member pids.
pub const CGROUP_PROCS_FILE: &str = "cgroup.procs";

/// The cgroup-v2 freezer control file.
pub const CGROUP_FREEZE_FILE: &str = "cgroup.freeze";

/// The cgroup-v2 events file reporting `populated` and `frozen`.
pub const CGROUP_EVENTS_FILE: &str = "cgroup.events";

/// The cgroup-v2 memory ceiling file.
pub const CGROUP_MEMORY_MAX_FILE: &str = "memory.max";

/// The cgroup-v2 task-count ceiling file.
pub const CGROUP_PIDS_MAX_FILE: &str = "pids.max";

/// The SMACK rule loading interface.
pub const SMACK_LOAD_PATH: &str = "/sys/fs/smackfs/load2";

/// The SMACK interface revoking every rule of a subject.
pub const SMACK_REVOKE_SUBJECT_PATH: &str = "/sys/fs/smackfs/revoke-subject";

/// The extended attribute holding a file's SMACK label.
pub const SMACK_XATTR_NAME: &str = "security.SMACK64";
