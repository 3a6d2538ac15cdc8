use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Default runtime directory. Sandboxes live in its `sandboxes` subdirectory.
pub const DEFAULT_RUNTIME_DIR: &str = "/tmp/appvisor";

/// Default directory holding installed apps.
pub const DEFAULT_APPS_INSTALL_DIR: &str = "/opt/appvisor/apps";

/// Default directory holding framework files.
pub const DEFAULT_SYSTEM_DIR: &str = "/opt/appvisor/system";

/// Default cgroup-v2 subtree for app process groups.
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup/appvisor";

/// Default root of the apps in the configuration tree.
pub const DEFAULT_APPS_CONFIG_ROOT: &str = "/apps";

/// Name of the sandboxes directory under the runtime directory.
pub const SANDBOXES_SUBDIR: &str = "sandboxes";

/// Default time between a soft kill and the hard kill that follows it.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_millis(300);

/// Default number of freezer polls before giving up on a confirmed freeze.
pub const DEFAULT_FREEZE_POLL_LIMIT: u32 = 100;

/// Default interval between freezer polls.
pub const DEFAULT_FREEZE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default number of passes over nested sandbox mounts.
pub const DEFAULT_UNMOUNT_PASS_LIMIT: u32 = 20;

/// Default ceiling on an app's supplementary groups.
pub const DEFAULT_MAX_SUPPLEMENTARY_GROUPS: usize = 32;

/// Default window in which a repeated fault escalates to stopping the app.
pub const DEFAULT_FAULT_LIMIT_INTERVAL: Duration = Duration::from_secs(10);

/// `PATH` given to every launched process.
pub const DEFAULT_PROCESS_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Default sandbox tmpfs size in bytes.
pub const DEFAULT_MAX_FILE_SYSTEM_BYTES: u64 = 131_072;

/// Default cgroup memory ceiling of an app in bytes.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 40_960_000;

/// Default task ceiling of an app.
pub const DEFAULT_MAX_THREADS: u64 = 20;

/// Default `RLIMIT_CORE` in bytes.
pub const DEFAULT_MAX_CORE_DUMP_FILE_BYTES: u64 = 8192;

/// Default `RLIMIT_FSIZE` in bytes.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 90_112;

/// Default `RLIMIT_MEMLOCK` in bytes.
pub const DEFAULT_MAX_LOCKED_MEMORY_BYTES: u64 = 8192;

/// Default `RLIMIT_NOFILE`.
pub const DEFAULT_MAX_FILE_DESCRIPTORS: u64 = 256;

/// Upper bound on `RLIMIT_NOFILE`.
pub const MAX_FILE_DESCRIPTORS_CEILING: u64 = 1024;

/// Default `RLIMIT_MSGQUEUE` in bytes.
pub const DEFAULT_MAX_MQUEUE_BYTES: u64 = 512;

/// Default `RLIMIT_SIGPENDING`.
pub const DEFAULT_MAX_QUEUED_SIGNALS: u64 = 100;

/// Security label of the framework itself.
pub const FRAMEWORK_LABEL: &str = "framework";

/// Security label of the system logger.
pub const SYSLOG_LABEL: &str = "syslog";

/// Environment variable overriding the runtime directory.
pub const APPVISOR_RUNTIME_DIR_ENV_VAR: &str = "APPVISOR_RUNTIME_DIR";

/// Environment variable naming the settings file.
pub const APPVISOR_SETTINGS_ENV_VAR: &str = "APPVISOR_SETTINGS";
