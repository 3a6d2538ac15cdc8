//! App and process resource limits.

use std::{
    fs::OpenOptions,
    io::{self, Write},
};

use appvisor_utils::{CgroupTree, CGROUP_MEMORY_MAX_FILE, CGROUP_PIDS_MAX_FILE};
use nix::sys::resource::{setrlimit, Resource};

use crate::{
    config::{
        join_path, ConfigStore, DEFAULT_MAX_CORE_DUMP_FILE_BYTES, DEFAULT_MAX_FILE_BYTES,
        DEFAULT_MAX_FILE_DESCRIPTORS, DEFAULT_MAX_FILE_SYSTEM_BYTES,
        DEFAULT_MAX_LOCKED_MEMORY_BYTES, DEFAULT_MAX_MEMORY_BYTES, DEFAULT_MAX_MQUEUE_BYTES,
        DEFAULT_MAX_QUEUED_SIGNALS, DEFAULT_MAX_THREADS, MAX_FILE_DESCRIPTORS_CEILING,
    },
    AppvisorError, AppvisorResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Computes and applies resource limits.
///
/// The provided methods read limits from the app configuration; implementors only decide how
/// app-wide limits reach the OS.
pub trait ResourceLimits: Send + Sync {
    /// Applies the app-wide limits configured under `app_cfg`.
    fn set_app_limits(&self, app: &str, config: &dyn ConfigStore, app_cfg: &str)
        -> AppvisorResult<()>;

    /// Releases whatever `set_app_limits` put in place.
    fn cleanup_app(&self, app: &str) -> AppvisorResult<()>;

    /// Size of the app's sandbox filesystem in bytes.
    fn sandbox_fs_bytes(&self, config: &dyn ConfigStore, app_cfg: &str) -> u64 {
        match read_limit(config, app_cfg, "maxFileSystemBytes", DEFAULT_MAX_FILE_SYSTEM_BYTES) {
            0 => {
                tracing::error!(
                    "maxFileSystemBytes of {} is zero, using {}",
                    app_cfg,
                    DEFAULT_MAX_FILE_SYSTEM_BYTES
                );
                DEFAULT_MAX_FILE_SYSTEM_BYTES
            }
            bytes => bytes,
        }
    }

    /// Limits applied to a process before it execs.
    fn process_limits(&self, config: &dyn ConfigStore, proc_cfg: &str) -> ProcessLimits {
        let mut file_descriptors = read_limit(
            config,
            proc_cfg,
            "maxFileDescriptors",
            DEFAULT_MAX_FILE_DESCRIPTORS,
        );
        if file_descriptors > MAX_FILE_DESCRIPTORS_CEILING {
            tracing::warn!(
                "maxFileDescriptors of {} exceeds {}, capping",
                proc_cfg,
                MAX_FILE_DESCRIPTORS_CEILING
            );
            file_descriptors = MAX_FILE_DESCRIPTORS_CEILING;
        }

        ProcessLimits {
            core_dump_file_bytes: read_limit(
                config,
                proc_cfg,
                "maxCoreDumpFileBytes",
                DEFAULT_MAX_CORE_DUMP_FILE_BYTES,
            ),
            file_bytes: read_limit(config, proc_cfg, "maxFileBytes", DEFAULT_MAX_FILE_BYTES),
            locked_memory_bytes: read_limit(
                config,
                proc_cfg,
                "maxLockedMemoryBytes",
                DEFAULT_MAX_LOCKED_MEMORY_BYTES,
            ),
            file_descriptors,
            mqueue_bytes: read_limit(config, proc_cfg, "maxMQueueBytes", DEFAULT_MAX_MQUEUE_BYTES),
            queued_signals: read_limit(
                config,
                proc_cfg,
                "maxQueuedSignals",
                DEFAULT_MAX_QUEUED_SIGNALS,
            ),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Per-process rlimits. Soft and hard limits are set to the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    /// `RLIMIT_CORE`.
    pub core_dump_file_bytes: u64,

    /// `RLIMIT_FSIZE`.
    pub file_bytes: u64,

    /// `RLIMIT_MEMLOCK`.
    pub locked_memory_bytes: u64,

    /// `RLIMIT_NOFILE`.
    pub file_descriptors: u64,

    /// `RLIMIT_MSGQUEUE`.
    pub mqueue_bytes: u64,

    /// `RLIMIT_SIGPENDING`.
    pub queued_signals: u64,
}

/// App-wide limits written into the app's cgroup.
#[derive(Debug, Clone)]
pub struct CgroupLimits {
    tree: CgroupTree,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProcessLimits {
    /// Applies the limits to the calling process. Only async-signal-safe calls are made, so this
    /// can run between fork and exec.
    pub fn apply(&self) -> nix::Result<()> {
        let limits = [
            (Resource::RLIMIT_CORE, self.core_dump_file_bytes),
            (Resource::RLIMIT_FSIZE, self.file_bytes),
            (Resource::RLIMIT_MEMLOCK, self.locked_memory_bytes),
            (Resource::RLIMIT_NOFILE, self.file_descriptors),
            (Resource::RLIMIT_MSGQUEUE, self.mqueue_bytes),
            (Resource::RLIMIT_SIGPENDING, self.queued_signals),
        ];

        for (resource, value) in limits {
            setrlimit(resource, value, value)?;
        }

        Ok(())
    }
}

impl CgroupLimits {
    /// Writes limits into groups of `tree`.
    pub fn new(tree: CgroupTree) -> Self {
        Self { tree }
    }

    fn write_control(&self, app: &str, file: &str, value: u64) -> AppvisorResult<()> {
        let path = self.tree.group_dir(app).join(file);
        let written = OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|mut control| control.write_all(value.to_string().as_bytes()));

        match written {
            Ok(()) => {
                tracing::debug!("{} = {} for app {}", file, value, app);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!("{} is unavailable, app {} runs without it", file, app);
                Ok(())
            }
            Err(e) => Err(AppvisorError::ResourceLimit(format!(
                "{}: {}",
                path.display(),
                e
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ResourceLimits for CgroupLimits {
    fn set_app_limits(
        &self,
        app: &str,
        config: &dyn ConfigStore,
        app_cfg: &str,
    ) -> AppvisorResult<()> {
        let memory = read_limit(config, app_cfg, "maxMemoryBytes", DEFAULT_MAX_MEMORY_BYTES);
        let threads = read_limit(config, app_cfg, "maxThreads", DEFAULT_MAX_THREADS);

        self.write_control(app, CGROUP_MEMORY_MAX_FILE, memory)?;
        self.write_control(app, CGROUP_PIDS_MAX_FILE, threads)
    }

    fn cleanup_app(&self, app: &str) -> AppvisorResult<()> {
        // Controller files disappear with the group.
        tracing::debug!("released limits of app {}", app);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn read_limit(config: &dyn ConfigStore, base: &str, key: &str, default: u64) -> u64 {
    let path = join_path(base, key);
    match config.get_int(&path) {
        Ok(Some(value)) if value >= 0 => value as u64,
        Ok(Some(value)) => {
            tracing::error!("{} is negative ({}), using {}", path, value, default);
            default
        }
        Ok(None) => default,
        Err(e) => {
            tracing::error!("{}, using {}", e, default);
            default
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
