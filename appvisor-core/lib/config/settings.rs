//! Supervisor settings loaded from a TOML file.
//!
//! Every field has a default, so an empty or absent settings file yields a working supervisor
//! for the standard host layout.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{AppvisorError, AppvisorResult};

use super::{
    APPVISOR_RUNTIME_DIR_ENV_VAR, APPVISOR_SETTINGS_ENV_VAR, DEFAULT_APPS_CONFIG_ROOT,
    DEFAULT_APPS_INSTALL_DIR, DEFAULT_CGROUP_ROOT, DEFAULT_FAULT_LIMIT_INTERVAL,
    DEFAULT_FREEZE_POLL_INTERVAL, DEFAULT_FREEZE_POLL_LIMIT, DEFAULT_KILL_TIMEOUT,
    DEFAULT_MAX_SUPPLEMENTARY_GROUPS, DEFAULT_RUNTIME_DIR, DEFAULT_SYSTEM_DIR,
    DEFAULT_UNMOUNT_PASS_LIMIT, SANDBOXES_SUBDIR,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A host file or directory bind-mounted into every sandbox.
///
/// `dest` is a directory inside the sandbox; the import lands at `dest/<file name of src>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSpec {
    /// Host path.
    pub src: PathBuf,

    /// Directory inside the sandbox.
    pub dest: PathBuf,
}

/// Host layout and tunables of the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
#[serde(default)]
pub struct SupervisorSettings {
    /// Runtime directory; sandboxes are built under `<runtime_dir>/sandboxes`.
    #[builder(default = PathBuf::from(DEFAULT_RUNTIME_DIR), setter(into))]
    runtime_dir: PathBuf,

    /// Directory where apps are installed, one subdirectory per app.
    #[builder(default = PathBuf::from(DEFAULT_APPS_INSTALL_DIR), setter(into))]
    apps_install_dir: PathBuf,

    /// Directory holding framework files.
    #[builder(default = PathBuf::from(DEFAULT_SYSTEM_DIR), setter(into))]
    system_dir: PathBuf,

    /// cgroup-v2 subtree under which app groups are created.
    #[builder(default = PathBuf::from(DEFAULT_CGROUP_ROOT), setter(into))]
    cgroup_root: PathBuf,

    /// Path of the apps node in the configuration tree.
    #[builder(default = DEFAULT_APPS_CONFIG_ROOT.to_string(), setter(into))]
    apps_config_root: String,

    /// Milliseconds between a soft kill and the hard kill that follows it.
    #[builder(default = DEFAULT_KILL_TIMEOUT.as_millis() as u64)]
    kill_timeout_ms: u64,

    /// Number of freezer polls before a kill proceeds without a confirmed freeze.
    #[builder(default = DEFAULT_FREEZE_POLL_LIMIT)]
    freeze_poll_limit: u32,

    /// Milliseconds between freezer polls.
    #[builder(default = DEFAULT_FREEZE_POLL_INTERVAL.as_millis() as u64)]
    freeze_poll_interval_ms: u64,

    /// Maximum passes over nested sandbox mounts during removal.
    #[builder(default = DEFAULT_UNMOUNT_PASS_LIMIT)]
    unmount_pass_limit: u32,

    /// Maximum number of supplementary groups per app.
    #[builder(default = DEFAULT_MAX_SUPPLEMENTARY_GROUPS)]
    max_supplementary_groups: usize,

    /// Seconds within which a repeated restart-type fault stops the app instead.
    #[builder(default = DEFAULT_FAULT_LIMIT_INTERVAL.as_secs())]
    fault_limit_interval_secs: u64,

    /// Imports added to apps configured with `debug: true`.
    #[builder(default = default_debug_imports())]
    debug_imports: Vec<ImportSpec>,

    /// Imports added to every sandbox.
    #[builder(default = default_sandbox_imports())]
    default_imports: Vec<ImportSpec>,

    /// Whether a reboot fault action may actually reboot the host.
    #[builder(default = false)]
    allow_reboot: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SupervisorSettings {
    /// Loads the settings.
    ///
    /// The file is taken from `path`, or else from the `APPVISOR_SETTINGS` environment variable.
    /// Without either, defaults are used. `APPVISOR_RUNTIME_DIR` overrides `runtime_dir` in all
    /// cases.
    pub fn load(path: Option<&Path>) -> AppvisorResult<Self> {
        let env_path = std::env::var_os(APPVISOR_SETTINGS_ENV_VAR).map(PathBuf::from);
        let mut settings = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => {
                tracing::debug!("loading settings from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        if let Some(runtime_dir) = std::env::var_os(APPVISOR_RUNTIME_DIR_ENV_VAR) {
            settings.runtime_dir = PathBuf::from(runtime_dir);
        }

        Ok(settings)
    }

    /// Parses a settings file.
    pub fn from_file(path: &Path) -> AppvisorResult<Self> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|source| AppvisorError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The directory under which every sandbox is built.
    pub fn sandboxes_dir(&self) -> PathBuf {
        self.runtime_dir.join(SANDBOXES_SUBDIR)
    }

    /// The sandbox root of an app.
    pub fn sandbox_path(&self, app: &str) -> PathBuf {
        self.sandboxes_dir().join(app)
    }

    /// The soft-to-hard kill timeout.
    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    /// The interval between freezer polls.
    pub fn freeze_poll_interval(&self) -> Duration {
        Duration::from_millis(self.freeze_poll_interval_ms)
    }

    /// The window in which a repeated fault escalates.
    pub fn fault_limit_interval(&self) -> Duration {
        Duration::from_secs(self.fault_limit_interval_secs)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Service-directory sockets and the basic device nodes.
pub fn default_sandbox_imports() -> Vec<ImportSpec> {
    [
        ("/tmp/appvisor/serviceDirectoryServer", "/tmp/appvisor/"),
        ("/tmp/appvisor/serviceDirectoryClient", "/tmp/appvisor/"),
        ("/dev/log", "/dev/"),
        ("/dev/null", "/dev/"),
        ("/dev/zero", "/dev/"),
    ]
    .into_iter()
    .map(|(src, dest)| ImportSpec {
        src: src.into(),
        dest: dest.into(),
    })
    .collect()
}

/// The debug server and what it needs to run inside a sandbox.
pub fn default_debug_imports() -> Vec<ImportSpec> {
    [
        ("/usr/bin/gdbserver", "/bin/"),
        ("/lib/libdl.so.2", "/lib/"),
        ("/proc", "/"),
        ("/lib/libgcc_s.so.1", "/lib/"),
    ]
    .into_iter()
    .map(|(src, dest)| ImportSpec {
        src: src.into(),
        dest: dest.into(),
    })
    .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
