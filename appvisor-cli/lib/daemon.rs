use std::{
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
};

use anyhow::Context;
use appvisor_core::config::{ConfigStore, ConfigTree, SupervisorSettings};
use nix::sys::reboot::{reboot, RebootMode};
use tracing_subscriber::EnvFilter;

use crate::{AppvisorCliError, AppvisorCliResult, LogLevel};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// File name of the app configuration inside the system directory.
pub const APPS_CONFIG_FILENAME: &str = "apps.yaml";

/// Crates whose logs the `--log-level` flag controls.
const LOG_TARGETS: &[&str] = &["appvisor_core", "appvisor_utils", "appvisor_cli", "appvisord"];

/// A green check mark for status lines.
pub static CHECKMARK: LazyLock<String> =
    LazyLock::new(|| format!("{}", console::style("✓").green()));

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the log filter. An explicit level wins over `RUST_LOG`; without either, only
/// warnings and errors are logged.
pub fn log_filter(level: Option<LogLevel>) -> AppvisorCliResult<EnvFilter> {
    if let Some(level) = level {
        let directive = level.as_directive();
        let directives = LOG_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, directive))
            .collect::<Vec<_>>()
            .join(",");
        return Ok(EnvFilter::try_new(directives)?);
    }

    match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(value) if !value.is_empty() => Ok(EnvFilter::try_new(value)?),
        _ => Ok(EnvFilter::new("warn")),
    }
}

/// Installs the global tracing subscriber.
pub fn init_logging(level: Option<LogLevel>) -> AppvisorCliResult<()> {
    let filter = log_filter(level)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("could not install the log subscriber: {}", e))?;

    Ok(())
}

/// The app configuration file: `explicit` if given, else `apps.yaml` in the system directory.
pub fn config_path(settings: &SupervisorSettings, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| settings.get_system_dir().join(APPS_CONFIG_FILENAME))
}

/// Loads the app configuration tree.
pub fn load_config(path: &Path) -> AppvisorCliResult<Arc<dyn ConfigStore>> {
    tracing::debug!("loading app configuration from {}", path.display());
    let tree = ConfigTree::from_file(path)
        .with_context(|| format!("failed to load app configuration {}", path.display()))?;

    Ok(Arc::new(tree))
}

/// Reboots the host after flushing filesystems. Only returns on failure, or when rebooting
/// is not allowed.
pub fn reboot_host(allowed: bool) -> AppvisorCliResult<()> {
    if !allowed {
        tracing::error!("reboot requested but not allowed by the settings, exiting instead");
        return Ok(());
    }

    tracing::warn!("rebooting the host");
    nix::unistd::sync();
    match reboot(RebootMode::RB_AUTOBOOT) {
        Ok(never) => match never {},
        Err(e) => Err(AppvisorCliError::Nix(e)),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
