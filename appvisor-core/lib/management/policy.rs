//! Resolution of configured fault and watchdog actions.

use crate::config::{join_path, ConfigStore};

use super::{ActionLookup, FaultAction, WatchdogAction};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const FAULT_ACTION_KEY: &str = "faultAction";

const WATCHDOG_ACTION_KEY: &str = "watchdogAction";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The crash action configured for a process. Anything missing or unrecognised means
/// [`FaultAction::Ignore`].
pub fn fault_action(config: &dyn ConfigStore, proc_cfg: &str) -> FaultAction {
    let path = join_path(proc_cfg, FAULT_ACTION_KEY);
    match config.get_string(&path) {
        Ok(Some(name)) if !name.is_empty() => name.parse().unwrap_or_else(|e| {
            tracing::warn!("{} in {}, ignoring faults", e, path);
            FaultAction::Ignore
        }),
        Ok(_) => {
            tracing::info!("no fault action at {}, ignoring faults", path);
            FaultAction::Ignore
        }
        Err(e) => {
            tracing::warn!("{}, ignoring faults", e);
            FaultAction::Ignore
        }
    }
}

/// Looks up the watchdog action configured directly under `cfg_path`.
pub fn lookup_watchdog_action(
    config: &dyn ConfigStore,
    cfg_path: &str,
) -> ActionLookup<WatchdogAction> {
    let path = join_path(cfg_path, WATCHDOG_ACTION_KEY);
    match config.get_string(&path) {
        Ok(Some(name)) if !name.is_empty() => match name.parse() {
            Ok(action) => ActionLookup::Found(action),
            Err(e) => {
                tracing::warn!("{} in {}", e, path);
                ActionLookup::Error
            }
        },
        Ok(_) => ActionLookup::NotFound,
        Err(e) => {
            tracing::warn!("{}", e);
            ActionLookup::Error
        }
    }
}

/// Decides what a watchdog timeout of a process leads to.
///
/// The process's own action wins. When it has none, or an unusable one, the app's action
/// applies. Without any action the process is restarted; an unusable app action restarts the
/// app.
pub fn resolve_watchdog_action(
    config: &dyn ConfigStore,
    proc_cfg: &str,
    app_cfg: &str,
) -> WatchdogAction {
    let lookup = match lookup_watchdog_action(config, proc_cfg) {
        ActionLookup::Found(action) => ActionLookup::Found(action),
        ActionLookup::NotFound | ActionLookup::Error => lookup_watchdog_action(config, app_cfg),
    };

    match lookup {
        ActionLookup::Found(action) => action,
        ActionLookup::NotFound => {
            tracing::warn!(
                "no watchdog action configured for {}, restarting the process",
                proc_cfg
            );
            WatchdogAction::Restart
        }
        ActionLookup::Error => {
            tracing::warn!(
                "unusable watchdog action for {}, restarting the app",
                proc_cfg
            );
            WatchdogAction::RestartApp
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
