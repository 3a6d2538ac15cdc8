use std::collections::BTreeMap;

use nix::unistd::Pid;

use crate::{
    config::join_path,
    platform::{KillTarget, Platform, TimerHandle},
    runtime::ExitStatus,
    AppvisorError, AppvisorResult,
};

use super::{App, AppFaultAction, AppState, ProcessState};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What happens to an app once it has fully stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnStopped {
    /// Forget it.
    Delete,

    /// Start it again.
    Restart,

    /// Forget it; the supervisor is shutting down.
    Shutdown,
}

/// Whether the event loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// Keep supervising.
    Continue,

    /// An app asked for the host to be rebooted.
    Reboot,
}

struct ManagedApp {
    app: App,
    on_stopped: OnStopped,
}

/// The set of apps under supervision, keyed by name.
///
/// Every event handler settles the affected app before returning: an app that has reached
/// [`AppState::Stopped`] is either deleted or started again, depending on why it was stopped.
pub struct Supervisor {
    platform: Platform,
    apps: BTreeMap<String, ManagedApp>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Supervisor {
    /// Creates a supervisor with no apps.
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            apps: BTreeMap::new(),
        }
    }

    /// The platform apps are created with.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Creates and starts the app configured under `<apps_config_root>/<name>`.
    pub fn start_app(&mut self, name: &str) -> AppvisorResult<()> {
        if self.apps.contains_key(name) {
            tracing::error!("app {} is already running", name);
            return Err(AppvisorError::AppAlreadyRunning(name.to_string()));
        }

        let cfg_path = join_path(self.platform.settings.get_apps_config_root(), name);
        let mut app = App::new(self.platform.clone(), &cfg_path)?;

        let result = app.start();
        if app.state() == AppState::Running {
            self.apps.insert(
                name.to_string(),
                ManagedApp {
                    app,
                    on_stopped: OnStopped::Delete,
                },
            );
        }

        result
    }

    /// Begins stopping an app. It is deleted once its processes are gone.
    pub fn stop_app(&mut self, name: &str) -> AppvisorResult<()> {
        let Some(managed) = self.apps.get_mut(name) else {
            tracing::error!("app {} is not running", name);
            return Err(AppvisorError::AppNotFound(name.to_string()));
        };

        managed.on_stopped = OnStopped::Delete;
        managed.app.stop()?;
        self.settle(name)
    }

    /// Starts every configured app that is not marked `startManual`.
    ///
    /// Failures are logged and the remaining apps are still started.
    pub fn launch_startup_apps(&mut self) -> AppvisorResult<()> {
        let root = self.platform.settings.get_apps_config_root().to_string();

        for name in self.platform.config.children(&root) {
            let cfg_path = join_path(&root, &name);
            if self
                .platform
                .config
                .get_bool(&join_path(&cfg_path, "startManual"), false)
            {
                tracing::debug!("app {} is started manually, skipping", name);
                continue;
            }

            match self.start_app(&name) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::error!("could not start app {}: {}", name, e),
            }
        }

        Ok(())
    }

    /// Begins stopping every app for shutdown.
    ///
    /// An app that fails to stop is logged and skipped; only fatal errors are returned.
    pub fn stop_all(&mut self) -> AppvisorResult<()> {
        let names: Vec<String> = self.apps.keys().cloned().collect();

        for name in names {
            let Some(managed) = self.apps.get_mut(&name) else {
                continue;
            };
            managed.on_stopped = OnStopped::Shutdown;

            let result = match managed.app.stop() {
                Ok(()) => self.settle(&name),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => tracing::error!("could not stop app {}: {}", name, e),
            }
        }

        Ok(())
    }

    /// Whether no app is supervised any more.
    pub fn is_idle(&self) -> bool {
        self.apps.is_empty()
    }

    /// Names of the supervised apps.
    pub fn app_names(&self) -> Vec<&str> {
        self.apps.keys().map(String::as_str).collect()
    }

    /// State of a supervised app. Unknown apps are stopped.
    pub fn app_state(&self, name: &str) -> AppState {
        self.apps
            .get(name)
            .map_or(AppState::Stopped, |managed| managed.app.state())
    }

    /// Name and state of the app owning `pid`.
    pub fn app_state_by_pid(&self, pid: Pid) -> Option<(&str, AppState)> {
        self.apps
            .values()
            .find(|managed| managed.app.has_pid(pid))
            .map(|managed| (managed.app.name(), managed.app.state()))
    }

    /// State of a process of a supervised app. Unknown processes are stopped.
    pub fn process_state(&self, app: &str, process: &str) -> ProcessState {
        self.apps
            .get(app)
            .and_then(|managed| managed.app.process(process))
            .map_or(ProcessState::Stopped, |p| p.state())
    }

    /// A supervised app.
    pub fn app(&self, name: &str) -> Option<&App> {
        self.apps.get(name).map(|managed| &managed.app)
    }

    /// Handles a status change reported for `pid`.
    pub fn on_child_exit(&mut self, pid: Pid, status: ExitStatus) -> AppvisorResult<SupervisorOutcome> {
        let names: Vec<String> = self.apps.keys().cloned().collect();

        for name in names {
            let Some(managed) = self.apps.get_mut(&name) else {
                continue;
            };
            if let Some(action) = managed.app.on_child_exit(pid, status)? {
                let outcome = self.apply_action(&name, action)?;
                self.settle(&name)?;
                return Ok(outcome);
            }
        }

        tracing::debug!("pid {} belongs to no app", pid);
        Ok(SupervisorOutcome::Continue)
    }

    /// Handles a missed watchdog deadline of `pid`.
    pub fn on_watchdog_timeout(&mut self, pid: Pid) -> AppvisorResult<SupervisorOutcome> {
        let Some(name) = self
            .apps
            .iter()
            .find(|(_, managed)| managed.app.has_pid(pid))
            .map(|(name, _)| name.clone())
        else {
            tracing::warn!("watchdog timeout for unknown pid {}", pid);
            return Ok(SupervisorOutcome::Continue);
        };

        let action = match self.apps.get_mut(&name) {
            Some(managed) => managed.app.on_watchdog_timeout(pid)?,
            None => None,
        };

        let outcome = match action {
            Some(action) => self.apply_action(&name, action)?,
            None => SupervisorOutcome::Continue,
        };
        self.settle(&name)?;

        Ok(outcome)
    }

    /// Handles an expired kill timer.
    pub fn on_kill_timer(&mut self, target: &KillTarget, handle: TimerHandle) -> AppvisorResult<()> {
        let name = target.app();
        let Some(managed) = self.apps.get_mut(name) else {
            tracing::debug!("kill timer {:?} for unknown app {}", handle, name);
            return Ok(());
        };

        match target {
            KillTarget::App(_) => managed.app.on_kill_timer(handle)?,
            KillTarget::Process { process, .. } => {
                managed.app.on_process_kill_timer(process, handle)?
            }
        }

        let name = name.to_string();
        self.settle(&name)
    }

    fn apply_action(&mut self, name: &str, action: AppFaultAction) -> AppvisorResult<SupervisorOutcome> {
        let Some(managed) = self.apps.get_mut(name) else {
            return Ok(SupervisorOutcome::Continue);
        };

        match action {
            AppFaultAction::Handled => {}
            AppFaultAction::RestartApp => {
                tracing::warn!("restarting app {}", name);
                if managed.on_stopped != OnStopped::Shutdown {
                    managed.on_stopped = OnStopped::Restart;
                }
                if managed.app.state() == AppState::Running {
                    managed.app.stop()?;
                }
            }
            AppFaultAction::StopApp => {
                tracing::warn!("stopping app {}", name);
                if managed.on_stopped != OnStopped::Shutdown {
                    managed.on_stopped = OnStopped::Delete;
                }
                if managed.app.state() == AppState::Running {
                    managed.app.stop()?;
                }
            }
            AppFaultAction::Reboot => {
                tracing::error!("app {} requested a reboot, rebooting", name);
                return Ok(SupervisorOutcome::Reboot);
            }
        }

        Ok(SupervisorOutcome::Continue)
    }

    /// Deletes or restarts `name` if it has fully stopped.
    fn settle(&mut self, name: &str) -> AppvisorResult<()> {
        let Some(managed) = self.apps.get_mut(name) else {
            return Ok(());
        };
        if managed.app.state() != AppState::Stopped {
            return Ok(());
        }

        match managed.on_stopped {
            OnStopped::Delete | OnStopped::Shutdown => {
                tracing::info!("app {} has stopped, removing it", name);
            }
            OnStopped::Restart => {
                managed.on_stopped = OnStopped::Delete;
                match managed.app.start() {
                    Ok(()) => return Ok(()),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        tracing::error!("could not restart app {}: {}", name, e);
                        if managed.app.state() == AppState::Running {
                            return Ok(());
                        }
                    }
                }
            }
        }

        self.delete_app(name)
    }

    fn delete_app(&mut self, name: &str) -> AppvisorResult<()> {
        match self.apps.get(name) {
            Some(managed) if managed.app.state() != AppState::Stopped => {
                Err(AppvisorError::Fatal(format!(
                    "attempted to delete running app {}",
                    name
                )))
            }
            Some(_) => {
                self.apps.remove(name);
                Ok(())
            }
            None => Ok(()),
        }
    }
}
