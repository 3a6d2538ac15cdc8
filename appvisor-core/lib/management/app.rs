//! A supervised application: its sandbox, resources, processes and stop sequence.

use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Pid, Uid};
use scopeguard::ScopeGuard;

use crate::{
    config::{join_path, path_basename},
    platform::{app_label, KillTarget, Platform, TimerHandle},
    runtime::ExitStatus,
    sandbox::{self, Confinement, SandboxSpec},
    AppvisorError, AppvisorResult,
};

use super::{
    policy, rules, AppFaultAction, CrashOutcome, FaultAction, KillEscalator, KillOutcome,
    KillType, LaunchContext, Process, StopHandler, WatchdogAction,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Lifecycle state of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// No resources are held.
    Stopped,

    /// Started, or in the middle of stopping.
    Running,
}

/// A supervised application.
///
/// An app owns a process group, an optional sandbox, resource limits, access rules and its
/// processes. Stopping is asynchronous: a soft kill is sent and a timer escalates to a hard kill
/// if the group has not emptied by then. The app counts as stopped only once its group is empty
/// and every resource is released.
pub struct App {
    name: String,
    cfg_path: String,
    sandboxed: bool,
    install_dir: PathBuf,
    home_dir: PathBuf,
    sandbox_path: Option<PathBuf>,
    uid: Uid,
    gid: Gid,
    groups: Vec<Gid>,
    state: AppState,
    processes: Vec<Process>,
    kill_timer: Option<TimerHandle>,
    platform: Platform,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl App {
    /// Creates a stopped app from its configuration node. The app name is the node's last path
    /// segment.
    pub fn new(platform: Platform, cfg_path: &str) -> AppvisorResult<Self> {
        let name = path_basename(cfg_path).to_string();
        let config = platform.config.clone();
        if name.is_empty() || !config.exists(cfg_path) {
            return Err(AppvisorError::InvalidConfigPath(cfg_path.to_string()));
        }

        let procs_path = join_path(cfg_path, "procs");
        let process_names = config.children(&procs_path);
        if process_names.is_empty() && matches!(config.get_string(&procs_path), Ok(Some(_))) {
            return Err(AppvisorError::Config(format!(
                "{} must list processes",
                procs_path
            )));
        }

        let sandboxed = config.get_bool(&join_path(cfg_path, "sandboxed"), true);
        let install_dir = Path::new(platform.settings.get_apps_install_dir()).join(&name);

        let mut app = Self {
            sandboxed,
            home_dir: install_dir.clone(),
            install_dir,
            sandbox_path: None,
            uid: Uid::from_raw(0),
            gid: Gid::from_raw(0),
            groups: Vec::new(),
            state: AppState::Stopped,
            processes: process_names
                .iter()
                .map(|proc_name| Process::new(join_path(&procs_path, proc_name)))
                .collect(),
            kill_timer: None,
            cfg_path: cfg_path.to_string(),
            name,
            platform,
        };

        if sandboxed {
            let (uid, gid) = app.platform.users.app_ids(&app.name)?;
            app.uid = uid;
            app.gid = gid;
            app.groups = app.supplementary_groups()?;
            app.home_dir = Path::new("/home").join(&app.name);
            app.sandbox_path = Some(app.platform.settings.sandbox_path(&app.name));
        }

        tracing::debug!(
            "created app {} with {} processes (sandboxed: {})",
            app.name,
            app.processes.len(),
            app.sandboxed
        );

        Ok(app)
    }

    /// The app name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The app's configuration node.
    pub fn cfg_path(&self) -> &str {
        &self.cfg_path
    }

    /// The lifecycle state.
    pub fn state(&self) -> AppState {
        self.state
    }

    /// Whether processes are confined to a sandbox.
    pub fn is_sandboxed(&self) -> bool {
        self.sandboxed
    }

    /// Host path of the sandbox root, for sandboxed apps.
    pub fn sandbox_path(&self) -> Option<&Path> {
        self.sandbox_path.as_deref()
    }

    /// The app's user and primary group.
    pub fn ids(&self) -> (Uid, Gid) {
        (self.uid, self.gid)
    }

    /// Supplementary groups of the app's processes.
    pub fn supplementary_group_ids(&self) -> &[Gid] {
        &self.groups
    }

    /// The app's processes in configuration order.
    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    /// Finds a process by name.
    pub fn process(&self, name: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.name() == name)
    }

    /// Whether `pid` is one of this app's processes.
    pub fn has_pid(&self, pid: Pid) -> bool {
        self.processes.iter().any(|p| p.pid() == Some(pid))
    }

    /// Whether a stop is waiting for the process group to empty.
    pub fn is_stopping(&self) -> bool {
        self.kill_timer.is_some()
    }

    /// Starts the app: sandbox, process group, limits, access rules and then every process.
    ///
    /// If a resource cannot be set up everything acquired so far is released. If a process
    /// fails to start, the processes already started are stopped the usual way and the error is
    /// returned while the stop completes.
    pub fn start(&mut self) -> AppvisorResult<()> {
        if self.state == AppState::Running {
            tracing::error!("app {} is already running", self.name);
            return Err(AppvisorError::AppAlreadyRunning(self.name.clone()));
        }

        tracing::info!("starting app {}", self.name);
        self.acquire_resources()?;

        let failure = {
            let ctx = LaunchContext {
                app: &self.name,
                platform: &self.platform,
                confinement: self.confinement(),
                install_dir: &self.install_dir,
                home_dir: &self.home_dir,
            };
            self.processes
                .iter_mut()
                .find_map(|process| process.start(&ctx).err())
        };

        self.state = AppState::Running;

        if let Some(e) = failure {
            tracing::error!("app {} failed to start: {}", self.name, e);
            self.stop()?;
            return Err(e);
        }

        tracing::info!("app {} is running", self.name);
        Ok(())
    }

    /// Begins stopping the app. Returns once the soft kill is sent; the app reaches
    /// [`AppState::Stopped`] after its last process has been reaped.
    pub fn stop(&mut self) -> AppvisorResult<()> {
        if self.state == AppState::Stopped {
            tracing::error!("app {} is not running", self.name);
            return Err(AppvisorError::AppNotRunning(self.name.clone()));
        }

        if self.kill_timer.is_some() {
            tracing::debug!("app {} is already stopping", self.name);
            return Ok(());
        }

        tracing::info!("stopping app {}", self.name);
        match self.kill(KillType::Soft)? {
            KillOutcome::Empty => self.finish_stop(),
            KillOutcome::Signalled(_) => {
                self.kill_timer = Some(self.platform.timers.arm(
                    KillTarget::App(self.name.clone()),
                    self.platform.settings.kill_timeout(),
                ));
            }
        }

        Ok(())
    }

    /// Hard-kills the app if `handle` is its current kill timer.
    pub fn on_kill_timer(&mut self, handle: TimerHandle) -> AppvisorResult<()> {
        if self.kill_timer != Some(handle) {
            tracing::debug!("ignoring stale kill timer {:?} of app {}", handle, self.name);
            return Ok(());
        }

        tracing::warn!("app {} did not stop in time, hard killing", self.name);
        if self.kill(KillType::Hard)? == KillOutcome::Empty {
            self.finish_stop();
        }

        Ok(())
    }

    /// Hard-kills a process of this app if `handle` is its current kill timer.
    pub fn on_process_kill_timer(&mut self, process: &str, handle: TimerHandle) -> AppvisorResult<()> {
        match self.processes.iter_mut().find(|p| p.name() == process) {
            Some(process) => process.on_kill_timer(handle, &self.platform),
            None => Ok(()),
        }
    }

    /// Handles a status change of one of this app's processes.
    ///
    /// Returns `None` if `pid` is not one of them. Decisions the app cannot carry out alone are
    /// returned for its owner.
    pub fn on_child_exit(
        &mut self,
        pid: Pid,
        status: ExitStatus,
    ) -> AppvisorResult<Option<AppFaultAction>> {
        let Some(index) = self.processes.iter().position(|p| p.pid() == Some(pid)) else {
            return Ok(None);
        };

        let outcome = self.processes[index].on_exit(
            status,
            self.platform.config.as_ref(),
            self.platform.timers.as_ref(),
            self.platform.settings.fault_limit_interval(),
        );

        let action = match outcome {
            CrashOutcome::NoFault if status.is_terminal() => self.run_stop_handler(index),
            CrashOutcome::NoFault => AppFaultAction::Handled,
            CrashOutcome::Fault(FaultAction::Ignore) => {
                tracing::warn!(
                    "process {} of app {} faulted and is left stopped",
                    self.processes[index].name(),
                    self.name
                );
                AppFaultAction::Handled
            }
            CrashOutcome::Fault(FaultAction::Restart) => self.restart_process(index),
            CrashOutcome::Fault(FaultAction::RestartApp) => AppFaultAction::RestartApp,
            CrashOutcome::Fault(FaultAction::StopApp) => AppFaultAction::StopApp,
            CrashOutcome::Fault(FaultAction::Reboot) => AppFaultAction::Reboot,
        };

        // A group empties as soon as its members die, before their exits are reaped. Deaths
        // still waiting to be reported must be handled before the app counts as stopped.
        if status.is_terminal()
            && self.state == AppState::Running
            && self.platform.groups.is_empty(&self.name)?
        {
            if self.processes.iter().any(|p| p.pid().is_some()) {
                tracing::debug!(
                    "group of app {} is empty, waiting for pending process exits",
                    self.name
                );
            } else {
                tracing::info!("last process of app {} has exited", self.name);
                self.finish_stop();
            }
        }

        Ok(Some(action))
    }

    /// Handles a missed watchdog deadline of one of this app's processes.
    ///
    /// Returns `None` if `pid` is not one of them.
    pub fn on_watchdog_timeout(&mut self, pid: Pid) -> AppvisorResult<Option<AppFaultAction>> {
        let Some(index) = self.processes.iter().position(|p| p.pid() == Some(pid)) else {
            return Ok(None);
        };

        let process_name = self.processes[index].name().to_string();
        let action = policy::resolve_watchdog_action(
            self.platform.config.as_ref(),
            self.processes[index].cfg_path(),
            &self.cfg_path,
        );
        tracing::warn!(
            "watchdog of process {} of app {} expired, action is {:?}",
            process_name,
            self.name,
            action
        );

        let decision = match action {
            WatchdogAction::Ignore => AppFaultAction::Handled,
            WatchdogAction::Stop => {
                self.processes[index].set_stop_handler(StopHandler::None);
                self.processes[index].stop(&self.platform, &self.name)?;
                AppFaultAction::Handled
            }
            WatchdogAction::Restart => {
                self.processes[index].set_stop_handler(StopHandler::RestartProcess);
                self.processes[index].stop(&self.platform, &self.name)?;
                AppFaultAction::Handled
            }
            WatchdogAction::RestartApp => AppFaultAction::RestartApp,
            WatchdogAction::StopApp => AppFaultAction::StopApp,
            WatchdogAction::Reboot => AppFaultAction::Reboot,
        };

        Ok(Some(decision))
    }

    fn supplementary_groups(&self) -> AppvisorResult<Vec<Gid>> {
        let names = self
            .platform
            .config
            .string_list(&join_path(&self.cfg_path, "groups"))?;

        let max = *self.platform.settings.get_max_supplementary_groups();
        if names.len() > max {
            return Err(AppvisorError::TooManyGroups {
                app: self.name.clone(),
                count: names.len(),
                max,
            });
        }

        names
            .iter()
            .map(|group| self.platform.users.group_id(group))
            .collect()
    }

    fn confinement(&self) -> Option<Confinement> {
        self.sandbox_path.as_ref().map(|root| {
            Confinement::new(
                root,
                &self.home_dir.display().to_string(),
                self.uid,
                self.gid,
                self.groups.clone(),
            )
        })
    }

    fn acquire_resources(&mut self) -> AppvisorResult<()> {
        if let Some(root) = &self.sandbox_path {
            sandbox::setup(
                &self.platform,
                &SandboxSpec {
                    app: &self.name,
                    cfg_path: &self.cfg_path,
                    root,
                    install_dir: &self.install_dir,
                    uid: self.uid,
                    gid: self.gid,
                },
            )?;
        }

        let rollback = scopeguard::guard((), |_| {
            release_resources(&self.platform, &self.name, self.sandbox_path.as_deref())
        });

        self.platform.groups.create(&self.name)?;
        self.platform
            .limits
            .set_app_limits(&self.name, self.platform.config.as_ref(), &self.cfg_path)?;
        rules::install_app_rules(
            self.platform.labels.as_ref(),
            self.platform.config.as_ref(),
            &self.name,
            &self.cfg_path,
        )?;

        ScopeGuard::into_inner(rollback);
        Ok(())
    }

    fn kill(&mut self, kill: KillType) -> AppvisorResult<KillOutcome> {
        let processes = &mut self.processes;
        let timers = self.platform.timers.as_ref();

        KillEscalator::new(&self.platform).kill(&self.name, kill, || {
            for process in processes.iter_mut() {
                process.mark_stopping(timers);
            }
        })
    }

    fn finish_stop(&mut self) {
        if let Some(handle) = self.kill_timer.take() {
            self.platform.timers.cancel(handle);
        }

        for process in &mut self.processes {
            process.reset(self.platform.timers.as_ref());
        }

        release_resources(&self.platform, &self.name, self.sandbox_path.as_deref());
        self.state = AppState::Stopped;

        tracing::info!("app {} has stopped", self.name);
    }

    fn run_stop_handler(&mut self, index: usize) -> AppFaultAction {
        match self.processes[index].take_stop_handler() {
            StopHandler::None => AppFaultAction::Handled,
            StopHandler::RestartProcess => self.restart_process(index),
        }
    }

    fn restart_process(&mut self, index: usize) -> AppFaultAction {
        if self.kill_timer.is_some() {
            return AppFaultAction::Handled;
        }

        let ctx = LaunchContext {
            app: &self.name,
            platform: &self.platform,
            confinement: self.confinement(),
            install_dir: &self.install_dir,
            home_dir: &self.home_dir,
        };

        let process = &mut self.processes[index];
        tracing::info!("restarting process {} of app {}", process.name(), self.name);
        match process.start(&ctx) {
            Ok(()) => AppFaultAction::Handled,
            Err(e) => {
                tracing::error!("could not restart process {}: {}", process.name(), e);
                AppFaultAction::StopApp
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

/// Releases an app's resources in reverse order of acquisition. Failures are logged.
fn release_resources(platform: &Platform, app: &str, sandbox_path: Option<&Path>) {
    if let Err(e) = platform.labels.revoke_subject(&app_label(app)) {
        tracing::warn!("could not revoke access rules of app {}: {}", app, e);
    }

    if let Err(e) = platform.limits.cleanup_app(app) {
        tracing::warn!("could not release resource limits of app {}: {}", app, e);
    }

    if let Some(root) = sandbox_path {
        if let Err(e) = sandbox::remove(platform, app, root) {
            tracing::error!("could not remove sandbox of app {}: {}", app, e);
        }
    }

    if let Err(e) = platform.groups.remove(app) {
        tracing::warn!("could not remove process group of app {}: {}", app, e);
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
