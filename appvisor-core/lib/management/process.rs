use std::{
    path::Path,
    time::{Duration, Instant},
};

use nix::{sys::signal::Signal, unistd::Pid};

use crate::{
    config::{join_path, path_basename, ConfigStore},
    platform::{KillTarget, KillTimers, Platform, SpawnRequest, TimerHandle},
    runtime::ExitStatus,
    sandbox::Confinement,
    AppvisorError, AppvisorResult,
};

use super::{policy, FaultAction};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not running.
    Stopped,

    /// Running.
    Running,

    /// Stopped by a signal and waiting to be continued.
    Paused,
}

/// What to do once a process that is being stopped has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopHandler {
    /// Nothing.
    #[default]
    None,

    /// Start it again.
    RestartProcess,
}

/// How an exit is classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashOutcome {
    /// A clean exit, a deliberate kill, or a pause or resume.
    NoFault,

    /// A fault with the action to take.
    Fault(FaultAction),
}

/// What a process needs from its app to launch.
pub struct LaunchContext<'a> {
    /// The owning app.
    pub app: &'a str,

    /// Collaborators and settings.
    pub platform: &'a Platform,

    /// Sandbox confinement, if the app is sandboxed.
    pub confinement: Option<Confinement>,

    /// Working directory of unconfined processes.
    pub install_dir: &'a Path,

    /// The app's writable home, as seen by the process.
    pub home_dir: &'a Path,
}

/// One supervised OS process of an app.
#[derive(Debug)]
pub struct Process {
    name: String,
    cfg_path: String,
    pid: Option<Pid>,
    state: ProcessState,
    stopping: bool,
    stop_handler: StopHandler,
    last_fault: Option<Instant>,
    kill_timer: Option<TimerHandle>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Process {
    /// Creates a stopped process from its configuration node. The name is the node's last
    /// path segment.
    pub fn new(cfg_path: impl Into<String>) -> Self {
        let cfg_path = cfg_path.into();
        Self {
            name: path_basename(&cfg_path).to_string(),
            cfg_path,
            pid: None,
            state: ProcessState::Stopped,
            stopping: false,
            stop_handler: StopHandler::None,
            last_fault: None,
            kill_timer: None,
        }
    }

    /// The process name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The process's configuration node.
    pub fn cfg_path(&self) -> &str {
        &self.cfg_path
    }

    /// The OS pid while the process exists.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// The lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// The pending stop handler.
    pub fn stop_handler(&self) -> StopHandler {
        self.stop_handler
    }

    /// Sets what happens once the process has exited.
    pub fn set_stop_handler(&mut self, handler: StopHandler) {
        self.stop_handler = handler;
    }

    /// Takes the stop handler, leaving none.
    pub fn take_stop_handler(&mut self) -> StopHandler {
        std::mem::take(&mut self.stop_handler)
    }

    /// Launches the process.
    pub fn start(&mut self, ctx: &LaunchContext) -> AppvisorResult<()> {
        let fail = |reason: String| AppvisorError::ProcessStart {
            app: ctx.app.to_string(),
            process: self.name.clone(),
            reason,
        };

        if self.state != ProcessState::Stopped {
            return Err(fail("already running".to_string()));
        }

        let config = ctx.platform.config.as_ref();
        let mut args = config.string_list(&join_path(&self.cfg_path, "args"))?;
        if args.is_empty() {
            return Err(fail("no executable configured".to_string()));
        }
        let program = args.remove(0);

        let mut env = vec![("HOME".to_string(), ctx.home_dir.display().to_string())];
        env.extend(read_env_vars(config, &self.cfg_path)?);

        let request = SpawnRequest {
            app: ctx.app.to_string(),
            process: self.name.clone(),
            program: program.into(),
            args,
            env,
            procs_file: ctx.platform.groups.procs_file(ctx.app),
            limits: ctx.platform.limits.process_limits(config, &self.cfg_path),
            confinement: ctx.confinement.clone(),
            working_dir: ctx.install_dir.to_path_buf(),
        };

        let pid = ctx.platform.spawner.spawn(&request)?;

        self.pid = Some(pid);
        self.state = ProcessState::Running;
        self.stopping = false;

        Ok(())
    }

    /// Marks the process as deliberately killed by its app. Its coming exit is not a fault and
    /// any stop handler is dropped.
    pub fn mark_stopping(&mut self, timers: &dyn KillTimers) {
        if self.state == ProcessState::Stopped {
            return;
        }

        self.stopping = true;
        self.stop_handler = StopHandler::None;
        if let Some(handle) = self.kill_timer.take() {
            timers.cancel(handle);
        }
    }

    /// Soft-kills this process alone and arms a hard-kill timer for it. The stop handler is
    /// kept.
    pub fn stop(&mut self, platform: &Platform, app: &str) -> AppvisorResult<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        self.stopping = true;
        if !platform.spawner.signal(pid, Signal::SIGTERM)? {
            tracing::debug!("process {} of app {} is already gone", self.name, app);
            return Ok(());
        }

        if let Some(previous) = self.kill_timer.take() {
            platform.timers.cancel(previous);
        }
        self.kill_timer = Some(platform.timers.arm(
            KillTarget::Process {
                app: app.to_string(),
                process: self.name.clone(),
            },
            platform.settings.kill_timeout(),
        ));

        Ok(())
    }

    /// Hard-kills the process if `handle` is its current kill timer.
    pub fn on_kill_timer(&mut self, handle: TimerHandle, platform: &Platform) -> AppvisorResult<()> {
        if self.kill_timer != Some(handle) {
            return Ok(());
        }
        self.kill_timer = None;

        if let Some(pid) = self.pid {
            tracing::warn!("process {} did not stop in time, hard killing", self.name);
            platform.spawner.signal(pid, Signal::SIGKILL)?;
        }

        Ok(())
    }

    /// Updates the state after the OS reported `status` and classifies the exit.
    ///
    /// A restart-type fault less than `fault_limit` after the previous one becomes
    /// [`FaultAction::StopApp`].
    pub fn on_exit(
        &mut self,
        status: ExitStatus,
        config: &dyn ConfigStore,
        timers: &dyn KillTimers,
        fault_limit: Duration,
    ) -> CrashOutcome {
        match status {
            ExitStatus::Stopped(_) => {
                self.state = ProcessState::Paused;
                return CrashOutcome::NoFault;
            }
            ExitStatus::Continued => {
                self.state = ProcessState::Running;
                return CrashOutcome::NoFault;
            }
            ExitStatus::Exited(_) | ExitStatus::Signaled(_) => {}
        }

        tracing::info!("process {} {}", self.name, status);
        self.pid = None;
        self.state = ProcessState::Stopped;
        if let Some(handle) = self.kill_timer.take() {
            timers.cancel(handle);
        }

        if std::mem::take(&mut self.stopping) || status == ExitStatus::Exited(0) {
            return CrashOutcome::NoFault;
        }

        let mut action = policy::fault_action(config, &self.cfg_path);
        tracing::error!("process {} faulted, fault action is {:?}", self.name, action);

        if matches!(action, FaultAction::Restart | FaultAction::RestartApp) {
            let now = Instant::now();
            if let Some(last) = self.last_fault {
                if now.duration_since(last) < fault_limit {
                    tracing::error!(
                        "process {} faulted again within {:?}, stopping its app",
                        self.name,
                        fault_limit
                    );
                    action = FaultAction::StopApp;
                }
            }
            self.last_fault = Some(now);
        }

        CrashOutcome::Fault(action)
    }

    /// Forgets the OS process after the whole app has stopped.
    pub fn reset(&mut self, timers: &dyn KillTimers) {
        if let Some(handle) = self.kill_timer.take() {
            timers.cancel(handle);
        }
        self.pid = None;
        self.state = ProcessState::Stopped;
        self.stopping = false;
        self.stop_handler = StopHandler::None;
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn read_env_vars(config: &dyn ConfigStore, cfg_path: &str) -> AppvisorResult<Vec<(String, String)>> {
    let env_path = join_path(cfg_path, "envVars");
    let mut env = Vec::new();

    for key in config.children(&env_path) {
        let value = config
            .get_string(&join_path(&env_path, &key))?
            .unwrap_or_default();
        env.push((key, value));
    }

    Ok(env)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestBed;

    const CAM: &str = r#"
apps:
  cam:
    procs:
      main:
        args: [/bin/cam, --fast]
        envVars:
          LEVEL: debug
        faultAction: restart
      quiet:
        args: [/bin/quiet]
      noargs: {}
"#;

    fn launch(bed: &TestBed, process: &mut Process) -> AppvisorResult<()> {
        let install_dir = bed.install_dir("cam");
        let home = Path::new("/home/cam");
        process.start(&LaunchContext {
            app: "cam",
            platform: &bed.platform,
            confinement: None,
            install_dir: &install_dir,
            home_dir: home,
        })
    }

    #[test]
    fn test_start_builds_request() {
        let bed = TestBed::new(CAM);
        let mut process = Process::new("/apps/cam/procs/main");
        launch(&bed, &mut process).unwrap();

        assert_eq!(process.name(), "main");
        assert_eq!(process.state(), ProcessState::Running);
        let request = bed.spawner.requests().pop().unwrap();
        assert_eq!(request.program, Path::new("/bin/cam"));
        assert_eq!(request.args, vec!["--fast"]);
        assert!(request
            .env
            .contains(&("LEVEL".to_string(), "debug".to_string())));
        assert_eq!(request.working_dir, bed.install_dir("cam"));
        assert_eq!(bed.groups.members("cam"), vec![process.pid().unwrap().as_raw()]);
    }

    #[test]
    fn test_start_without_args_fails() {
        let bed = TestBed::new(CAM);
        let mut process = Process::new("/apps/cam/procs/noargs");
        assert!(matches!(
            launch(&bed, &mut process),
            Err(AppvisorError::ProcessStart { .. })
        ));
        assert_eq!(process.state(), ProcessState::Stopped);
    }

    #[test]
    fn test_exit_classification() {
        let bed = TestBed::new(CAM);
        let config = bed.platform.config.as_ref();
        let timers = bed.platform.timers.as_ref();
        let limit = Duration::ZERO;
        let mut process = Process::new("/apps/cam/procs/quiet");

        launch(&bed, &mut process).unwrap();
        assert_eq!(
            process.on_exit(ExitStatus::Stopped(Signal::SIGSTOP), config, timers, limit),
            CrashOutcome::NoFault
        );
        assert_eq!(process.state(), ProcessState::Paused);
        assert_eq!(
            process.on_exit(ExitStatus::Continued, config, timers, limit),
            CrashOutcome::NoFault
        );
        assert_eq!(process.state(), ProcessState::Running);

        assert_eq!(
            process.on_exit(ExitStatus::Exited(0), config, timers, limit),
            CrashOutcome::NoFault
        );
        assert_eq!(process.state(), ProcessState::Stopped);
        assert_eq!(process.pid(), None);

        launch(&bed, &mut process).unwrap();
        assert_eq!(
            process.on_exit(ExitStatus::Exited(3), config, timers, limit),
            CrashOutcome::Fault(FaultAction::Ignore)
        );

        launch(&bed, &mut process).unwrap();
        process.mark_stopping(timers);
        assert_eq!(
            process.on_exit(ExitStatus::Signaled(Signal::SIGTERM), config, timers, limit),
            CrashOutcome::NoFault
        );
    }

    #[test]
    fn test_repeated_fault_escalates() {
        let bed = TestBed::new(CAM);
        let config = bed.platform.config.as_ref();
        let timers = bed.platform.timers.as_ref();
        let mut process = Process::new("/apps/cam/procs/main");
        let limit = Duration::from_secs(10);

        launch(&bed, &mut process).unwrap();
        assert_eq!(
            process.on_exit(ExitStatus::Signaled(Signal::SIGSEGV), config, timers, limit),
            CrashOutcome::Fault(FaultAction::Restart)
        );

        launch(&bed, &mut process).unwrap();
        assert_eq!(
            process.on_exit(ExitStatus::Exited(1), config, timers, limit),
            CrashOutcome::Fault(FaultAction::StopApp)
        );
    }

    #[test]
    fn test_stop_arms_process_timer_and_hard_kills() {
        let bed = TestBed::new(CAM);
        let mut process = Process::new("/apps/cam/procs/main");
        launch(&bed, &mut process).unwrap();
        let pid = process.pid().unwrap();

        process.set_stop_handler(StopHandler::RestartProcess);
        process.stop(&bed.platform, "cam").unwrap();
        let (handle, target) = bed.timers.active().pop().unwrap();
        assert_eq!(
            target,
            KillTarget::Process {
                app: "cam".into(),
                process: "main".into()
            }
        );
        assert_eq!(process.stop_handler(), StopHandler::RestartProcess);

        process.on_kill_timer(handle, &bed.platform).unwrap();
        assert_eq!(
            bed.spawner.signals(),
            vec![(pid, Signal::SIGTERM), (pid, Signal::SIGKILL)]
        );
    }
}
