//! In-memory platform for unit and scenario tests.
//!
//! [`TestBed`] wires a [`Platform`] from fakes that record what they are asked to do. Sandboxes
//! are still built on the real filesystem under a temporary directory; only mounts and
//! ownership changes are simulated.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use appvisor_utils::{FreezeState, UtilsError};
use nix::{
    sys::signal::Signal,
    unistd::{Gid, Pid, Uid},
};
use tempfile::TempDir;

use crate::{
    config::{ConfigStore, ConfigTree, ImportSpec, SupervisorSettings},
    platform::{
        KillTarget, KillTimers, Platform, ProcessGroups, ProcessSpawner, ResourceLimits,
        SandboxFs, SecurityLabels, SpawnRequest, TimerHandle, UserRegistry,
    },
    AppvisorError, AppvisorResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const APP_UID: u32 = 2000;

const APP_GID: u32 = 2000;

const FIRST_PID: i32 = 1000;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A platform made of fakes, plus handles on each fake.
pub struct TestBed {
    pub platform: Platform,
    pub groups: Arc<FakeGroups>,
    pub fs: Arc<FakeFs>,
    pub spawner: Arc<FakeSpawner>,
    pub timers: Arc<FakeTimers>,
    pub labels: Arc<FakeLabels>,
    pub limits: Arc<FakeLimits>,
    pub users: Arc<FakeUsers>,
    dir: TempDir,
}

#[derive(Default)]
struct GroupsState {
    members: BTreeMap<String, Vec<i32>>,
    frozen: HashSet<String>,
    polls_left: HashMap<String, u32>,
    polls_until_frozen: u32,
    freeze_unsupported: bool,
    refuse_signals: bool,
    unreadable: HashSet<String>,
    killed: Vec<i32>,
    log: Vec<String>,
}

/// Process groups kept in memory. Members only leave when told to, except on `SIGKILL`.
#[derive(Default)]
pub struct FakeGroups {
    state: Mutex<GroupsState>,
}

#[derive(Default)]
struct FsState {
    mounts: Vec<PathBuf>,
    chowns: Vec<PathBuf>,
    failing_binds: Vec<PathBuf>,
}

/// Mount table kept in memory. Mount targets must exist on the real filesystem.
#[derive(Default)]
pub struct FakeFs {
    state: Mutex<FsState>,
}

#[derive(Default)]
struct SpawnerState {
    next_pid: i32,
    requests: Vec<SpawnRequest>,
    signals: Vec<(Pid, Signal)>,
    failing: HashSet<String>,
}

/// Hands out pids and places them in the fake process groups.
pub struct FakeSpawner {
    groups: Arc<FakeGroups>,
    state: Mutex<SpawnerState>,
}

#[derive(Default)]
struct TimersState {
    next: u64,
    active: Vec<(TimerHandle, KillTarget)>,
    cancelled: Vec<TimerHandle>,
}

/// Timers that never fire on their own.
#[derive(Default)]
pub struct FakeTimers {
    state: Mutex<TimersState>,
}

/// Records rules and labels as text.
#[derive(Default)]
pub struct FakeLabels {
    log: Mutex<Vec<String>>,
}

/// Records app limit calls.
#[derive(Default)]
pub struct FakeLimits {
    log: Mutex<Vec<String>>,
}

/// Every app runs as 2000:2000; only the `video` and `audio` groups exist.
#[derive(Default)]
pub struct FakeUsers;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl TestBed {
    /// Creates a test bed whose configuration tree is `yaml`.
    pub fn new(yaml: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let host = dir.path().join("host");

        for rel in ["run/sockets", "bin", "dev"] {
            fs::create_dir_all(host.join(rel)).unwrap();
        }
        for rel in ["dev/log", "dev/null", "bin/gdbserver"] {
            fs::write(host.join(rel), "").unwrap();
        }
        fs::create_dir_all(dir.path().join("apps")).unwrap();

        let settings = SupervisorSettings::builder()
            .runtime_dir(dir.path().join("run"))
            .apps_install_dir(dir.path().join("apps"))
            .cgroup_root(dir.path().join("cgroup"))
            .freeze_poll_limit(5)
            .freeze_poll_interval_ms(0)
            .default_imports(vec![
                ImportSpec {
                    src: host.join("run/sockets"),
                    dest: "/tmp/appvisor/".into(),
                },
                ImportSpec {
                    src: host.join("dev/log"),
                    dest: "/dev/".into(),
                },
                ImportSpec {
                    src: host.join("dev/null"),
                    dest: "/dev/".into(),
                },
            ])
            .debug_imports(vec![ImportSpec {
                src: host.join("bin/gdbserver"),
                dest: "/bin/".into(),
            }])
            .build();

        let config: Arc<dyn ConfigStore> = Arc::new(ConfigTree::from_yaml_str(yaml).unwrap());
        let groups = Arc::new(FakeGroups::default());
        let fs = Arc::new(FakeFs::default());
        let spawner = Arc::new(FakeSpawner::new(groups.clone()));
        let timers = Arc::new(FakeTimers::default());
        let labels = Arc::new(FakeLabels::default());
        let limits = Arc::new(FakeLimits::default());
        let users = Arc::new(FakeUsers);

        let platform = Platform::builder()
            .settings(Arc::new(settings))
            .config(config)
            .groups(groups.clone())
            .labels(labels.clone())
            .limits(limits.clone())
            .spawner(spawner.clone())
            .timers(timers.clone())
            .users(users.clone())
            .fs(fs.clone())
            .build();

        Self {
            platform,
            groups,
            fs,
            spawner,
            timers,
            labels,
            limits,
            users,
            dir,
        }
    }

    /// A path under the fake host tree.
    pub fn host_path(&self, rel: &str) -> PathBuf {
        self.dir.path().join("host").join(rel)
    }

    /// The install directory of `app`.
    pub fn install_dir(&self, app: &str) -> PathBuf {
        self.dir.path().join("apps").join(app)
    }

    /// Creates an empty file in the install directory of `app`.
    pub fn install_file(&self, app: &str, rel: &str) -> PathBuf {
        let path = self.install_dir(app).join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();
        path
    }

    /// Where the sandbox of `app` is built.
    pub fn sandbox_path(&self, app: &str) -> PathBuf {
        self.platform.settings.sandbox_path(app)
    }

    pub fn app_uid(&self) -> Uid {
        Uid::from_raw(APP_UID)
    }

    pub fn app_gid(&self) -> Gid {
        Gid::from_raw(APP_GID)
    }
}

impl FakeGroups {
    fn state(&self) -> MutexGuard<'_, GroupsState> {
        self.state.lock().unwrap()
    }

    pub fn add_member(&self, group: &str, pid: i32) {
        self.state()
            .members
            .entry(group.to_string())
            .or_default()
            .push(pid);
    }

    /// Number of freeze state polls that report `Freezing` before `Frozen`.
    pub fn set_polls_until_frozen(&self, polls: u32) {
        self.state().polls_until_frozen = polls;
    }

    pub fn set_freeze_unsupported(&self, unsupported: bool) {
        self.state().freeze_unsupported = unsupported;
    }

    pub fn set_refuse_signals(&self, refuse: bool) {
        self.state().refuse_signals = refuse;
    }

    /// Makes the member list of `group` unreadable, as if `cgroup.procs` returned `EACCES`.
    pub fn set_unreadable(&self, group: &str) {
        self.state().unreadable.insert(group.to_string());
    }

    pub fn is_frozen(&self, group: &str) -> bool {
        self.state().frozen.contains(group)
    }

    pub fn exists(&self, group: &str) -> bool {
        self.state().members.contains_key(group)
    }

    pub fn members(&self, group: &str) -> Vec<i32> {
        self.state()
            .members
            .get(group)
            .cloned()
            .unwrap_or_default()
    }

    /// Removes `pid` from whichever group holds it, as if it had exited.
    pub fn exit(&self, pid: i32) {
        for members in self.state().members.values_mut() {
            members.retain(|member| *member != pid);
        }
    }

    /// Pids removed by `SIGKILL` since the last call.
    pub fn take_killed(&self) -> Vec<i32> {
        std::mem::take(&mut self.state().killed)
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }
}

impl FakeFs {
    fn state(&self) -> MutexGuard<'_, FsState> {
        self.state.lock().unwrap()
    }

    pub fn add_mount(&self, path: &Path) {
        self.state().mounts.push(path.to_path_buf());
    }

    /// Makes every bind mount of `src` fail.
    pub fn fail_bind(&self, src: &Path) {
        self.state().failing_binds.push(src.to_path_buf());
    }

    /// Mounts at or below `root`.
    pub fn mounts_under(&self, root: &Path) -> Vec<PathBuf> {
        self.state()
            .mounts
            .iter()
            .filter(|point| point.starts_with(root))
            .cloned()
            .collect()
    }

    pub fn chowns(&self) -> Vec<PathBuf> {
        self.state().chowns.clone()
    }
}

impl FakeSpawner {
    fn new(groups: Arc<FakeGroups>) -> Self {
        Self {
            groups,
            state: Mutex::new(SpawnerState {
                next_pid: FIRST_PID,
                ..Default::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SpawnerState> {
        self.state.lock().unwrap()
    }

    /// Makes spawning the named process fail.
    pub fn fail_process(&self, process: &str) {
        self.state().failing.insert(process.to_string());
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.state().requests.clone()
    }

    pub fn signals(&self) -> Vec<(Pid, Signal)> {
        self.state().signals.clone()
    }

    /// Pid of the most recent spawn of `process`.
    pub fn pid_of(&self, process: &str) -> Option<Pid> {
        let state = self.state();
        state
            .requests
            .iter()
            .zip(FIRST_PID..)
            .filter(|(request, _)| request.process == process)
            .last()
            .map(|(_, pid)| Pid::from_raw(pid))
    }
}

impl FakeTimers {
    fn state(&self) -> MutexGuard<'_, TimersState> {
        self.state.lock().unwrap()
    }

    /// Armed timers that were neither cancelled nor taken.
    pub fn active(&self) -> Vec<(TimerHandle, KillTarget)> {
        self.state().active.clone()
    }

    pub fn cancelled(&self) -> Vec<TimerHandle> {
        self.state().cancelled.clone()
    }

    /// Removes and returns the active timer for `target`, as if it had fired.
    pub fn fire(&self, target: &KillTarget) -> Option<TimerHandle> {
        let mut state = self.state();
        let index = state.active.iter().position(|(_, t)| t == target)?;
        Some(state.active.remove(index).0)
    }
}

impl FakeLabels {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) -> AppvisorResult<()> {
        self.log.lock().unwrap().push(entry);
        Ok(())
    }
}

impl FakeLimits {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ProcessGroups for FakeGroups {
    fn create(&self, group: &str) -> AppvisorResult<()> {
        self.state().members.entry(group.to_string()).or_default();
        Ok(())
    }

    fn remove(&self, group: &str) -> AppvisorResult<()> {
        let mut state = self.state();
        if state.members.get(group).is_some_and(|m| !m.is_empty()) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY).into());
        }
        state.members.remove(group);
        Ok(())
    }

    fn freeze(&self, group: &str) -> AppvisorResult<()> {
        let mut state = self.state();
        if state.freeze_unsupported {
            return Err(UtilsError::FreezeUnsupported(group.to_string()).into());
        }

        state.log.push(format!("freeze {}", group));
        let polls = state.polls_until_frozen;
        if polls == 0 {
            state.frozen.insert(group.to_string());
        } else {
            state.polls_left.insert(group.to_string(), polls);
        }
        Ok(())
    }

    fn freeze_state(&self, group: &str) -> AppvisorResult<FreezeState> {
        let mut state = self.state();
        if state.frozen.contains(group) {
            return Ok(FreezeState::Frozen);
        }

        match state.polls_left.get(group).copied() {
            Some(0) => {
                state.polls_left.remove(group);
                state.frozen.insert(group.to_string());
                Ok(FreezeState::Frozen)
            }
            Some(left) => {
                state.polls_left.insert(group.to_string(), left - 1);
                Ok(FreezeState::Freezing)
            }
            None => Ok(FreezeState::Thawed),
        }
    }

    fn thaw(&self, group: &str) -> AppvisorResult<()> {
        let mut state = self.state();
        state.log.push(format!("thaw {}", group));
        state.frozen.remove(group);
        state.polls_left.remove(group);
        Ok(())
    }

    fn signal_all(&self, group: &str, signal: Signal) -> AppvisorResult<usize> {
        let mut state = self.state();
        if state.refuse_signals {
            return Err(AppvisorError::Fatal(format!(
                "members of {} refused {}",
                group, signal
            )));
        }
        if state.unreadable.contains(group) {
            return Err(UtilsError::path_io(
                self.procs_file(group),
                io::Error::from_raw_os_error(libc::EACCES),
            )
            .into());
        }

        state.log.push(format!("signal {} {}", group, signal.as_str()));
        let members = state.members.get(group).cloned().unwrap_or_default();
        if signal == Signal::SIGKILL {
            if let Some(current) = state.members.get_mut(group) {
                current.clear();
            }
            state.killed.extend(&members);
        }

        Ok(members.len())
    }

    fn is_empty(&self, group: &str) -> AppvisorResult<bool> {
        Ok(self
            .state()
            .members
            .get(group)
            .map_or(true, |members| members.is_empty()))
    }

    fn procs_file(&self, group: &str) -> PathBuf {
        PathBuf::from("/fake/cgroup").join(group).join("cgroup.procs")
    }
}

impl SandboxFs for FakeFs {
    fn mount_tmpfs(&self, target: &Path, _size_bytes: u64) -> io::Result<()> {
        if !target.is_dir() {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        self.state().mounts.push(target.to_path_buf());
        Ok(())
    }

    fn bind_mount(&self, src: &Path, target: &Path) -> io::Result<()> {
        let mut state = self.state();
        if state.failing_binds.iter().any(|failing| failing == src) {
            return Err(io::Error::from_raw_os_error(libc::EPERM));
        }
        if !target.exists() {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        state.mounts.push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> io::Result<()> {
        let mut state = self.state();
        match state.mounts.iter().rposition(|point| point == target) {
            Some(index) => {
                state.mounts.remove(index);
                Ok(())
            }
            None => Err(io::Error::from_raw_os_error(libc::EINVAL)),
        }
    }

    fn mount_points(&self) -> AppvisorResult<Vec<PathBuf>> {
        Ok(self.state().mounts.clone())
    }

    fn chown(&self, path: &Path, _uid: Uid, _gid: Gid) -> io::Result<()> {
        self.state().chowns.push(path.to_path_buf());
        Ok(())
    }
}

impl ProcessSpawner for FakeSpawner {
    fn spawn(&self, request: &SpawnRequest) -> AppvisorResult<Pid> {
        let mut state = self.state();
        if state.failing.contains(&request.process) {
            return Err(AppvisorError::ProcessStart {
                app: request.app.clone(),
                process: request.process.clone(),
                reason: "no such file".to_string(),
            });
        }

        let pid = state.next_pid;
        state.next_pid += 1;
        state.requests.push(request.clone());
        drop(state);

        self.groups.add_member(&request.app, pid);
        Ok(Pid::from_raw(pid))
    }

    fn signal(&self, pid: Pid, signal: Signal) -> AppvisorResult<bool> {
        self.state().signals.push((pid, signal));
        if signal == Signal::SIGKILL {
            self.groups.exit(pid.as_raw());
        }
        Ok(true)
    }
}

impl KillTimers for FakeTimers {
    fn arm(&self, target: KillTarget, _after: Duration) -> TimerHandle {
        let mut state = self.state();
        state.next += 1;
        let handle = TimerHandle(state.next);
        state.active.push((handle, target));
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut state = self.state();
        state.active.retain(|(active, _)| *active != handle);
        state.cancelled.push(handle);
    }
}

impl SecurityLabels for FakeLabels {
    fn set_rule(&self, subject: &str, access: &str, object: &str) -> AppvisorResult<()> {
        self.record(format!("rule {} {} {}", subject, access, object))
    }

    fn revoke_subject(&self, subject: &str) -> AppvisorResult<()> {
        self.record(format!("revoke {}", subject))
    }

    fn set_file_label(&self, path: &Path, label: &str) -> AppvisorResult<()> {
        self.record(format!("label {} {}", path.display(), label))
    }
}

impl ResourceLimits for FakeLimits {
    fn set_app_limits(
        &self,
        app: &str,
        _config: &dyn ConfigStore,
        _app_cfg: &str,
    ) -> AppvisorResult<()> {
        self.log.lock().unwrap().push(format!("set {}", app));
        Ok(())
    }

    fn cleanup_app(&self, app: &str) -> AppvisorResult<()> {
        self.log.lock().unwrap().push(format!("cleanup {}", app));
        Ok(())
    }
}

impl UserRegistry for FakeUsers {
    fn app_ids(&self, _app: &str) -> AppvisorResult<(Uid, Gid)> {
        Ok((Uid::from_raw(APP_UID), Gid::from_raw(APP_GID)))
    }

    fn group_id(&self, group: &str) -> AppvisorResult<Gid> {
        match group {
            "video" => Ok(Gid::from_raw(44)),
            "audio" => Ok(Gid::from_raw(63)),
            other => Err(AppvisorError::Config(format!(
                "group '{}' does not exist",
                other
            ))),
        }
    }
}
