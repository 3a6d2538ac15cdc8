use std::{
    ffi::CString,
    io,
    os::unix::{ffi::OsStrExt, process::CommandExt},
    path::PathBuf,
    process::{Command, Stdio},
};

use nix::{
    errno::Errno,
    sys::signal::{kill, Signal},
    unistd::Pid,
};

use crate::{
    config::DEFAULT_PROCESS_PATH,
    sandbox::{confine, Confinement, SystemConfine},
    AppvisorError, AppvisorResult,
};

use super::ProcessLimits;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Creates and signals OS processes.
pub trait ProcessSpawner: Send + Sync {
    /// Starts a process and returns its pid. The caller reaps it.
    fn spawn(&self, request: &SpawnRequest) -> AppvisorResult<Pid>;

    /// Signals one process. Returns `false` if the process no longer exists; any other failure
    /// is fatal.
    fn signal(&self, pid: Pid, signal: Signal) -> AppvisorResult<bool>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Everything needed to launch one app process.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// The owning app; also the name of its process group.
    pub app: String,

    /// The process name.
    pub process: String,

    /// Executable, resolved inside the sandbox for confined processes.
    pub program: PathBuf,

    /// Arguments after the executable.
    pub args: Vec<String>,

    /// Environment on top of the default `PATH`.
    pub env: Vec<(String, String)>,

    /// The group's membership file.
    pub procs_file: PathBuf,

    /// rlimits applied before exec.
    pub limits: ProcessLimits,

    /// Sandbox confinement. `None` runs the process unconfined in `working_dir`.
    pub confinement: Option<Confinement>,

    /// Working directory of an unconfined process.
    pub working_dir: PathBuf,
}

/// Spawns processes on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSpawner;

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ProcessSpawner for OsSpawner {
    fn spawn(&self, request: &SpawnRequest) -> AppvisorResult<Pid> {
        let procs_file = CString::new(request.procs_file.as_os_str().as_bytes()).map_err(|_| {
            AppvisorError::Fatal(format!(
                "group file {} contains a nul byte",
                request.procs_file.display()
            ))
        })?;
        let limits = request.limits;
        let confinement = request.confinement.clone();

        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .env_clear()
            .env("PATH", DEFAULT_PROCESS_PATH)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());

        if confinement.is_none() {
            command.current_dir(&request.working_dir);
        }

        // Runs in the forked child: join the group, then limit, then confine.
        unsafe {
            command.pre_exec(move || {
                join_group(&procs_file)?;
                limits.apply().map_err(io::Error::from)?;
                if let Some(plan) = &confinement {
                    confine(&SystemConfine, plan)
                        .map_err(|e| io::Error::from_raw_os_error(e.errno as i32))?;
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(|e| AppvisorError::ProcessStart {
            app: request.app.clone(),
            process: request.process.clone(),
            reason: e.to_string(),
        })?;

        let pid = Pid::from_raw(child.id() as i32);
        tracing::info!(
            "started process {} of app {} with pid {}",
            request.process,
            request.app,
            pid
        );

        Ok(pid)
    }

    fn signal(&self, pid: Pid, signal: Signal) -> AppvisorResult<bool> {
        match kill(pid, signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(errno) => Err(AppvisorError::Fatal(format!(
                "failed to send {} to pid {}: {}",
                signal, pid, errno
            ))),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn join_group(procs_file: &CString) -> io::Result<()> {
    let fd = unsafe { libc::open(procs_file.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }

    let written = unsafe { libc::write(fd, b"0".as_ptr().cast(), 1) };
    let result = if written == 1 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    };

    unsafe { libc::close(fd) };
    result
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
