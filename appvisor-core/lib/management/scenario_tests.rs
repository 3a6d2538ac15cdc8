//! End-to-end supervision scenarios against the in-memory platform.

use nix::{sys::signal::Signal, unistd::Pid};

use crate::{
    management::{App, AppState, ProcessState, StopHandler, Supervisor, SupervisorOutcome},
    platform::KillTarget,
    runtime::{EventLoop, ExitReason, ExitStatus, SupervisorEvent},
    testing::TestBed,
    AppvisorError,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const CAM: &str = r#"
apps:
  cam:
    procs:
      main:
        args: [/bin/cam]
"#;

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

fn started(yaml: &str) -> (TestBed, Supervisor) {
    let bed = TestBed::new(yaml);
    let mut supervisor = Supervisor::new(bed.platform.clone());
    supervisor.start_app("cam").unwrap();
    (bed, supervisor)
}

fn pid(bed: &TestBed, process: &str) -> Pid {
    bed.spawner.pid_of(process).unwrap()
}

/// The process leaves its group and its death is reported.
fn exit(bed: &TestBed, supervisor: &mut Supervisor, pid: Pid, status: ExitStatus) -> SupervisorOutcome {
    bed.groups.exit(pid.as_raw());
    supervisor.on_child_exit(pid, status).unwrap()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test]
fn test_start_then_stop_escalates_to_hard_kill() {
    let (bed, mut supervisor) = started(CAM);
    let sandbox = bed.sandbox_path("cam");
    let main = pid(&bed, "main");

    assert!(sandbox.is_dir());
    assert_eq!(supervisor.app_state("cam"), AppState::Running);
    assert_eq!(supervisor.process_state("cam", "main"), ProcessState::Running);
    assert_eq!(supervisor.app_state_by_pid(main), Some(("cam", AppState::Running)));

    supervisor.stop_app("cam").unwrap();
    assert_eq!(supervisor.app_state("cam"), AppState::Running);
    assert!(supervisor.app("cam").unwrap().is_stopping());

    // The process ignores SIGTERM.
    let handle = bed.timers.fire(&KillTarget::App("cam".into())).unwrap();
    supervisor
        .on_kill_timer(&KillTarget::App("cam".into()), handle)
        .unwrap();
    assert_eq!(bed.groups.take_killed(), vec![main.as_raw()]);

    supervisor
        .on_child_exit(main, ExitStatus::Signaled(Signal::SIGKILL))
        .unwrap();

    assert_eq!(supervisor.app_state("cam"), AppState::Stopped);
    assert!(supervisor.is_idle());
    assert!(!sandbox.exists());
    assert!(bed.fs.mounts_under(&sandbox).is_empty());
    assert!(!bed.groups.exists("cam"));
    assert_eq!(
        bed.groups.log(),
        vec![
            "freeze cam",
            "signal cam SIGTERM",
            "thaw cam",
            "freeze cam",
            "signal cam SIGKILL",
            "thaw cam",
        ]
    );
}

#[test_log::test]
fn test_soft_kill_exit_cancels_timer() {
    let (bed, mut supervisor) = started(CAM);
    let main = pid(&bed, "main");

    supervisor.stop_app("cam").unwrap();
    let (handle, _) = bed.timers.active().pop().unwrap();

    assert_eq!(
        exit(&bed, &mut supervisor, main, ExitStatus::Signaled(Signal::SIGTERM)),
        SupervisorOutcome::Continue
    );
    assert!(supervisor.is_idle());
    assert!(bed.timers.cancelled().contains(&handle));
    assert!(bed.timers.active().is_empty());

    // A late expiry of the cancelled timer changes nothing.
    supervisor
        .on_kill_timer(&KillTarget::App("cam".into()), handle)
        .unwrap();
    assert!(supervisor.is_idle());
}

#[test_log::test]
fn test_second_stop_reports_error_without_mutation() {
    let bed = TestBed::new("apps:\n  cam:\n    sandboxed: false\n");
    let mut app = App::new(bed.platform.clone(), "/apps/cam").unwrap();

    app.start().unwrap();
    app.stop().unwrap();
    assert_eq!(app.state(), AppState::Stopped);

    let limits = bed.limits.log();
    let labels = bed.labels.log();
    let groups = bed.groups.log();

    assert!(matches!(app.stop(), Err(AppvisorError::AppNotRunning(_))));
    assert_eq!(bed.limits.log(), limits);
    assert_eq!(bed.labels.log(), labels);
    assert_eq!(bed.groups.log(), groups);
}

#[test_log::test]
fn test_external_kill_of_only_process_stops_sandboxed_app() {
    let (bed, mut supervisor) = started(CAM);
    let sandbox = bed.sandbox_path("cam");
    assert!(sandbox.is_dir());

    exit(
        &bed,
        &mut supervisor,
        pid(&bed, "main"),
        ExitStatus::Signaled(Signal::SIGKILL),
    );

    assert_eq!(supervisor.app_state("cam"), AppState::Stopped);
    assert!(!sandbox.exists());
    assert!(bed.fs.mounts_under(&sandbox).is_empty());
}

#[test_log::test]
fn test_watchdog_restart_inherited_from_app() {
    let (bed, mut supervisor) = started(
        r#"
apps:
  cam:
    watchdogAction: restart
    procs:
      main:
        args: [/bin/cam]
"#,
    );
    let main = pid(&bed, "main");

    assert_eq!(
        supervisor.on_watchdog_timeout(main).unwrap(),
        SupervisorOutcome::Continue
    );
    let process = supervisor.app("cam").unwrap().process("main").unwrap();
    assert_eq!(process.stop_handler(), StopHandler::RestartProcess);
    assert_eq!(bed.spawner.signals(), vec![(main, Signal::SIGTERM)]);
    assert!(bed
        .timers
        .active()
        .iter()
        .any(|(_, target)| matches!(target, KillTarget::Process { .. })));

    exit(&bed, &mut supervisor, main, ExitStatus::Signaled(Signal::SIGTERM));

    let restarted = pid(&bed, "main");
    assert_ne!(restarted, main);
    assert_eq!(supervisor.process_state("cam", "main"), ProcessState::Running);
    assert_eq!(supervisor.app_state("cam"), AppState::Running);
    assert!(bed.timers.active().is_empty());
}

#[test_log::test]
fn test_watchdog_without_any_action_restarts_process() {
    let (bed, mut supervisor) = started(CAM);
    let main = pid(&bed, "main");

    supervisor.on_watchdog_timeout(main).unwrap();
    assert_eq!(
        supervisor
            .app("cam")
            .unwrap()
            .process("main")
            .unwrap()
            .stop_handler(),
        StopHandler::RestartProcess
    );

    exit(&bed, &mut supervisor, main, ExitStatus::Exited(0));
    assert_ne!(pid(&bed, "main"), main);
    assert_eq!(supervisor.app_state("cam"), AppState::Running);
}

#[test_log::test]
fn test_watchdog_process_kill_timer_hard_kills() {
    let (bed, mut supervisor) = started(
        r#"
apps:
  cam:
    procs:
      main:
        args: [/bin/cam]
        watchdogAction: stop
"#,
    );
    let main = pid(&bed, "main");

    supervisor.on_watchdog_timeout(main).unwrap();
    let target = KillTarget::Process {
        app: "cam".into(),
        process: "main".into(),
    };
    let handle = bed.timers.fire(&target).unwrap();
    supervisor.on_kill_timer(&target, handle).unwrap();
    assert_eq!(
        bed.spawner.signals(),
        vec![(main, Signal::SIGTERM), (main, Signal::SIGKILL)]
    );

    supervisor
        .on_child_exit(main, ExitStatus::Signaled(Signal::SIGKILL))
        .unwrap();
    assert_eq!(bed.spawner.requests().len(), 1);
    assert!(supervisor.is_idle());
}

#[test_log::test]
fn test_watchdog_app_stop_action_stops_app() {
    let (bed, mut supervisor) = started(
        r#"
apps:
  cam:
    watchdogAction: stopApp
    procs:
      main:
        args: [/bin/cam]
      helper:
        args: [/bin/helper]
"#,
    );
    let main = pid(&bed, "main");
    let helper = pid(&bed, "helper");

    supervisor.on_watchdog_timeout(main).unwrap();
    assert!(supervisor.app("cam").unwrap().is_stopping());

    exit(&bed, &mut supervisor, main, ExitStatus::Signaled(Signal::SIGTERM));
    assert_eq!(supervisor.app_state("cam"), AppState::Running);

    exit(&bed, &mut supervisor, helper, ExitStatus::Exited(0));
    assert_eq!(supervisor.app_state("cam"), AppState::Stopped);
    assert!(supervisor.is_idle());
    assert_eq!(bed.spawner.requests().len(), 2);
}

#[test_log::test]
fn test_fault_restart_app_restarts_whole_app() {
    let (bed, mut supervisor) = started(
        r#"
apps:
  cam:
    procs:
      main:
        args: [/bin/cam]
        faultAction: restartApp
      helper:
        args: [/bin/helper]
"#,
    );
    let main = pid(&bed, "main");
    let helper = pid(&bed, "helper");

    exit(&bed, &mut supervisor, main, ExitStatus::Exited(2));
    assert!(supervisor.app("cam").unwrap().is_stopping());

    exit(&bed, &mut supervisor, helper, ExitStatus::Signaled(Signal::SIGTERM));

    assert_eq!(supervisor.app_state("cam"), AppState::Running);
    assert_eq!(bed.spawner.requests().len(), 4);
    assert_ne!(pid(&bed, "main"), main);
    assert!(bed.sandbox_path("cam").is_dir());
}

#[test_log::test]
fn test_fault_restart_restarts_process_until_limit() {
    let (bed, mut supervisor) = started(
        r#"
apps:
  cam:
    procs:
      main:
        args: [/bin/cam]
        faultAction: restart
      helper:
        args: [/bin/helper]
"#,
    );

    let first = pid(&bed, "main");
    exit(&bed, &mut supervisor, first, ExitStatus::Signaled(Signal::SIGSEGV));
    let second = pid(&bed, "main");
    assert_ne!(second, first);
    assert_eq!(supervisor.process_state("cam", "main"), ProcessState::Running);

    // A second fault within the fault limit interval stops the app.
    exit(&bed, &mut supervisor, second, ExitStatus::Signaled(Signal::SIGSEGV));
    assert_eq!(pid(&bed, "main"), second);
    assert!(supervisor.app("cam").unwrap().is_stopping());

    exit(&bed, &mut supervisor, pid(&bed, "helper"), ExitStatus::Exited(0));
    assert!(supervisor.is_idle());
}

#[test_log::test]
fn test_fault_reboot_is_surfaced() {
    let (bed, mut supervisor) = started(
        r#"
apps:
  cam:
    procs:
      main:
        args: [/bin/cam]
        faultAction: reboot
"#,
    );

    assert_eq!(
        exit(&bed, &mut supervisor, pid(&bed, "main"), ExitStatus::Exited(1)),
        SupervisorOutcome::Reboot
    );
}

#[test_log::test]
fn test_processes_dying_together_each_get_a_decision() {
    let (bed, mut supervisor) = started(
        r#"
apps:
  cam:
    procs:
      a:
        args: [/bin/a]
      b:
        args: [/bin/b]
        faultAction: reboot
"#,
    );
    let sandbox = bed.sandbox_path("cam");
    let (a, b) = (pid(&bed, "a"), pid(&bed, "b"));

    // Both leave the group before either exit is reaped.
    bed.groups.exit(a.as_raw());
    bed.groups.exit(b.as_raw());

    assert_eq!(
        supervisor.on_child_exit(a, ExitStatus::Exited(1)).unwrap(),
        SupervisorOutcome::Continue
    );
    assert_eq!(supervisor.app_state("cam"), AppState::Running);
    assert_eq!(supervisor.app_state_by_pid(b), Some(("cam", AppState::Running)));
    assert!(sandbox.is_dir());

    assert_eq!(
        supervisor
            .on_child_exit(b, ExitStatus::Signaled(Signal::SIGSEGV))
            .unwrap(),
        SupervisorOutcome::Reboot
    );
    assert_eq!(supervisor.app_state("cam"), AppState::Stopped);
    assert!(!sandbox.exists());
}

#[test_log::test]
fn test_pause_and_resume_are_not_faults() {
    let (bed, mut supervisor) = started(CAM);
    let main = pid(&bed, "main");

    supervisor
        .on_child_exit(main, ExitStatus::Stopped(Signal::SIGSTOP))
        .unwrap();
    assert_eq!(supervisor.process_state("cam", "main"), ProcessState::Paused);

    supervisor.on_child_exit(main, ExitStatus::Continued).unwrap();
    assert_eq!(supervisor.process_state("cam", "main"), ProcessState::Running);
    assert_eq!(supervisor.app_state("cam"), AppState::Running);
}

#[test_log::test]
fn test_process_start_failure_stops_started_processes() {
    let bed = TestBed::new(
        r#"
apps:
  cam:
    procs:
      main:
        args: [/bin/cam]
      helper:
        args: [/bin/helper]
"#,
    );
    bed.spawner.fail_process("helper");
    let mut supervisor = Supervisor::new(bed.platform.clone());

    assert!(matches!(
        supervisor.start_app("cam"),
        Err(AppvisorError::ProcessStart { .. })
    ));
    assert!(supervisor.app("cam").unwrap().is_stopping());

    exit(&bed, &mut supervisor, pid(&bed, "main"), ExitStatus::Signaled(Signal::SIGTERM));
    assert!(supervisor.is_idle());
    assert!(!bed.sandbox_path("cam").exists());
}

#[test_log::test]
fn test_sandbox_failure_leaves_nothing_behind() {
    let bed = TestBed::new(
        r#"
apps:
  cam:
    requires:
      files:
        - src: bin/missing
          dest: /bin/
    procs:
      main:
        args: [/bin/cam]
"#,
    );
    let mut supervisor = Supervisor::new(bed.platform.clone());

    assert!(matches!(
        supervisor.start_app("cam"),
        Err(AppvisorError::Sandbox { .. })
    ));
    assert!(supervisor.is_idle());
    assert!(bed.spawner.requests().is_empty());
    assert!(!bed.groups.exists("cam"));
    assert!(!bed.sandbox_path("cam").exists());
}

#[test_log::test]
fn test_duplicate_and_unknown_apps() {
    let (_bed, mut supervisor) = started(CAM);
    assert!(matches!(
        supervisor.start_app("cam"),
        Err(AppvisorError::AppAlreadyRunning(_))
    ));
    assert!(matches!(
        supervisor.stop_app("nope"),
        Err(AppvisorError::AppNotFound(_))
    ));
    assert!(matches!(
        supervisor.start_app("nope"),
        Err(AppvisorError::InvalidConfigPath(_))
    ));
}

#[test_log::test]
fn test_refused_signal_is_fatal() {
    let (bed, mut supervisor) = started(CAM);
    bed.groups.set_refuse_signals(true);
    assert!(supervisor.stop_app("cam").unwrap_err().is_fatal());
}

#[test_log::test]
fn test_startup_apps_skip_manual_ones() {
    let bed = TestBed::new(
        r#"
apps:
  cam:
    sandboxed: false
    procs:
      main:
        args: [/bin/cam]
  tool:
    sandboxed: false
    startManual: true
  broken:
    procs: nonsense
"#,
    );
    let mut supervisor = Supervisor::new(bed.platform.clone());

    supervisor.launch_startup_apps().unwrap();
    assert_eq!(supervisor.app_names(), vec!["cam"]);
}

#[test_log::test]
fn test_event_loop_shutdown_waits_for_apps() {
    let bed = TestBed::new(CAM);
    let mut events = EventLoop::new(Supervisor::new(bed.platform.clone()));

    assert!(events
        .handle(SupervisorEvent::StartApp("cam".into()))
        .unwrap()
        .is_none());
    let main = pid(&bed, "main");

    assert!(events.handle(SupervisorEvent::Shutdown).unwrap().is_none());
    assert!(events
        .handle(SupervisorEvent::StartApp("cam".into()))
        .unwrap()
        .is_none());

    bed.groups.exit(main.as_raw());
    let reason = events
        .handle(SupervisorEvent::ChildStatus {
            pid: main,
            status: ExitStatus::Signaled(Signal::SIGTERM),
        })
        .unwrap();
    assert!(matches!(reason, Some(ExitReason::Shutdown)));
    assert_eq!(bed.spawner.requests().len(), 1);
}

#[test_log::test]
fn test_event_loop_logs_app_errors_and_returns_fatal_ones() {
    let bed = TestBed::new(CAM);
    let mut events = EventLoop::new(Supervisor::new(bed.platform.clone()));

    assert!(events
        .handle(SupervisorEvent::StopApp("cam".into()))
        .unwrap()
        .is_none());

    events
        .handle(SupervisorEvent::StartApp("cam".into()))
        .unwrap();
    bed.groups.set_refuse_signals(true);
    assert!(events
        .handle(SupervisorEvent::StopApp("cam".into()))
        .is_err());
}

#[test_log::test]
fn test_shutdown_continues_past_an_app_that_cannot_be_stopped() {
    let bed = TestBed::new(
        r#"
apps:
  cam:
    procs:
      main:
        args: [/bin/cam]
  mic:
    procs:
      rec:
        args: [/bin/rec]
"#,
    );
    let mut events = EventLoop::new(Supervisor::new(bed.platform.clone()));
    events.supervisor_mut().launch_startup_apps().unwrap();
    let rec = pid(&bed, "rec");

    bed.groups.set_unreadable("cam");
    assert!(events.handle(SupervisorEvent::Shutdown).unwrap().is_none());
    assert!(bed.groups.log().contains(&"signal mic SIGTERM".to_string()));

    bed.groups.exit(rec.as_raw());
    let reason = events
        .handle(SupervisorEvent::ChildStatus {
            pid: rec,
            status: ExitStatus::Signaled(Signal::SIGTERM),
        })
        .unwrap();
    assert!(reason.is_none());
    assert_eq!(events.supervisor().app_names(), vec!["cam"]);
}
