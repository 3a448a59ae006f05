// Supervisor integration tests
//
// Each test launches a real `sh -c` script as a stand-in installation engine
// and checks the event stream, the run state and the files left behind.

mod common;

use std::fs;
use std::time::{Duration, Instant};
use tempfile::TempDir;

use common::{collect, compile_test_plan, finished_count, output_lines, sh_engine};
use tri_install::types::CompileMode;
use tri_install::{
    Artifact, EngineCommand, InstallEvent, InstallRunState, InstallerSupervisor, SupervisorError,
};

#[test]
fn test_successful_run_streams_output_then_finishes() {
    let dir = TempDir::new().expect("tempdir");
    let supervisor = InstallerSupervisor::new(sh_engine(
        "echo one; echo two >&2; echo three",
        &dir,
    ));
    let observer = supervisor.subscribe();

    supervisor.start(&compile_test_plan(CompileMode::Full)).expect("engine starts");
    let events = collect(observer);

    assert_eq!(output_lines(&events), vec!["one", "two", "three"]);
    assert_eq!(
        events.last(),
        Some(&InstallEvent::Finished { success: true, exit_code: Some(0) })
    );
    assert_eq!(finished_count(&events), 1);

    assert!(supervisor.wait().is_ok());
    assert_eq!(supervisor.state(), InstallRunState::Succeeded);
    assert_eq!(supervisor.exit_code(), Some(0));
}

#[test]
fn test_config_is_written_before_launch() {
    let dir = TempDir::new().expect("tempdir");
    // $0 is the config path appended after the script
    let supervisor = InstallerSupervisor::new(sh_engine("grep '^hostname=' \"$0\"", &dir));
    let observer = supervisor.subscribe();
    let config = compile_test_plan(CompileMode::Full);

    supervisor.start(&config).expect("engine starts");
    let events = collect(observer);

    assert_eq!(output_lines(&events), vec!["hostname=tribox"]);
    let written = fs::read_to_string(dir.path().join("engine.conf")).expect("config written");
    assert_eq!(written, config.as_str());
    assert_eq!(supervisor.install_config(), Artifact::Available(config.into_string()));
}

#[test]
fn test_non_zero_exit_fails() {
    let dir = TempDir::new().expect("tempdir");
    let supervisor = InstallerSupervisor::new(sh_engine("echo partitioning; exit 3", &dir));
    let observer = supervisor.subscribe();

    supervisor.start(&compile_test_plan(CompileMode::Full)).expect("engine starts");
    let events = collect(observer);

    assert_eq!(
        events,
        vec![
            InstallEvent::Output("partitioning".to_string()),
            InstallEvent::Finished { success: false, exit_code: Some(3) },
        ]
    );
    let err = supervisor.wait().unwrap_err();
    assert!(matches!(err, SupervisorError::EngineFailed { exit_code: Some(3) }));
    assert!(err.is_execution_failure());
    assert_eq!(supervisor.state(), InstallRunState::Failed);
}

#[test]
fn test_killed_engine_fails_without_exit_code() {
    let dir = TempDir::new().expect("tempdir");
    let supervisor = InstallerSupervisor::new(sh_engine("kill -9 $$", &dir));
    let observer = supervisor.subscribe();

    supervisor.start(&compile_test_plan(CompileMode::Full)).expect("engine starts");
    let events = collect(observer);

    assert_eq!(events, vec![InstallEvent::Finished { success: false, exit_code: None }]);
    assert!(matches!(
        supervisor.wait(),
        Err(SupervisorError::EngineFailed { exit_code: None })
    ));
}

#[test]
fn test_background_child_does_not_delay_verdict() {
    let dir = TempDir::new().expect("tempdir");
    // The backgrounded sleep inherits the output pipe and outlives the engine
    let supervisor = InstallerSupervisor::new(sh_engine("echo hi; sleep 5 & exit 0", &dir));
    let observer = supervisor.subscribe();
    let started = Instant::now();

    supervisor.start(&compile_test_plan(CompileMode::Full)).expect("engine starts");
    let mut events = Vec::new();
    while let Some(event) = observer.recv_timeout(Duration::from_secs(4)) {
        let finished = event.is_finished();
        events.push(event);
        if finished {
            break;
        }
    }

    assert!(started.elapsed() < Duration::from_secs(4), "verdict waited for the background child");
    assert_eq!(
        events,
        vec![
            InstallEvent::Output("hi".to_string()),
            InstallEvent::Finished { success: true, exit_code: Some(0) },
        ]
    );
    assert_eq!(supervisor.state(), InstallRunState::Succeeded);
}

#[test]
fn test_second_start_is_refused() {
    let dir = TempDir::new().expect("tempdir");
    let supervisor = InstallerSupervisor::new(sh_engine("sleep 0.3; echo done", &dir));
    let observer = supervisor.subscribe();
    let config = compile_test_plan(CompileMode::Full);

    supervisor.start(&config).expect("engine starts");
    assert!(matches!(
        supervisor.start(&config),
        Err(SupervisorError::AlreadyRunning { state: InstallRunState::Running })
    ));

    let events = collect(observer);
    assert_eq!(finished_count(&events), 1);
    assert!(events.last().is_some_and(InstallEvent::is_finished));

    assert!(matches!(
        supervisor.start(&config),
        Err(SupervisorError::AlreadyRunning { state: InstallRunState::Succeeded })
    ));
}

#[test]
fn test_launch_failure() {
    let dir = TempDir::new().expect("tempdir");
    let command = EngineCommand::new(dir.path().join("no-such-engine"))
        .config_path(dir.path().join("engine.conf"));
    let supervisor = InstallerSupervisor::new(command);
    let observer = supervisor.subscribe();

    let err = supervisor
        .start(&compile_test_plan(CompileMode::Full))
        .expect_err("engine does not exist");
    assert!(matches!(err, SupervisorError::Launch { .. }));
    assert!(err.is_execution_failure());
    assert_eq!(supervisor.state(), InstallRunState::Failed);

    let events = collect(observer);
    assert_eq!(events, vec![InstallEvent::Finished { success: false, exit_code: None }]);
    assert!(matches!(supervisor.wait(), Err(SupervisorError::EngineFailed { .. })));
}

#[test]
fn test_summary_config_is_never_executed() {
    let dir = TempDir::new().expect("tempdir");
    let supervisor = InstallerSupervisor::new(sh_engine("echo should-not-run", &dir));

    let err = supervisor
        .start(&compile_test_plan(CompileMode::Summary))
        .expect_err("redacted text refused");
    assert!(matches!(err, SupervisorError::RedactedConfig));
    assert_eq!(supervisor.state(), InstallRunState::NotStarted);
    assert!(!dir.path().join("engine.conf").exists());
}

#[test]
fn test_detaching_one_observer_does_not_affect_another() {
    let dir = TempDir::new().expect("tempdir");
    let supervisor = InstallerSupervisor::new(sh_engine(
        "for i in 1 2 3 4 5; do echo line$i; sleep 0.05; done",
        &dir,
    ));
    let first = supervisor.subscribe();
    let second = supervisor.subscribe();

    supervisor.start(&compile_test_plan(CompileMode::Full)).expect("engine starts");
    let _ = first.recv();
    first.detach();

    let events = collect(second);
    assert_eq!(
        output_lines(&events),
        vec!["line1", "line2", "line3", "line4", "line5"]
    );
    assert_eq!(
        events.last(),
        Some(&InstallEvent::Finished { success: true, exit_code: Some(0) })
    );
    assert!(supervisor.wait().is_ok());
}

#[test]
fn test_late_subscriber_gets_completion_only() {
    let dir = TempDir::new().expect("tempdir");
    let supervisor = InstallerSupervisor::new(sh_engine("echo early", &dir));
    supervisor.start(&compile_test_plan(CompileMode::Full)).expect("engine starts");
    supervisor.wait().expect("engine succeeds");

    let events = collect(supervisor.subscribe());
    assert_eq!(events, vec![InstallEvent::Finished { success: true, exit_code: Some(0) }]);
}

#[test]
fn test_line_endings_and_invalid_utf8() {
    let dir = TempDir::new().expect("tempdir");
    let supervisor = InstallerSupervisor::new(sh_engine(
        r"printf 'crlf\r\n'; printf 'bad\377byte\n'; printf 'no-newline'",
        &dir,
    ));
    let observer = supervisor.subscribe();
    supervisor.start(&compile_test_plan(CompileMode::Full)).expect("engine starts");

    let events = collect(observer);
    assert_eq!(
        output_lines(&events),
        vec!["crlf", "bad\u{fffd}byte", "no-newline"]
    );
}

#[test]
fn test_install_log_artifact() {
    let dir = TempDir::new().expect("tempdir");
    let log_path = dir.path().join("engine.log");
    let script = format!("echo 'setup done' > '{}'", log_path.display());
    let supervisor = InstallerSupervisor::new(sh_engine(&script, &dir));

    assert!(matches!(supervisor.install_log(), Artifact::Unavailable(_)));

    supervisor.start(&compile_test_plan(CompileMode::Full)).expect("engine starts");
    supervisor.wait().expect("engine succeeds");

    assert_eq!(supervisor.install_log(), Artifact::Available("setup done\n".to_string()));
}

#[test]
fn test_engine_environment_and_workdir() {
    let dir = TempDir::new().expect("tempdir");
    let command = sh_engine("echo \"$TRI_STAGE $(pwd)\"", &dir)
        .env("TRI_STAGE", "disks")
        .current_dir(dir.path());
    let supervisor = InstallerSupervisor::new(command);
    let observer = supervisor.subscribe();
    supervisor.start(&compile_test_plan(CompileMode::Full)).expect("engine starts");

    let lines = output_lines(&collect(observer));
    let expected_dir = dir.path().canonicalize().expect("tempdir path");
    assert_eq!(lines, vec![format!("disks {}", expected_dir.display())]);
}
