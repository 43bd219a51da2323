#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Command, Output};

fn proflaunch(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_proflaunch"))
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run proflaunch")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn reported_total(output: &Output) -> f64 {
    let report = stdout(output);
    let line = report
        .lines()
        .find_map(|line| line.strip_prefix("Total: "))
        .unwrap_or_else(|| panic!("no total in {}", report));
    line.trim().parse().unwrap()
}

#[test]
fn version_and_help_exit_successfully() {
    let dir = tempfile::tempdir().unwrap();
    for flag in ["-v", "--version"] {
        let output = proflaunch(dir.path(), &[flag]);
        assert_eq!(output.status.code(), Some(0));
        assert!(stdout(&output).starts_with("proflaunch "), "{}", stdout(&output));
    }
    for flag in ["-h", "--help"] {
        let output = proflaunch(dir.path(), &[flag, "/bin/sh", "-c", "touch ran"]);
        assert_eq!(output.status.code(), Some(0));
        assert!(stdout(&output).contains("--exclude"));
    }
    assert!(!dir.path().join("ran").exists());
}

#[test]
fn usage_errors_print_usage_and_fail() {
    let dir = tempfile::tempdir().unwrap();
    let cases: [&[&str]; 4] = [
        &["--bogus", "/bin/true"],
        &[],
        &["--mode=cpu", "/bin/true"],
        &["--exclude=NoSuchScope#run", "/bin/true"],
    ];
    for args in cases {
        let output = proflaunch(dir.path(), args);
        assert_eq!(output.status.code(), Some(2), "{:?}", args);
        let err = stderr(&output);
        assert!(err.contains("USAGE"), "{}", err);
        assert!(err.contains("error:"), "{}", err);
    }
}

#[test]
fn directory_printer_fails_before_running_the_program() {
    let dir = tempfile::tempdir().unwrap();
    let output = proflaunch(
        dir.path(),
        &["--printer=multi", "--file=/nonexistent", "/bin/sh", "-c", "touch ran"],
    );
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("/nonexistent"));
    assert!(!dir.path().join("ran").exists());
}

#[test]
fn report_goes_to_stdout_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let output = proflaunch(dir.path(), &["/bin/sh", "-c", "touch ran"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(stdout(&output).contains("Measure Mode: wall_time"));
    assert!(stdout(&output).contains("/bin/sh"));
    assert!(dir.path().join("ran").exists());
}

#[test]
fn report_file_is_relative_to_startup_directory() {
    let dir = tempfile::tempdir().unwrap();
    let output =
        proflaunch(dir.path(), &["--file=report.txt", "--printer=graph", "/bin/sh", "-c", "cd /"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(stdout(&output).is_empty());
    let report = fs::read_to_string(dir.path().join("report.txt")).unwrap();
    assert!(report.contains("/bin/sh"));
}

#[test]
fn multi_printer_fills_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("reports")).unwrap();
    let output = proflaunch(dir.path(), &["-p", "multi", "-f", "reports", "/bin/true"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(dir.path().join("reports/profile.flat.txt").is_file());
    assert!(dir.path().join("reports/profile.callgrind.out").is_file());
}

#[test]
fn failing_program_only_fails_with_allow_exceptions() {
    let dir = tempfile::tempdir().unwrap();
    let output = proflaunch(dir.path(), &["/bin/sh", "-c", "exit 3"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));

    let output = proflaunch(
        dir.path(),
        &["--allow_exceptions", "--file=report.txt", "/bin/sh", "-c", "exit 3"],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(dir.path().join("report.txt").is_file());
}

#[test]
fn failing_prelude_skips_the_program() {
    let dir = tempfile::tempdir().unwrap();
    let output = proflaunch(dir.path(), &["--eval-noprof=exit 4", "/bin/sh", "-c", "touch ran"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("exit 4"));
    assert!(!dir.path().join("ran").exists());
}

#[test]
fn prelude_snippets_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let output = proflaunch(
        dir.path(),
        &[
            "--eval-noprof=echo one >> log",
            "--eval-noprof=echo two >> log",
            "/bin/sh",
            "-c",
            "echo three >> log",
        ],
    );
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert_eq!(fs::read_to_string(dir.path().join("log")).unwrap(), "one\ntwo\nthree\n");
}

#[test]
fn bare_program_name_runs_from_the_current_directory() {
    let dir = tempfile::tempdir().unwrap();
    let prog = dir.path().join("prog");
    fs::write(&prog, "#!/bin/sh\ntouch ran\n").unwrap();
    fs::set_permissions(&prog, fs::Permissions::from_mode(0o755)).unwrap();

    let output = proflaunch(dir.path(), &["--allow_exceptions", "prog"]);
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    assert!(dir.path().join("ran").exists());
    assert!(stdout(&output).contains("./prog"));
}

#[test]
fn paused_session_measures_only_after_the_program_resumes_it() {
    let dir = tempfile::tempdir().unwrap();
    let paused = proflaunch(dir.path(), &["--start-paused", "/bin/sh", "-c", "sleep 0.3"]);
    assert_eq!(paused.status.code(), Some(0), "{}", stderr(&paused));
    assert!(reported_total(&paused) < 0.1, "{}", stdout(&paused));

    let resumed = proflaunch(
        dir.path(),
        &["--start-paused", "/bin/sh", "-c", "sleep 0.2; kill -USR1 $PROFLAUNCH_PID; sleep 0.3"],
    );
    assert_eq!(resumed.status.code(), Some(0), "{}", stderr(&resumed));
    let total = reported_total(&resumed);
    assert!((0.25..0.45).contains(&total), "{}", stdout(&resumed));
}

#[test]
fn program_can_pause_measurement() {
    let dir = tempfile::tempdir().unwrap();
    let output = proflaunch(
        dir.path(),
        &["/bin/sh", "-c", "sleep 0.1; kill -USR2 $PROFLAUNCH_PID; sleep 0.3"],
    );
    assert_eq!(output.status.code(), Some(0), "{}", stderr(&output));
    let total = reported_total(&output);
    assert!((0.05..0.25).contains(&total), "{}", stdout(&output));
}
