//! Local channel integration tests.
//!
//! These tests spawn real processes through `/bin/sh`.
//! Note: Tests that need a PTY are marked as ignored.

#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use remote_exec::{
    handler, CommandExecutor, Config, ExecutorState, LocalChannel, Runner, ShellExecutor,
    TokioScheduler,
};

#[test]
fn test_run_echo() {
    let output = Runner::local().run("echo done").unwrap();
    assert!(output.success());
    assert_eq!(output.stdout_lines(), vec!["done"]);
    assert!(output.stderr.is_empty());
}

#[test]
fn test_run_separates_stderr() {
    let output = Runner::local().run("echo oops >&2; exit 3").unwrap();
    assert_eq!(output.exit_code, Some(3));
    assert!(output.failed());
    assert_eq!(output.stderr_text(), "oops\n");
    assert!(output.stdout.is_empty());
}

#[test]
fn test_run_from_config_timeout() {
    let mut config = Config::default();
    config.executor.timeout_ms = 100;
    let runner = Runner::from_config(&config).unwrap();

    let started = Instant::now();
    let err = runner.run("sleep 5").unwrap_err();
    assert!(err.is_timeout());
    // close() kills the process instead of waiting for it.
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn test_inherit_merges_streams() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let exec = CommandExecutor::new(Box::new(LocalChannel::new()), "echo a; echo b >&2")
        .inherit()
        .handler(handler::collect(Arc::clone(&buffer)));
    exec.exec().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !exec.is_done() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(exec.state(), ExecutorState::Done);
    assert_eq!(&*buffer.lock().unwrap(), b"a\nb\n");
}

#[test]
fn test_stdin_reaches_command() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let exec = CommandExecutor::new(Box::new(LocalChannel::new()), "head -n 1")
        .handler(handler::collect(Arc::clone(&buffer)))
        .timeout(Duration::from_secs(5));

    // exec() blocks until `head` exits, so feed it from another thread.
    let exec = Arc::new(exec);
    let writer = Arc::clone(&exec);
    let feeder = std::thread::spawn(move || {
        let deadline = Instant::now() + Duration::from_secs(5);
        while writer.write_line("first").is_err() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    });

    exec.exec().unwrap();
    feeder.join().unwrap();
    assert_eq!(exec.exit_code(), Some(0));
    exec.close();
}

#[test]
fn test_unhandled_stderr_flood_completes() {
    // Far more than a pipe buffer, with nobody handling stderr.
    let exec = CommandExecutor::new(
        Box::new(LocalChannel::new()),
        "head -c 300000 /dev/zero >&2; echo ok",
    )
    .handler(handler::discard())
    .timeout(Duration::from_secs(10));

    exec.exec().unwrap();
    assert_eq!(exec.exit_code(), Some(0));
    exec.close();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_spawn_with_tokio_scheduler() {
    let runner = Runner::local().with_scheduler(Arc::new(TokioScheduler::current().unwrap()));
    let output = runner.spawn("printf 'x\\ny\\n'").await.unwrap().unwrap();
    assert_eq!(output.stdout_lines(), vec!["x", "y"]);
}

#[test]
#[ignore = "requires PTY"]
fn test_shell_round_trip() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let shell = ShellExecutor::new(Box::new(LocalChannel::new().with_shell("/bin/sh")))
        .pty_type("xterm")
        .handler(handler::sanitized_lines(move |line| {
            sink.lock().unwrap().push(line.to_string())
        }));

    shell.exec().unwrap();
    shell.write_line("echo marker-$((40 + 2))").unwrap();
    shell.exit().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !shell.is_done() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(shell.is_done());
    assert!(lines.lock().unwrap().iter().any(|l| l.trim() == "marker-42"));
}
