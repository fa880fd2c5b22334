//! Executor integration tests.
//!
//! These tests launch real `/bin/sh` children and check the outcome of
//! each launch path end to end.

#![cfg(unix)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use process_executor::error::BoxError;
use process_executor::stream::{shared_sink, CaptureBuffer};
use process_executor::{
    CancelToken, ExecError, ProcessExecutor, ProcessHandle, ProcessListener, ProcessRegistry,
    ProcessResult, ProcessStopper, RegistryListener,
};

fn sh(script: &str) -> ProcessExecutor {
    let mut executor = ProcessExecutor::new();
    executor.command(["sh", "-c", script]);
    executor
}

#[derive(Default)]
struct Recorder {
    started: Mutex<Option<ProcessHandle>>,
    finished: AtomicUsize,
    stopped: AtomicUsize,
    stop_thread: Mutex<Option<ThreadId>>,
    fail_finish: bool,
}

impl Recorder {
    fn failing() -> Self {
        Self {
            fail_finish: true,
            ..Self::default()
        }
    }

    fn process(&self) -> ProcessHandle {
        self.started.lock().unwrap().clone().unwrap()
    }
}

impl ProcessListener for Recorder {
    fn after_start(&self, process: &ProcessHandle, _: &ProcessExecutor) {
        *self.started.lock().unwrap() = Some(process.clone());
    }

    fn after_finish(&self, _: &ProcessHandle, _: &ProcessResult) -> Result<(), BoxError> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        if self.fail_finish {
            return Err("listener rejected the result".into());
        }
        Ok(())
    }

    fn after_stop(&self, _: &ProcessHandle) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        *self.stop_thread.lock().unwrap() = Some(thread::current().id());
    }
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn wait_until_exited(process: &ProcessHandle) -> Option<i32> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(code) = process.try_exit_code().unwrap() {
            return Some(code);
        }
        thread::sleep(Duration::from_millis(20));
    }
    None
}

// ============================================================================
// Exit Code Tests
// ============================================================================

#[test]
fn test_allowed_exit_code() {
    let result = sh("exit 0").exit_values([0]).execute().unwrap();
    assert_eq!(result.exit_code(), 0);
    assert!(result.output().is_none());
}

#[test]
fn test_disallowed_exit_code() {
    let err = sh("exit 17").exit_value(3).execute().unwrap_err();

    assert_eq!(err.exit_code(), Some(17));
    let message = err.to_string();
    assert!(message.contains("17"));
    assert!(message.contains("3"));
    match err {
        ExecError::InvalidExitValue(e) => {
            assert_eq!(e.result().exit_code(), 17);
            assert!(e.allowed().allows(3));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_any_exit_code_by_default() {
    let result = sh("exit 42").execute().unwrap();
    assert_eq!(result.exit_code(), 42);
}

// ============================================================================
// Output Tests
// ============================================================================

#[test]
fn test_read_merged_output() {
    let result = sh("printf 'Hello world!'")
        .read_output(true)
        .execute()
        .unwrap();
    assert_eq!(result.output_string(), "Hello world!");
}

#[test]
fn test_stderr_merged_by_default() {
    let result = sh("echo out; echo err >&2").read_output(true).execute().unwrap();
    let lines = result.output().unwrap().lines();
    assert!(lines.contains(&"out".to_string()));
    assert!(lines.contains(&"err".to_string()));
}

#[test]
fn test_separate_stderr() {
    let out = CaptureBuffer::new();
    let err = CaptureBuffer::new();
    let result = sh("echo out; echo err >&2")
        .redirect_output(out.clone())
        .redirect_error(err.clone())
        .read_output(true)
        .execute()
        .unwrap();

    assert_eq!(out.contents(), b"out\n");
    assert_eq!(err.contents(), b"err\n");
    assert_eq!(result.output_string(), "out\n");
}

#[test]
fn test_output_also_to_second_sink() {
    let first = CaptureBuffer::new();
    let second = CaptureBuffer::new();
    sh("echo tee")
        .redirect_output(first.clone())
        .redirect_output_also_to(second.clone())
        .execute()
        .unwrap();
    assert_eq!(first.contents(), b"tee\n");
    assert_eq!(second.contents(), b"tee\n");
}

#[test]
fn test_input_is_fed_and_closed() {
    let result = sh("cat")
        .redirect_input(Cursor::new(b"from stdin".to_vec()))
        .read_output(true)
        .timeout(Duration::from_secs(10))
        .execute()
        .unwrap();
    assert_eq!(result.output_string(), "from stdin");
}

#[test]
fn test_long_output_truncated_in_message() {
    let mut input = "a".repeat(3000);
    input.push_str(&"b".repeat(3000));

    let err = sh("cat; exit 1")
        .redirect_input(Cursor::new(input.into_bytes()))
        .read_output(true)
        .exit_value_normal()
        .execute()
        .unwrap_err();

    let message = err.to_string();
    let expected = format!("{}\n...\n{}", "a".repeat(2500), "b".repeat(2500));
    assert!(message.contains(&expected));
    assert!(!message.contains(&"a".repeat(2501)));
    assert!(!message.contains(&"b".repeat(2501)));
    assert!(message.contains("(truncated)"));
}

// ============================================================================
// Environment Tests
// ============================================================================

#[test]
fn test_directory_and_environment() {
    let dir = tempfile::tempdir().unwrap();
    let expected = dir.path().canonicalize().unwrap();

    let result = sh("pwd -P; echo \"$PROCEXEC_TEST_VAR\"; echo \"${HOME-unset}\"")
        .directory(dir.path())
        .env("PROCEXEC_TEST_VAR", "value")
        .remove_env("HOME")
        .read_output(true)
        .execute()
        .unwrap();

    let lines = result.output().unwrap().lines();
    assert_eq!(lines[0], expected.to_string_lossy());
    assert_eq!(lines[1], "value");
    assert_eq!(lines[2], "unset");
}

#[test]
fn test_start_failure() {
    let err = ProcessExecutor::new()
        .command(["/nonexistent/procexec-test-binary"])
        .execute()
        .unwrap_err();

    match err {
        ExecError::Start {
            ref message,
            error_code,
            ..
        } => {
            assert!(message.starts_with("Could not execute [/nonexistent/procexec-test-binary]"));
            // ENOENT
            assert_eq!(error_code, Some(2));
        }
        other => panic!("unexpected error: {}", other),
    }
}

// ============================================================================
// Timeout and Cancellation Tests
// ============================================================================

#[test]
fn test_timeout_stops_process() {
    let recorder = Arc::new(Recorder::default());
    let started = Instant::now();

    let err = sh("for i in 1 2 3 4 5 6 7 8 9 10; do echo $i; sleep 1; done")
        .timeout(Duration::from_secs(1))
        .read_output(true)
        .add_listener_shared(recorder.clone())
        .execute()
        .unwrap_err();

    let elapsed = started.elapsed();
    assert!(err.is_timeout(), "unexpected error: {}", err);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);

    let message = err.to_string();
    assert!(message.contains("Timed out waiting for"));
    assert!(message.contains("timeout: 1 second"));

    // Teardown finishes in the background
    assert!(wait_until(|| recorder.stopped.load(Ordering::SeqCst) == 1));
    assert_eq!(recorder.finished.load(Ordering::SeqCst), 0);
    assert!(wait_until_exited(&recorder.process()).is_some());
}

#[test]
fn test_timeout_with_grandchild_holding_output() {
    // The killed shell's sleep keeps the output pipe open for 5 seconds
    let started = Instant::now();
    let err = sh("sleep 5; echo late")
        .timeout(Duration::from_millis(500))
        .read_output(true)
        .execute()
        .unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {}", err);
    assert!(started.elapsed() < Duration::from_millis(1500), "took {:?}", started.elapsed());
}

#[test]
fn test_timeout_with_nop_stopper() {
    let recorder = Arc::new(Recorder::default());
    let started = Instant::now();
    let err = sh("exec sleep 3")
        .timeout(Duration::from_millis(500))
        .stopper(ProcessStopper::Nop)
        .add_listener_shared(recorder.clone())
        .execute()
        .unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {}", err);
    assert!(started.elapsed() < Duration::from_millis(1500), "took {:?}", started.elapsed());
    // The process was left running
    assert_eq!(recorder.process().try_exit_code().unwrap(), None);
    recorder.process().destroy().unwrap();
}

#[test]
fn test_timeout_not_reached() {
    let result = sh("exit 5")
        .timeout(Duration::from_secs(10))
        .execute()
        .unwrap();
    assert_eq!(result.exit_code(), 5);
}

#[test]
fn test_no_timeout_runs_inline() {
    let recorder = Arc::new(Recorder::default());
    sh("true")
        .add_listener_shared(recorder.clone())
        .execute()
        .unwrap();
    assert_eq!(
        *recorder.stop_thread.lock().unwrap(),
        Some(thread::current().id())
    );
}

#[test]
fn test_cancel_started_process() {
    let started = sh("exec sleep 30").start().unwrap();
    let process = started.process().clone();
    thread::sleep(Duration::from_millis(100));

    let begin = Instant::now();
    assert!(started.future().cancel());
    let err = started.wait().unwrap_err();

    assert!(matches!(err, ExecError::Cancelled { .. }));
    assert!(begin.elapsed() < Duration::from_secs(5));
    assert!(wait_until_exited(&process).is_some());
}

#[test]
fn test_cancel_with_grandchild_holding_output() {
    let started = sh("sleep 5; echo late").start().unwrap();
    thread::sleep(Duration::from_millis(100));

    let begin = Instant::now();
    assert!(started.future().cancel());
    let err = started.wait().unwrap_err();

    assert!(matches!(err, ExecError::Cancelled { .. }));
    assert!(begin.elapsed() < Duration::from_millis(500), "took {:?}", begin.elapsed());
}

#[test]
fn test_started_process_completes() {
    let started = sh("printf done")
        .read_output(true)
        .start()
        .unwrap();
    assert!(started.process().id().is_some());
    let result = started.wait().unwrap();
    assert_eq!(result.output_string(), "done");
}

#[test]
fn test_interrupt_token() {
    let token = CancelToken::new();
    let interrupter = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            token.interrupt();
        })
    };

    let err = sh("exec sleep 30").interrupt_on(token).execute().unwrap_err();
    interrupter.join().unwrap();
    assert!(matches!(err, ExecError::Interrupted { .. }));
}

#[test]
fn test_close_timeout_with_lingering_grandchild() {
    // The background sleep inherits stdout, so the pipe stays open after sh exits
    let started = Instant::now();
    let result = sh("sleep 5 & echo ready")
        .read_output(true)
        .close_timeout(Duration::from_millis(300))
        .execute()
        .unwrap();

    assert_eq!(result.exit_code(), 0);
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(result.output_string().contains("ready"));
}

// ============================================================================
// Listener Tests
// ============================================================================

#[test]
fn test_failing_listener_replaces_result() {
    let first = Arc::new(Recorder::failing());
    let second = Arc::new(Recorder::default());

    let err = sh("exit 0")
        .add_listener_shared(first.clone())
        .add_listener_shared(second.clone())
        .execute()
        .unwrap_err();

    assert!(matches!(err, ExecError::Listener { .. }));
    assert!(err.to_string().contains("listener rejected the result"));
    assert_eq!(first.finished.load(Ordering::SeqCst), 1);
    assert_eq!(second.finished.load(Ordering::SeqCst), 0);
    assert_eq!(first.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(second.stopped.load(Ordering::SeqCst), 1);
}

#[test]
fn test_after_stop_on_invalid_exit() {
    let recorder = Arc::new(Recorder::default());
    let err = sh("exit 2")
        .exit_value_normal()
        .add_listener_shared(recorder.clone())
        .execute()
        .unwrap_err();
    assert_eq!(err.exit_code(), Some(2));
    assert_eq!(recorder.stopped.load(Ordering::SeqCst), 1);
}

#[test]
fn test_registry_tracks_running_process() {
    let registry: &'static ProcessRegistry = Box::leak(Box::new(ProcessRegistry::new()));
    let started = sh("exec sleep 30")
        .destroyer(RegistryListener::new(registry))
        .start()
        .unwrap();

    assert_eq!(registry.len(), 1);
    assert!(registry.is_armed());

    registry.shutdown();
    let result = started.wait().unwrap();
    // SIGKILL
    assert_eq!(result.exit_code(), 137);
    assert!(registry.is_empty());
}

#[test]
fn test_shared_sink_is_not_closed() {
    let out = CaptureBuffer::new();
    let sink = shared_sink(out.clone());
    for _ in 0..2 {
        let mut executor = sh("echo again");
        executor.redirect_output(process_executor::stream::SinkWriter::new(sink.clone()));
        executor.execute().unwrap();
    }
    assert_eq!(out.contents(), b"again\nagain\n");
}
