//! Process launcher.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, debug_span, Level};

use super::attributes::ProcessAttributes;
use super::closer::ProcessCloser;
use super::exit::{check_exit, ExitCodes};
use super::result::ProcessResult;
use super::started::{ProcessFuture, StartedProcess};
use super::stopper::ProcessStopper;
use super::waiter::{timeout_error, Waiter, WorkerTracker};
use crate::context::TaskContext;
use crate::error::ExecError;
use crate::listener::{ListenerBus, ProcessListener};
use crate::process::{CancelReason, CancelToken, NativeProcess, ProcessHandle};
use crate::registry::RegistryListener;
use crate::stream::{
    shared_sink, shared_source, LineSink, PumpStreams, SharedSink, StreamPumpSet, TeeWriter,
};
use crate::Result;

/// Configures and launches external processes.
///
/// Setters take `&mut self` and return it, so a launch can be configured
/// and run in one expression:
///
/// ```no_run
/// use process_executor::ProcessExecutor;
///
/// let result = ProcessExecutor::new()
///     .command(["echo", "hello"])
///     .exit_value_normal()
///     .read_output(true)
///     .execute()?;
/// assert_eq!(result.output_string().trim(), "hello");
/// # Ok::<(), process_executor::ExecError>(())
/// ```
///
/// Every launch snapshots the configuration, so changing the executor
/// afterwards does not affect processes already started.
pub struct ProcessExecutor {
    command: Vec<String>,
    directory: Option<PathBuf>,
    environment: BTreeMap<String, Option<String>>,
    redirect_error_stream: bool,
    allowed_exit_codes: ExitCodes,
    timeout: Option<Duration>,
    close_timeout: Option<Duration>,
    stopper: ProcessStopper,
    streams: PumpStreams,
    read_output: bool,
    listeners: ListenerBus,
    interrupt: Option<CancelToken>,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            directory: None,
            environment: BTreeMap::new(),
            redirect_error_stream: true,
            allowed_exit_codes: ExitCodes::Any,
            timeout: None,
            close_timeout: None,
            stopper: ProcessStopper::Destroy,
            streams: PumpStreams::default(),
            read_output: false,
            listeners: ListenerBus::new(),
            interrupt: None,
        }
    }
}

impl ProcessExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the program and its arguments.
    pub fn command<I, S>(&mut self, command: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the command by splitting `line` on spaces.
    ///
    /// No quoting or escaping is understood: `mkdir new\ folder` becomes
    /// `["mkdir", "new\", "folder"]`.
    pub fn command_split(&mut self, line: &str) -> &mut Self {
        self.command(line.split(' ').filter(|part| !part.is_empty()))
    }

    /// Run the process in `dir` instead of the current directory.
    pub fn directory(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.directory = Some(dir.into());
        self
    }

    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.environment.insert(key.into(), Some(value.into()));
        self
    }

    /// Add several variables to the environment overlay.
    pub fn environment<I, K, V>(&mut self, vars: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self.env(key, value);
        }
        self
    }

    /// Remove `key` from the environment the process inherits.
    pub fn remove_env(&mut self, key: impl Into<String>) -> &mut Self {
        self.environment.insert(key.into(), None);
        self
    }

    /// Merge stderr into stdout. On by default.
    pub fn redirect_error_stream(&mut self, merge: bool) -> &mut Self {
        self.redirect_error_stream = merge;
        self
    }

    /// Accept every exit code.
    pub fn exit_value_any(&mut self) -> &mut Self {
        self.allowed_exit_codes = ExitCodes::Any;
        self
    }

    /// Accept only exit code `0`.
    pub fn exit_value_normal(&mut self) -> &mut Self {
        self.allowed_exit_codes = ExitCodes::normal();
        self
    }

    pub fn exit_value(&mut self, code: i32) -> &mut Self {
        self.exit_values([code])
    }

    /// Accept only the given exit codes.
    pub fn exit_values(&mut self, codes: impl IntoIterator<Item = i32>) -> &mut Self {
        self.allowed_exit_codes = ExitCodes::only(codes);
        self
    }

    /// Give up on the process after `timeout`, stopping it and failing
    /// with [`ExecError::Timeout`].
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bound the time spent closing streams after the process ended.
    pub fn close_timeout(&mut self, grace: Duration) -> &mut Self {
        self.close_timeout = Some(grace);
        self
    }

    pub fn stopper(&mut self, stopper: ProcessStopper) -> &mut Self {
        self.stopper = stopper;
        self
    }

    /// Relay stdout (and merged stderr) to `output`.
    pub fn redirect_output(&mut self, output: impl Write + Send + 'static) -> &mut Self {
        self.streams.out = shared_sink(output);
        self
    }

    /// Relay stderr to `output`. Turns off merging into stdout.
    pub fn redirect_error(&mut self, output: impl Write + Send + 'static) -> &mut Self {
        self.streams.err = shared_sink(output);
        self.redirect_error_stream(false)
    }

    /// Relay stdout to `output` in addition to the current target.
    pub fn redirect_output_also_to(&mut self, output: impl Write + Send + 'static) -> &mut Self {
        self.streams.out = tee(&self.streams.out, output);
        self
    }

    /// Relay stderr to `output` in addition to the current target.
    pub fn redirect_error_also_to(&mut self, output: impl Write + Send + 'static) -> &mut Self {
        self.streams.err = tee(&self.streams.err, output);
        self
    }

    /// Log every stdout line at info level.
    pub fn redirect_output_as_info(&mut self, name: impl Into<String>) -> &mut Self {
        self.redirect_output(LineSink::log(name, Level::INFO))
    }

    pub fn redirect_output_as_debug(&mut self, name: impl Into<String>) -> &mut Self {
        self.redirect_output(LineSink::log(name, Level::DEBUG))
    }

    /// Log every stderr line at info level. Turns off merging into stdout.
    pub fn redirect_error_as_info(&mut self, name: impl Into<String>) -> &mut Self {
        self.redirect_error(LineSink::log(name, Level::INFO))
    }

    pub fn redirect_error_as_debug(&mut self, name: impl Into<String>) -> &mut Self {
        self.redirect_error(LineSink::log(name, Level::DEBUG))
    }

    /// Feed `input` to the process's stdin, closing it at end of data.
    pub fn redirect_input(&mut self, input: impl Read + Send + 'static) -> &mut Self {
        self.streams.input = Some(shared_source(input));
        self
    }

    /// Capture stdout so it is available from [`ProcessResult::output`].
    pub fn read_output(&mut self, read: bool) -> &mut Self {
        self.read_output = read;
        self
    }

    /// Replace every registered listener with `listener`.
    pub fn listener<L: ProcessListener>(&mut self, listener: L) -> &mut Self {
        self.listeners.clear();
        self.listeners.add(listener);
        self
    }

    /// Register `listener`, returning a handle for [`Self::remove_listener`].
    pub fn add_listener<L: ProcessListener>(&mut self, listener: L) -> Arc<L> {
        self.listeners.add(listener)
    }

    /// Register a listener the caller keeps a handle to.
    pub fn add_listener_shared<L: ProcessListener>(&mut self, listener: Arc<L>) -> &mut Self {
        self.listeners.add_shared(listener);
        self
    }

    pub fn remove_listener<L: ProcessListener>(&mut self, listener: &Arc<L>) -> &mut Self {
        self.listeners.remove(listener);
        self
    }

    /// Unregister every listener of type `L`.
    pub fn remove_listeners<L: ProcessListener>(&mut self) -> &mut Self {
        self.listeners.remove_all::<L>();
        self
    }

    pub fn clear_listeners(&mut self) -> &mut Self {
        self.listeners.clear();
        self
    }

    /// Keep launched processes registered with `destroyer` while they run.
    pub fn destroyer(&mut self, destroyer: RegistryListener) -> &mut Self {
        self.listeners.remove_all::<RegistryListener>();
        self.listeners.add(destroyer);
        self
    }

    /// Destroy launched processes when the host shuts down.
    pub fn destroy_on_exit(&mut self) -> &mut Self {
        self.destroyer(RegistryListener::global())
    }

    /// Abandon waiting, and stop the process, when `token` is interrupted.
    pub fn interrupt_on(&mut self, token: CancelToken) -> &mut Self {
        self.interrupt = Some(token);
        self
    }

    pub fn get_command(&self) -> &[String] {
        &self.command
    }

    pub fn get_directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn get_environment(&self) -> &BTreeMap<String, Option<String>> {
        &self.environment
    }

    pub fn get_allowed_exit_codes(&self) -> &ExitCodes {
        &self.allowed_exit_codes
    }

    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn is_redirect_error_stream(&self) -> bool {
        self.redirect_error_stream
    }

    pub fn is_read_output(&self) -> bool {
        self.read_output
    }

    pub fn listeners(&self) -> &ListenerBus {
        &self.listeners
    }

    /// Check a result against the configured exit codes without launching.
    pub fn check_exit_code(&self, result: ProcessResult) -> Result<ProcessResult> {
        check_exit(&self.attributes(), result)
    }

    /// Run the process to completion.
    ///
    /// Without a timeout everything runs on the calling thread. With one,
    /// the process is waited for on a background thread while this thread
    /// waits at most the timeout. On expiry the timeout error is returned
    /// right away; stopping the process, closing its streams and the
    /// `after_stop` listeners finish on the background thread.
    pub fn execute(&mut self) -> Result<ProcessResult> {
        let waiter = self.launch()?;
        let Some(deadline) = self.timeout else {
            return waiter.run();
        };

        let process = Arc::clone(&waiter.process);
        let attributes = waiter.attributes.clone();
        let pumps = Arc::clone(&waiter.pumps);
        let future = ProcessFuture::spawn(waiter, &TaskContext::capture())?;
        if future.wait_timeout(deadline) {
            return future.get();
        }

        let error = timeout_error(
            &process,
            &attributes,
            deadline,
            pumps.captured().as_ref(),
            future.tracker.describe(),
        );
        if future.cancel_with(CancelReason::Timeout, error) {
            debug!(process = %process, "process is running too long");
        }
        // Either the timeout error or an outcome delivered just before it
        future.get()
    }

    /// Launch the process and wait for it on a background thread.
    pub fn start(&mut self) -> Result<StartedProcess> {
        let waiter = self.launch()?;
        let process = Arc::clone(&waiter.process);
        let future = ProcessFuture::spawn(waiter, &TaskContext::capture())?;
        Ok(StartedProcess::new(process, future))
    }

    fn attributes(&self) -> ProcessAttributes {
        ProcessAttributes::new(
            self.command.clone(),
            self.directory.clone(),
            self.environment.clone(),
            self.allowed_exit_codes.clone(),
        )
    }

    fn launch(&mut self) -> Result<Waiter> {
        // Listeners may reconfigure this executor
        let listeners = self.listeners.clone();
        listeners.before_start(self);

        if self.command.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let attributes = self.attributes();
        let listeners = self.listeners.clone();

        debug!(command = %attributes.command_display(), "executing");
        let process: ProcessHandle =
            Arc::new(NativeProcess::spawn(&attributes, self.redirect_error_stream)?);
        debug!(process = %process, "started");

        let span = debug_span!("process", pid = process.id());
        let ctx = TaskContext::with_span(span);
        let pumps = StreamPumpSet::attach(
            process.as_ref(),
            &self.streams,
            self.read_output,
            self.redirect_error_stream,
        );
        if let Err(e) = pumps.start(&ctx) {
            ProcessStopper::Destroy.stop(process.as_ref());
            pumps.stop();
            return Err(ExecError::Io(e));
        }

        let cancel = match &self.interrupt {
            Some(token) => token.child(),
            None => CancelToken::new(),
        };
        let closer = match self.close_timeout {
            Some(grace) => ProcessCloser::Timeout(grace),
            None => ProcessCloser::Standard,
        };
        let waiter = Waiter {
            process: Arc::clone(&process),
            attributes,
            stopper: self.stopper,
            closer,
            pumps: Arc::new(pumps),
            listeners,
            cancel,
            deadline: self.timeout,
            tracker: WorkerTracker::default(),
        };

        // Changes made from here on no longer affect this launch
        self.listeners.after_start(&process, self);
        Ok(waiter)
    }
}

fn tee(current: &SharedSink, also: impl Write + Send + 'static) -> SharedSink {
    shared_sink(TeeWriter::new(current.clone(), shared_sink(also)))
}

impl fmt::Debug for ProcessExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessExecutor")
            .field("command", &self.command)
            .field("directory", &self.directory)
            .field("environment", &self.environment)
            .field("redirect_error_stream", &self.redirect_error_stream)
            .field("allowed_exit_codes", &self.allowed_exit_codes)
            .field("timeout", &self.timeout)
            .field("close_timeout", &self.close_timeout)
            .field("stopper", &self.stopper)
            .field("read_output", &self.read_output)
            .field("listeners", &self.listeners)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_defaults() {
        let executor = ProcessExecutor::new();
        assert!(executor.get_command().is_empty());
        assert!(executor.is_redirect_error_stream());
        assert!(!executor.is_read_output());
        assert!(executor.get_allowed_exit_codes().is_any());
        assert!(executor.get_timeout().is_none());
    }

    #[test]
    fn test_command_split() {
        let mut executor = ProcessExecutor::new();
        executor.command_split("mkdir new\\ folder");
        assert_eq!(executor.get_command(), ["mkdir", "new\\", "folder"]);
    }

    #[test]
    fn test_environment_overlay() {
        let mut executor = ProcessExecutor::new();
        executor
            .env("A", "1")
            .environment([("B", "2")])
            .remove_env("HOME");
        let env = executor.get_environment();
        assert_eq!(env.get("A"), Some(&Some("1".to_string())));
        assert_eq!(env.get("B"), Some(&Some("2".to_string())));
        assert_eq!(env.get("HOME"), Some(&None));
    }

    #[test]
    fn test_redirect_error_separates_streams() {
        let mut executor = ProcessExecutor::new();
        executor.redirect_error(std::io::sink());
        assert!(!executor.is_redirect_error_stream());
    }

    #[test]
    fn test_exit_value_setters_replace() {
        let mut executor = ProcessExecutor::new();
        executor.exit_values([1, 2]).exit_value(3);
        assert_eq!(executor.get_allowed_exit_codes(), &ExitCodes::only([3]));
        executor.exit_value_any();
        assert!(executor.get_allowed_exit_codes().is_any());
    }

    #[test]
    fn test_check_exit_code_without_launch() {
        let mut executor = ProcessExecutor::new();
        executor.command(["true"]).exit_value_normal();
        assert!(executor.check_exit_code(ProcessResult::new(0, None)).is_ok());
        let err = executor
            .check_exit_code(ProcessResult::new(1, None))
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn test_empty_command_rejected() {
        let err = ProcessExecutor::new().execute().unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));
    }

    struct Marker;
    impl ProcessListener for Marker {}

    #[test]
    fn test_listener_replaces_and_destroyer_keeps_others() {
        let mut executor = ProcessExecutor::new();
        executor.add_listener(Marker);
        executor.add_listener(Marker);
        executor.listener(Marker);
        assert_eq!(executor.listeners().len(), 1);

        executor.destroy_on_exit().destroy_on_exit();
        assert_eq!(executor.listeners().len(), 2);
        assert!(executor.listeners().contains::<RegistryListener>());

        executor.remove_listeners::<RegistryListener>();
        assert!(!executor.listeners().contains::<RegistryListener>());

        let handle = executor.add_listener(Marker);
        executor.remove_listener(&handle).clear_listeners();
        assert!(executor.listeners().is_empty());
    }

    #[test]
    fn test_before_start_can_reconfigure() {
        struct SetsCommand;
        impl ProcessListener for SetsCommand {
            fn before_start(&self, executor: &mut ProcessExecutor) {
                executor.command(Vec::<String>::new());
            }
        }

        let mut executor = ProcessExecutor::new();
        executor.command(["true"]).add_listener(SetsCommand);
        let err = executor.execute().unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));
    }

    #[test]
    fn test_spawn_failure_skips_after_start() {
        #[derive(Default)]
        struct Started(Mutex<usize>);
        impl ProcessListener for Started {
            fn after_start(&self, _: &ProcessHandle, _: &ProcessExecutor) {
                *self.0.lock().unwrap() += 1;
            }
        }

        let mut executor = ProcessExecutor::new();
        executor.command(["/nonexistent/definitely-not-here"]);
        let started = executor.add_listener(Started::default());
        let err = executor.execute().unwrap_err();
        assert!(matches!(err, ExecError::Start { .. }));
        assert_eq!(*started.0.lock().unwrap(), 0);
    }
}
