//! Process handle backed by `std::process::Child`.

use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Process, StreamKind};
use crate::error::ExecError;
use crate::execution::ProcessAttributes;
use crate::Result;

/// A child process spawned by the host OS.
pub struct NativeProcess {
    pid: u32,
    description: String,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<Box<dyn Read + Send>>>,
    stderr: Mutex<Option<ChildStderr>>,
}

impl NativeProcess {
    /// Spawn the command described by `attributes`.
    ///
    /// With `redirect_error_stream` the child's stderr shares its stdout
    /// pipe, so both arrive interleaved in write order.
    pub fn spawn(attributes: &ProcessAttributes, redirect_error_stream: bool) -> Result<Self> {
        let (program, args) = attributes
            .command()
            .split_first()
            .ok_or(ExecError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(args).stdin(Stdio::piped());

        if let Some(dir) = attributes.directory() {
            cmd.current_dir(dir);
        }
        for (key, value) in attributes.environment() {
            match value {
                Some(value) => cmd.env(key, value),
                None => cmd.env_remove(key),
            };
        }

        let merged = if redirect_error_stream {
            let (reader, writer) = os_pipe::pipe()?;
            cmd.stdout(writer.try_clone()?).stderr(writer);
            Some(reader)
        } else {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
            None
        };

        let spawned = cmd.spawn();
        // The command holds our copies of the merged pipe's write end; the
        // reader only sees EOF once they are gone.
        drop(cmd);
        let mut child = spawned.map_err(|e| start_error(attributes, e))?;

        let stdout: Option<Box<dyn Read + Send>> = match merged {
            Some(reader) => Some(Box::new(reader)),
            None => child
                .stdout
                .take()
                .map(|s| Box::new(s) as Box<dyn Read + Send>),
        };

        let pid = child.id();
        Ok(Self {
            pid,
            description: format!("process {} {}", pid, attributes.command_display()),
            stdin: Mutex::new(child.stdin.take()),
            stdout: Mutex::new(stdout),
            stderr: Mutex::new(child.stderr.take()),
            child: Mutex::new(child),
        })
    }

    fn child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Build the start failure for a spawn error.
fn start_error(attributes: &ProcessAttributes, source: io::Error) -> ExecError {
    let error_code = source.raw_os_error();
    let mut message = format!("Could not execute {}", attributes.command_display());
    if let Some(dir) = attributes.directory() {
        message.push_str(&format!(" in directory {}", dir.display()));
    }
    match error_code {
        Some(code) => message.push_str(&format!(". Error={}, {}", code, source)),
        None => message.push_str(&format!(". {}", source)),
    }
    tracing::error!(error = %source, "could not start process");
    ExecError::Start {
        message,
        error_code,
        source,
    }
}

/// Exit code of a finished process; signals map to `128 + signal`.
pub(crate) fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

impl Process for NativeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit_code(&self) -> io::Result<Option<i32>> {
        Ok(self.child().try_wait()?.map(exit_code_of))
    }

    fn destroy(&self) -> io::Result<()> {
        let mut child = self.child();
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        match child.kill() {
            // Already reaped
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    fn take_stdout(&self) -> Option<Box<dyn Read + Send>> {
        self.stdout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn take_stderr(&self) -> Option<Box<dyn Read + Send>> {
        self.stderr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    fn take_stdin(&self) -> Option<Box<dyn Write + Send>> {
        self.stdin
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|s| Box::new(s) as Box<dyn Write + Send>)
    }

    fn close(&self, stream: StreamKind) -> io::Result<()> {
        match stream {
            StreamKind::Stdin => {
                let stdin = self
                    .stdin
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(mut stdin) = stdin {
                    stdin.flush()?;
                }
            }
            StreamKind::Stdout => {
                drop(self.take_stdout());
            }
            StreamKind::Stderr => {
                drop(self.take_stderr());
            }
        }
        Ok(())
    }
}

impl fmt::Display for NativeProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl fmt::Debug for NativeProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeProcess")
            .field("pid", &self.pid)
            .field("description", &self.description)
            .finish()
    }
}
