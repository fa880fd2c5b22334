//! Error types for process-executor.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::execution::{ExitCodes, ProcessResult};
use crate::process::StreamKind;

/// Boxed error raised by listener hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for process-executor operations.
#[derive(Error, Debug)]
pub enum ExecError {
    /// A launch was attempted before a command was configured.
    #[error("command has not been set")]
    EmptyCommand,

    /// The platform could not create the process.
    #[error("{message}")]
    Start {
        message: String,
        /// OS error code, when the platform reported one.
        error_code: Option<i32>,
        #[source]
        source: io::Error,
    },

    /// The process finished with an exit code outside the allowed set.
    #[error(transparent)]
    InvalidExitValue(#[from] InvalidExitValueError),

    /// The deadline elapsed before the process finished.
    #[error("{message}")]
    Timeout {
        message: String,
        deadline: Duration,
        /// Exit code observed when the deadline fired, if the process had already exited.
        exit_code: Option<i32>,
        /// What the waiting worker was doing when the deadline fired.
        worker: Option<String>,
    },

    /// Waiting was interrupted by the host.
    #[error("interrupted while waiting for {process}")]
    Interrupted { process: String },

    /// The caller cancelled the execution.
    #[error("execution of {process} was cancelled")]
    Cancelled { process: String },

    /// One or more stream handles failed to close.
    #[error(transparent)]
    StreamClose(#[from] StreamCloseError),

    /// An after-finish listener failed.
    #[error("listener failed after {process} finished: {source}")]
    Listener {
        process: String,
        #[source]
        source: BoxError,
    },

    /// The background waiter ended without delivering an outcome.
    #[error("waiter for {process} terminated without a result")]
    WorkerLost { process: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ExecError {
    /// Exit code known at the time of the failure, if any.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::InvalidExitValue(e) => Some(e.exit_code()),
            Self::Timeout { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Whether this failure is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Exit code check failure, carrying the full result for inspection.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct InvalidExitValueError {
    message: String,
    result: ProcessResult,
    allowed: ExitCodes,
}

impl InvalidExitValueError {
    pub(crate) fn new(message: String, result: ProcessResult, allowed: ExitCodes) -> Self {
        Self {
            message,
            result,
            allowed,
        }
    }

    /// The offending exit code.
    pub fn exit_code(&self) -> i32 {
        self.result.exit_code()
    }

    /// The result of the finished process, including captured output.
    pub fn result(&self) -> &ProcessResult {
        &self.result
    }

    /// Exit codes that would have been accepted.
    pub fn allowed(&self) -> &ExitCodes {
        &self.allowed
    }

    pub fn into_result(self) -> ProcessResult {
        self.result
    }
}

/// A single stream that failed to close.
#[derive(Debug)]
pub struct StreamCloseFailure {
    pub stream: StreamKind,
    pub source: io::Error,
}

/// Aggregate of every close failure of one launch.
#[derive(Error, Debug)]
#[error("failed to close {} stream(s) of {process}: {}", failures.len(), describe(failures))]
pub struct StreamCloseError {
    pub process: String,
    pub failures: Vec<StreamCloseFailure>,
}

fn describe(failures: &[StreamCloseFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.stream, f.source))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience Result type for process-executor operations.
pub type Result<T> = std::result::Result<T, ExecError>;
