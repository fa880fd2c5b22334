//! Strategies for tearing down a process's streams.

use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, trace, warn};

use crate::context::TaskContext;
use crate::error::{ExecError, StreamCloseError, StreamCloseFailure};
use crate::process::{Process, ProcessHandle, StreamKind};
use crate::stream::StreamPumpSet;
use crate::Result;

/// How the pumps and stream handles of a finished launch are closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessCloser {
    /// Stop the pumps and close the streams, however long it takes.
    #[default]
    Standard,
    /// Like `Standard`, but give up after the grace period with a warning.
    Timeout(Duration),
}

impl ProcessCloser {
    /// Stop `pumps`, then close stdin, stdout and stderr of `process`.
    ///
    /// Every stream gets a close attempt; failures are aggregated into one
    /// [`StreamCloseError`].
    pub fn close(&self, process: &ProcessHandle, pumps: &Arc<StreamPumpSet>) -> Result<()> {
        match self {
            Self::Standard => close_streams(process.as_ref(), pumps),
            Self::Timeout(grace) => close_within(process, pumps, *grace),
        }
    }
}

fn close_streams(process: &dyn Process, pumps: &StreamPumpSet) -> Result<()> {
    pumps.stop();

    let mut failures = Vec::new();
    for stream in [StreamKind::Stdin, StreamKind::Stdout, StreamKind::Stderr] {
        match process.close(stream) {
            Ok(()) => {}
            Err(e) if stream == StreamKind::Stdin && is_already_closed(&e) => {
                trace!(process = %process, error = %e, "stdin already closed by process exit");
            }
            Err(e) => {
                error!(process = %process, %stream, error = %e, "failed to close stream");
                failures.push(StreamCloseFailure { stream, source: e });
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(StreamCloseError {
            process: process.to_string(),
            failures,
        }
        .into())
    }
}

/// Flushing buffered input into a child that already exited fails with
/// a broken pipe.
fn is_already_closed(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::BrokenPipe
}

fn close_within(
    process: &ProcessHandle,
    pumps: &Arc<StreamPumpSet>,
    grace: Duration,
) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let worker = {
        let process = Arc::clone(process);
        let pumps = Arc::clone(pumps);
        TaskContext::capture().spawn(closer_name(process.as_ref()), move || {
            let _ = tx.send(close_streams(process.as_ref(), &pumps));
        })
    };

    let outcome = match worker {
        Err(e) => Err(ExecError::Io(e)),
        Ok(_) => match rx.recv_timeout(grace) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    process = %process,
                    "could not close streams of {} in {}",
                    process,
                    describe_duration(grace)
                );
                Ok(())
            }
            Err(RecvTimeoutError::Disconnected) => Err(ExecError::WorkerLost {
                process: process.to_string(),
            }),
        },
    };

    // Data received so far stays available even if closing stalled
    pumps.flush();
    outcome
}

fn closer_name(process: &dyn Process) -> String {
    match process.id() {
        Some(pid) => format!("closer-{}", pid),
        None => "closer".to_string(),
    }
}

/// Render a duration as `1 second`, `250 milliseconds` and so on.
pub(crate) fn describe_duration(d: Duration) -> String {
    fn plural(n: u128, unit: &str) -> String {
        if n == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", n, unit)
        }
    }

    if d.subsec_nanos() == 0 {
        plural(u128::from(d.as_secs()), "second")
    } else if d.subsec_nanos() % 1_000_000 == 0 {
        plural(d.as_millis(), "millisecond")
    } else {
        format!("{:?}", d)
    }
}
