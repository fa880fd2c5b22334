//! The pumps of one launch, managed as a unit.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::pump::StreamPump;
use super::sink::{
    null_sink, shared_sink, CaptureBuffer, SharedSink, SharedSource, SinkWriter, SourceReader,
    TeeWriter,
};
use crate::context::TaskContext;
use crate::execution::ProcessOutput;
use crate::process::{Process, StreamKind};

/// Where a launch's standard streams are relayed.
#[derive(Clone)]
pub struct PumpStreams {
    /// Receives the child's stdout.
    pub out: SharedSink,
    /// Receives the child's stderr when it is not merged into stdout.
    pub err: SharedSink,
    /// Feeds the child's stdin. Without it stdin is closed right away.
    pub input: Option<SharedSource>,
}

impl Default for PumpStreams {
    fn default() -> Self {
        Self {
            out: null_sink(),
            err: null_sink(),
            input: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PumpSetState {
    Created,
    Started,
    Stopped,
}

struct Pumps {
    state: PumpSetState,
    stdout: Option<StreamPump>,
    stderr: Option<StreamPump>,
    stdin: Option<StreamPump>,
}

/// Up to three pumps wired to one process.
///
/// When capture is enabled, stdout is copied into an in-memory buffer as
/// well as the configured sink; the buffer is complete once
/// [`StreamPumpSet::stop`] has returned.
pub struct StreamPumpSet {
    process: String,
    out: SharedSink,
    err: SharedSink,
    capture: Option<CaptureBuffer>,
    pumps: Mutex<Pumps>,
}

impl StreamPumpSet {
    /// Take the process's streams and build the pumps for them.
    ///
    /// With `merge_error`, any separate stderr the process still has is
    /// pumped into the stdout target.
    pub fn attach(
        process: &dyn Process,
        streams: &PumpStreams,
        capture: bool,
        merge_error: bool,
    ) -> Self {
        let prefix = match process.id() {
            Some(pid) => format!("pump-{}", pid),
            None => "pump".to_string(),
        };

        let capture = capture.then(CaptureBuffer::new);
        let out = match &capture {
            Some(buffer) => shared_sink(TeeWriter::new(
                shared_sink(buffer.clone()),
                streams.out.clone(),
            )),
            None => streams.out.clone(),
        };
        let err = if merge_error {
            out.clone()
        } else {
            streams.err.clone()
        };

        let stdout = process.take_stdout().map(|source| {
            StreamPump::output(
                format!("{}-stdout", prefix),
                source,
                Box::new(SinkWriter::new(out.clone())),
            )
        });
        let stderr = process.take_stderr().map(|source| {
            StreamPump::output(
                format!("{}-stderr", prefix),
                source,
                Box::new(SinkWriter::new(err.clone())),
            )
        });

        let stdin = match &streams.input {
            Some(source) => process.take_stdin().map(|sink| {
                StreamPump::input(
                    format!("{}-stdin", prefix),
                    Box::new(SourceReader::new(source.clone())),
                    sink,
                )
            }),
            None => {
                if let Err(e) = process.close(StreamKind::Stdin) {
                    debug!(process = %process, error = %e, "failed to close unused stdin");
                }
                None
            }
        };

        Self {
            process: process.to_string(),
            out,
            err,
            capture,
            pumps: Mutex::new(Pumps {
                state: PumpSetState::Created,
                stdout,
                stderr,
                stdin,
            }),
        }
    }

    /// Start every pump. Has no effect once started or stopped.
    pub fn start(&self, ctx: &TaskContext) -> io::Result<()> {
        let mut pumps = self.pumps.lock().unwrap_or_else(PoisonError::into_inner);
        if pumps.state != PumpSetState::Created {
            return Ok(());
        }
        pumps.state = PumpSetState::Started;
        let Pumps {
            stdout,
            stderr,
            stdin,
            ..
        } = &mut *pumps;
        for pump in [stdout, stderr, stdin].into_iter().flatten() {
            pump.start(ctx)?;
        }
        Ok(())
    }

    /// Stop the stdin pump, wait for the output pumps to drain, then flush.
    ///
    /// Idempotent. Blocks until every pump thread has ended.
    pub fn stop(&self) {
        let mut pumps = self.pumps.lock().unwrap_or_else(PoisonError::into_inner);
        if pumps.state == PumpSetState::Stopped {
            return;
        }
        pumps.state = PumpSetState::Stopped;
        if let Some(pump) = pumps.stdin.as_mut() {
            pump.stop();
        }
        if let Some(pump) = pumps.stdout.as_mut() {
            pump.join();
        }
        if let Some(pump) = pumps.stderr.as_mut() {
            pump.join();
        }
        drop(pumps);
        self.flush();
    }

    /// Flush the output and error sinks.
    pub fn flush(&self) {
        if let Err(e) = SinkWriter::new(self.out.clone()).flush() {
            debug!(process = %self.process, error = %e, "failed to flush output sink");
        }
        if Arc::as_ptr(&self.out) as *const () != Arc::as_ptr(&self.err) as *const () {
            if let Err(e) = SinkWriter::new(self.err.clone()).flush() {
                debug!(process = %self.process, error = %e, "failed to flush error sink");
            }
        }
    }

    /// Output captured so far, if capture is enabled.
    pub fn captured(&self) -> Option<ProcessOutput> {
        self.capture
            .as_ref()
            .map(|buffer| ProcessOutput::new(buffer.contents()))
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedProcess;
    use crate::stream::shared_source;
    use std::io::Cursor;

    fn streams(out: &CaptureBuffer, err: &CaptureBuffer) -> PumpStreams {
        PumpStreams {
            out: shared_sink(out.clone()),
            err: shared_sink(err.clone()),
            input: None,
        }
    }

    #[test]
    fn test_relays_and_captures_stdout() {
        let process = ScriptedProcess::new("p")
            .with_stdout(b"Hello world!")
            .with_stderr(b"warning");
        let (out, err) = (CaptureBuffer::new(), CaptureBuffer::new());

        let pumps = StreamPumpSet::attach(&process, &streams(&out, &err), true, false);
        pumps.start(&TaskContext::capture()).unwrap();
        pumps.stop();

        assert_eq!(out.contents(), b"Hello world!");
        assert_eq!(err.contents(), b"warning");
        assert_eq!(pumps.captured().unwrap().string(), "Hello world!");
    }

    #[test]
    fn test_merge_error_goes_to_output_and_capture() {
        let process = ScriptedProcess::new("p").with_stderr(b"err");
        let (out, err) = (CaptureBuffer::new(), CaptureBuffer::new());

        let pumps = StreamPumpSet::attach(&process, &streams(&out, &err), true, true);
        pumps.start(&TaskContext::capture()).unwrap();
        pumps.stop();

        assert_eq!(out.contents(), b"err");
        assert!(err.is_empty());
        assert_eq!(pumps.captured().unwrap().bytes(), b"err");
    }

    #[test]
    fn test_no_capture_by_default() {
        let process = ScriptedProcess::new("p").with_stdout(b"x");
        let pumps = StreamPumpSet::attach(&process, &PumpStreams::default(), false, true);
        pumps.start(&TaskContext::capture()).unwrap();
        pumps.stop();
        assert!(pumps.captured().is_none());
    }

    #[test]
    fn test_stdin_closed_without_input() {
        let process = ScriptedProcess::new("p");
        let _pumps = StreamPumpSet::attach(&process, &PumpStreams::default(), false, true);
        assert_eq!(process.closed(), vec![StreamKind::Stdin]);
    }

    #[test]
    fn test_input_is_fed_to_stdin() {
        let process = ScriptedProcess::new("p").without_stderr();
        let streams = PumpStreams {
            input: Some(shared_source(Cursor::new(b"payload".to_vec()))),
            ..PumpStreams::default()
        };
        let pumps = StreamPumpSet::attach(&process, &streams, false, true);
        pumps.start(&TaskContext::capture()).unwrap();
        // Give the feeder a moment to reach end-of-data
        std::thread::sleep(std::time::Duration::from_millis(300));
        pumps.stop();
        assert_eq!(process.stdin_data(), b"payload");
        assert!(process.closed().is_empty());
    }

    #[test]
    fn test_stop_is_idempotent_and_safe_before_start() {
        let process = ScriptedProcess::new("p").with_stdout(b"data");
        let out = CaptureBuffer::new();
        let streams = streams(&out, &CaptureBuffer::new());
        let pumps = StreamPumpSet::attach(&process, &streams, false, false);
        pumps.stop();
        pumps.stop();
        pumps.start(&TaskContext::capture()).unwrap();
        assert!(out.is_empty());
    }
}
