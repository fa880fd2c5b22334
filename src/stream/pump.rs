//! Byte pumps between a child's standard streams and caller endpoints.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::context::TaskContext;

/// Chunk size for each read.
pub const BUFFER_SIZE: usize = 4096;

/// How often the stdin pump re-checks its stop flag while its source is idle.
pub const INPUT_POLL_INTERVAL: Duration = Duration::from_millis(100);

type Job = Box<dyn FnOnce(&str, &AtomicBool) + Send>;

enum PumpState {
    Idle(Job),
    Running(JoinHandle<()>),
    Finished,
}

/// Copies bytes from a source to a sink on a dedicated thread.
///
/// The pump owns its sink and drops it once copying ends, which is how the
/// child's stdin gets closed. Caller-owned writers are handed in through a
/// shared handle, so only the handle is dropped.
///
/// A read already blocked on a child pipe cannot be aborted portably; it
/// returns once the child exits or is destroyed and the pipe reaches EOF.
pub struct StreamPump {
    name: String,
    stop: Arc<AtomicBool>,
    state: PumpState,
}

impl StreamPump {
    /// Pump that copies until the source reaches end-of-data.
    pub fn output(
        name: impl Into<String>,
        source: Box<dyn Read + Send>,
        sink: Box<dyn Write + Send>,
    ) -> Self {
        Self::with_job(
            name,
            Box::new(move |name: &str, stop: &AtomicBool| copy(name, source, sink, stop)),
        )
    }

    /// Pump feeding a child's stdin from a source that may never end.
    ///
    /// Reads happen on a detached feeder thread so that [`StreamPump::stop`]
    /// returns within [`INPUT_POLL_INTERVAL`] even while the source blocks.
    pub fn input(
        name: impl Into<String>,
        source: Box<dyn Read + Send>,
        sink: Box<dyn Write + Send>,
    ) -> Self {
        Self::with_job(
            name,
            Box::new(move |name: &str, stop: &AtomicBool| feed(name, source, sink, stop)),
        )
    }

    fn with_job(name: impl Into<String>, job: Job) -> Self {
        Self {
            name: name.into(),
            stop: Arc::new(AtomicBool::new(false)),
            state: PumpState::Idle(job),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the pump thread. Calling it again has no effect.
    pub fn start(&mut self, ctx: &TaskContext) -> io::Result<()> {
        let job = match std::mem::replace(&mut self.state, PumpState::Finished) {
            PumpState::Idle(job) => job,
            other => {
                self.state = other;
                return Ok(());
            }
        };
        let name = self.name.clone();
        let stop = Arc::clone(&self.stop);
        let handle = ctx.spawn(self.name.clone(), move || {
            trace!(pump = %name, "pump started");
            job(&name, &stop);
            trace!(pump = %name, "pump finished");
        })?;
        self.state = PumpState::Running(handle);
        Ok(())
    }

    /// Ask the pump to stop and wait for its thread to end.
    ///
    /// Safe to call repeatedly and before [`StreamPump::start`].
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.join();
    }

    /// Wait for the pump to finish on its own.
    pub fn join(&mut self) {
        match std::mem::replace(&mut self.state, PumpState::Finished) {
            PumpState::Running(handle) => {
                if handle.join().is_err() {
                    warn!(pump = %self.name, "pump thread panicked");
                }
            }
            PumpState::Idle(_) | PumpState::Finished => {}
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, PumpState::Running(_))
    }
}

impl Drop for StreamPump {
    fn drop(&mut self) {
        // Detach rather than join; a blocked read may outlive us.
        self.stop.store(true, Ordering::Release);
    }
}

fn copy(
    name: &str,
    mut source: Box<dyn Read + Send>,
    mut sink: Box<dyn Write + Send>,
    stop: &AtomicBool,
) {
    let mut buf = [0u8; BUFFER_SIZE];
    while !stop.load(Ordering::Acquire) {
        match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = sink.write_all(&buf[..n]) {
                    debug!(pump = %name, error = %e, "failed to write pumped data");
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                // Common when the child exits while data is in flight
                debug!(pump = %name, error = %e, "failed to read stream");
                break;
            }
        }
    }
    if let Err(e) = sink.flush() {
        debug!(pump = %name, error = %e, "failed to flush sink");
    }
}

fn feed(
    name: &str,
    source: Box<dyn Read + Send>,
    mut sink: Box<dyn Write + Send>,
    stop: &AtomicBool,
) {
    let (tx, rx) = mpsc::sync_channel::<io::Result<Vec<u8>>>(1);
    let feeder = TaskContext::capture().spawn(format!("{}-feeder", name), move || {
        let mut source = source;
        let mut buf = [0u8; BUFFER_SIZE];
        loop {
            let chunk = match source.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => Ok(buf[..n].to_vec()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => Err(e),
            };
            let failed = chunk.is_err();
            if tx.send(chunk).is_err() || failed {
                return;
            }
        }
    });
    if let Err(e) = feeder {
        debug!(pump = %name, error = %e, "failed to spawn input feeder");
        return;
    }

    while !stop.load(Ordering::Acquire) {
        match rx.recv_timeout(INPUT_POLL_INTERVAL) {
            Ok(Ok(chunk)) => {
                if let Err(e) = sink.write_all(&chunk).and_then(|_| sink.flush()) {
                    debug!(pump = %name, error = %e, "failed to write to process input");
                    return;
                }
            }
            Ok(Err(e)) => {
                debug!(pump = %name, error = %e, "failed to read input source");
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if let Err(e) = sink.flush() {
        debug!(pump = %name, error = %e, "failed to flush process input");
    }
}
