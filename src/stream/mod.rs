//! Stream relaying between a child process and the caller.
//!
//! This module provides:
//! - [`StreamPump`]: a single source-to-sink copy on its own thread
//! - [`StreamPumpSet`]: the stdout/stderr/stdin pumps of one launch
//! - Shared sinks, capture buffers, tees and line-oriented log sinks
//!
//! # Example
//!
//! ```
//! use std::io::Write;
//! use process_executor::stream::{shared_sink, CaptureBuffer, TeeWriter};
//!
//! let a = CaptureBuffer::new();
//! let b = CaptureBuffer::new();
//! let mut tee = TeeWriter::new(shared_sink(a.clone()), shared_sink(b.clone()));
//! tee.write_all(b"hello").unwrap();
//! assert_eq!(a.contents(), b.contents());
//! ```

mod log;
mod pump;
mod pump_set;
mod sink;

pub use log::LineSink;
pub use pump::{StreamPump, BUFFER_SIZE, INPUT_POLL_INTERVAL};
pub use pump_set::{PumpStreams, StreamPumpSet};
pub use sink::{
    null_sink, shared_sink, shared_source, CaptureBuffer, SharedSink, SharedSource, SinkWriter,
    SourceReader, TeeWriter,
};
