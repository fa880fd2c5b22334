//! Shared writers and readers used as pump endpoints.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Writer shared between the caller and the pumps.
///
/// The pumps only ever flush a shared sink; they never close the writer
/// behind it.
pub type SharedSink = Arc<Mutex<dyn Write + Send>>;

/// Reader shared between the caller and the stdin pump.
pub type SharedSource = Arc<Mutex<dyn Read + Send>>;

/// Wrap a writer as a [`SharedSink`].
pub fn shared_sink<W: Write + Send + 'static>(writer: W) -> SharedSink {
    Arc::new(Mutex::new(writer))
}

/// Wrap a reader as a [`SharedSource`].
pub fn shared_source<R: Read + Send + 'static>(reader: R) -> SharedSource {
    Arc::new(Mutex::new(reader))
}

/// Sink that discards everything.
pub fn null_sink() -> SharedSink {
    shared_sink(io::sink())
}

/// Owned `Write` handle over a [`SharedSink`].
pub struct SinkWriter(SharedSink);

impl SinkWriter {
    pub fn new(sink: SharedSink) -> Self {
        Self(sink)
    }

    fn lock(&self) -> MutexGuard<'_, dyn Write + Send + 'static> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().write(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.lock().write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().flush()
    }
}

/// Owned `Read` handle over a [`SharedSource`].
pub struct SourceReader(SharedSource);

impl SourceReader {
    pub fn new(source: SharedSource) -> Self {
        Self(source)
    }
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read(buf)
    }
}

/// In-memory buffer that collects captured output.
#[derive(Clone, Default, Debug)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writer that copies everything to two sinks.
pub struct TeeWriter {
    first: SharedSink,
    second: SharedSink,
}

impl TeeWriter {
    pub fn new(first: SharedSink, second: SharedSink) -> Self {
        Self { first, second }
    }
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SinkWriter::new(self.first.clone()).write_all(buf)?;
        SinkWriter::new(self.second.clone()).write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        SinkWriter::new(self.first.clone()).flush()?;
        SinkWriter::new(self.second.clone()).flush()
    }
}
