//! Line-oriented sinks that forward process output to a callback or to
//! the log.

use std::io::{self, Write};

use tracing::Level;

/// Writer that splits its input into lines and hands each one to a
/// callback.
///
/// CR, LF and CRLF each terminate one line. A trailing fragment without
/// a terminator is delivered on [`flush`](Write::flush) or drop.
pub struct LineSink {
    on_line: Box<dyn FnMut(&str) + Send>,
    buffer: Vec<u8>,
    skip_lf: bool,
}

impl LineSink {
    pub fn new(on_line: impl FnMut(&str) + Send + 'static) -> Self {
        Self {
            on_line: Box::new(on_line),
            buffer: Vec::new(),
            skip_lf: false,
        }
    }

    /// Sink that logs every line as a `tracing` event at `level`.
    pub fn log(stream: impl Into<String>, level: Level) -> Self {
        let stream = stream.into();
        Self::new(move |line| log_line(&stream, level, line))
    }

    fn emit(&mut self) {
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        (self.on_line)(&line);
    }
}

fn log_line(stream: &str, level: Level, line: &str) {
    match level {
        Level::ERROR => tracing::error!(stream, "{}", line),
        Level::WARN => tracing::warn!(stream, "{}", line),
        Level::INFO => tracing::info!(stream, "{}", line),
        Level::DEBUG => tracing::debug!(stream, "{}", line),
        Level::TRACE => tracing::trace!(stream, "{}", line),
    }
}

impl Write for LineSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            match b {
                b'\n' if self.skip_lf => self.skip_lf = false,
                b'\n' => self.emit(),
                b'\r' => {
                    self.emit();
                    self.skip_lf = true;
                }
                _ => {
                    self.skip_lf = false;
                    self.buffer.push(b);
                }
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.emit();
        }
        Ok(())
    }
}

impl Drop for LineSink {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
