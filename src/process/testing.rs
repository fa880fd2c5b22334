//! Scripted in-memory process for unit tests.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{Process, StreamKind};
use crate::stream::CaptureBuffer;

/// Exit code reported after [`Process::destroy`].
pub(crate) const DESTROYED_EXIT_CODE: i32 = 137;

pub(crate) struct ScriptedProcess {
    name: String,
    exit: Mutex<Option<(Instant, i32)>>,
    destroyed: AtomicUsize,
    stdout: Mutex<Option<Box<dyn Read + Send>>>,
    stderr: Mutex<Option<Box<dyn Read + Send>>>,
    stdin: Mutex<Option<Box<dyn Write + Send>>>,
    stdin_data: CaptureBuffer,
    close_failures: Mutex<HashMap<StreamKind, io::ErrorKind>>,
    closed: Mutex<Vec<StreamKind>>,
}

impl ScriptedProcess {
    pub(crate) fn new(name: &str) -> Self {
        let stdin_data = CaptureBuffer::new();
        Self {
            name: name.to_string(),
            exit: Mutex::new(None),
            destroyed: AtomicUsize::new(0),
            stdout: Mutex::new(Some(Box::new(io::empty()))),
            stderr: Mutex::new(Some(Box::new(io::empty()))),
            stdin: Mutex::new(Some(Box::new(stdin_data.clone()))),
            stdin_data,
            close_failures: Mutex::new(HashMap::new()),
            closed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_stdout(self, data: &[u8]) -> Self {
        *self.stdout.lock().unwrap() = Some(Box::new(Cursor::new(data.to_vec())));
        self
    }

    pub(crate) fn with_stdout_reader(self, reader: Box<dyn Read + Send>) -> Self {
        *self.stdout.lock().unwrap() = Some(reader);
        self
    }

    pub(crate) fn with_stderr(self, data: &[u8]) -> Self {
        *self.stderr.lock().unwrap() = Some(Box::new(Cursor::new(data.to_vec())));
        self
    }

    pub(crate) fn without_stderr(self) -> Self {
        *self.stderr.lock().unwrap() = None;
        self
    }

    pub(crate) fn failing_close(self, stream: StreamKind, kind: io::ErrorKind) -> Self {
        self.close_failures.lock().unwrap().insert(stream, kind);
        self
    }

    pub(crate) fn exit_now(&self, code: i32) {
        *self.exit.lock().unwrap() = Some((Instant::now(), code));
    }

    pub(crate) fn exit_after(&self, delay: Duration, code: i32) {
        *self.exit.lock().unwrap() = Some((Instant::now() + delay, code));
    }

    pub(crate) fn destroy_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> Vec<StreamKind> {
        self.closed.lock().unwrap().clone()
    }

    pub(crate) fn stdin_data(&self) -> Vec<u8> {
        self.stdin_data.contents()
    }
}

impl Process for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn try_exit_code(&self) -> io::Result<Option<i32>> {
        Ok(self
            .exit
            .lock()
            .unwrap()
            .and_then(|(at, code)| (Instant::now() >= at).then_some(code)))
    }

    fn destroy(&self) -> io::Result<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        let mut exit = self.exit.lock().unwrap();
        let already_exited = matches!(*exit, Some((at, _)) if Instant::now() >= at);
        if !already_exited {
            *exit = Some((Instant::now(), DESTROYED_EXIT_CODE));
        }
        Ok(())
    }

    fn take_stdout(&self) -> Option<Box<dyn Read + Send>> {
        self.stdout.lock().unwrap().take()
    }

    fn take_stderr(&self) -> Option<Box<dyn Read + Send>> {
        self.stderr.lock().unwrap().take()
    }

    fn take_stdin(&self) -> Option<Box<dyn Write + Send>> {
        self.stdin.lock().unwrap().take()
    }

    fn close(&self, stream: StreamKind) -> io::Result<()> {
        self.closed.lock().unwrap().push(stream);
        match self.close_failures.lock().unwrap().get(&stream) {
            Some(kind) => Err(io::Error::new(*kind, format!("{} close failed", stream))),
            None => Ok(()),
        }
    }
}

impl fmt::Display for ScriptedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
