//! Diagnostic context propagation across thread hand-offs.
//!
//! Pumps, waiters and timed closers run on their own threads. A
//! [`TaskContext`] captures the caller's tracing dispatcher and current span
//! so that events emitted on those threads land in the same subscriber and
//! under the same span as the launch that created them. The context is
//! installed only for the duration of the wrapped task.

use std::io;
use std::thread::{self, JoinHandle};

use tracing::{dispatcher, Dispatch, Span};

/// Captured tracing context that can be installed on another thread.
#[derive(Clone, Debug)]
pub struct TaskContext {
    dispatch: Dispatch,
    span: Span,
}

impl TaskContext {
    /// Capture the calling thread's dispatcher and current span.
    pub fn capture() -> Self {
        Self {
            dispatch: dispatcher::get_default(|d| d.clone()),
            span: Span::current(),
        }
    }

    /// Capture the dispatcher with an explicit span.
    pub fn with_span(span: Span) -> Self {
        Self {
            dispatch: dispatcher::get_default(|d| d.clone()),
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run `f` with this context installed, removing it afterwards.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> T {
        dispatcher::with_default(&self.dispatch, || self.span.in_scope(f))
    }

    /// Spawn a named thread that runs `f` inside this context.
    pub fn spawn<T, F>(&self, name: impl Into<String>, f: F) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let ctx = self.clone();
        thread::Builder::new()
            .name(name.into())
            .spawn(move || ctx.run(f))
    }
}
