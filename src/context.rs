//! Request-scoped contextual fields.
//!
//! Every thread owns a stack of frames. [`push`] adds a frame and returns a
//! [`ContextGuard`]; dropping the guard removes that frame (and anything
//! pushed above it), so the visible mapping returns to exactly what it was.
//! [`current`] flattens the stack with inner frames shadowing outer ones.
//!
//! Async tasks move between threads, so a task carries its frames in a
//! [`LogContextFuture`] which installs them only while it is being polled.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use crate::record::Fields;

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug)]
struct Frame {
    id: u64,
    fields: Fields,
}

impl Frame {
    fn new(fields: Fields) -> Self {
        Self {
            id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
            fields,
        }
    }
}

/// Handle for one pushed scope. Dropping it restores the previous mapping.
#[must_use = "the scope ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    id: u64,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let id = self.id;
        // A guard dropped on a thread that never saw its frame finds nothing.
        let _ = CONTEXT_STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|frame| frame.id == id) {
                stack.truncate(pos);
            }
        });
    }
}

/// Layer `fields` over the current mapping until the returned guard drops.
///
/// An empty map is allowed and changes nothing visible.
pub fn push(fields: Fields) -> ContextGuard {
    let frame = Frame::new(fields);
    let id = frame.id;
    CONTEXT_STACK.with(|stack| stack.borrow_mut().push(frame));
    ContextGuard { id }
}

/// End the scope opened by `guard`. Same as dropping it.
pub fn pop(guard: ContextGuard) {
    drop(guard);
}

/// Flattened mapping visible on this thread right now.
pub fn current() -> Fields {
    CONTEXT_STACK
        .try_with(|stack| {
            let stack = stack.borrow();
            let mut merged = Fields::new();
            for frame in stack.iter() {
                merged.extend(frame.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            merged
        })
        .unwrap_or_default()
}

/// Run `f` with `fields` layered over the current mapping.
pub fn with_context<R>(fields: Fields, f: impl FnOnce() -> R) -> R {
    let _guard = push(fields);
    f()
}

/// Future that carries its own context frames across polls.
///
/// Frames pushed by the inner future and still alive at a suspension point
/// are lifted off the thread with it and restored on the next poll.
pub struct LogContextFuture<F> {
    inner: Pin<Box<F>>,
    frames: Vec<Frame>,
}

impl<F: Future> Future for LogContextFuture<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let base = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let base = stack.len();
            stack.append(&mut this.frames);
            base
        });

        let result = this.inner.as_mut().poll(cx);

        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let base = base.min(stack.len());
            this.frames = stack.split_off(base);
        });

        result
    }
}

/// Attach log context to a future.
pub trait FutureExt: Future + Sized {
    /// Poll this future with `fields` layered over whatever the polling
    /// thread has in scope.
    fn in_log_context(self, fields: Fields) -> LogContextFuture<Self>;

    /// Capture the caller's current mapping and carry it into this future.
    /// Use before `tokio::spawn`, which does not inherit thread-local state.
    fn in_current_log_context(self) -> LogContextFuture<Self> {
        self.in_log_context(current())
    }
}

impl<F: Future> FutureExt for F {
    fn in_log_context(self, fields: Fields) -> LogContextFuture<Self> {
        LogContextFuture {
            inner: Box::pin(self),
            frames: vec![Frame::new(fields)],
        }
    }
}
