//! Completion tokens: how a spawned chain reports its outcome, and what
//! [`spawn`](crate::spawn()) hands back to its caller.

use crate::computation::{Computation, ResultHandle};
use crate::error::{Error, Result};
use crate::runtime::Executor;
use crate::task::{AwaitContext, TaskRef};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::{Arc, Weak};

/// Receives the outcome of a spawned chain, exactly once.
///
/// A chain torn down before it reported, for instance because the operation
/// it awaited dropped its callback, reports [`Error::Abandoned`].
pub trait FinalHandler<T>: Send + 'static {
    /// Executor the handler must run on. `None` means the spawn executor.
    fn executor(&self) -> Option<Arc<dyn Executor>> {
        None
    }

    fn complete(self, outcome: Result<T>);
}

/// The value returned by `spawn` once the chain has been started.
pub trait AsyncResult {
    type Output;

    fn get(self) -> Self::Output;
}

impl AsyncResult for () {
    type Output = ();

    fn get(self) {}
}

impl<T> AsyncResult for ResultHandle<T> {
    type Output = ResultHandle<T>;

    fn get(self) -> Self {
        self
    }
}

/// Splits into the handler given to the chain and the value given back to the
/// spawning caller.
pub trait CompletionToken<T>: Sized {
    type Handler: FinalHandler<T>;
    type Result: AsyncResult;

    fn into_parts(self) -> (Self::Handler, Self::Result);
}

/// Calls `f` with the outcome.
pub fn callback<T, F>(f: F) -> Callback<F>
where
    F: FnOnce(Result<T>) + Send + 'static,
{
    Callback(f)
}

pub struct Callback<F>(F);

impl<T, F> CompletionToken<T> for Callback<F>
where
    F: FnOnce(Result<T>) + Send + 'static,
{
    type Handler = Self;
    type Result = ();

    fn into_parts(self) -> (Self, ()) {
        (self, ())
    }
}

impl<T, F> FinalHandler<T> for Callback<F>
where
    F: FnOnce(Result<T>) + Send + 'static,
{
    fn complete(self, outcome: Result<T>) {
        (self.0)(outcome)
    }
}

/// Calls `f(failure, value)`. On failure `value` is `T::default()`.
pub fn handler<T, F>(f: F) -> ErrorFirst<F>
where
    T: Default,
    F: FnOnce(Option<Error>, T) + Send + 'static,
{
    ErrorFirst(f)
}

pub struct ErrorFirst<F>(F);

impl<T, F> CompletionToken<T> for ErrorFirst<F>
where
    T: Default,
    F: FnOnce(Option<Error>, T) + Send + 'static,
{
    type Handler = Self;
    type Result = ();

    fn into_parts(self) -> (Self, ()) {
        (self, ())
    }
}

impl<T, F> FinalHandler<T> for ErrorFirst<F>
where
    T: Default,
    F: FnOnce(Option<Error>, T) + Send + 'static,
{
    fn complete(self, outcome: Result<T>) {
        match outcome {
            Ok(value) => (self.0)(None, value),
            Err(err) => (self.0)(Some(err), T::default()),
        }
    }
}

/// Runs the handler of `token` on `executor` instead of the spawn executor.
pub fn bind<X: Executor, K>(executor: X, token: K) -> Bound<K> {
    Bound {
        executor: Arc::new(executor),
        token,
    }
}

pub struct Bound<K> {
    executor: Arc<dyn Executor>,
    token: K,
}

impl<T, K: CompletionToken<T>> CompletionToken<T> for Bound<K> {
    type Handler = BoundHandler<K::Handler>;
    type Result = K::Result;

    fn into_parts(self) -> (Self::Handler, Self::Result) {
        let (inner, result) = self.token.into_parts();
        let handler = BoundHandler {
            executor: self.executor,
            inner,
        };
        (handler, result)
    }
}

pub struct BoundHandler<H> {
    executor: Arc<dyn Executor>,
    inner: H,
}

impl<T, H: FinalHandler<T>> FinalHandler<T> for BoundHandler<H> {
    fn executor(&self) -> Option<Arc<dyn Executor>> {
        Some(self.executor.clone())
    }

    fn complete(self, outcome: Result<T>) {
        self.inner.complete(outcome)
    }
}

/// Fire and forget. Failures are logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Detached;

impl<T> CompletionToken<T> for Detached {
    type Handler = Self;
    type Result = ();

    fn into_parts(self) -> (Self, ()) {
        (self, ())
    }
}

impl<T> FinalHandler<T> for Detached {
    fn complete(self, outcome: Result<T>) {
        if let Err(err) = outcome {
            tracing::warn!(%err, "detached task failed");
        }
    }
}

/// Blocks the spawning thread until the chain reports.
///
/// The chain must be driven by other threads: blocking the only thread that
/// runs the executor never returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blocking;

struct Slot<T> {
    outcome: Mutex<Option<Result<T>>>,
    filled: Condvar,
}

impl<T> Slot<T> {
    fn fill(&self, outcome: Result<T>) {
        *self.outcome.lock() = Some(outcome);
        self.filled.notify_all();
    }
}

impl<T: Send + 'static> CompletionToken<T> for Blocking {
    type Handler = BlockingHandler<T>;
    type Result = BlockingResult<T>;

    fn into_parts(self) -> (Self::Handler, Self::Result) {
        let slot = Arc::new(Slot {
            outcome: Mutex::new(None),
            filled: Condvar::new(),
        });

        (
            BlockingHandler { slot: slot.clone() },
            BlockingResult { slot },
        )
    }
}

pub struct BlockingHandler<T> {
    slot: Arc<Slot<T>>,
}

impl<T: Send + 'static> FinalHandler<T> for BlockingHandler<T> {
    fn complete(self, outcome: Result<T>) {
        self.slot.fill(outcome);
    }
}

pub struct BlockingResult<T> {
    slot: Arc<Slot<T>>,
}

impl<T> AsyncResult for BlockingResult<T> {
    type Output = Result<T>;

    fn get(self) -> Result<T> {
        let mut guard = self.slot.outcome.lock();
        loop {
            if let Some(outcome) = guard.take() {
                return outcome;
            }
            self.slot.filled.wait(&mut guard);
        }
    }
}

/// Passing the context of a chain as token makes `spawn` return a handle that
/// chain can await. The spawned chain writes its outcome straight into that
/// handle and wakes the awaiting chain, without going through an adapter.
impl<T: Send + 'static, E: Executor> CompletionToken<T> for &AwaitContext<E> {
    type Handler = DirectSink<T, E>;
    type Result = ResultHandle<T>;

    fn into_parts(self) -> (Self::Handler, Self::Result) {
        let handle = ResultHandle::pending();
        let sink = DirectSink {
            target: handle.downgrade(),
            parent: self.task_ref(),
        };
        (sink, handle)
    }
}

/// Completes the handle awaited by the parent chain. Holds a reference to the
/// parent so it stays alive while the child runs.
pub struct DirectSink<T, E: Executor> {
    target: Weak<Computation<T>>,
    parent: TaskRef<E>,
}

impl<T: Send + 'static, E: Executor> FinalHandler<T> for DirectSink<T, E> {
    fn complete(self, outcome: Result<T>) {
        let DirectSink { target, parent } = self;
        if let Some(computation) = target.upgrade()
            && computation.set(outcome).is_ok()
        {
            computation.wake_caller();
        }
        drop(parent);
    }
}

impl<T, E: Executor> fmt::Debug for DirectSink<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectSink")
            .field("parent", &self.parent)
            .finish()
    }
}
