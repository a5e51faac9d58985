use std::fmt;
use std::sync::Arc;

// Public API
mod builder;
pub use builder::Builder;
pub(crate) use builder::RuntimeConfig;

mod local;
pub use local::LocalExecutor;

mod pool;
pub use pool::{PoolHandle, ThreadPool};

/// Unit of work accepted by an [`Executor`].
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// The execution context contract the bridge relies on.
///
/// Implementations only need to provide queueing: the bridge never assumes an
/// executor owns threads, polls futures or performs I/O. Tasks spawned on an
/// executor are driven exclusively through the actions it hands back.
pub trait Executor: Send + Sync + 'static {
    /// Enqueues `action`. It must never run inline, even when called from a
    /// thread currently running this executor.
    fn post(&self, action: Action);

    /// Whether the calling thread is currently running actions for this
    /// executor.
    fn running_in_this_thread(&self) -> bool;

    /// Runs `action` inline when [`Executor::running_in_this_thread`] holds,
    /// otherwise enqueues it like [`Executor::post`].
    fn dispatch(&self, action: Action) {
        if self.running_in_this_thread() {
            action();
        } else {
            self.post(action);
        }
    }

    /// Outstanding work notifications, used by [`WorkGuard`] to keep the
    /// executor from considering itself idle while a task is pending.
    fn on_work_started(&self) {}

    fn on_work_finished(&self) {}
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn post(&self, action: Action) {
        (**self).post(action)
    }

    fn running_in_this_thread(&self) -> bool {
        (**self).running_in_this_thread()
    }

    fn dispatch(&self, action: Action) {
        (**self).dispatch(action)
    }

    fn on_work_started(&self) {
        (**self).on_work_started()
    }

    fn on_work_finished(&self) {
        (**self).on_work_finished()
    }
}

/// Keeps its executor aware of pending work for as long as it lives.
pub struct WorkGuard {
    executor: Arc<dyn Executor>,
}

impl WorkGuard {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        executor.on_work_started();
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        self.executor.on_work_finished();
    }
}

impl fmt::Debug for WorkGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkGuard").finish_non_exhaustive()
    }
}
