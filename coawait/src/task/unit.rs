use crate::runtime::Executor;
use crate::task::Id;
use crate::task::state::{Lifecycle, State, TransitionToIdle, TransitionToScheduled};
use crate::task::waker::waker_for;
use crate::utils::scheduler::{Call, Method};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

#[cfg(test)]
use crate::utils::scheduler::Tracker;

/// How a resume action reaches the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScheduleMode {
    /// Always queued. Used for the first resumption of a freshly spawned chain.
    Post,

    /// Inline when already on the executor. Used for wakes.
    Dispatch,
}

/// Supervisor of one spawned chain.
///
/// The unit owns the entry-point future, which owns every nested computation
/// of the chain. It is kept in memory by `Arc`s, but its *liveness* is the
/// explicit count maintained by [`TaskRef`]: once nobody can resume the chain
/// anymore, a cleanup action is posted to the executor and drops the future.
pub(crate) struct TaskUnit<E: Executor> {
    id: Id,
    executor: E,
    state: State,
    waker: Waker,
    future: Mutex<Option<BoxFuture<'static, ()>>>,

    /// Panic raised by the entry point after its outcome was committed.
    pending: Mutex<Option<Box<dyn Any + Send>>>,

    #[cfg(test)]
    tracker: Option<Tracker>,
}

impl<E: Executor> TaskUnit<E> {
    pub(crate) fn new(executor: E) -> Arc<Self> {
        #[cfg(test)]
        let tracker = (&executor as &dyn Any)
            .downcast_ref::<crate::runtime::LocalExecutor>()
            .map(|local| local.tracker().clone());

        Arc::new_cyclic(|weak| TaskUnit {
            id: Id::next(),
            executor,
            state: State::new(),
            waker: waker_for(weak),
            future: Mutex::new(None),
            pending: Mutex::new(None),
            #[cfg(test)]
            tracker,
        })
    }

    pub(crate) fn id(&self) -> Id {
        self.id
    }

    pub(crate) fn executor(&self) -> &E {
        &self.executor
    }

    /// Installs the entry point. Must happen before the first resumption.
    pub(crate) fn set_entry(&self, future: BoxFuture<'static, ()>) {
        let prev = self.future.lock().replace(future);
        debug_assert!(prev.is_none(), "entry point installed twice");
        self.track(Method::Spawn, Call::Spawn { id: self.id });
        tracing::trace!(task = %self.id, "spawned");
    }

    pub(crate) fn schedule(self: &Arc<Self>, mode: ScheduleMode) {
        if self.state.transition_to_scheduled() == TransitionToScheduled::DoNothing {
            return;
        }

        self.track(Method::Schedule, Call::Schedule { id: self.id });
        tracing::trace!(task = %self.id, ?mode, "scheduled");

        let task = TaskRef::adopt(self);
        let action = Box::new(move || task.resume());
        match mode {
            ScheduleMode::Post => self.executor.post(action),
            ScheduleMode::Dispatch => self.executor.dispatch(action),
        }
    }

    /// Polls the entry point until it is idle or done. A panic escaping it is
    /// stored as the pending failure.
    fn poll_entry(&self) {
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return;
        };

        let mut cx = Context::from_waker(&self.waker);
        loop {
            match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
                Ok(Poll::Ready(())) => {
                    self.state.transition_to_complete();
                    tracing::trace!(task = %self.id, "complete");
                    return;
                }
                Ok(Poll::Pending) => match self.state.transition_to_idle() {
                    TransitionToIdle::Idle => return,
                    TransitionToIdle::Repoll => continue,
                },
                Err(payload) => {
                    self.state.transition_to_complete();
                    self.set_pending(payload);
                    return;
                }
            }
        }
    }

    fn set_pending(&self, payload: Box<dyn Any + Send>) {
        let mut pending = self.pending.lock();
        if pending.is_none() {
            *pending = Some(payload);
        }
    }

    /// Re-raises the pending failure on the calling worker, if there is one.
    pub(crate) fn rethrow_pending(&self) {
        let payload = self.pending.lock().take();
        if let Some(payload) = payload {
            tracing::trace!(task = %self.id, "rethrowing failure raised after completion");
            resume_unwind(payload);
        }
    }

    fn release(self: &Arc<Self>) {
        self.track(Method::Cleanup, Call::Cleanup { id: self.id });
        tracing::trace!(task = %self.id, "last reference dropped, cleanup posted");

        let cleanup = Cleanup(self.clone());
        self.executor.post(Box::new(move || drop(cleanup)));
    }

    fn destroy(&self) {
        if !self.state.transition_to_destroyed() {
            return;
        }

        // Dropped outside the lock: tearing down the chain may wake other
        // chains, which can then resume inline on this worker.
        let future = self.future.lock().take();
        drop(future);

        self.track(Method::Destroy, Call::Destroy { id: self.id });
        tracing::trace!(task = %self.id, "destroyed");
    }

    #[allow(unused)]
    #[inline(always)]
    pub(crate) fn track(&self, method: Method, call: Call) {
        #[cfg(test)]
        if let Some(tracker) = &self.tracker {
            tracker.record(method, call);
        }
    }
}

impl<E: Executor> fmt::Debug for TaskUnit<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskUnit")
            .field("id", &self.id)
            .field("state", &self.state.load())
            .field("refs", &self.state.ref_count())
            .finish()
    }
}

/// Destroys the unit when dropped: when the cleanup action runs, and also when
/// the executor discards it without running it.
struct Cleanup<E: Executor>(Arc<TaskUnit<E>>);

impl<E: Executor> Drop for Cleanup<E> {
    fn drop(&mut self) {
        self.0.destroy();
    }
}

/// One counted reference to a [`TaskUnit`].
///
/// Every party able to resume the chain holds one: a queued resume action, an
/// armed adapter, the completion sink of a nested spawn. Dropping the last one
/// posts the unit's cleanup action; destruction never happens inline.
pub(crate) struct TaskRef<E: Executor> {
    unit: Arc<TaskUnit<E>>,
}

impl<E: Executor> TaskRef<E> {
    pub(crate) fn acquire(unit: &Arc<TaskUnit<E>>) -> Self {
        debug_assert!(
            !unit.state.load().contains(Lifecycle::RELEASED),
            "task {} acquired after its release",
            unit.id
        );
        unit.state.ref_inc();
        Self { unit: unit.clone() }
    }

    /// Wraps the reference acquired by a successful transition to scheduled.
    fn adopt(unit: &Arc<TaskUnit<E>>) -> Self {
        Self { unit: unit.clone() }
    }

    pub(crate) fn unit(&self) -> &Arc<TaskUnit<E>> {
        &self.unit
    }

    pub(crate) fn id(&self) -> Id {
        self.unit.id
    }

    /// Runs the chain until its next suspension point. Any failure raised by
    /// the chain after it committed its outcome unwinds from here, after this
    /// reference has been released.
    pub(crate) fn resume(self) {
        if !self.unit.state.transition_to_running() {
            return;
        }

        self.unit.track(Method::Resume, Call::Resume { id: self.unit.id });
        tracing::trace!(task = %self.unit.id, "resuming");

        self.unit.poll_entry();
        self.unit.rethrow_pending();
    }
}

impl<E: Executor> Clone for TaskRef<E> {
    fn clone(&self) -> Self {
        TaskRef::acquire(&self.unit)
    }
}

impl<E: Executor> Drop for TaskRef<E> {
    fn drop(&mut self) {
        if self.unit.state.ref_dec() {
            self.unit.release();
        }
    }
}

impl<E: Executor> fmt::Debug for TaskRef<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskRef").field(&self.unit.id).finish()
    }
}
