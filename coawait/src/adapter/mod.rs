//! Adapters turn a one-shot completion callback into the resumption of the
//! chain awaiting it.

pub mod signature;
pub use signature::Signature;
use signature::{Code, CodeValue, Failure, FailureValue, NoArgs, Value};

use crate::computation::{Computation, ResultHandle};
use crate::error::ErrorCode;
use crate::runtime::Executor;
use crate::task::TaskRef;
use crate::utils::scheduler::{Call, Method};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Weak;

/// Completion callback for one operation initiated through
/// [`AwaitContext::initiate`](crate::task::AwaitContext::initiate).
///
/// Holds a counted reference to the awaiting chain, so the chain outlives the
/// operation. Invoking it writes the outcome into the awaited handle and
/// resumes the chain; dropping it uninvoked only releases the reference.
#[must_use = "dropping an adapter abandons the operation's outcome"]
pub struct Adapter<S: Signature, E: Executor> {
    task: Option<TaskRef<E>>,
    target: Weak<Computation<S::Output>>,
    _signature: PhantomData<fn(S)>,
}

impl<S: Signature, E: Executor> Adapter<S, E> {
    pub(crate) fn arm(task: TaskRef<E>, handle: &ResultHandle<S::Output>) -> Self {
        task.unit()
            .track(Method::AdapterArmed, Call::AdapterArmed { id: task.id() });

        Self {
            task: Some(task),
            target: handle.downgrade(),
            _signature: PhantomData,
        }
    }

    /// Delivers the operation's outcome. May run on any thread.
    ///
    /// If the chain raised a failure after committing its own outcome while
    /// being resumed from here, that failure unwinds out of this call.
    pub fn complete(mut self, args: S::Args) {
        // Released when this call returns, or while unwinding.
        let task = self.task.take();
        let outcome = S::into_outcome(args);

        if let Some(task) = &task {
            task.unit()
                .track(Method::AdapterInvoked, Call::AdapterInvoked { id: task.id() });
        }

        match self.target.upgrade() {
            Some(computation) => {
                if let Err(err) = computation.set(outcome) {
                    tracing::error!(%err, "adapter invoked on a completed computation");
                }
                computation.wake_caller();
            }
            None => tracing::debug!("awaiting handle dropped before its operation completed"),
        }

        if let Some(task) = &task {
            task.unit().rethrow_pending();
        }
    }
}

impl<E: Executor> Adapter<NoArgs, E> {
    pub fn into_fn(self) -> impl FnOnce() + Send + 'static {
        move || self.complete(())
    }
}

impl<E: Executor> Adapter<Code, E> {
    pub fn into_fn(self) -> impl FnOnce(ErrorCode) + Send + 'static {
        move |code| self.complete((code,))
    }
}

impl<T: Send + 'static, E: Executor> Adapter<CodeValue<T>, E> {
    pub fn into_fn(self) -> impl FnOnce(ErrorCode, T) + Send + 'static {
        move |code, value| self.complete((code, value))
    }
}

impl<E: Executor> Adapter<Failure, E> {
    pub fn into_fn(self) -> impl FnOnce(Option<anyhow::Error>) + Send + 'static {
        move |failure| self.complete((failure,))
    }
}

impl<T: Send + 'static, E: Executor> Adapter<FailureValue<T>, E> {
    pub fn into_fn(self) -> impl FnOnce(Option<anyhow::Error>, T) + Send + 'static {
        move |failure, value| self.complete((failure, value))
    }
}

impl<T: Send + 'static, E: Executor> Adapter<Value<T>, E> {
    pub fn into_fn(self) -> impl FnOnce(T) + Send + 'static {
        move |value| self.complete((value,))
    }
}

impl<S: Signature, E: Executor> Drop for Adapter<S, E> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::debug!(task = %task.id(), "adapter dropped without being invoked");
        }
    }
}

impl<S: Signature, E: Executor> fmt::Debug for Adapter<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("task", &self.task)
            .field("signature", &std::any::type_name::<S>())
            .finish()
    }
}
