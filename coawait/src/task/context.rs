use crate::adapter::{Adapter, Signature};
use crate::computation::ResultHandle;
use crate::error::Result;
use crate::runtime::Executor;
use crate::spawn::{AsyncResult, CompletionToken};
use crate::task::{Id, TaskRef, TaskUnit};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Handed to every spawned function: the link between the chain and the
/// outside world.
///
/// Use it to await callback-style operations ([`AwaitContext::initiate`]), to
/// spawn more chains, or pass `&ctx` as the completion token of a nested spawn
/// to await it directly.
pub struct AwaitContext<E: Executor> {
    unit: Arc<TaskUnit<E>>,
}

impl<E: Executor> Clone for AwaitContext<E> {
    fn clone(&self) -> Self {
        Self {
            unit: self.unit.clone(),
        }
    }
}

impl<E: Executor> AwaitContext<E> {
    pub(crate) fn new(unit: Arc<TaskUnit<E>>) -> Self {
        Self { unit }
    }

    pub fn id(&self) -> Id {
        self.unit.id()
    }

    pub fn executor(&self) -> &E {
        self.unit.executor()
    }

    /// Starts a callback-style operation and returns the handle to await.
    ///
    /// `initiation` receives an [`Adapter`] for the operation's callback shape
    /// `S` and must hand it (or [`Adapter::into_fn`]) to the operation. The
    /// adapter keeps this chain alive until it is invoked or dropped. If the
    /// operation completes before the handle is awaited, awaiting it returns
    /// immediately.
    ///
    /// ```
    /// use coawait::adapter::signature::Value;
    /// use coawait::{token, LocalExecutor};
    ///
    /// let local = LocalExecutor::new();
    /// coawait::spawn(
    ///     &local,
    ///     |ctx| async move {
    ///         let n = ctx.initiate::<Value<u32>, _>(|adapter| adapter.complete((7,))).await?;
    ///         assert_eq!(n, 7);
    ///         Ok::<_, coawait::Error>(n)
    ///     },
    ///     token::Detached,
    /// );
    /// local.run_until_idle();
    /// ```
    pub fn initiate<S, I>(&self, initiation: I) -> ResultHandle<S::Output>
    where
        S: Signature,
        I: FnOnce(Adapter<S, E>),
    {
        let handle = ResultHandle::pending();
        let adapter = Adapter::arm(self.task_ref(), &handle);
        initiation(adapter);
        handle
    }

    pub(crate) fn task_ref(&self) -> TaskRef<E> {
        TaskRef::acquire(&self.unit)
    }
}

impl<E: Executor + Clone> AwaitContext<E> {
    /// Spawns `f` as a new chain on this context's executor.
    pub fn spawn<F, Fut, T, K>(&self, f: F, token: K) -> <K::Result as AsyncResult>::Output
    where
        F: FnOnce(AwaitContext<E>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
        K: CompletionToken<T>,
    {
        crate::spawn::spawn(self.executor(), f, token)
    }
}

impl<E: Executor> fmt::Debug for AwaitContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwaitContext")
            .field("id", &self.unit.id())
            .finish()
    }
}
