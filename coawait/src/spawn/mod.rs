use crate::error::Result;
use crate::runtime::{Executor, WorkGuard};
use crate::task::{AwaitContext, ScheduleMode, TaskUnit};
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;

mod entry;
use entry::{Reporter, entry_point};

pub mod token;
pub use token::{AsyncResult, CompletionToken, FinalHandler};

/// Spawns `f` as a new chain on `executor` and reports its outcome through
/// `token`.
///
/// The first resumption is always posted, so `f` never starts running inside
/// this call. What `spawn` returns depends on the token: nothing for callback
/// tokens, the outcome itself for [`token::Blocking`], or a
/// [`ResultHandle`](crate::ResultHandle) to await when the token is the
/// [`AwaitContext`] of another chain.
pub fn spawn<E, F, Fut, T, K>(executor: &E, f: F, token: K) -> <K::Result as AsyncResult>::Output
where
    E: Executor + Clone,
    F: FnOnce(AwaitContext<E>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
    K: CompletionToken<T>,
{
    spawn_with(executor, move |(), ctx| f(ctx), (), token)
}

/// Like [`spawn`], with leading arguments moved into the chain.
pub fn spawn_with<E, A, F, Fut, T, K>(
    executor: &E,
    f: F,
    args: A,
    token: K,
) -> <K::Result as AsyncResult>::Output
where
    E: Executor + Clone,
    A: Send + 'static,
    F: FnOnce(A, AwaitContext<E>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
    K: CompletionToken<T>,
{
    let (handler, result) = token.into_parts();

    let handler_executor = handler
        .executor()
        .unwrap_or_else(|| Arc::new(executor.clone()) as Arc<dyn Executor>);
    let guard = WorkGuard::new(handler_executor);

    let unit = TaskUnit::new(executor.clone());
    let ctx = AwaitContext::new(unit.clone());

    // `f` itself runs on the first resumption, not here.
    let body = async move { f(args, ctx).await };
    unit.set_entry(entry_point(body, Reporter::new(handler, guard)).boxed());
    unit.schedule(ScheduleMode::Post);

    result.get()
}

#[cfg(test)]
mod tests;
