use crate::error::{Error, Result};
use crate::runtime::WorkGuard;
use crate::spawn::FinalHandler;
use futures::FutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;

/// Drives a spawned function and reports its outcome exactly once.
///
/// A panic raised by the function before it produced an outcome is reported
/// as [`Error::Panicked`]. Once the outcome is handed to the final handler it
/// is committed: a panic from the handler itself is not reported again and
/// escapes this future, to be re-raised on the worker resuming the chain.
///
/// Dropping this future before it finishes reports [`Error::Abandoned`].
pub(crate) async fn entry_point<T, Fut, H>(body: Fut, reporter: Reporter<T, H>)
where
    Fut: Future<Output = Result<T>> + Send,
    H: FinalHandler<T>,
    T: Send + 'static,
{
    let outcome = match AssertUnwindSafe(body).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(Error::panicked(payload)),
    };

    reporter.report(outcome);
}

/// Owns the final handler of a chain until it has been called.
///
/// The handler runs through `dispatch` on its executor, kept alive by the
/// work guard. A reporter dropped before reporting sends
/// [`Error::Abandoned`] the same way; one dropped after it was handed to the
/// executor, because the executor discarded the action, calls the handler
/// in place.
pub(crate) struct Reporter<T: Send + 'static, H: FinalHandler<T>> {
    handler: Option<H>,
    guard: Option<WorkGuard>,
    dispatched: bool,
    _outcome: PhantomData<fn(T)>,
}

impl<T, H> Reporter<T, H>
where
    T: Send + 'static,
    H: FinalHandler<T>,
{
    pub(crate) fn new(handler: H, guard: WorkGuard) -> Self {
        Self {
            handler: Some(handler),
            guard: Some(guard),
            dispatched: false,
            _outcome: PhantomData,
        }
    }

    fn report(mut self, outcome: Result<T>) {
        let Some(executor) = self.guard.as_ref().map(|guard| guard.executor().clone()) else {
            return;
        };

        self.dispatched = true;
        executor.dispatch(Box::new(move || self.complete(outcome)));
    }

    fn complete(mut self, outcome: Result<T>) {
        // Taken first: a panicking handler must not be called again on drop.
        let handler = self.handler.take();
        let _guard = self.guard.take();
        if let Some(handler) = handler {
            handler.complete(outcome);
        }
    }
}

impl<T: Send + 'static, H: FinalHandler<T>> Drop for Reporter<T, H> {
    fn drop(&mut self) {
        let Some(handler) = self.handler.take() else {
            return;
        };
        let guard = self.guard.take();

        if self.dispatched {
            tracing::debug!("final handler discarded by its executor, reporting abandonment");
            handler.complete(Err(Error::Abandoned));
            drop(guard);
            return;
        }

        tracing::debug!("task destroyed before reporting, reporting abandonment");
        if let Some(guard) = guard {
            let executor = guard.executor().clone();
            let retry = Reporter {
                handler: Some(handler),
                guard: Some(guard),
                dispatched: true,
                _outcome: PhantomData,
            };
            executor.dispatch(Box::new(move || retry.complete(Err(Error::Abandoned))));
        }
    }
}
