use crate::computation::{Computation, Registration};
use crate::error::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

/// The awaitable side of a [`Computation`].
///
/// A handle exclusively owns its computation: adapters and completion sinks
/// only ever hold a [`Weak`] reference to it, so dropping the handle reclaims
/// the computation no matter who was supposed to complete it.
///
/// A handle either wraps the body of a suspendable function, driven inline by
/// polling the handle, or has no body at all and is completed from outside
/// (by an [`Adapter`] or by the entry point of a nested spawn).
///
/// [`Adapter`]: crate::adapter::Adapter
#[must_use = "a ResultHandle does nothing unless awaited"]
pub struct ResultHandle<T> {
    computation: Arc<Computation<T>>,
    body: Option<BoxFuture<'static, Result<T>>>,
}

impl<T: Send + 'static> ResultHandle<T> {
    /// Wraps the invocation of a suspendable function. Awaiting the handle
    /// resumes the body on the awaiting worker, without a scheduler round-trip.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            computation: Arc::new(Computation::new()),
            body: Some(Box::pin(body)),
        }
    }
}

impl<T> ResultHandle<T> {
    /// A bodyless handle, completed by whoever holds [`ResultHandle::downgrade`].
    pub(crate) fn pending() -> Self {
        Self {
            computation: Arc::new(Computation::new()),
            body: None,
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Computation<T>> {
        Arc::downgrade(&self.computation)
    }

    /// Returns `true` once a value or a failure has been written. Awaiting a
    /// ready handle never suspends.
    pub fn is_ready(&self) -> bool {
        self.computation.ready()
    }

    #[cfg(test)]
    pub(crate) fn has_value(&self) -> bool {
        self.computation.has_value()
    }
}

impl<T> Future for ResultHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if let Some(body) = this.body.as_mut() {
            let outcome = match body.as_mut().poll(cx) {
                Poll::Ready(outcome) => outcome,
                Poll::Pending => return Poll::Pending,
            };

            this.body = None;
            if let Err(err) = this.computation.set(outcome) {
                return Poll::Ready(Err(err));
            }
        }

        match this.computation.register_caller(cx.waker()) {
            Registration::Ready => Poll::Ready(this.computation.consume()),
            Registration::Suspended => Poll::Pending,
        }
    }
}

impl<T> Drop for ResultHandle<T> {
    fn drop(&mut self) {
        if self.body.is_some() {
            tracing::warn!("result handle dropped while its body was still pending");
        }
    }
}

impl<T> fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("ready", &self.is_ready())
            .field("has_body", &self.body.is_some())
            .finish()
    }
}
