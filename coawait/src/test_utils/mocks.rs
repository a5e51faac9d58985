use crate::error::ErrorCode;
use crate::runtime::Executor;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Wake, Waker};

#[derive(Debug, Default)]
pub(crate) struct WakeCount(AtomicUsize);

impl WakeCount {
    pub(crate) fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl Wake for WakeCount {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn counting_waker() -> (Waker, Arc<WakeCount>) {
    let count = Arc::new(WakeCount::default());
    (Waker::from(count.clone()), count)
}

type Completion = Box<dyn FnOnce() + Send + 'static>;

/// Stand-in for an external service with callback-based operations.
///
/// Operations never complete on their own: the test decides when, and on
/// which executor, each pending completion fires.
#[derive(Clone, Default)]
pub(crate) struct FakeService {
    pending: Arc<Mutex<VecDeque<Completion>>>,
}

impl FakeService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn push(&self, completion: impl FnOnce() + Send + 'static) {
        self.pending.lock().push_back(Box::new(completion));
    }

    pub(crate) fn async_ping(&self, done: impl FnOnce() + Send + 'static) {
        self.push(done);
    }

    pub(crate) fn async_wait(
        &self,
        code: ErrorCode,
        done: impl FnOnce(ErrorCode) + Send + 'static,
    ) {
        self.push(move || done(code));
    }

    pub(crate) fn async_read(
        &self,
        code: ErrorCode,
        len: usize,
        done: impl FnOnce(ErrorCode, usize) + Send + 'static,
    ) {
        self.push(move || done(code, len));
    }

    pub(crate) fn async_check(
        &self,
        failure: Option<anyhow::Error>,
        done: impl FnOnce(Option<anyhow::Error>) + Send + 'static,
    ) {
        self.push(move || done(failure));
    }

    pub(crate) fn async_fetch<T: Send + 'static>(
        &self,
        failure: Option<anyhow::Error>,
        value: T,
        done: impl FnOnce(Option<anyhow::Error>, T) + Send + 'static,
    ) {
        self.push(move || done(failure, value));
    }

    pub(crate) fn async_value<T: Send + 'static>(
        &self,
        value: T,
        done: impl FnOnce(T) + Send + 'static,
    ) {
        self.push(move || done(value));
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fires the oldest pending completion on the calling thread.
    pub(crate) fn complete_next(&self) -> bool {
        let completion = self.pending.lock().pop_front();
        match completion {
            Some(completion) => {
                completion();
                true
            }
            None => false,
        }
    }

    /// Posts the oldest pending completion onto `executor`.
    pub(crate) fn complete_next_on(&self, executor: &impl Executor) -> bool {
        let completion = self.pending.lock().pop_front();
        match completion {
            Some(completion) => {
                executor.post(completion);
                true
            }
            None => false,
        }
    }

    /// Drops every pending completion without firing it.
    pub(crate) fn abandon_all(&self) {
        let abandoned = std::mem::take(&mut *self.pending.lock());
        drop(abandoned);
    }
}
