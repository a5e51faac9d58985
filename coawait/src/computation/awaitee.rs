use crate::computation::ResultCell;
use crate::error::Result;
use parking_lot::Mutex;
use std::task::Waker;

/// Outcome of registering a caller on a [`Computation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
    /// The outcome is already there, the caller should consume it right away.
    Ready,

    /// The caller was recorded and will be woken once the outcome is written.
    Suspended,
}

/// State of one invocation of a suspendable function.
///
/// Writers (adapters, direct sinks, the handle's own body) may run on any
/// worker, so the cell and the caller link sit behind a lock. The lock is never
/// held while waking the caller: a wake may resume the caller inline, and the
/// caller will come back here to consume.
pub(crate) struct Computation<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    cell: ResultCell<T>,
    caller: Option<Waker>,
}

impl<T> Computation<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                cell: ResultCell::new(),
                caller: None,
            }),
        }
    }

    pub(crate) fn ready(&self) -> bool {
        self.inner.lock().cell.is_ready()
    }

    #[cfg(test)]
    pub(crate) fn has_value(&self) -> bool {
        self.inner.lock().cell.has_value()
    }

    pub(crate) fn register_caller(&self, waker: &Waker) -> Registration {
        let mut inner = self.inner.lock();
        if inner.cell.is_ready() {
            return Registration::Ready;
        }

        match &inner.caller {
            Some(caller) if caller.will_wake(waker) => {}
            _ => inner.caller = Some(waker.clone()),
        }

        Registration::Suspended
    }

    pub(crate) fn consume(&self) -> Result<T> {
        let mut inner = self.inner.lock();
        inner.caller = None;
        inner.cell.take()
    }

    pub(crate) fn set(&self, outcome: Result<T>) -> Result<()> {
        self.inner.lock().cell.set(outcome)
    }

    /// Wakes the registered caller, if any. The link is cleared so a caller is
    /// woken at most once per registration.
    pub(crate) fn wake_caller(&self) {
        let caller = self.inner.lock().caller.take();
        if let Some(caller) = caller {
            caller.wake();
        }
    }
}
