use crate::runtime::{Action, Executor};
use crate::utils::ScopeGuard;
use parking_lot::Mutex;
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(test)]
use crate::utils::scheduler::{Call, Method, Tracker};

// Address of the `Shared` whose queue the current thread is draining, 0 if none.
thread_local! {
    static DRAINING: Cell<usize> = const { Cell::new(0) };
}

/// A single-threaded, deterministic executor.
///
/// Actions are queued in FIFO order and only run when a thread explicitly
/// drains the queue with [`LocalExecutor::run_one`] or
/// [`LocalExecutor::run_until_idle`]. While draining, that thread counts as
/// running in the executor, so dispatched actions run inline.
///
/// Handles are cheap to clone and can be shared with other threads: any thread
/// may post, and any thread may drain.
#[derive(Clone)]
pub struct LocalExecutor {
    shared: Arc<Shared>,
}

struct Shared {
    queue: Mutex<VecDeque<Action>>,
    work: AtomicUsize,

    #[cfg(test)]
    tracker: Tracker,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                work: AtomicUsize::new(0),
                #[cfg(test)]
                tracker: Tracker::new(),
            }),
        }
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    /// Runs the oldest queued action. Returns `false` if the queue was empty.
    ///
    /// A panic raised by the action propagates to the caller.
    pub fn run_one(&self) -> bool {
        let Some(action) = self.shared.queue.lock().pop_front() else {
            return false;
        };

        let prev = DRAINING.with(|draining| draining.replace(self.addr()));
        let _restore = ScopeGuard::new(move || DRAINING.with(|draining| draining.set(prev)));

        action();
        true
    }

    /// Runs actions until the queue is empty, including the ones queued while
    /// running. Returns how many actions ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Number of queued actions.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Number of live [`WorkGuard`](crate::runtime::WorkGuard)s on this
    /// executor.
    pub fn outstanding_work(&self) -> usize {
        self.shared.work.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn tracker(&self) -> &Tracker {
        &self.shared.tracker
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for LocalExecutor {
    fn post(&self, action: Action) {
        #[cfg(test)]
        self.shared.tracker.record(Method::Post, Call::Post);

        self.shared.queue.lock().push_back(action);
    }

    fn running_in_this_thread(&self) -> bool {
        DRAINING.with(|draining| draining.get() == self.addr())
    }

    fn dispatch(&self, action: Action) {
        let inline = self.running_in_this_thread();

        #[cfg(test)]
        self.shared
            .tracker
            .record(Method::Dispatch, Call::Dispatch { inline });

        if inline {
            action();
        } else {
            self.post(action);
        }
    }

    fn on_work_started(&self) {
        self.shared.work.fetch_add(1, Ordering::AcqRel);
    }

    fn on_work_finished(&self) {
        let prev = self.shared.work.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "work finished more often than started");
    }
}

impl fmt::Debug for LocalExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalExecutor")
            .field("pending", &self.pending())
            .field("outstanding_work", &self.outstanding_work())
            .finish()
    }
}
