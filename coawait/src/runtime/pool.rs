use crate::runtime::{Action, Executor, RuntimeConfig};
use crate::utils::ScopeGuard;
use anyhow::{Result, anyhow};
use crossbeam_deque::{Injector, Steal, Stealer, Worker as CbWorker};
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::iter;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Upper bound on how long a parked worker sleeps without a notification.
const PARK_TIMEOUT: Duration = Duration::from_millis(100);

thread_local! {
    static WORKER: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

/// Per-thread state of a pool worker.
struct WorkerContext {
    /// Address of the owning pool's `Shared`.
    pool: usize,
    index: usize,
    local: CbWorker<Action>,
    stealers: Vec<Stealer<Action>>,
}

/// A fixed set of worker threads running posted actions.
///
/// Actions posted from outside the pool go to a global injector queue; actions
/// posted by a worker go to that worker's local queue, from which idle workers
/// steal. [`PoolHandle::post_to`] bypasses both and targets one worker.
///
/// Dropping the pool shuts it down: workers finish the action they are running
/// and exit, queued actions are dropped.
#[derive(Debug)]
pub struct ThreadPool {
    handle: PoolHandle,
}

/// Cloneable handle to a [`ThreadPool`], implementing [`Executor`].
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

struct Shared {
    cfg: RuntimeConfig,

    injector: Injector<Action>,

    /// Targeted actions, one queue per worker.
    mailboxes: Vec<Mutex<VecDeque<Action>>>,

    /// Actions sitting in the injector or in a local queue.
    queued: AtomicUsize,

    sleep: Mutex<()>,
    wakeup: Condvar,

    shutdown: AtomicBool,

    /// Live work guards.
    work: Mutex<usize>,
    idle: Condvar,

    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// Counts workers that installed their worker context.
struct StartLatch {
    ready: Mutex<usize>,
    cond: Condvar,
}

impl StartLatch {
    fn new() -> Self {
        Self {
            ready: Mutex::new(0),
            cond: Condvar::new(),
        }
    }

    fn count_down(&self) {
        *self.ready.lock() += 1;
        self.cond.notify_all();
    }

    fn wait_for(&self, workers: usize) {
        let mut ready = self.ready.lock();
        while *ready < workers {
            self.cond.wait(&mut ready);
        }
    }
}

impl ThreadPool {
    pub(crate) fn start(cfg: RuntimeConfig) -> Result<ThreadPool> {
        Self::start_with(cfg, spawn_worker_thread)
    }

    fn start_with<S>(cfg: RuntimeConfig, mut spawn: S) -> Result<ThreadPool>
    where
        S: FnMut(Arc<Shared>, WorkerContext, Arc<StartLatch>) -> Result<thread::JoinHandle<()>>,
    {
        let num_workers = cfg.worker_threads;

        let mut local_queues = Vec::with_capacity(num_workers);
        let mut stealers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let w = CbWorker::new_fifo();
            stealers.push(w.stealer());
            local_queues.push(w);
        }

        let shared = Arc::new(Shared {
            injector: Injector::new(),
            mailboxes: (0..num_workers).map(|_| Mutex::new(VecDeque::new())).collect(),
            queued: AtomicUsize::new(0),
            sleep: Mutex::new(()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            work: Mutex::new(0),
            idle: Condvar::new(),
            handles: Mutex::new(Vec::with_capacity(num_workers)),
            cfg,
        });

        let latch = Arc::new(StartLatch::new());
        for (index, local) in local_queues.into_iter().enumerate() {
            // Each worker gets the stealers of every *other* worker, shuffled so
            // that idle workers do not all hammer the same victim.
            let mut others = stealers
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != index)
                .map(|(_, s)| s.clone())
                .collect::<Vec<_>>();
            fastrand::shuffle(&mut others);

            let ctx = WorkerContext {
                pool: Arc::as_ptr(&shared) as usize,
                index,
                local,
                stealers: others,
            };

            match spawn(shared.clone(), ctx, latch.clone()) {
                Ok(handle) => shared.handles.lock().push(handle),
                Err(err) => {
                    // Workers already started see the shutdown flag and exit.
                    if let Err(join_err) = shared.shutdown_inner() {
                        tracing::error!(%join_err, "error stopping partially started pool");
                    }
                    return Err(err.context(format!("failed to start worker {index}")));
                }
            }
        }

        // Spawning threads is async, wait for all of them to be started.
        latch.wait_for(num_workers);

        tracing::debug!(workers = num_workers, "thread pool started");
        Ok(ThreadPool {
            handle: PoolHandle { shared },
        })
    }

    pub fn handle(&self) -> &PoolHandle {
        &self.handle
    }

    pub fn worker_threads(&self) -> usize {
        self.handle.shared.cfg.worker_threads
    }

    /// Stops the workers and waits for them to exit.
    ///
    /// Returns an error if any worker thread panicked, which is how a failure
    /// raised by a chain after it reported its outcome surfaces.
    pub fn shutdown(self) -> Result<()> {
        self.handle.shared.shutdown_inner()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Err(err) = self.handle.shared.shutdown_inner() {
            tracing::error!(%err, "error during thread pool shutdown");
        }
    }
}

impl PoolHandle {
    /// Queues `action` on worker `worker` specifically. It will not be stolen.
    #[track_caller]
    pub fn post_to(&self, worker: usize, action: Action) {
        let mailbox = self
            .shared
            .mailboxes
            .get(worker)
            .unwrap_or_else(|| panic!("no worker with index {worker}"));

        mailbox.lock().push_back(action);

        let _guard = self.shared.sleep.lock();
        self.shared.wakeup.notify_all();
    }

    /// Index of the pool worker running on the calling thread.
    pub fn current_worker(&self) -> Option<usize> {
        let pool = self.addr();
        WORKER.with(|worker| {
            worker
                .borrow()
                .as_ref()
                .filter(|ctx| ctx.pool == pool)
                .map(|ctx| ctx.index)
        })
    }

    /// Blocks until no [`WorkGuard`](crate::runtime::WorkGuard) is left on
    /// this pool.
    pub fn wait_idle(&self) {
        let mut work = self.shared.work.lock();
        while *work > 0 {
            self.shared.idle.wait(&mut work);
        }
    }

    /// Like [`PoolHandle::wait_idle`], giving up after `timeout`. Returns
    /// whether the pool went idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut work = self.shared.work.lock();
        while *work > 0 {
            if self.shared.idle.wait_until(&mut work, deadline).timed_out() {
                return *work == 0;
            }
        }
        true
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }
}

impl Executor for PoolHandle {
    fn post(&self, action: Action) {
        let pool = self.addr();
        self.shared.queued.fetch_add(1, Ordering::AcqRel);

        let rejected = WORKER.with(move |worker| match worker.borrow().as_ref() {
            Some(ctx) if ctx.pool == pool => {
                ctx.local.push(action);
                None
            }
            _ => Some(action),
        });

        if let Some(action) = rejected {
            self.shared.injector.push(action);
        }

        let _guard = self.shared.sleep.lock();
        self.shared.wakeup.notify_one();
    }

    fn running_in_this_thread(&self) -> bool {
        self.current_worker().is_some()
    }

    fn on_work_started(&self) {
        *self.shared.work.lock() += 1;
    }

    fn on_work_finished(&self) {
        let mut work = self.shared.work.lock();
        debug_assert!(*work > 0, "work finished more often than started");
        *work = work.saturating_sub(1);
        if *work == 0 {
            self.shared.idle.notify_all();
        }
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("workers", &self.shared.cfg.worker_threads)
            .field("queued", &self.shared.queued.load(Ordering::Relaxed))
            .finish()
    }
}

impl Shared {
    fn event_loop(&self, index: usize) {
        loop {
            let action = WORKER.with(|worker| {
                worker
                    .borrow()
                    .as_ref()
                    .and_then(|ctx| self.find_task(ctx))
            });

            match action {
                Some(action) => action(),
                None if self.shutdown.load(Ordering::Acquire) => return,
                None => self.park(index),
            }
        }
    }

    fn find_task(&self, ctx: &WorkerContext) -> Option<Action> {
        // 1. Targeted work first, it cannot run anywhere else.
        if let Some(action) = self.mailboxes[ctx.index].lock().pop_front() {
            return Some(action);
        }

        // 2. Local queue, then the injector and the other workers.
        let action = ctx.local.pop().or_else(|| {
            iter::repeat_with(|| {
                self.injector
                    .steal_batch_and_pop(&ctx.local)
                    .or_else(|| ctx.stealers.iter().map(Stealer::steal).collect::<Steal<_>>())
            })
            .take(self.cfg.max_steal_retries)
            .find(|s| !s.is_retry())
            .and_then(|s| s.success())
        });

        if action.is_some() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
        }
        action
    }

    fn has_work_for(&self, index: usize) -> bool {
        self.queued.load(Ordering::Acquire) > 0 || !self.mailboxes[index].lock().is_empty()
    }

    fn park(&self, index: usize) {
        let mut guard = self.sleep.lock();
        if !self.has_work_for(index) && !self.shutdown.load(Ordering::Acquire) {
            self.wakeup.wait_for(&mut guard, PARK_TIMEOUT);
        }
    }

    fn shutdown_inner(&self) -> Result<()> {
        if WORKER.with(|worker| {
            worker
                .borrow()
                .as_ref()
                .is_some_and(|ctx| ctx.pool == self as *const Shared as usize)
        }) {
            return Err(anyhow!("a thread pool cannot be shut down from one of its workers"));
        }

        self.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.sleep.lock();
            self.wakeup.notify_all();
        }

        let result = self.join_all();
        self.drain();
        result
    }

    fn join_all(&self) -> Result<()> {
        let handles = std::mem::take(&mut *self.handles.lock());

        let panicked = handles
            .into_iter()
            .filter_map(|handle| handle.join().err())
            .count();

        if panicked == 0 {
            Ok(())
        } else {
            Err(anyhow!("{} thread(s) panicked", panicked))
        }
    }

    // Dropping a queued action can release the last reference of a task, which
    // posts its cleanup action back here.
    fn drain(&self) {
        loop {
            let mut dropped = 0;
            while let Some(action) = self.injector.steal().success() {
                drop(action);
                dropped += 1;
            }
            for mailbox in &self.mailboxes {
                let actions = std::mem::take(&mut *mailbox.lock());
                dropped += actions.len();
                drop(actions);
            }
            if dropped == 0 {
                break;
            }
        }
        self.queued.store(0, Ordering::Release);
    }
}

fn spawn_worker_thread(
    shared: Arc<Shared>,
    ctx: WorkerContext,
    latch: Arc<StartLatch>,
) -> Result<thread::JoinHandle<()>> {
    let mut builder = thread::Builder::new().name((shared.cfg.thread_name.0)());

    if let Some(stack_size) = shared.cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    let handle = builder.spawn(move || {
        let index = ctx.index;
        WORKER.with(|worker| *worker.borrow_mut() = Some(ctx));
        latch.count_down();

        // Runs on exit and while unwinding. Dropping what is left in the local
        // queue can post cleanup actions, which needs the context cleared but
        // the thread-local still alive.
        let _teardown = ScopeGuard::new(|| {
            let ctx = WORKER.with(|worker| worker.borrow_mut().take());
            drop(ctx);
        });

        let mut unwinding = ScopeGuard::new(|| {
            tracing::error!(worker = index, "worker thread unwinding from a task failure");
        });
        shared.event_loop(index);
        unwinding.disarm();
    })?;

    Ok(handle)
}
