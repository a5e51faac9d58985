use bitflags::bitflags;
use std::sync::atomic::{AtomicUsize, Ordering};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct Lifecycle: usize {
        /// A resume action is queued or about to run.
        const SCHEDULED = 1;

        /// A worker is polling the entry point.
        const RUNNING = 1 << 1;

        /// Woken while running, the worker must poll again before going idle.
        const NOTIFIED = 1 << 2;

        /// The entry point returned. Wakes are ignored from now on.
        const COMPLETE = 1 << 3;

        /// The last reference was dropped and the cleanup action is queued.
        const RELEASED = 1 << 4;

        /// The entry point was dropped.
        const DESTROYED = 1 << 5;
    }
}

// The reference count lives above the lifecycle bits, in the same word.
const REF_SHIFT: u32 = 6;
const REF_ONE: usize = 1 << REF_SHIFT;
const LIFECYCLE_MASK: usize = REF_ONE - 1;

impl Lifecycle {
    fn is_terminal(self) -> bool {
        self.intersects(Lifecycle::COMPLETE | Lifecycle::RELEASED | Lifecycle::DESTROYED)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot(usize);

impl Snapshot {
    fn lifecycle(self) -> Lifecycle {
        Lifecycle::from_bits_retain(self.0 & LIFECYCLE_MASK)
    }

    fn refs(self) -> usize {
        self.0 >> REF_SHIFT
    }

    fn with(self, lifecycle: Lifecycle) -> Self {
        Snapshot((self.0 & !LIFECYCLE_MASK) | lifecycle.bits())
    }

    fn ref_inc(self) -> Self {
        Snapshot(self.0 + REF_ONE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionToScheduled {
    /// A reference was acquired on behalf of the resume action, which the
    /// caller must hand to the executor.
    Submit,
    DoNothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransitionToIdle {
    Idle,
    Repoll,
}

/// Lifecycle bits plus the explicit reference count of a task unit, packed in
/// one atomic word.
///
/// The reference count is independent from the `Arc` holding the unit in
/// memory: it counts the parties that can still resume the chain (queued
/// resume actions, armed adapters, completion sinks). Reaching zero means the
/// chain can never make progress again and must be torn down. Dropping the
/// last reference sets `RELEASED` in the same transition, so a concurrent
/// wake either acquires its reference first or sees the unit released.
#[derive(Debug)]
pub(crate) struct State {
    val: AtomicUsize,
}

impl State {
    pub(crate) fn new() -> Self {
        Self {
            val: AtomicUsize::new(0),
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot(self.val.load(Ordering::Acquire))
    }

    pub(crate) fn load(&self) -> Lifecycle {
        self.snapshot().lifecycle()
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.snapshot().refs()
    }

    pub(crate) fn ref_inc(&self) {
        let prev = Snapshot(self.val.fetch_add(REF_ONE, Ordering::Relaxed));
        debug_assert!(prev.refs() < (usize::MAX >> REF_SHIFT) / 2, "task ref count overflow");
    }

    /// Returns `true` when this was the last reference. The unit is then
    /// marked `RELEASED`.
    pub(crate) fn ref_dec(&self) -> bool {
        self.fetch_update_action(|curr| {
            debug_assert!(curr.refs() > 0, "task ref count underflow");

            let next = Snapshot(curr.0 - REF_ONE);
            if next.refs() == 0 {
                (true, Some(next.with(next.lifecycle() | Lifecycle::RELEASED)))
            } else {
                (false, Some(next))
            }
        })
    }

    pub(crate) fn transition_to_scheduled(&self) -> TransitionToScheduled {
        self.fetch_update_action(|curr| {
            let lifecycle = curr.lifecycle();
            if lifecycle.is_terminal() || lifecycle.contains(Lifecycle::SCHEDULED) {
                return (TransitionToScheduled::DoNothing, None);
            }

            if lifecycle.contains(Lifecycle::RUNNING) {
                if lifecycle.contains(Lifecycle::NOTIFIED) {
                    return (TransitionToScheduled::DoNothing, None);
                }
                return (
                    TransitionToScheduled::DoNothing,
                    Some(curr.with(lifecycle | Lifecycle::NOTIFIED)),
                );
            }

            (
                TransitionToScheduled::Submit,
                Some(curr.with(lifecycle | Lifecycle::SCHEDULED).ref_inc()),
            )
        })
    }

    /// Returns `false` if the task must not be polled.
    pub(crate) fn transition_to_running(&self) -> bool {
        self.fetch_update_action(|curr| {
            let lifecycle = curr.lifecycle();
            if lifecycle.is_terminal() || !lifecycle.contains(Lifecycle::SCHEDULED) {
                return (false, None);
            }

            let next = lifecycle.difference(Lifecycle::SCHEDULED) | Lifecycle::RUNNING;
            (true, Some(curr.with(next)))
        })
    }

    pub(crate) fn transition_to_idle(&self) -> TransitionToIdle {
        self.fetch_update_action(|curr| {
            let lifecycle = curr.lifecycle();
            debug_assert!(lifecycle.contains(Lifecycle::RUNNING));

            if lifecycle.contains(Lifecycle::NOTIFIED) {
                (
                    TransitionToIdle::Repoll,
                    Some(curr.with(lifecycle.difference(Lifecycle::NOTIFIED))),
                )
            } else {
                (
                    TransitionToIdle::Idle,
                    Some(curr.with(lifecycle.difference(Lifecycle::RUNNING))),
                )
            }
        })
    }

    pub(crate) fn transition_to_complete(&self) {
        let transient = Lifecycle::SCHEDULED | Lifecycle::RUNNING | Lifecycle::NOTIFIED;
        self.fetch_update_action(|curr| {
            let next = (curr.lifecycle() | Lifecycle::COMPLETE).difference(transient);
            ((), Some(curr.with(next)))
        });
    }

    /// Returns `true` only for the first caller.
    pub(crate) fn transition_to_destroyed(&self) -> bool {
        let prev = Snapshot(self.val.fetch_or(Lifecycle::DESTROYED.bits(), Ordering::AcqRel));
        !prev.lifecycle().contains(Lifecycle::DESTROYED)
    }

    fn fetch_update_action<F, T>(&self, mut f: F) -> T
    where
        F: FnMut(Snapshot) -> (T, Option<Snapshot>),
    {
        let mut curr = self.snapshot();

        loop {
            let (output, next) = f(curr);
            let Some(next) = next else {
                return output;
            };

            match self
                .val
                .compare_exchange(curr.0, next.0, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return output,
                Err(actual) => curr = Snapshot(actual),
            }
        }
    }
}
