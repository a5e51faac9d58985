use crate::runtime::Executor;
use crate::task::{ScheduleMode, TaskUnit};
use std::sync::{Arc, Weak};
use std::task::{Wake, Waker};

/// Caller link stored in computations awaited by a chain.
///
/// Holds the unit weakly: a computation never keeps the chain that awaits it
/// alive, so a chain and its awaited computations cannot form a cycle.
struct TaskWaker<E: Executor> {
    unit: Weak<TaskUnit<E>>,
}

impl<E: Executor> Wake for TaskWaker<E> {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(unit) = self.unit.upgrade() {
            unit.schedule(ScheduleMode::Dispatch);
        }
    }
}

pub(crate) fn waker_for<E: Executor>(unit: &Weak<TaskUnit<E>>) -> Waker {
    Waker::from(Arc::new(TaskWaker { unit: unit.clone() }))
}
