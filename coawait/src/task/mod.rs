mod context;
pub use context::AwaitContext;

mod id;
pub use id::Id;

mod state;

mod unit;
pub(crate) use unit::{ScheduleMode, TaskRef, TaskUnit};

mod waker;
