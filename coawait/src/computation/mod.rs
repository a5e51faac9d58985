mod awaitee;
pub(crate) use awaitee::{Computation, Registration};

mod cell;
pub(crate) use cell::ResultCell;

mod handle;
pub use handle::ResultHandle;
