//! Bridges callback-style asynchronous operations and `async` code.
//!
//! A spawned function ([`spawn`]) runs as a *chain* on an [`Executor`]. Inside
//! it, any operation reporting completion through a one-shot callback can be
//! awaited with [`AwaitContext::initiate`], and other chains can be spawned
//! and awaited directly. The chain's outcome is delivered exactly once to the
//! completion token given to `spawn`.
//!
//! ```
//! use coawait::adapter::signature::CodeValue;
//! use coawait::{ErrorCode, LocalExecutor, Result, token};
//!
//! // A callback-style operation.
//! fn async_read(buf: Vec<u8>, done: impl FnOnce(ErrorCode, usize) + Send + 'static) {
//!     done(ErrorCode::SUCCESS, buf.len());
//! }
//!
//! let local = LocalExecutor::new();
//! coawait::spawn(
//!     &local,
//!     |ctx| async move {
//!         let n = ctx
//!             .initiate::<CodeValue<usize>, _>(|adapter| {
//!                 async_read(vec![0; 16], adapter.into_fn())
//!             })
//!             .await?;
//!         Ok::<_, coawait::Error>(n)
//!     },
//!     token::callback(|res: Result<usize>| assert_eq!(res.unwrap(), 16)),
//! );
//! local.run_until_idle();
//! ```

pub mod adapter;

mod computation;
pub use computation::ResultHandle;

mod error;
pub use error::{Error, ErrorCode, Result};

pub mod runtime;
pub use runtime::{Builder, Executor, LocalExecutor, PoolHandle, ThreadPool, WorkGuard};

mod spawn;
pub use spawn::{AsyncResult, CompletionToken, FinalHandler, spawn, spawn_with, token};

pub mod task;
pub use task::AwaitContext;

mod utils;

#[cfg(test)]
mod test_utils;
