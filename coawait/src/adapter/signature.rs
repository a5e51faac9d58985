//! Completion-callback shapes understood by [`AwaitContext::initiate`].
//!
//! Each marker describes the arguments an operation passes to its callback and
//! how they translate into the outcome of the awaited handle.
//!
//! [`AwaitContext::initiate`]: crate::task::AwaitContext::initiate

use crate::error::{Error, ErrorCode, Result};
use std::marker::PhantomData;

pub trait Signature: 'static {
    /// Callback arguments, as a tuple.
    type Args: Send;

    /// Value produced by the awaited handle.
    type Output: Send + 'static;

    fn into_outcome(args: Self::Args) -> Result<Self::Output>;
}

/// `FnOnce()`
#[derive(Debug)]
pub struct NoArgs;

/// `FnOnce(ErrorCode)`
#[derive(Debug)]
pub struct Code;

/// `FnOnce(ErrorCode, T)`
#[derive(Debug)]
pub struct CodeValue<T>(PhantomData<fn() -> T>);

/// `FnOnce(Option<anyhow::Error>)`
#[derive(Debug)]
pub struct Failure;

/// `FnOnce(Option<anyhow::Error>, T)`
#[derive(Debug)]
pub struct FailureValue<T>(PhantomData<fn() -> T>);

/// `FnOnce(T)`
#[derive(Debug)]
pub struct Value<T>(PhantomData<fn() -> T>);

fn check(code: ErrorCode) -> Result<()> {
    if code.is_err() {
        return Err(Error::System(code.into_io_error()));
    }
    Ok(())
}

fn check_failure(failure: Option<anyhow::Error>) -> Result<()> {
    match failure {
        Some(err) => Err(Error::Failed(err)),
        None => Ok(()),
    }
}

impl Signature for NoArgs {
    type Args = ();
    type Output = ();

    fn into_outcome(_: ()) -> Result<()> {
        Ok(())
    }
}

impl Signature for Code {
    type Args = (ErrorCode,);
    type Output = ();

    fn into_outcome((code,): (ErrorCode,)) -> Result<()> {
        check(code)
    }
}

impl<T: Send + 'static> Signature for CodeValue<T> {
    type Args = (ErrorCode, T);
    type Output = T;

    // The value is discarded when the code reports a failure.
    fn into_outcome((code, value): (ErrorCode, T)) -> Result<T> {
        check(code).map(|()| value)
    }
}

impl Signature for Failure {
    type Args = (Option<anyhow::Error>,);
    type Output = ();

    fn into_outcome((failure,): (Option<anyhow::Error>,)) -> Result<()> {
        check_failure(failure)
    }
}

impl<T: Send + 'static> Signature for FailureValue<T> {
    type Args = (Option<anyhow::Error>, T);
    type Output = T;

    fn into_outcome((failure, value): (Option<anyhow::Error>, T)) -> Result<T> {
        check_failure(failure).map(|()| value)
    }
}

impl<T: Send + 'static> Signature for Value<T> {
    type Args = (T,);
    type Output = T;

    fn into_outcome((value,): (T,)) -> Result<T> {
        Ok(value)
    }
}
