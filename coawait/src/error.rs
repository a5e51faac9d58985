use std::any::Any;
use std::{fmt, io};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors observed by awaiting code, final handlers and blocking waiters.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An operation reported a non-zero [`ErrorCode`].
    #[error("operation failed: {0}")]
    System(#[from] io::Error),

    /// An operation reported a typed failure, or the awaiting function failed
    /// on its own.
    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// The spawned function panicked before producing a value.
    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("computation already holds an outcome")]
    AlreadyComplete,

    #[error("computation outcome already consumed")]
    AlreadyConsumed,

    /// The chain that owed this outcome was torn down without reporting.
    #[error("task was destroyed before reporting an outcome")]
    Abandoned,
}

impl Error {
    pub(crate) fn panicked(payload: Box<dyn Any + Send>) -> Self {
        Error::Panicked(panic_message(payload.as_ref()))
    }

    /// The raw OS error carried by a [`Error::System`] failure.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::System(err) => err.raw_os_error(),
            _ => None,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, Error::Panicked(_))
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Status reported by callback-style operations. Zero means success, any other
/// value is interpreted as a raw OS error number.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ErrorCode(i32);

impl ErrorCode {
    pub const SUCCESS: ErrorCode = ErrorCode(0);

    pub const fn from_raw(code: i32) -> Self {
        ErrorCode(code)
    }

    pub const fn raw(&self) -> i32 {
        self.0
    }

    pub const fn is_err(&self) -> bool {
        self.0 != 0
    }

    pub fn into_io_error(self) -> io::Error {
        io::Error::from_raw_os_error(self.0)
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        ErrorCode(code)
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_err() {
            write!(f, "ErrorCode({}: {})", self.0, self.into_io_error())
        } else {
            f.write_str("ErrorCode(success)")
        }
    }
}
