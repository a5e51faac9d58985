use crate::error::{Error, Result};

/// Storage for the outcome of one computation.
///
/// Readiness is tracked apart from content: once the outcome has been taken
/// the cell stays ready but holds nothing.
#[derive(Debug)]
pub(crate) struct ResultCell<T> {
    ready: bool,
    value: Option<T>,
    failure: Option<Error>,
}

impl<T> ResultCell<T> {
    pub(crate) const fn new() -> Self {
        Self {
            ready: false,
            value: None,
            failure: None,
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready
    }

    #[cfg(test)]
    pub(crate) fn has_value(&self) -> bool {
        self.value.is_some()
    }

    #[cfg(test)]
    pub(crate) fn has_failure(&self) -> bool {
        self.failure.is_some()
    }

    pub(crate) fn set_value(&mut self, value: T) -> Result<()> {
        if self.ready {
            return Err(Error::AlreadyComplete);
        }

        self.value = Some(value);
        self.ready = true;
        Ok(())
    }

    pub(crate) fn set_failure(&mut self, failure: Error) -> Result<()> {
        if self.ready {
            return Err(Error::AlreadyComplete);
        }

        self.failure = Some(failure);
        self.ready = true;
        Ok(())
    }

    pub(crate) fn set(&mut self, outcome: Result<T>) -> Result<()> {
        match outcome {
            Ok(value) => self.set_value(value),
            Err(failure) => self.set_failure(failure),
        }
    }

    /// Moves the outcome out. A recorded failure wins over any value.
    pub(crate) fn take(&mut self) -> Result<T> {
        debug_assert!(self.ready, "outcome taken before the cell was ready");

        if let Some(failure) = self.failure.take() {
            return Err(failure);
        }

        self.value.take().ok_or(Error::AlreadyConsumed)
    }
}

impl<T> Default for ResultCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
