//! Result type definition and extension traits for store outcomes.
//!
//! Writers frequently treat some store errors as success (a create racing an
//! earlier create, a delete racing a garbage collector). These combinators
//! express that without matching on the error by hand.

use crate::error::Error;

/// The standard Result type for keel store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait folding expected store outcomes into success.
pub trait StoreResultExt<T> {
    /// Map `NotFound` to `Ok(None)`.
    fn ignore_not_found(self) -> Result<Option<T>>;

    /// Map `AlreadyExists` to `Ok(None)`.
    fn ignore_already_exists(self) -> Result<Option<T>>;
}

impl<T> StoreResultExt<T> for Result<T> {
    fn ignore_not_found(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => {
                tracing::debug!(error = %e, "ignoring not found");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn ignore_already_exists(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_already_exists() => {
                tracing::debug!(error = %e, "ignoring already exists");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
