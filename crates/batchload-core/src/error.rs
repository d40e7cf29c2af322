//! Error types for batch loading.
//!
//! Two families are kept apart:
//!
//! - [`UsageError`]: the caller used the API incorrectly. Always surfaced
//!   immediately and never retried.
//! - [`BatchLoadError::BatchFunction`]: the user-supplied batch function failed.
//!   The original error is kept verbatim as the `source`, and the items of the
//!   failed wave stay pending so a later `resolve()` re-runs the wave.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error type accepted from batch functions.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Incorrect use of the batch loading API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// `batch()` was called on a deferred value that already has a batch function.
    #[error("batch function already attached")]
    AlreadyBound,

    /// `resolve()` was called before any batch function was attached.
    #[error("please provide a batch function first")]
    NotBound,

    /// The loader was called with both a value and an accumulator, or with neither.
    #[error("invalid loader arguments: {message}")]
    LoaderArguments { message: String },

    /// The loader was called after its wave had already finished.
    #[error("loader for batch group '{key}' called after its wave finished")]
    WaveFinished { key: String },

    /// An accumulator called back into the loader it was running under.
    #[error("loader for batch group '{key}' called from inside one of its accumulators")]
    ReentrantLoad { key: String },

    /// A batch group key was reused with different item, value or context types.
    #[error("batch group '{key}' is already registered with different item/value types")]
    GroupTypeMismatch { key: String },
}

/// Errors returned while binding or resolving deferred values.
#[derive(Debug, Clone, Error)]
pub enum BatchLoadError {
    /// The API was used incorrectly.
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    /// The batch function returned an error.
    #[error("batch function for group '{key}' failed: {source}")]
    BatchFunction {
        key: String,
        #[source]
        source: Arc<dyn StdError + Send + Sync + 'static>,
    },
}

impl BatchLoadError {
    /// Converts an error returned by a batch function.
    ///
    /// A `BatchLoadError` coming back out of a batch function (for example from a
    /// nested `resolve()` or a `loader.call(..)?`) is passed through unchanged.
    pub(crate) fn from_batch_fn(key: impl Into<String>, err: BoxError) -> Self {
        match err.downcast::<BatchLoadError>() {
            Ok(inner) => *inner,
            Err(source) => BatchLoadError::BatchFunction {
                key: key.into(),
                source: Arc::from(source),
            },
        }
    }

    /// Returns true if this is a usage error.
    pub fn is_usage(&self) -> bool {
        matches!(self, BatchLoadError::Usage(_))
    }

    /// Returns the usage error, if this is one.
    pub fn as_usage(&self) -> Option<&UsageError> {
        match self {
            BatchLoadError::Usage(err) => Some(err),
            BatchLoadError::BatchFunction { .. } => None,
        }
    }

    /// Attempts to view the batch function's original error as `E`.
    pub fn downcast_source<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            BatchLoadError::BatchFunction { source, .. } => source.downcast_ref::<E>(),
            BatchLoadError::Usage(_) => None,
        }
    }
}

/// Result type for batch loading operations.
pub type BatchLoadResult<T> = Result<T, BatchLoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("database unavailable")]
    struct DatabaseDown;

    #[test]
    fn test_batch_function_error_keeps_source_verbatim() {
        let err = BatchLoadError::from_batch_fn("users", Box::new(DatabaseDown));

        assert!(!err.is_usage());
        assert!(err.downcast_source::<DatabaseDown>().is_some());
        assert!(err.to_string().contains("users"));
        assert!(err.to_string().contains("database unavailable"));
    }

    #[test]
    fn test_nested_batch_load_error_is_not_wrapped_twice() {
        let inner: BoxError = Box::new(BatchLoadError::from(UsageError::NotBound));

        let err = BatchLoadError::from_batch_fn("outer", inner);

        assert_eq!(err.as_usage(), Some(&UsageError::NotBound));
    }

    #[test]
    fn test_usage_error_messages() {
        assert_eq!(
            UsageError::AlreadyBound.to_string(),
            "batch function already attached"
        );
        let err = UsageError::LoaderArguments {
            message: "pass a value or an accumulator, not both".to_string(),
        };
        assert!(err.to_string().contains("not both"));
    }
}
