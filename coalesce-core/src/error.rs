//! Error types for the coalesce core library
//!
//! # Error Hierarchy
//!
//! ```text
//! LoadError<E>   - returned to every caller of Loader::fetch
//! ├── Fetch      - the batch function failed (shared by the whole batch)
//! └── Abandoned  - the batch was torn down before it settled
//!
//! ConfigError    - invalid loader configuration
//! ```
//!
//! # Usage
//!
//! Library code matches on [`LoadError`] directly:
//!
//! ```rust,ignore
//! match loader.fetch(42).await {
//!     Ok(Some(user)) => println!("{}", user.name),
//!     Ok(None) => println!("no such user"),
//!     Err(LoadError::Fetch(e)) => eprintln!("source failed: {e}"),
//!     Err(LoadError::Abandoned) => eprintln!("loader shut down"),
//! }
//! ```
//!
//! Application code should use `anyhow` with context:
//!
//! ```rust,ignore
//! use anyhow::Context;
//!
//! let config = LoaderConfig::from_env();
//! config.validate().context("Invalid loader configuration")?;
//! ```

use std::sync::Arc;

use thiserror::Error;

/// Error returned by [`Loader::fetch`](crate::loader::Loader::fetch).
///
/// A failed batch rejects every waiter with the same `Arc`, so callers can
/// tell that their failures share a single cause.
#[derive(Error, Debug)]
pub enum LoadError<E> {
    /// The batch function returned an error
    #[error("Batch fetch failed: {0}")]
    Fetch(Arc<E>),

    /// The batch task was dropped before it settled (runtime shutdown or a
    /// panicking batch function)
    #[error("Batch was abandoned before it settled")]
    Abandoned,
}

impl<E> LoadError<E> {
    /// The batch function's error, if this is a fetch failure
    pub fn fetch_error(&self) -> Option<&Arc<E>> {
        match self {
            Self::Fetch(e) => Some(e),
            Self::Abandoned => None,
        }
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }
}

impl<E> Clone for LoadError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Fetch(e) => Self::Fetch(Arc::clone(e)),
            Self::Abandoned => Self::Abandoned,
        }
    }
}

/// Errors raised while building a loader configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Policy name is not one of window, buffer or capped
    #[error("Unknown timing policy '{0}' (expected window, buffer or capped)")]
    UnknownPolicy(String),

    /// A field holds a value the loader cannot use
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: msg.into(),
        }
    }
}
