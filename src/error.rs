//! Rejection reasons carried by settled futures.

use std::sync::Arc;

/// Why a future was rejected.
///
/// Rejection is an ordinary outcome: it is delivered to whoever awaits the
/// future and never dropped silently.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A clock reached its deadline without being set.
    #[error("timed out")]
    Timeout,
    /// The channel or semaphore was closed.
    #[error("closed")]
    Closed,
    /// The operation was withdrawn, e.g. by a semaphore reset.
    #[error("operation canceled")]
    Canceled,
    /// The promise was dropped without being settled.
    #[error("promise dropped before it was settled")]
    Abandoned,
    /// A callable posted to another manager panicked.
    #[error("posted callable panicked")]
    Panicked,
    /// Application-defined error code.
    #[error("error code {0}")]
    Code(i32),
    /// Application-defined message.
    #[error("{0}")]
    Message(Arc<str>),
}

impl Error {
    /// Build a [`Error::Message`] from anything string-like.
    pub fn msg(text: impl Into<Arc<str>>) -> Self {
        Error::Message(text.into())
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment override could not be parsed.
    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// Parser message.
        reason: String,
    },
}
