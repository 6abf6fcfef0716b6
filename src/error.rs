//! Error types shared across the engine.
//!
//! Per-request and per-item failures are contained at the stage boundary and
//! converted into observer notifications; only configuration mistakes and
//! use-after-close surface to callers of the public API.

use thiserror::Error;
use url::Url;

/// Errors returned by the public engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine or one of its stages was misconfigured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation was attempted after the named stage was torn down.
    #[error("{0} is closed")]
    StageClosed(&'static str),

    /// A fetch failed; surfaced only when a caller awaits a fetch handle
    /// directly.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Failure of a single fetch, resolved through its `PendingFetch` handle.
///
/// The fetch stage never retries; layering retry policy on top is the
/// caller's concern.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The fetch stage was closed before this request could be dispatched.
    #[error("fetch stage is closed")]
    StageClosed,

    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error("transport error for {url}: {message}")]
    Transport { url: Url, message: String },

    /// The transport session could not be initialized.
    #[error("transport session error: {0}")]
    Session(String),
}

/// Outcome of the item-processing chain when an item does not pass through.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Expected, explicit drop signal. Routed to the item-dropped
    /// notification, not treated as an application error.
    #[error("item dropped: {0}")]
    DropItem(String),

    /// Any other pipeline failure. Routed to the item-error notification.
    #[error(transparent)]
    Failure(#[from] anyhow::Error),
}
