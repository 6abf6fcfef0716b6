//! A "prelude" for users of the `skitter` crate.
//!
//! This prelude re-exports the most commonly used traits and structs so
//! that they can be easily imported.
//!
//! # Example
//!
//! ```
//! use skitter::prelude::*;
//! ```

pub use crate::{
    // Core structs
    EngineBuilder,
    EngineHandle,
    ExecutionEngine,
    Request,
    Response,
    Settings,
    // Core traits
    EngineObserver,
    HttpClient,
    ItemPipeline,
    Scheduler,
    Spider,
    // Essential re-exports for trait implementation
    async_trait,
};

pub use crate::error::{EngineError, FetchError, PipelineError};
pub use crate::pipeline::Item;
pub use crate::signals::IdleDecision;
