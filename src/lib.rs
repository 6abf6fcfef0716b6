//! # skitter
//!
//! An async crawl engine: a scheduler feeding a rate-limited fetch stage and
//! a bounded parse stage, driven by a debounced progress loop that detects
//! when the crawl has drained and shuts everything down exactly once.
//!
//! ## Example
//!
//! ```rust,ignore
//! use skitter::prelude::*;
//! use serde_json::{json, Value};
//!
//! struct QuotesSpider;
//!
//! #[async_trait::async_trait]
//! impl Spider for QuotesSpider {
//!     fn name(&self) -> &str { "quotes" }
//!
//!     fn start_urls(&self) -> Vec<String> {
//!         vec!["https://quotes.toscrape.com/".into()]
//!     }
//!
//!     async fn parse(&self, response: Response) -> anyhow::Result<Value> {
//!         Ok(json!({ "url": response.url.as_str(), "bytes": response.body.len() }))
//!     }
//! }
//!
//! async fn run() -> anyhow::Result<()> {
//!     let engine = EngineBuilder::new(QuotesSpider).build().await?;
//!     let reason = engine.start().await?;
//!     println!("closed: {reason}");
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod prelude;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod scraper;
pub mod settings;
pub mod signals;
pub mod spider;
pub mod stats;
pub mod trigger;

pub use builder::EngineBuilder;
pub use downloader::{Downloader, PendingFetch};
pub use engine::{EngineHandle, ExecutionEngine};
pub use error::{EngineError, FetchError, PipelineError};
pub use pipeline::{Item, ItemPipeline, PipelineManager};
pub use request::Request;
pub use response::{HttpClient, ReqwestClient, Response};
pub use scheduler::{MemoryScheduler, Scheduler};
pub use scraper::{PendingParse, Scraper};
pub use settings::Settings;
pub use signals::{EngineObserver, IdleDecision, ObserverRegistry};
pub use spider::Spider;
pub use stats::{StatsObserver, StatsSnapshot};
pub use trigger::DebouncedTrigger;

pub use async_trait::async_trait;
pub use tokio;
