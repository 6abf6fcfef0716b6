//! # Spider Module
//!
//! Defines the `Spider` trait, the user-supplied half of a crawl.
//!
//! ## Overview
//!
//! A spider names the crawl, yields the start requests, and parses each
//! fetched response. The parse callback returns a JSON value: an object is
//! treated as a scraped item and routed through the item-processing chain,
//! `null` means the page produced nothing, and any other value is a protocol
//! violation that the parse stage logs and drops. Callbacks may suspend (for
//! example to fetch auxiliary data) and may inject follow-up work through an
//! [`EngineHandle`](crate::engine::EngineHandle) captured at setup time.
//!
//! ## Example
//!
//! ```rust,ignore
//! use skitter::{Request, Response, Spider};
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//!
//! struct TitleSpider;
//!
//! #[async_trait]
//! impl Spider for TitleSpider {
//!     fn name(&self) -> &str {
//!         "titles"
//!     }
//!
//!     fn start_urls(&self) -> Vec<String> {
//!         vec!["https://example.com/".into()]
//!     }
//!
//!     async fn parse(&self, response: Response) -> anyhow::Result<Value> {
//!         Ok(json!({ "url": response.url.as_str(), "len": response.body.len() }))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::request::Request;
use crate::response::Response;

/// User-supplied crawling logic.
#[async_trait]
pub trait Spider: Send + Sync + 'static {
    /// Name used in notifications and logs.
    fn name(&self) -> &str;

    /// Convenience list of seed URLs for the default `start_requests`.
    fn start_urls(&self) -> Vec<String> {
        Vec::new()
    }

    /// Lazily-drained source of start requests. Finite and non-restartable;
    /// the engine pulls one entry per progress step so a backpressured crawl
    /// never buffers the whole URL universe.
    fn start_requests(&self) -> Box<dyn Iterator<Item = Request> + Send> {
        Box::new(self.start_urls().into_iter().filter_map(|raw| {
            match Url::parse(&raw) {
                Ok(url) => Some(Request::new(url)),
                Err(e) => {
                    warn!(url = %raw, error = %e, "skipping unparseable start url");
                    None
                }
            }
        }))
    }

    /// Parses one response. Return an object for a scraped item, `null` for
    /// nothing.
    async fn parse(&self, response: Response) -> anyhow::Result<Value>;

    /// Awaited once during the close sequence, after the stages are down.
    async fn closed(&self, _reason: &str) {}
}
