//! The unit of work flowing through the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// A request for one resource, identified by its URL plus optional metadata.
///
/// Immutable once enqueued. Owned by the scheduler until dequeued by the
/// engine; ownership then passes to the fetch stage for the duration of one
/// fetch. Two requests with the same URL are still two units of work: the
/// engine never deduplicates, and the fetch stage tracks in-flight work by a
/// generated token, never by URL equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub url: Url,
    /// Free-form metadata carried alongside the request, available to the
    /// parse callback via the response.
    pub meta: Value,
}

impl Request {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            meta: Value::Null,
        }
    }

    /// Parses `url` and builds a request from it.
    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<Request {}>", self.url)
    }
}
