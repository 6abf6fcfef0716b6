//! Item-processing chain.
//!
//! Parsed items flow through an ordered list of pipelines; each pipeline may
//! transform the item, drop it explicitly ([`PipelineError::DropItem`]), or
//! fail. The [`PipelineManager`] runs the chain and fans the open/close
//! lifecycle hooks out concurrently.

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, error};

use crate::error::PipelineError;

/// A structured scrape result: a JSON object mapping field names to values.
pub type Item = serde_json::Map<String, serde_json::Value>;

/// One stage of the item-processing chain.
///
/// `open_spider`/`close_spider` default to no-ops; pipelines without
/// external resources only implement `process_item`.
#[async_trait]
pub trait ItemPipeline: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &str;

    async fn open_spider(&self, _spider: &str) -> Result<(), PipelineError> {
        Ok(())
    }

    async fn close_spider(&self, _spider: &str) -> Result<(), PipelineError> {
        Ok(())
    }

    /// Transforms or validates one item. Returning
    /// `Err(PipelineError::DropItem)` is the expected way to discard it.
    async fn process_item(&self, item: Item, spider: &str) -> Result<Item, PipelineError>;
}

/// Runs items through every registered pipeline in order.
#[derive(Default)]
pub struct PipelineManager {
    pipelines: Vec<Box<dyn ItemPipeline>>,
}

impl PipelineManager {
    pub fn new(pipelines: Vec<Box<dyn ItemPipeline>>) -> Self {
        Self { pipelines }
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Awaits every pipeline's open hook concurrently.
    pub async fn open_spider(&self, spider: &str) {
        let hooks = self.pipelines.iter().map(|p| async move {
            if let Err(e) = p.open_spider(spider).await {
                error!(pipeline = p.name(), error = %e, "open_spider hook failed");
            }
        });
        join_all(hooks).await;
    }

    /// Awaits every pipeline's close hook concurrently.
    pub async fn close_spider(&self, spider: &str) {
        let hooks = self.pipelines.iter().map(|p| async move {
            if let Err(e) = p.close_spider(spider).await {
                error!(pipeline = p.name(), error = %e, "close_spider hook failed");
            }
        });
        join_all(hooks).await;
    }

    /// Chains the item through all pipelines; the first drop or failure
    /// short-circuits.
    pub async fn process_item(&self, mut item: Item, spider: &str) -> Result<Item, PipelineError> {
        for pipeline in &self.pipelines {
            match pipeline.process_item(item, spider).await {
                Ok(next) => {
                    debug!(pipeline = pipeline.name(), "pipeline passed item");
                    item = next;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(item)
    }
}
