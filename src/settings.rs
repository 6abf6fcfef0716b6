//! Numeric settings consumed by the engine and its stages.

use std::time::Duration;

pub const DEFAULT_CONCURRENT_REQUESTS: usize = 10;
pub const DEFAULT_CONCURRENT_ITEMS: usize = 10;
pub const DEFAULT_DOWNLOAD_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10) AppleWebKit/537.2 \
     (KHTML, like Gecko) Chrome/83.0.61 Safari/537.36";

/// Tunables for one crawl.
///
/// Validated by the builder: the two concurrency limits must be non-zero.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Maximum number of simultaneously open fetches.
    pub concurrent_requests: usize,
    /// Maximum number of simultaneously running parse callbacks.
    pub concurrent_items: usize,
    /// Minimum delay between successive fetch dispatches.
    pub download_delay: Duration,
    /// Outbound identification header.
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            concurrent_requests: DEFAULT_CONCURRENT_REQUESTS,
            concurrent_items: DEFAULT_CONCURRENT_ITEMS,
            download_delay: DEFAULT_DOWNLOAD_DELAY,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.concurrent_requests, 10);
        assert_eq!(settings.concurrent_items, 10);
        assert_eq!(settings.download_delay, Duration::from_millis(500));
        assert!(settings.user_agent.starts_with("Mozilla/5.0"));
    }
}
