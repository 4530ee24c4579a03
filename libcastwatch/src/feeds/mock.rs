//! Mock feed implementation for testing
//!
//! Responses are scripted per source and can be replaced between cycles to
//! simulate new uploads, outages and slow endpoints.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::FeedError;
use crate::feeds::SourceFeed;
use crate::types::{Item, SourceId};

/// Mock feed for testing
#[derive(Clone, Default)]
pub struct MockFeed {
    responses: Arc<Mutex<HashMap<String, Result<Vec<Item>, FeedError>>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    delay: Duration,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `list_recent` call (simulates a slow endpoint)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Serve `items` (newest first) for `source`
    pub fn set_items(&self, source: &str, items: Vec<Item>) {
        self.responses
            .lock()
            .unwrap()
            .insert(source.to_string(), Ok(items));
    }

    /// Serve `ids` as bare items titled after their ids
    pub fn set_ids(&self, source: &str, ids: &[&str]) {
        let items = ids
            .iter()
            .map(|id| Item::new(*id, format!("Title {}", id)))
            .collect();
        self.set_items(source, items);
    }

    /// Fail every fetch for `source` with `error`
    pub fn set_error(&self, source: &str, error: FeedError) {
        self.responses
            .lock()
            .unwrap()
            .insert(source.to_string(), Err(error));
    }

    /// Number of times `source` was fetched
    pub fn call_count(&self, source: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(source)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SourceFeed for MockFeed {
    async fn list_recent(&self, source: &SourceId) -> Result<Vec<Item>, FeedError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(source.as_str().to_string())
            .or_insert(0) += 1;

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        self.responses
            .lock()
            .unwrap()
            .get(source.as_str())
            .cloned()
            .unwrap_or_else(|| Err(FeedError::NotFound(source.to_string())))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_serves_scripted_items() {
        let feed = MockFeed::new();
        feed.set_ids("UC1", &["v2", "v1"]);

        let items = feed.list_recent(&SourceId::new("UC1")).await.unwrap();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["v2", "v1"]);
        assert_eq!(feed.call_count("UC1"), 1);
    }

    #[tokio::test]
    async fn test_mock_unknown_source_is_not_found() {
        let feed = MockFeed::new();
        let err = feed.list_recent(&SourceId::new("UC9")).await.unwrap_err();
        assert_eq!(err, FeedError::NotFound("UC9".to_string()));
    }

    #[tokio::test]
    async fn test_mock_scripted_error() {
        let feed = MockFeed::new();
        feed.set_error("UC1", FeedError::Network("connection refused".to_string()));
        assert!(feed.list_recent(&SourceId::new("UC1")).await.is_err());
    }
}
