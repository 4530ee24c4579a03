//! Source feed abstraction
//!
//! A feed returns the most recent items a source has published, newest
//! first. Retrieving them (API calls, scraping, reading exports) is the
//! feed's concern; the dispatch engine only consumes the ordered list.

use async_trait::async_trait;

use crate::error::FeedError;
use crate::types::{Item, SourceId};

pub mod file;

// Mock feed is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Retrieves a source's recent items
#[async_trait]
pub trait SourceFeed: Send + Sync {
    /// List the source's most recent items, newest first
    ///
    /// The returned order is authoritative: the engine never reorders items
    /// or consults timestamps.
    ///
    /// # Errors
    ///
    /// Returns a `FeedError` on transport, status or parse failures. The
    /// engine skips the source for the current cycle.
    async fn list_recent(&self, source: &SourceId) -> Result<Vec<Item>, FeedError>;

    /// Short identifier used in logs
    fn name(&self) -> &str;
}
