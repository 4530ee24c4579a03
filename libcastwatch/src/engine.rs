//! Dispatch engine
//!
//! One cycle walks every configured source: fetch its recent items, work out
//! which destinations have not yet been told about the newest qualifying
//! item, deliver to exactly those, and record a watermark per destination
//! only once its delivery is confirmed. Watermarks are flushed once, after
//! all sources have been processed.
//!
//! Failures are isolated: a feed that cannot be fetched skips its source, a
//! destination that cannot be reached keeps its old watermark and is retried
//! next cycle, and a classifier error or panic counts as a rejection. Only a
//! failed flush fails the cycle as a whole.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::classifier::ItemClassifier;
use crate::config::DispatchConfig;
use crate::delivery::Delivery;
use crate::error::{DeliveryError, FeedError, Result};
use crate::feeds::SourceFeed;
use crate::store::WatermarkStore;
use crate::types::{Destination, Item, SourceBinding, SourceId};

/// Result of delivering one item to one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub destination: Destination,
    pub success: bool,
    /// Platform receipt (if successful)
    pub receipt: Option<String>,
    /// Failure reason (if failed)
    pub error: Option<DeliveryError>,
}

/// What happened to a source during a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// The source has no destinations; nothing was fetched
    Unbound,
    /// The feed could not be fetched; watermarks untouched
    FetchFailed(FeedError),
    /// The feed returned no items
    Empty,
    /// Every destination was new and got seeded with the newest item
    Bootstrapped { newest: String },
    /// Every destination already covers the newest item
    CaughtUp,
    /// An accepted item was delivered to its outstanding destinations
    Delivered {
        item_id: String,
        results: Vec<DeliveryResult>,
        /// Newer items skipped because the classifier rejected them
        rejected: usize,
    },
    /// Nothing ahead of the watermarks was accepted; watermarks moved to the
    /// newest item so the same window is not reprocessed
    SkippedRejected { advanced_to: String, rejected: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub source: SourceId,
    pub outcome: SourceOutcome,
    /// Destinations seen for the first time and seeded without delivery
    pub seeded: Vec<Destination>,
}

impl SourceReport {
    fn new(source: &SourceId, outcome: SourceOutcome) -> Self {
        Self {
            source: source.clone(),
            outcome,
            seeded: Vec::new(),
        }
    }

    /// Delivery attempts made for this source
    pub fn deliveries(&self) -> &[DeliveryResult] {
        match &self.outcome {
            SourceOutcome::Delivered { results, .. } => results,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
}

impl CycleReport {
    pub fn delivery_attempts(&self) -> usize {
        self.sources.iter().map(|s| s.deliveries().len()).sum()
    }

    pub fn deliveries_succeeded(&self) -> usize {
        self.sources
            .iter()
            .flat_map(|s| s.deliveries())
            .filter(|r| r.success)
            .count()
    }

    pub fn deliveries_failed(&self) -> usize {
        self.delivery_attempts() - self.deliveries_succeeded()
    }

    pub fn fetch_failures(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.outcome, SourceOutcome::FetchFailed(_)))
            .count()
    }

    pub fn source(&self, id: &str) -> Option<&SourceReport> {
        self.sources.iter().find(|s| s.source.as_str() == id)
    }
}

/// Drives feeds, classifier and deliveries, and owns watermark mutation
///
/// All collaborators are injected; the engine holds no global state.
pub struct Dispatcher {
    feed: Arc<dyn SourceFeed>,
    classifier: Arc<dyn ItemClassifier>,
    store: Arc<WatermarkStore>,
    /// Delivery implementations by platform name
    deliveries: HashMap<String, Arc<dyn Delivery>>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        feed: Arc<dyn SourceFeed>,
        classifier: Arc<dyn ItemClassifier>,
        store: Arc<WatermarkStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            feed,
            classifier,
            store,
            deliveries: HashMap::new(),
            config,
        }
    }

    /// Register the delivery serving `delivery.name()`, replacing any previous one
    pub fn register_delivery(&mut self, delivery: Arc<dyn Delivery>) {
        self.deliveries.insert(delivery.name().to_string(), delivery);
    }

    pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.register_delivery(delivery);
        self
    }

    pub fn store(&self) -> &Arc<WatermarkStore> {
        &self.store
    }

    /// Run one poll-classify-dispatch-persist pass over `bindings`
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Write` if the watermarks cannot be persisted. The
    /// cycle's in-memory progress is discarded in that case, so the next
    /// cycle starts again from what is on disk.
    pub async fn run_cycle(&self, bindings: &[SourceBinding]) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", %cycle_id);

        async move {
            let started_at = Utc::now();
            debug!(sources = bindings.len(), "Starting cycle");

            let sources: Vec<SourceReport> = stream::iter(bindings)
                .map(|binding| self.process_source(binding))
                .buffered(self.config.max_concurrent_sources.max(1))
                .collect()
                .await;

            if let Err(e) = self.store.flush() {
                error!("Failed to persist watermarks, discarding cycle progress: {}", e);
                self.store.discard_pending();
                return Err(e.into());
            }

            let report = CycleReport {
                cycle_id,
                started_at,
                finished_at: Utc::now(),
                sources,
            };

            info!(
                sources = report.sources.len(),
                delivered = report.deliveries_succeeded(),
                failed = report.deliveries_failed(),
                fetch_failures = report.fetch_failures(),
                "Cycle complete"
            );

            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Process a single source without flushing
    pub async fn process_source(&self, binding: &SourceBinding) -> SourceReport {
        let source = &binding.source;

        if binding.destinations.is_empty() {
            debug!(source = %source, "Source has no destinations, skipping");
            return SourceReport::new(source, SourceOutcome::Unbound);
        }

        let items = match self.fetch(source).await {
            Ok(items) => items,
            Err(e) => {
                warn!(source = %source, feed = self.feed.name(), "Failed to fetch source: {}", e);
                return SourceReport::new(source, SourceOutcome::FetchFailed(e));
            }
        };

        let Some(newest) = items.first() else {
            debug!(source = %source, "Feed returned no items");
            return SourceReport::new(source, SourceOutcome::Empty);
        };

        // First sight of a destination: seed with the newest item, never
        // announce history.
        let mut seeded = Vec::new();
        let mut tracked = Vec::new();
        for destination in &binding.destinations {
            match self.store.get(source, destination) {
                None => {
                    self.store.set(source, destination, &newest.id);
                    info!(
                        source = %source,
                        destination = %destination,
                        item = %newest.id,
                        "New destination, seeding watermark without delivery"
                    );
                    seeded.push(destination.clone());
                }
                Some(mark) => {
                    let position = items.iter().position(|item| item.id == mark);
                    tracked.push(Tracked {
                        destination,
                        position,
                    });
                }
            }
        }

        let outcome = if tracked.is_empty() {
            SourceOutcome::Bootstrapped {
                newest: newest.id.clone(),
            }
        } else {
            self.scan(source, &items, &tracked).await
        };

        SourceReport {
            source: source.clone(),
            outcome,
            seeded,
        }
    }

    async fn fetch(&self, source: &SourceId) -> std::result::Result<Vec<Item>, FeedError> {
        match timeout(self.config.fetch_timeout(), self.feed.list_recent(source)).await {
            Ok(result) => result,
            Err(_) => Err(FeedError::Timeout(self.config.fetch_timeout_secs)),
        }
    }

    /// Walk items newest-first and deliver the first accepted one that some
    /// destination has not seen yet. Only one item per source per cycle.
    async fn scan(&self, source: &SourceId, items: &[Item], tracked: &[Tracked<'_>]) -> SourceOutcome {
        let outstanding_at_newest = outstanding(tracked, 0);
        if outstanding_at_newest.is_empty() {
            debug!(source = %source, "All destinations caught up");
            return SourceOutcome::CaughtUp;
        }

        let mut rejected = 0;
        for (index, item) in items.iter().enumerate() {
            let pending = outstanding(tracked, index);
            if pending.is_empty() {
                debug!(source = %source, item = %item.id, "Reached covered item, stopping scan");
                break;
            }

            if !self.classify(source, item) {
                rejected += 1;
                continue;
            }

            let advance_to = if self.config.advance_past_rejected {
                &items[0]
            } else {
                item
            };
            let results = self.deliver_all(source, item, &pending, advance_to).await;
            return SourceOutcome::Delivered {
                item_id: item.id.clone(),
                results,
                rejected,
            };
        }

        // Everything ahead of the watermarks was rejected
        let newest = &items[0];
        for destination in &outstanding_at_newest {
            self.store.set(source, destination, &newest.id);
        }
        info!(
            source = %source,
            item = %newest.id,
            rejected,
            "No acceptable new item, advancing watermarks past rejected items"
        );
        SourceOutcome::SkippedRejected {
            advanced_to: newest.id.clone(),
            rejected,
        }
    }

    /// A classifier that errors or panics rejects the item
    fn classify(&self, source: &SourceId, item: &Item) -> bool {
        let verdict = panic::catch_unwind(AssertUnwindSafe(|| self.classifier.accept(item)));
        let Ok(verdict) = verdict else {
            error!(source = %source, item = %item.id, "Classifier panicked, rejecting item");
            return false;
        };

        match verdict {
            Ok(true) => true,
            Ok(false) => {
                debug!(source = %source, item = %item.id, "Item rejected by classifier");
                false
            }
            Err(e) => {
                warn!(source = %source, item = %item.id, "Classifier failed, rejecting item: {}", e);
                false
            }
        }
    }

    /// Deliver `item` to every destination concurrently; each confirmed
    /// destination advances to `advance_to` as soon as its own call returns.
    async fn deliver_all(
        &self,
        source: &SourceId,
        item: &Item,
        destinations: &[&Destination],
        advance_to: &Item,
    ) -> Vec<DeliveryResult> {
        let futures: Vec<_> = destinations
            .iter()
            .map(|destination| async move {
                info!(source = %source, destination = %destination, item = %item.id, "Delivering");

                match self.deliver_one(destination, item).await {
                    Ok(receipt) => {
                        self.store.set(source, destination, &advance_to.id);
                        info!(
                            source = %source,
                            destination = %destination,
                            item = %item.id,
                            receipt = %receipt,
                            "Delivered"
                        );
                        DeliveryResult {
                            destination: (*destination).clone(),
                            success: true,
                            receipt: Some(receipt),
                            error: None,
                        }
                    }
                    Err(e) => {
                        warn!(
                            source = %source,
                            destination = %destination,
                            item = %item.id,
                            "Delivery failed, will retry next cycle: {}",
                            e
                        );
                        DeliveryResult {
                            destination: (*destination).clone(),
                            success: false,
                            receipt: None,
                            error: Some(e),
                        }
                    }
                }
            })
            .collect();

        join_all(futures).await
    }

    async fn deliver_one(
        &self,
        destination: &Destination,
        item: &Item,
    ) -> std::result::Result<String, DeliveryError> {
        let delivery = self
            .deliveries
            .get(&destination.platform)
            .ok_or_else(|| DeliveryError::NotConfigured(destination.platform.clone()))?;

        match timeout(self.config.delivery_timeout(), delivery.deliver(destination, item)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.config.delivery_timeout_secs)),
        }
    }
}

/// A destination with a known watermark and where it sits in the window
struct Tracked<'a> {
    destination: &'a Destination,
    /// Index of the watermark item in the fetched list; `None` when it fell
    /// out of the window, which leaves every fetched item outstanding
    position: Option<usize>,
}

impl Tracked<'_> {
    fn covers(&self, index: usize) -> bool {
        self.position.is_some_and(|p| p <= index)
    }
}

fn outstanding<'a>(tracked: &[Tracked<'a>], index: usize) -> Vec<&'a Destination> {
    tracked
        .iter()
        .filter(|t| !t.covers(index))
        .map(|t| t.destination)
        .collect()
}
