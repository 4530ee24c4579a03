//! Mock delivery implementation for testing
//!
//! Simulates a platform whose individual destinations can be made to fail,
//! recover, or respond slowly. Every confirmed delivery is recorded for
//! verification.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::delivery::Delivery;
use crate::error::DeliveryError;
use crate::types::{Destination, Item};

/// Mock delivery for testing
#[derive(Clone)]
pub struct MockDelivery {
    name: String,
    /// Destination keys whose deliveries fail
    failing: Arc<Mutex<HashSet<String>>>,
    /// Delay before completing each delivery (simulates network latency)
    delay: Duration,
    /// Number of times deliver has been called
    call_count: Arc<Mutex<usize>>,
    /// Confirmed deliveries as (destination key, item id)
    delivered: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockDelivery {
    /// Create a mock delivery that always succeeds
    pub fn success(name: &str) -> Self {
        Self {
            name: name.to_string(),
            failing: Arc::new(Mutex::new(HashSet::new())),
            delay: Duration::from_millis(0),
            call_count: Arc::new(Mutex::new(0)),
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock delivery with a delay
    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::success(name)
        }
    }

    /// Make deliveries to `destination_key` fail until `recover` is called
    pub fn fail_destination(&self, destination_key: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert(destination_key.to_string());
    }

    pub fn recover(&self, destination_key: &str) {
        self.failing.lock().unwrap().remove(destination_key);
    }

    /// Get the number of times deliver was called
    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Get all confirmed deliveries as (destination key, item id)
    pub fn delivered(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for MockDelivery {
    async fn deliver(
        &self,
        destination: &Destination,
        item: &Item,
    ) -> Result<String, DeliveryError> {
        *self.call_count.lock().unwrap() += 1;

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        let key = destination.key();
        if self.failing.lock().unwrap().contains(&key) {
            return Err(DeliveryError::Posting(format!(
                "Mock delivery to {} failed",
                key
            )));
        }

        self.delivered
            .lock()
            .unwrap()
            .push((key, item.id.clone()));

        Ok(format!("{}:mock-{}", self.name, uuid::Uuid::new_v4()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
