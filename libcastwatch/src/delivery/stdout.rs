//! Delivery that writes notifications as JSON lines
//!
//! Each notification becomes one JSON object on stdout so that a posting
//! tool further down a pipe can publish it:
//!
//! ```text
//! {"platform":"twitter","destination":"twitter:alice","item_id":"v4","text":"..."}
//! ```

use async_trait::async_trait;
use std::io::Write;
use std::sync::{Arc, Mutex};

use crate::delivery::{render_notification, Delivery, DEFAULT_URL_TEMPLATE};
use crate::error::DeliveryError;
use crate::types::{Destination, Item};

type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub struct StdoutDelivery {
    platform: String,
    url_template: String,
    out: SharedWriter,
}

impl StdoutDelivery {
    pub fn new(platform: impl Into<String>) -> Self {
        Self::with_writer(platform, Box::new(std::io::stdout()))
    }

    /// Write to an arbitrary sink instead of stdout
    pub fn with_writer(platform: impl Into<String>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            platform: platform.into(),
            url_template: DEFAULT_URL_TEMPLATE.to_string(),
            out: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }
}

#[async_trait]
impl Delivery for StdoutDelivery {
    async fn deliver(
        &self,
        destination: &Destination,
        item: &Item,
    ) -> Result<String, DeliveryError> {
        let line = serde_json::json!({
            "platform": destination.platform,
            "destination": destination.key(),
            "handle": destination.mention(),
            "item_id": item.id,
            "title": item.title,
            "thumbnail": item.thumbnail,
            "text": render_notification(item, destination, &self.url_template),
        });

        let mut out = self
            .out
            .lock()
            .map_err(|_| DeliveryError::Posting("output writer poisoned".to_string()))?;
        writeln!(out, "{}", line)
            .and_then(|_| out.flush())
            .map_err(|e| DeliveryError::Posting(format!("Failed to write notification: {}", e)))?;

        Ok(format!("{}:{}", destination.key(), item.id))
    }

    fn name(&self) -> &str {
        &self.platform
    }
}
