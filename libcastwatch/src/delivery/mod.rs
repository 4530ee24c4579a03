//! Delivery abstraction and implementations
//!
//! Each implementation serves one platform (e.g. "twitter", "mastodon") and
//! turns an item into a post for a single destination on that platform.
//!
//! Implementations must not retry internally: a failed or timed-out call is
//! reported once and the engine retries on a later cycle, because the
//! destination's watermark still marks the item as outstanding.

use async_trait::async_trait;

use crate::error::DeliveryError;
use crate::types::{Destination, Item};

// Mock delivery is available for all builds (not just tests) to support integration tests
pub mod mock;
pub mod stdout;

/// Default link template, `{id}` is replaced with the item id
pub const DEFAULT_URL_TEMPLATE: &str = "https://www.youtube.com/watch?v={id}";

/// Posts notifications about items to destinations of one platform
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Post a notification about `item` to `destination`
    ///
    /// # Returns
    ///
    /// A platform-specific receipt (post id, message id, ...) on confirmed
    /// delivery.
    ///
    /// # Errors
    ///
    /// Any `DeliveryError` means the destination was not notified.
    async fn deliver(&self, destination: &Destination, item: &Item)
        -> Result<String, DeliveryError>;

    /// Platform name this delivery serves (matches `Destination::platform`)
    fn name(&self) -> &str;
}

/// Render the notification text for an item
///
/// `"<title> <link>"`, followed by `" @<handle>"` when the destination has a
/// handle to mention.
pub fn render_notification(item: &Item, destination: &Destination, url_template: &str) -> String {
    let link = url_template.replace("{id}", &item.id);
    let mut text = format!("{} {}", item.title.trim(), link);
    if let Some(handle) = destination.mention() {
        text.push_str(" @");
        text.push_str(handle.trim_start_matches('@'));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_with_mention() {
        let item = Item::new("abc123", "New video!");
        let dest = Destination::new("twitter", Some("alice"));
        assert_eq!(
            render_notification(&item, &dest, DEFAULT_URL_TEMPLATE),
            "New video! https://www.youtube.com/watch?v=abc123 @alice"
        );
    }

    #[test]
    fn test_render_without_mention() {
        let item = Item::new("abc123", "New video!");
        let dest = Destination::new("twitter", Some(""));
        assert_eq!(
            render_notification(&item, &dest, "https://example.org/{id}"),
            "New video! https://example.org/abc123"
        );
    }

    #[test]
    fn test_render_strips_duplicate_at_sign() {
        let item = Item::new("x", "Title");
        let dest = Destination::new("mastodon", Some("@bob@example.social"));
        assert!(render_notification(&item, &dest, "{id}").ends_with(" @bob@example.social"));
    }
}
