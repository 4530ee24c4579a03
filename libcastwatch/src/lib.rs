//! Castwatch - announce new uploads without duplicates or gaps
//!
//! This library provides the dispatch-and-dedup engine that decides which
//! items of a content source are new, which destinations still need to hear
//! about them, and durably records what each destination has been told.

pub mod classifier;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod feeds;
pub mod logging;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use engine::{CycleReport, DeliveryResult, Dispatcher, SourceOutcome, SourceReport};
pub use error::{CastwatchError, Result};
pub use store::WatermarkStore;
pub use types::{Destination, Item, SourceBinding, SourceId};
