//! Core types for Castwatch

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a content origin (e.g. a channel id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A platform + recipient pair a source is allowed to notify
///
/// An empty or absent handle means "post without mentioning anyone".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub platform: String,
    #[serde(default)]
    pub handle: Option<String>,
}

impl Destination {
    pub fn new(platform: impl Into<String>, handle: Option<&str>) -> Self {
        Self {
            platform: platform.into(),
            handle: handle.map(str::to_string),
        }
    }

    /// Handle to mention, if any, with surrounding whitespace removed
    pub fn mention(&self) -> Option<&str> {
        self.handle.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }

    /// Key under which this destination's watermark is stored
    pub fn key(&self) -> String {
        match self.mention() {
            Some(handle) => format!("{}:{}", self.platform, handle),
            None => self.platform.clone(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Static configuration of which destinations a source may notify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBinding {
    pub source: SourceId,
    pub destinations: Vec<Destination>,
}

impl SourceBinding {
    pub fn new(source: impl Into<String>, destinations: Vec<Destination>) -> Self {
        Self {
            source: SourceId::new(source),
            destinations,
        }
    }
}

/// Coarse duration classes, matching YouTube's `videoDuration` search filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationBucket {
    /// Under four minutes
    Short,
    /// Four to twenty minutes
    Medium,
    /// Over twenty minutes
    Long,
}

impl DurationBucket {
    pub fn from_secs(secs: u64) -> Self {
        match secs {
            s if s < 4 * 60 => Self::Short,
            s if s <= 20 * 60 => Self::Medium,
            _ => Self::Long,
        }
    }
}

/// Facts about an item used by classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFacts {
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub live: bool,
}

/// One unit of content published by a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub facts: ItemFacts,
}

impl Item {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            thumbnail: None,
            facts: ItemFacts::default(),
        }
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.facts.duration_secs = Some(secs);
        self
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.facts.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn duration_bucket(&self) -> Option<DurationBucket> {
        self.facts.duration_secs.map(DurationBucket::from_secs)
    }
}
