//! Feed backed by JSON files on disk
//!
//! Each source has a file `<dir>/<source id>.json` containing a JSON array of
//! items, newest first. An external fetcher (cron job, API exporter) keeps
//! the files current.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::FeedError;
use crate::feeds::SourceFeed;
use crate::types::{Item, SourceId};

pub struct FileFeed {
    dir: PathBuf,
}

impl FileFeed {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, source: &SourceId) -> Result<PathBuf, FeedError> {
        let id = source.as_str();
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(FeedError::NotFound(format!("invalid source id '{}'", id)));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl SourceFeed for FileFeed {
    async fn list_recent(&self, source: &SourceId) -> Result<Vec<Item>, FeedError> {
        let path = self.path_for(source)?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FeedError::NotFound(path.display().to_string()));
            }
            Err(e) => {
                return Err(FeedError::Network(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        serde_json::from_str::<Vec<Item>>(&content)
            .map_err(|e| FeedError::Parse(format!("{}: {}", path.display(), e)))
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_items_in_file_order() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join("UC1.json"),
            r#"[
                {"id": "v2", "title": "Second", "facts": {"duration_secs": 600}},
                {"id": "v1", "title": "First", "description": "hello"}
            ]"#,
        )
        .unwrap();

        let feed = FileFeed::new(temp_dir.path());
        let items = feed.list_recent(&SourceId::new("UC1")).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "v2");
        assert_eq!(items[0].facts.duration_secs, Some(600));
        assert_eq!(items[1].description.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let feed = FileFeed::new(temp_dir.path());

        let err = feed.list_recent(&SourceId::new("UC404")).await.unwrap_err();
        assert!(matches!(err, FeedError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_json_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("UC1.json"), r#"{"id": "v1"}"#).unwrap();

        let feed = FileFeed::new(temp_dir.path());
        let err = feed.list_recent(&SourceId::new("UC1")).await.unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let feed = FileFeed::new(temp_dir.path());

        let err = feed
            .list_recent(&SourceId::new("../etc/passwd"))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::NotFound(_)));
    }
}
