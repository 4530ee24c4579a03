//! Durable watermark storage
//!
//! Tracks, per (source, destination) pair, the id of the last item confirmed
//! delivered. The on-disk layout is a JSON object keyed by source id whose
//! values are objects keyed by destination key:
//!
//! ```json
//! { "UC123": { "twitter:alice": "v4", "mastodon": "v3" } }
//! ```
//!
//! Entries this module does not understand (non-object sources, non-string
//! destination values) are carried through saves untouched.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::types::{Destination, SourceId};

/// Typed view of the watermarks: source -> destination key -> item id
pub type Watermarks = BTreeMap<String, BTreeMap<String, String>>;

/// Watermark store with buffered writes and atomic flush
///
/// `set` only touches memory; `flush` persists everything at once by writing
/// a temporary file next to the target and renaming it into place.
pub struct WatermarkStore {
    path: PathBuf,
    state: RwLock<StoreState>,
}

#[derive(Default)]
struct StoreState {
    /// Document as last read from or written to disk
    persisted: Map<String, Value>,
    /// Document including unflushed changes
    pending: Map<String, Value>,
    dirty: bool,
}

impl WatermarkStore {
    /// Open the store at `path`
    ///
    /// A missing file yields an empty store. An unreadable or corrupt file is
    /// logged and also yields an empty store; the next flush replaces it.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = match load_document(&path) {
            Ok(document) => document,
            Err(e) => {
                warn!(path = %path.display(), "{}, starting with no watermarks", e);
                Map::new()
            }
        };

        Self {
            path,
            state: RwLock::new(StoreState {
                persisted: document.clone(),
                pending: document,
                dirty: false,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last delivered item id for the pair, if any
    pub fn get(&self, source: &SourceId, destination: &Destination) -> Option<String> {
        let state = self.read();
        state
            .pending
            .get(source.as_str())
            .and_then(Value::as_object)
            .and_then(|dests| dests.get(&destination.key()))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Record `item_id` as delivered for the pair (in memory until `flush`)
    pub fn set(&self, source: &SourceId, destination: &Destination, item_id: &str) {
        let mut guard = self.write();
        let state = &mut *guard;
        let entry = state
            .pending
            .entry(source.as_str().to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        if !entry.is_object() {
            warn!(
                source = %source,
                "Replacing unrecognized watermark entry with destination map"
            );
            *entry = Value::Object(Map::new());
        }

        if let Value::Object(dests) = entry {
            let key = destination.key();
            if dests.get(&key).and_then(Value::as_str) == Some(item_id) {
                return;
            }
            dests.insert(key, Value::String(item_id.to_string()));
            state.dirty = true;
        }
    }

    /// Whether there are changes not yet persisted
    pub fn is_dirty(&self) -> bool {
        self.read().dirty
    }

    /// Persist all pending changes atomically
    ///
    /// Either the whole document lands on disk or the previous file is left
    /// intact. Holding the write lock for the duration keeps `set` out.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut guard = self.write();
        let state = &mut *guard;
        if !state.dirty {
            debug!(path = %self.path.display(), "No watermark changes to flush");
            return Ok(());
        }

        let bytes = serde_json::to_vec_pretty(&state.pending)?;
        write_atomic(&self.path, &bytes)?;

        state.persisted = state.pending.clone();
        state.dirty = false;
        debug!(path = %self.path.display(), "Flushed watermarks");
        Ok(())
    }

    /// Drop unflushed changes, reverting to the last persisted document
    pub fn discard_pending(&self) {
        let mut guard = self.write();
        let state = &mut *guard;
        state.pending = state.persisted.clone();
        state.dirty = false;
    }

    /// Typed copy of the current watermarks (including unflushed ones)
    pub fn snapshot(&self) -> Watermarks {
        let state = self.read();
        state
            .pending
            .iter()
            .filter_map(|(source, value)| {
                let dests = value.as_object()?;
                let typed: BTreeMap<String, String> = dests
                    .iter()
                    .filter_map(|(dest, id)| Some((dest.clone(), id.as_str()?.to_string())))
                    .collect();
                Some((source.clone(), typed))
            })
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn load_document(path: &Path) -> Result<Map<String, Value>, StoreError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(e) => return Err(StoreError::Corrupt(format!("Failed to read: {}", e))),
    };

    if content.trim().is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Err(StoreError::Corrupt("Top level is not an object".to_string())),
        Err(e) => Err(StoreError::Corrupt(e.to_string())),
    }
}

/// Temporary sibling used for atomic replace: `<file name>.tmp`
fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Write(format!("Failed to create directory: {}", e)))?;
    }

    let tmp_path = tmp_path_for(path);
    let write_tmp = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o644))?;
        }
        // Data must be on disk before the rename makes it visible
        file.sync_all()
    };
    if let Err(e) = write_tmp() {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(StoreError::Write(format!(
            "Failed to write {}: {}",
            tmp_path.display(),
            e
        )));
    }

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        StoreError::Write(format!("Failed to replace {}: {}", path.display(), e))
    })?;

    // Persist the directory entry so the rename survives a power loss
    #[cfg(unix)]
    {
        let dir = parent.unwrap_or_else(|| Path::new("."));
        std::fs::File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(|e| StoreError::Write(format!("Failed to sync {}: {}", dir.display(), e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn source(id: &str) -> SourceId {
        SourceId::new(id)
    }

    fn dest(platform: &str, handle: Option<&str>) -> Destination {
        Destination::new(platform, handle)
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = WatermarkStore::open(temp_dir.path().join("watermarks.json"));

        assert_eq!(store.get(&source("UC1"), &dest("twitter", None)), None);
        assert!(store.snapshot().is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_corrupted_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("watermarks.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = WatermarkStore::open(&path);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn test_non_object_document_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("watermarks.json");
        std::fs::write(&path, r#"["UC1", "v1"]"#).unwrap();

        assert!(WatermarkStore::open(&path).snapshot().is_empty());
    }

    #[test]
    fn test_set_is_not_persisted_until_flush() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("watermarks.json");

        let store = WatermarkStore::open(&path);
        store.set(&source("UC1"), &dest("twitter", Some("alice")), "v1");

        assert_eq!(
            store.get(&source("UC1"), &dest("twitter", Some("alice"))),
            Some("v1".to_string())
        );
        assert!(store.is_dirty());
        assert!(!path.exists());

        store.flush().unwrap();
        assert!(path.exists());
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("watermarks.json");

        let store = WatermarkStore::open(&path);
        store.set(&source("UC1"), &dest("twitter", Some("alice")), "v4");
        store.set(&source("UC1"), &dest("mastodon", None), "v3");
        store.set(&source("UC2"), &dest("twitter", None), "x9");
        store.flush().unwrap();

        let reloaded = WatermarkStore::open(&path);
        assert_eq!(reloaded.snapshot(), store.snapshot());
        assert_eq!(reloaded.snapshot()["UC1"]["twitter:alice"], "v4");
        assert_eq!(reloaded.snapshot()["UC1"]["mastodon"], "v3");
        // Destinations never written do not appear at all
        assert!(!reloaded.snapshot()["UC2"].contains_key("mastodon"));
    }

    #[test]
    fn test_unknown_entries_are_preserved() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("watermarks.json");
        std::fs::write(
            &path,
            r#"{
                "UC1": { "twitter": "v1", "note": { "since": 2021 } },
                "UClegacy": "abc",
                "_schema": 2
            }"#,
        )
        .unwrap();

        let store = WatermarkStore::open(&path);
        store.set(&source("UC1"), &dest("twitter", None), "v2");
        store.flush().unwrap();

        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["UC1"]["twitter"], "v2");
        assert_eq!(raw["UC1"]["note"]["since"], 2021);
        assert_eq!(raw["UClegacy"], "abc");
        assert_eq!(raw["_schema"], 2);

        // The typed view only exposes string watermarks
        let snapshot = store.snapshot();
        assert_eq!(snapshot["UC1"].len(), 1);
        assert!(!snapshot.contains_key("UClegacy"));
    }

    #[test]
    fn test_flush_without_changes_does_not_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("watermarks.json");

        let store = WatermarkStore::open(&path);
        store.flush().unwrap();
        assert!(!path.exists());

        // Setting the same value again is not a change
        store.set(&source("UC1"), &dest("twitter", None), "v1");
        store.flush().unwrap();
        store.set(&source("UC1"), &dest("twitter", None), "v1");
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_flush_leaves_no_temp_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("watermarks.json");

        let store = WatermarkStore::open(&path);
        store.set(&source("UC1"), &dest("twitter", None), "v1");
        store.flush().unwrap();

        assert!(!tmp_path_for(&path).exists());
        assert!(!temp_dir.path().join("watermarks.tmp").exists());
    }

    #[test]
    fn test_tmp_path_appends_to_full_file_name() {
        assert_eq!(
            tmp_path_for(Path::new("/var/lib/castwatch/watermarks.json")),
            PathBuf::from("/var/lib/castwatch/watermarks.json.tmp")
        );
        assert_eq!(
            tmp_path_for(Path::new("state.tmp")),
            PathBuf::from("state.tmp.tmp")
        );
    }

    #[test]
    fn test_flush_to_path_ending_in_tmp() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("watermarks.tmp");

        let store = WatermarkStore::open(&path);
        store.set(&source("UC1"), &dest("twitter", None), "v1");
        store.flush().unwrap();

        assert!(!tmp_path_for(&path).exists());
        let reloaded = WatermarkStore::open(&path);
        assert_eq!(
            reloaded.get(&source("UC1"), &dest("twitter", None)).as_deref(),
            Some("v1")
        );
    }

    #[test]
    fn test_write_atomic_replaces_whole_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("watermarks.json");

        write_atomic(&path, br#"{"UC1":{"twitter":"v1","mastodon":"v1"}}"#).unwrap();
        write_atomic(&path, br#"{"UC1":{"twitter":"v2"}}"#).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            r#"{"UC1":{"twitter":"v2"}}"#
        );
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("watermarks.json")]);
    }

    #[test]
    fn test_failed_flush_keeps_previous_file_and_can_discard() {
        let temp_dir = TempDir::new().unwrap();
        // Parent "directory" is a regular file, so nothing can be written below it
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let path = blocker.join("watermarks.json");

        let store = WatermarkStore::open(&path);
        store.set(&source("UC1"), &dest("twitter", None), "v1");

        let err = store.flush().unwrap_err();
        assert!(matches!(err, StoreError::Write(_)));
        assert!(store.is_dirty());

        store.discard_pending();
        assert!(!store.is_dirty());
        assert_eq!(store.get(&source("UC1"), &dest("twitter", None)), None);
    }

    #[test]
    fn test_discard_reverts_to_last_flush() {
        let temp_dir = TempDir::new().unwrap();
        let store = WatermarkStore::open(temp_dir.path().join("watermarks.json"));

        store.set(&source("UC1"), &dest("twitter", None), "v1");
        store.flush().unwrap();
        store.set(&source("UC1"), &dest("twitter", None), "v2");
        store.discard_pending();

        assert_eq!(
            store.get(&source("UC1"), &dest("twitter", None)),
            Some("v1".to_string())
        );
    }

    #[test]
    #[cfg(unix)]
    fn test_state_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("watermarks.json");
        let store = WatermarkStore::open(&path);
        store.set(&source("UC1"), &dest("twitter", None), "v1");
        store.flush().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn test_thread_safety() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(WatermarkStore::open(temp_dir.path().join("watermarks.json")));

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.set(
                        &SourceId::new(format!("UC{}", i)),
                        &Destination::new("twitter", None),
                        &format!("v{}", i),
                    );
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        store.flush().unwrap();
        assert_eq!(store.snapshot().len(), 10);
    }
}
