//! Single-file snapshot store
//!
//! Persists the canonical snapshot text as one file. Writes go to a
//! temporary sibling first and land with an atomic rename, so a crashed
//! save never corrupts the previous snapshot.

use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::memory::MemoryState;
use crate::snapshot::parse_snapshot;
use crate::store::StoreBackend;

/// Snapshot-file back-end
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store over the given snapshot path
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The snapshot path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl StoreBackend for FileStore {
    fn load(&self) -> Result<Option<MemoryState>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        let state = parse_snapshot(&text)?;
        debug!(items = state.items.len(), "loaded snapshot");
        Ok(Some(state))
    }

    fn save(&self, _state: &MemoryState, snapshot_text: &str) -> Result<()> {
        let tmp = self.path.with_extension("mem.tmp");
        std::fs::write(&tmp, snapshot_text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::graph::remember;
    use crate::memory::RememberInput;
    use crate::snapshot::write_snapshot;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_yields_none() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("engram.mem"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("engram.mem"));

        let mut state = MemoryState::new("w", Utc::now());
        remember(
            &mut state,
            RememberInput {
                text: "durable".to_string(),
                kind: None,
                importance: None,
                ttl: None,
                tags: vec![],
                scope: None,
            },
            &SystemClock,
        )
        .unwrap();

        store.save(&state, &write_snapshot(&state)).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.items.len(), 1);
        assert!(!store.supports_search());
    }

    #[test]
    fn test_corrupt_snapshot_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engram.mem");
        std::fs::write(&path, "(memory").unwrap();
        let store = FileStore::new(path);
        assert!(store.load().is_err());
    }
}
