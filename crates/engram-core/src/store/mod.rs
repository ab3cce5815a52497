//! Storage back-ends
//!
//! The store contract: load the whole state, save it with its canonical
//! snapshot text, and optionally serve ranked keyword search. Back-end
//! selection comes from configuration; saves go through a single sequential
//! path owned by the engine.

mod file;
mod sqlite;

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::config::{BackendKind, EngineConfig};
use crate::error::{EngineError, Result};
use crate::memory::MemoryState;

pub use file::FileStore;
pub use sqlite::SqliteStore;

/// A durable back-end for the memory state
pub trait StoreBackend: Send {
    /// Load prior state; `None` when no snapshot exists yet
    fn load(&self) -> Result<Option<MemoryState>>;

    /// Persist the state together with its canonical snapshot text
    fn save(&self, state: &MemoryState, snapshot_text: &str) -> Result<()>;

    /// Whether this back-end serves ranked keyword search
    fn supports_search(&self) -> bool {
        false
    }

    /// Ranked keyword search `(id, rank)`, best first; empty scope matches all
    fn search(&self, _query: &str, _limit: usize, _scope: &str) -> Result<Vec<(String, f64)>> {
        Ok(Vec::new())
    }
}

/// Resolve the data file path for a back-end
fn data_path(config: &EngineConfig, file_name: &str) -> Result<PathBuf> {
    if let Some(path) = &config.data_path {
        return Ok(path.clone());
    }
    let dirs = ProjectDirs::from("com", "engram", "core")
        .ok_or_else(|| EngineError::Storage("could not determine data directory".to_string()))?;
    let dir = dirs.data_dir();
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
    }
    Ok(dir.join(file_name))
}

/// Open the configured back-end
pub fn open_backend(config: &EngineConfig) -> Result<Box<dyn StoreBackend>> {
    match config.backend {
        BackendKind::File => Ok(Box::new(FileStore::new(data_path(config, "engram.mem")?))),
        BackendKind::Sqlite => Ok(Box::new(SqliteStore::open(data_path(config, "engram.db")?)?)),
    }
}
