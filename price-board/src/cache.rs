//! Persisted board symbol lists and user favourites.
//!
//! The cache is a single JSON document:
//! ```json
//! {
//!   "boards": { "VN30": ["ACB:G1:STX", "FPT:G1:STX"] },
//!   "favorites": [{ "id": "fav-1", "label": "Banks", "symbols": ["ACB:G1:STX"], "pinned": [] }]
//! }
//! ```
//! Entries that fail to parse are discarded individually; a file that fails to parse as a whole
//! is replaced by an empty cache on the next write.

use crate::{error::PipelineError, model::Symbol};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, warn};

/// A user-defined list of symbols.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct FavoriteList {
    pub id: SmolStr,
    pub label: String,
    pub symbols: Vec<Symbol>,
    /// Symbols kept at the top of the board, in order.
    #[serde(default)]
    pub pinned: Vec<Symbol>,
}

impl FavoriteList {
    /// Board order: pinned symbols first, then the remaining symbols in list order.
    pub fn ordered_symbols(&self) -> Vec<Symbol> {
        let mut ordered = self.pinned.clone();
        ordered.extend(
            self.symbols
                .iter()
                .filter(|symbol| !self.pinned.contains(symbol))
                .cloned(),
        );
        ordered
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct CacheDocument {
    #[serde(default)]
    boards: FnvHashMap<SmolStr, serde_json::Value>,
    #[serde(default)]
    favorites: Vec<serde_json::Value>,
}

/// Local cache shared by every clone. Without a path it lives in memory only.
#[derive(Debug, Clone, Default)]
pub struct LocalCache {
    path: Option<PathBuf>,
    document: Arc<Mutex<CacheDocument>>,
}

impl LocalCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the cache stored at `path`. A missing file yields an empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        let path = path.into();

        let document = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|error| {
                warn!(path = %path.display(), %error, "discarding unreadable cache file");
                CacheDocument::default()
            }),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cache file, starting empty");
                CacheDocument::default()
            }
            Err(error) => {
                return Err(PipelineError::Cache(format!(
                    "failed to read {}: {error}",
                    path.display()
                )));
            }
        };

        Ok(Self {
            path: Some(path),
            document: Arc::new(Mutex::new(document)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Cached symbol list of a board. A corrupt or empty entry is removed and reported as a miss.
    pub fn board_symbols(&self, board_id: &str) -> Option<Vec<Symbol>> {
        let mut document = self.document.lock();
        let value = document.boards.get(board_id)?;

        match serde_json::from_value::<Vec<Symbol>>(value.clone()) {
            Ok(symbols) if !symbols.is_empty() => Some(symbols),
            Ok(_) => {
                document.boards.remove(board_id);
                None
            }
            Err(error) => {
                warn!(board_id, %error, "discarding corrupt cached symbol list");
                document.boards.remove(board_id);
                None
            }
        }
    }

    pub fn store_board_symbols(
        &self,
        board_id: &str,
        symbols: &[Symbol],
    ) -> Result<(), PipelineError> {
        let value = serde_json::to_value(symbols)?;
        self.document
            .lock()
            .boards
            .insert(SmolStr::new(board_id), value);
        self.persist()
    }

    /// Every well-formed favourites list, in stored order.
    pub fn favorites(&self) -> Vec<FavoriteList> {
        let mut document = self.document.lock();
        let mut favorites = Vec::with_capacity(document.favorites.len());

        document.favorites.retain(|value| {
            match serde_json::from_value::<FavoriteList>(value.clone()) {
                Ok(list) => {
                    favorites.push(list);
                    true
                }
                Err(error) => {
                    warn!(%error, "discarding corrupt favourites list");
                    false
                }
            }
        });

        favorites
    }

    pub fn favorite(&self, id: &str) -> Option<FavoriteList> {
        self.favorites().into_iter().find(|list| list.id == id)
    }

    pub fn set_favorites(&self, favorites: &[FavoriteList]) -> Result<(), PipelineError> {
        let values = favorites
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.document.lock().favorites = values;
        self.persist()
    }

    /// Write the cache to disk. A no-op for an in-memory cache.
    pub fn persist(&self) -> Result<(), PipelineError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let contents = serde_json::to_string_pretty(&*self.document.lock())?;

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|error| {
                PipelineError::Cache(format!("failed to create {}: {error}", parent.display()))
            })?;
        }
        std::fs::write(path, contents).map_err(|error| {
            PipelineError::Cache(format!("failed to write {}: {error}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let id: u64 = rand::random();
        std::env::temp_dir().join(format!("price-board-{name}-{id:x}.json"))
    }

    fn symbols(symbols: &[&str]) -> Vec<Symbol> {
        symbols.iter().map(|symbol| Symbol::new(symbol)).collect()
    }

    #[test]
    fn test_missing_file_is_empty_cache() {
        let cache = LocalCache::load(temp_path("missing")).unwrap();
        assert_eq!(cache.board_symbols("VN30"), None);
        assert!(cache.favorites().is_empty());
    }

    #[test]
    fn test_board_symbols_persist_across_loads() {
        let path = temp_path("boards");
        let cache = LocalCache::load(&path).unwrap();
        cache
            .store_board_symbols("VN30", &symbols(&["ACB:G1:STX", "FPT:G1:STX"]))
            .unwrap();

        let reloaded = LocalCache::load(&path).unwrap();
        assert_eq!(
            reloaded.board_symbols("VN30"),
            Some(symbols(&["ACB:G1:STX", "FPT:G1:STX"]))
        );

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_corrupt_entries_are_discarded() {
        let path = temp_path("corrupt");
        std::fs::write(
            &path,
            r#"{
                "boards": { "VN30": 42, "HNX30": ["SHS:G1:HNX"], "EMPTY": [] },
                "favorites": [
                    { "id": "fav-1", "label": "Banks", "symbols": ["ACB:G1:STX"] },
                    { "label": "missing id" }
                ]
            }"#,
        )
        .unwrap();

        let cache = LocalCache::load(&path).unwrap();
        assert_eq!(cache.board_symbols("VN30"), None);
        assert_eq!(cache.board_symbols("EMPTY"), None);
        assert_eq!(cache.board_symbols("HNX30"), Some(symbols(&["SHS:G1:HNX"])));

        let favorites = cache.favorites();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, "fav-1");
        assert!(favorites[0].pinned.is_empty());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_unreadable_file_starts_empty() {
        let path = temp_path("garbage");
        std::fs::write(&path, "not json at all").unwrap();

        let cache = LocalCache::load(&path).unwrap();
        assert_eq!(cache.board_symbols("VN30"), None);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_favorite_ordering_puts_pinned_first() {
        let list = FavoriteList {
            id: SmolStr::new("fav-1"),
            label: "Banks".to_string(),
            symbols: symbols(&["ACB:G1:STX", "TCB:G1:STX", "VCB:G1:STX"]),
            pinned: symbols(&["VCB:G1:STX"]),
        };

        assert_eq!(
            list.ordered_symbols(),
            symbols(&["VCB:G1:STX", "ACB:G1:STX", "TCB:G1:STX"])
        );

        let cache = LocalCache::in_memory();
        cache.set_favorites(std::slice::from_ref(&list)).unwrap();
        assert_eq!(cache.favorite("fav-1"), Some(list));
        assert_eq!(cache.favorite("fav-2"), None);
    }
}
