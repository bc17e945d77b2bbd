//! Bookmark store implementation
//!
//! Provides file-based bookmark persistence with atomic writes.

use super::types::{Bookmark, BookmarkState, ReplicationValue};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Per-entity bookmarks shared by every extraction worker
#[derive(Debug, Clone)]
pub struct BookmarkStore {
    /// Where `flush` writes; `None` keeps bookmarks in memory only
    path: Option<PathBuf>,
    state: Arc<RwLock<BookmarkState>>,
    /// Serialises flushes so concurrent writers never share the temp file
    flush_lock: Arc<Mutex<()>>,
}

impl BookmarkStore {
    /// Create a store that persists to `path`, starting empty
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            state: Arc::new(RwLock::new(BookmarkState::new())),
            flush_lock: Arc::default(),
        }
    }

    /// Create an in-memory store (no file persistence)
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Arc::new(RwLock::new(BookmarkState::new())),
            flush_lock: Arc::default(),
        }
    }

    /// Create a store from a file, loading existing bookmarks if present
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::state(format!("Failed to read state file: {e}")))?;
            parse_state(&contents)?
        } else {
            BookmarkState::new()
        };

        Ok(Self {
            path: Some(path),
            state: Arc::new(RwLock::new(state)),
            flush_lock: Arc::default(),
        })
    }

    /// Create an in-memory store from inline JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self {
            path: None,
            state: Arc::new(RwLock::new(parse_state(json)?)),
            flush_lock: Arc::default(),
        })
    }

    /// Persist to `path` on every flush from now on
    #[must_use]
    pub fn persist_to(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    pub async fn get(&self, entity: &str) -> Option<Bookmark> {
        self.state.read().await.get(entity).cloned()
    }

    /// Move the entity's bookmark forward; lower candidates are ignored
    pub async fn advance(&self, entity: &str, candidate: ReplicationValue) -> bool {
        self.state.write().await.advance(entity, candidate)
    }

    /// Filter lower bound for an entity's next extraction
    ///
    /// Uses the stored bookmark minus `lookback`, or `start_date` when the
    /// entity has never been extracted.
    pub async fn lower_bound(
        &self,
        entity: &str,
        lookback: chrono::Duration,
        start_date: Option<&str>,
    ) -> Option<String> {
        match self.get(entity).await {
            Some(bookmark) => Some(bookmark.lower_bound(lookback)),
            None => start_date.map(ToString::to_string),
        }
    }

    /// Copy of every bookmark
    pub async fn snapshot(&self) -> BookmarkState {
        self.state.read().await.clone()
    }

    /// Write bookmarks to durable storage
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(()); // In-memory mode
        };

        let _guard = self.flush_lock.lock().await;
        let contents = self.to_json_pretty().await?;

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents)
            .await
            .map_err(|e| Error::state(format!("Failed to write state file: {e}")))?;
        tokio::fs::rename(&temp_path, path)
            .await
            .map_err(|e| Error::state(format!("Failed to rename state file: {e}")))?;

        debug!(path = %path.display(), "bookmarks flushed");
        Ok(())
    }

    /// Export bookmarks as a JSON string
    pub async fn to_json(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string(&*state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))
    }

    pub async fn to_json_pretty(&self) -> Result<String> {
        let state = self.state.read().await;
        serde_json::to_string_pretty(&*state)
            .map_err(|e| Error::state(format!("Failed to serialize state: {e}")))
    }
}

fn parse_state(contents: &str) -> Result<BookmarkState> {
    if contents.trim().is_empty() {
        return Ok(BookmarkState::new());
    }
    serde_json::from_str(contents)
        .map_err(|e| Error::state(format!("Failed to parse state: {e}")))
}
