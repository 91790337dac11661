//! On-disk artifact store with an in-memory read cache.
//!
//! # Design
//! Each [`AppContext`](crate::app::AppContext) owns its store, so two apps
//! in one process never share cached credentials. Writers serialize on a
//! mutex and, while holding it, drop the cache entry, stage the content in a
//! sibling temp file, rename it over the target and insert the new content.
//! Readers take only the cache's read lock and fall back to disk on a miss.
//! The rename is atomic, so a reader may see the previous content while a
//! write is in flight but never a partial one.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::ApiError;

#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    cache: RwLock<HashMap<PathBuf, Vec<u8>>>,
    writer: Mutex<()>,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative names resolve under the root; absolute paths are kept.
    pub fn path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.root.join(name)
    }

    pub fn write(&self, name: impl AsRef<Path>, content: impl AsRef<[u8]>) -> Result<PathBuf, ApiError> {
        let path = self.path(name);
        let content = content.as_ref();
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&path);
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;
        let mut staged = NamedTempFile::new_in(parent)?;
        staged.write_all(content)?;
        staged.persist(&path).map_err(|e| e.error)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.clone(), content.to_vec());
        Ok(path)
    }

    pub fn read(&self, name: impl AsRef<Path>) -> Result<Vec<u8>, ApiError> {
        let path = self.path(name);
        if let Some(hit) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&path)
        {
            return Ok(hit.clone());
        }
        let content = fs::read(&path)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path)
            .or_insert_with(|| content.clone());
        Ok(content)
    }

    pub fn write_json<T: Serialize>(&self, name: impl AsRef<Path>, value: &T) -> Result<PathBuf, ApiError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| ApiError::SerializationError(e.to_string()))?;
        self.write(name, bytes)
    }

    pub fn read_json<T: DeserializeOwned>(&self, name: impl AsRef<Path>) -> Result<T, ApiError> {
        let bytes = self.read(name)?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::DeserializationError(e.to_string()))
    }

    /// Drops the cached copy; the file stays.
    pub fn invalidate(&self, name: impl AsRef<Path>) {
        let path = self.path(name);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&path);
    }
}
