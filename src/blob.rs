//! Opaque storage for uploaded attachment bytes.

use anyhow::{Result, anyhow};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Where attachment bytes live. Paths are opaque strings owned by the store.
pub trait BlobStore: Send + Sync {
    /// Save bytes and return the stored path.
    fn save(&self, name: &str, bytes: &[u8]) -> Result<String>;

    /// Remove a stored blob. Missing blobs are not an error.
    fn delete(&self, path: &str) -> Result<()>;
}

/// Blob store backed by a media directory on the local filesystem.
pub struct FsBlobStore {
    root: PathBuf,
    counter: AtomicU64,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(anyhow!("invalid blob path: {}", path));
        }
        Ok(self.root.join(rel))
    }
}

fn file_name_only(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file");
    if base.is_empty() { "file".to_string() } else { base.to_string() }
}

impl BlobStore for FsBlobStore {
    fn save(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.root.join("task_files");
        fs::create_dir_all(&dir)?;

        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let stored = format!(
            "task_files/{}_{}_{}",
            crate::db::now_ms(),
            seq,
            file_name_only(name)
        );
        fs::write(self.root.join(&stored), bytes)?;
        Ok(stored)
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
