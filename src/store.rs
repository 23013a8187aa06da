//! Local file storage for fetched files
//!
//! Files are published atomically: bytes go to a temporary file in the
//! destination directory, which is synced and then renamed over the final
//! path. Readers see either no file or the complete file.

use crate::error::FetchError;
use crate::path_classifier::is_safe_relative;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::fs;
use tracing::debug;

/// Storage the proxy materializes files into
///
/// Paths are relative to the public file namespace root.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Whether a complete file exists at `relative_path`
    async fn exists(&self, relative_path: &str) -> bool;

    /// Publish `data` at `relative_path`, creating parent directories
    async fn write(&self, relative_path: &str, data: Bytes) -> Result<(), FetchError>;
}

/// File system store rooted at the local public file directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        FsStore {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of a relative path, if it stays inside the root
    pub fn path_for(&self, relative_path: &str) -> Option<PathBuf> {
        if !is_safe_relative(relative_path) {
            return None;
        }
        Some(self.root.join(relative_path))
    }
}

#[async_trait]
impl LocalStore for FsStore {
    async fn exists(&self, relative_path: &str) -> bool {
        match self.path_for(relative_path) {
            Some(path) => fs::metadata(&path)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false),
            None => false,
        }
    }

    async fn write(&self, relative_path: &str, data: Bytes) -> Result<(), FetchError> {
        let destination = self.path_for(relative_path).ok_or_else(|| {
            FetchError::LocalWriteError(format!("Refusing to write outside store: {}", relative_path))
        })?;

        let len = data.len();
        let target = destination.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &data))
            .await
            .map_err(|e| FetchError::LocalWriteError(format!("Write task failed: {}", e)))??;

        debug!("Published {} ({} bytes)", destination.display(), len);
        Ok(())
    }
}

/// Write `data` to `destination` through a temporary file and rename
fn write_atomic(destination: &Path, data: &[u8]) -> Result<(), FetchError> {
    let parent = destination.parent().ok_or_else(|| {
        FetchError::LocalWriteError(format!("No parent directory for {}", destination.display()))
    })?;

    std::fs::create_dir_all(parent).map_err(|e| {
        FetchError::LocalWriteError(format!(
            "Failed to create directory {}: {}",
            parent.display(),
            e
        ))
    })?;

    let mut temp = tempfile::Builder::new()
        .prefix(".stage-file-proxy-")
        .tempfile_in(parent)
        .map_err(|e| FetchError::LocalWriteError(format!("Failed to create temp file: {}", e)))?;

    temp.write_all(data)
        .map_err(|e| FetchError::LocalWriteError(format!("Failed to write data: {}", e)))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| FetchError::LocalWriteError(format!("Failed to sync file: {}", e)))?;

    // Temp files are created owner-only; published files must be readable
    // by the web server.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o644))?;
    }

    temp.persist(destination).map_err(|e| {
        FetchError::LocalWriteError(format!(
            "Failed to publish {}: {}",
            destination.display(),
            e.error
        ))
    })?;

    Ok(())
}

/// In-memory store, used for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<HashMap<String, Bytes>>,
    writes: AtomicU64,
    fail_writes: bool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose writes always fail
    pub fn failing() -> Self {
        MemoryStore {
            fail_writes: true,
            ..Default::default()
        }
    }

    /// Seed a file
    pub fn insert(&self, relative_path: &str, data: impl Into<Bytes>) {
        if let Ok(mut files) = self.files.write() {
            files.insert(relative_path.to_string(), data.into());
        }
    }

    /// Contents of a stored file
    pub fn get(&self, relative_path: &str) -> Option<Bytes> {
        self.files.read().ok()?.get(relative_path).cloned()
    }

    /// Number of write attempts made
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn exists(&self, relative_path: &str) -> bool {
        self.files
            .read()
            .map(|files| files.contains_key(relative_path))
            .unwrap_or(false)
    }

    async fn write(&self, relative_path: &str, data: Bytes) -> Result<(), FetchError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes {
            return Err(FetchError::LocalWriteError("store is read-only".to_string()));
        }
        self.insert(relative_path, data);
        Ok(())
    }
}
