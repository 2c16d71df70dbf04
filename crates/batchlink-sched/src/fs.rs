//! Filesystem collaborator used for job scripts and exit-code sentinels.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

/// Path-addressed file access on the machine where jobs run.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read a whole file as UTF-8 text.
    async fn read_text(&self, path: &Path) -> std::io::Result<String>;

    /// Create or replace a file.
    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;

    /// Check whether a path exists.
    async fn exists(&self, path: &Path) -> std::io::Result<bool>;

    /// Remove a file.
    async fn unlink(&self, path: &Path) -> std::io::Result<()>;

    /// List the entries of a directory.
    async fn iterdir(&self, path: &Path) -> std::io::Result<Vec<PathBuf>>;

    /// Create a directory and all missing parents.
    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
}

/// The local filesystem.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Create a new local filesystem handle.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn read_text(&self, path: &Path) -> std::io::Result<String> {
        fs::read_to_string(path).await
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        fs::write(path, contents).await
    }

    async fn exists(&self, path: &Path) -> std::io::Result<bool> {
        fs::try_exists(path).await
    }

    async fn unlink(&self, path: &Path) -> std::io::Result<()> {
        fs::remove_file(path).await
    }

    async fn iterdir(&self, path: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = fs::read_dir(path).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }

    async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        fs::create_dir_all(path).await
    }
}
