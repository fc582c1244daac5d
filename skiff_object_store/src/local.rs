//! Local filesystem sinks.
//!
//! `LocalFileSystemSink` stores blobs under a configured root directory.
//! `TemporaryFileSystemSink` places the root in a temporary location that is
//! removed when the sink is dropped, which is what the integration tests use.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use object_store::local::LocalFileSystem;

use crate::{ObjectSink, ObjectSinkError, Result, StoreBackedSink};

pub struct LocalFileSystemSink {
    root_path: PathBuf,
    inner: StoreBackedSink,
}

impl LocalFileSystemSink {
    pub fn new(root_path: impl AsRef<Path>) -> Result<Self> {
        let canonical_path = std::fs::canonicalize(root_path.as_ref()).map_err(|err| {
            ObjectSinkError::Creation {
                store_type: "LocalFileSystem",
                message: "failed to canonicalize the root path".to_string(),
                source: object_store::Error::Generic {
                    store: "LocalFileSystem",
                    source: Box::new(err),
                },
            }
        })?;

        let store =
            LocalFileSystem::new_with_prefix(&canonical_path).map_err(|err| {
                ObjectSinkError::Creation {
                    store_type: "LocalFileSystem",
                    message: "failed to open the root directory".to_string(),
                    source: err,
                }
            })?;

        Ok(Self {
            root_path: canonical_path,
            inner: StoreBackedSink::new(Arc::new(store)),
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }
}

#[async_trait::async_trait]
impl ObjectSink for LocalFileSystemSink {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.inner.put(key, data).await
    }
}

pub struct TemporaryFileSystemSink {
    _temp_dir: tempfile::TempDir,
    inner: LocalFileSystemSink,
}

impl TemporaryFileSystemSink {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::TempDir::new().map_err(|err| ObjectSinkError::Creation {
            store_type: "TemporaryFileSystem",
            message: "failed to create the temporary directory".to_string(),
            source: object_store::Error::Generic {
                store: "TemporaryFileSystem",
                source: Box::new(err),
            },
        })?;

        let inner = LocalFileSystemSink::new(temp_dir.path())?;

        Ok(Self {
            _temp_dir: temp_dir,
            inner,
        })
    }

    pub fn root_path(&self) -> &Path {
        self.inner.root_path()
    }
}

#[async_trait::async_trait]
impl ObjectSink for TemporaryFileSystemSink {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.inner.put(key, data).await
    }
}
