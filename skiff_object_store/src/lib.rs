//! Object sink abstraction for bulk batch uploads.
//!
//! The pipeline core hands finished batches to an [`ObjectSink`]: a named,
//! opaque byte blob goes in, and the write either confirms or fails. This
//! crate provides the trait together with implementations backed by the
//! `object_store` crate — a cloud bucket builder for production and
//! local/temporary filesystem sinks for development and tests.
//!
//! How the sink obtains its credentials is abstracted behind
//! [`CredentialResolver`]; an implementation may, for example, fetch the
//! secret from an external vault service before the store client is built.

pub mod cloud;
pub mod credentials;
pub mod local;

use std::sync::Arc;

use bytes::Bytes;
use object_store::{path::Path, ObjectStore, PutMode, PutOptions, PutPayload};
use snafu::{ResultExt, Snafu};

pub use cloud::{create_bucket_sink, BucketSinkOptions};
pub use credentials::{CredentialResolver, SinkCredentials, StaticCredentialResolver};
pub use local::{LocalFileSystemSink, TemporaryFileSystemSink};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ObjectSinkError {
    #[snafu(display("failed to create {store_type} object store: {message}"))]
    Creation {
        store_type: &'static str,
        message: String,
        source: object_store::Error,
    },
    #[snafu(display("failed to upload object '{key}': {message}"))]
    Upload {
        key: String,
        message: String,
        source: object_store::Error,
    },
    #[snafu(display("invalid sink credentials: {message}"))]
    Credentials { message: String },
}

pub type Result<T, E = ObjectSinkError> = std::result::Result<T, E>;

/// Downstream sink that accepts a named, opaque byte blob.
#[async_trait::async_trait]
pub trait ObjectSink: Send + Sync {
    /// Store `data` under `key`, confirming or failing the write.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;
}

/// [`ObjectSink`] backed by any `object_store` implementation.
///
/// Writes use `PutMode::Create` so a duplicate key fails instead of silently
/// replacing an earlier batch.
pub struct StoreBackedSink {
    store: Arc<dyn ObjectStore>,
}

impl StoreBackedSink {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl ObjectSink for StoreBackedSink {
    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.store
            .put_opts(
                &Path::from(key),
                PutPayload::from_bytes(data),
                PutOptions {
                    mode: PutMode::Create,
                    ..Default::default()
                },
            )
            .await
            .context(UploadSnafu {
                key,
                message: "object store rejected the write",
            })?;

        Ok(())
    }
}
