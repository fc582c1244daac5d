//! Cloud bucket sink built on the `object_store` AWS S3 support.
//!
//! Covers both real AWS endpoints (region only) and S3-compatible services
//! reached through an explicit endpoint.

use snafu::ResultExt;

use object_store::{aws::AmazonS3Builder, ClientOptions};

use crate::{CreationSnafu, CredentialResolver, Result, StoreBackedSink};

/// Connection options for a bucket-backed sink.
#[derive(Debug, Clone, Default)]
pub struct BucketSinkOptions {
    /// Bucket receiving the uploads.
    pub bucket_name: String,
    /// Explicit service endpoint, for S3-compatible stores.
    pub endpoint: Option<String>,
    /// Port appended to the endpoint when set.
    pub endpoint_port: Option<u16>,
    /// AWS region, when no explicit endpoint is used.
    pub region: Option<String>,
    /// Skip TLS certificate validation, for self-signed test endpoints.
    pub skip_certificate_validation: bool,
}

/// Builds a bucket sink, resolving credentials through `resolver`.
pub async fn create_bucket_sink(
    options: &BucketSinkOptions,
    resolver: &dyn CredentialResolver,
) -> Result<StoreBackedSink> {
    let credentials = resolver.resolve().await?;

    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(&options.bucket_name)
        .with_access_key_id(&credentials.access_key)
        .with_secret_access_key(&credentials.secret_key);

    if let Some(endpoint) = &options.endpoint {
        let endpoint = match options.endpoint_port {
            Some(port) => format!("{endpoint}:{port}"),
            None => endpoint.clone(),
        };
        builder = builder.with_endpoint(endpoint);
    }

    if let Some(region) = &options.region {
        builder = builder.with_region(region);
    }

    if options.skip_certificate_validation {
        builder = builder
            .with_client_options(ClientOptions::new().with_allow_invalid_certificates(true));
    }

    let store = builder.build().context(CreationSnafu {
        store_type: "AWS S3",
        message: "failed to build the bucket store client",
    })?;

    Ok(StoreBackedSink::new(std::sync::Arc::new(store)))
}
