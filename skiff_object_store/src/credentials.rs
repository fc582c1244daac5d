//! Credential resolution for the object sink.

use serde::Deserialize;

use crate::{ObjectSinkError, Result};

/// Ambient credentials handed to the store builder.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkCredentials {
    #[serde(rename = "accessKey")]
    pub access_key: String,
    #[serde(rename = "secretKey")]
    pub secret_key: String,
}

/// Produces the credentials used when building the downstream store client.
///
/// Implementations may load the secret from an external service; resolution
/// happens once, when the sink is opened.
#[async_trait::async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self) -> Result<SinkCredentials>;
}

/// Resolver that parses credentials from an inline JSON parameter map,
/// e.g. `{"accessKey":"my-access-key","secretKey":"my-secret-key"}`.
pub struct StaticCredentialResolver {
    param: String,
}

impl StaticCredentialResolver {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }
}

#[async_trait::async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self) -> Result<SinkCredentials> {
        serde_json::from_str(&self.param).map_err(|err| ObjectSinkError::Credentials {
            message: format!("failed to parse credential parameter: {err}"),
        })
    }
}
