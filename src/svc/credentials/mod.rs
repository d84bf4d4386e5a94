//! # Credentials module
//!
//! This module resolves raw credential bytes from the source declared by a
//! provider configuration: a kubernetes secret, an environment variable or a
//! file mounted in the provider's pod.

use std::{
    env::VarError,
    fmt::{self, Display, Formatter},
    path::PathBuf,
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
#[cfg(test)]
use mockall::automock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

// -----------------------------------------------------------------------------
// Source enum

/// where the credentials of a provider configuration are read from
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
pub enum Source {
    None,
    Secret,
    InjectedIdentity,
    Environment,
    Filesystem,
}

impl Display for Source {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Secret => write!(f, "Secret"),
            Self::InjectedIdentity => write!(f, "InjectedIdentity"),
            Self::Environment => write!(f, "Environment"),
            Self::Filesystem => write!(f, "Filesystem"),
        }
    }
}

// -----------------------------------------------------------------------------
// Selectors structures

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct SecretKeySelector {
    #[serde(rename = "namespace")]
    pub namespace: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "key")]
    pub key: String,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct EnvSelector {
    #[serde(rename = "name")]
    pub name: String,
}

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct FsSelector {
    #[serde(rename = "path")]
    pub path: PathBuf,
}

/// selectors of the credential sources, only the one matching the [`Source`]
/// is read
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Selectors {
    #[serde(rename = "secretRef", default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeySelector>,
    #[serde(rename = "env", default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvSelector>,
    #[serde(rename = "fs", default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsSelector>,
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("credentials source '{0}' requires the '{1}' selector")]
    MissingSelector(Source, &'static str),
    #[error("credentials source '{0}' is not supported")]
    Unsupported(Source),
    #[error("failed to retrieve secret '{0}/{1}', {2}")]
    Secret(String, String, kube::Error),
    #[error("failed to find key '{0}' in secret '{1}/{2}'")]
    SecretKey(String, String, String),
    #[error("failed to read environment variable '{0}', {1}")]
    Environment(String, VarError),
    #[error("failed to read file '{0}', {1}")]
    Filesystem(PathBuf, std::io::Error),
}

// -----------------------------------------------------------------------------
// Extractor trait

/// resolves the raw bytes of credentials from a declared source
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, source: &Source, selectors: &Selectors) -> Result<Vec<u8>, Error>;
}

// -----------------------------------------------------------------------------
// CommonExtractor structure

/// extractor supporting every source a provider configuration may declare
/// except injected identities
#[derive(Clone)]
pub struct CommonExtractor {
    kube: kube::Client,
}

impl From<kube::Client> for CommonExtractor {
    fn from(kube: kube::Client) -> Self {
        Self { kube }
    }
}

#[async_trait]
impl Extractor for CommonExtractor {
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn extract(&self, source: &Source, selectors: &Selectors) -> Result<Vec<u8>, Error> {
        match source {
            Source::None => Ok(vec![]),
            Source::Secret => {
                let selector = selectors
                    .secret_ref
                    .as_ref()
                    .ok_or(Error::MissingSelector(*source, "secretRef"))?;

                from_secret(self.kube.to_owned(), selector).await
            }
            Source::Environment => {
                let selector = selectors
                    .env
                    .as_ref()
                    .ok_or(Error::MissingSelector(*source, "env"))?;

                from_environment(selector)
            }
            Source::Filesystem => {
                let selector = selectors
                    .fs
                    .as_ref()
                    .ok_or(Error::MissingSelector(*source, "fs"))?;

                from_filesystem(selector).await
            }
            Source::InjectedIdentity => Err(Error::Unsupported(*source)),
        }
    }
}

// -----------------------------------------------------------------------------
// helpers

/// returns the value of the selected key in the kubernetes secret
pub async fn from_secret(client: kube::Client, selector: &SecretKeySelector) -> Result<Vec<u8>, Error> {
    let SecretKeySelector {
        namespace,
        name,
        key,
    } = selector;

    debug!(
        namespace = namespace,
        name = name,
        key = key,
        "Execute a request to retrieve credentials from secret"
    );

    let secret = Api::<Secret>::namespaced(client, namespace)
        .get(name)
        .await
        .map_err(|err| Error::Secret(namespace.to_owned(), name.to_owned(), err))?;

    secret
        .data
        .and_then(|mut data| data.remove(key))
        .map(|bytes| bytes.0)
        .ok_or_else(|| Error::SecretKey(key.to_owned(), namespace.to_owned(), name.to_owned()))
}

/// returns the value of the selected environment variable
pub fn from_environment(selector: &EnvSelector) -> Result<Vec<u8>, Error> {
    debug!(name = &selector.name, "Read credentials from environment variable");

    std::env::var(&selector.name)
        .map(String::into_bytes)
        .map_err(|err| Error::Environment(selector.name.to_owned(), err))
}

/// returns the content of the selected file
pub async fn from_filesystem(selector: &FsSelector) -> Result<Vec<u8>, Error> {
    debug!(path = ?selector.path, "Read credentials from file");

    tokio::fs::read(&selector.path)
        .await
        .map_err(|err| Error::Filesystem(selector.path.to_owned(), err))
}
