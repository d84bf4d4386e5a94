//! # Provider module
//!
//! This module provides command line interface functions to inspect the
//! resources exposed by the provider

use std::sync::Arc;

use async_trait::async_trait;
use clap::Subcommand;

use crate::{
    cmd::Executor,
    svc::{self, cfg::Configuration},
};

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to configure provider, {0}")]
    Configure(svc::provider::Error),
    #[error("failed to serialize provider resources, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// Provider enum

#[derive(Subcommand, Clone, Debug)]
pub enum Provider {
    /// View the terraform resources exposed as custom resources
    #[clap(name = "resources", aliases = &["r"])]
    Resources,
}

#[async_trait]
impl Executor for Provider {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(_config)))]
    async fn execute(&self, _config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::Resources => {
                print!("{}", resources()?);
                Ok(())
            }
        }
    }
}

/// returns the configured resources of the provider serialized as yaml
pub fn resources() -> Result<String, Error> {
    let provider = svc::provider::new().map_err(Error::Configure)?;

    serde_yaml::to_string(&provider).map_err(Error::Serialize)
}
