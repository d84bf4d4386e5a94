//! # Custom resource definition module
//!
//! This module provides custom resource module command line interface function
//! implementation

use std::{error::Error as StdError, str::FromStr, sync::Arc};

use async_trait::async_trait;
use clap::Subcommand;
use kube::CustomResourceExt;

use crate::{
    cmd::Executor,
    svc::{
        cfg::Configuration,
        crd::{
            playlist::Playlist,
            provider_config::{ProviderConfig, ProviderConfigUsage},
        },
    },
};

// -----------------------------------------------------------------------------
// CustomResource enum

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub enum CustomResource {
    Playlist,
    ProviderConfig,
    ProviderConfigUsage,
}

impl FromStr for CustomResource {
    type Err = Box<dyn StdError + Send + Sync>;

    #[cfg_attr(feature = "trace", tracing::instrument)]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "playlist" => Ok(Self::Playlist),
            "provider-config" => Ok(Self::ProviderConfig),
            "provider-config-usage" => Ok(Self::ProviderConfigUsage),
            _ => Err(format!("failed to parse '{}', available options are 'playlist', 'provider-config' or 'provider-config-usage'", s).into()),
        }
    }
}

impl CustomResource {
    pub fn all() -> Vec<Self> {
        vec![Self::Playlist, Self::ProviderConfig, Self::ProviderConfigUsage]
    }

    /// returns the custom resource definition serialized as yaml
    pub fn to_yaml(&self) -> Result<String, Error> {
        match self {
            Self::Playlist => serde_yaml::to_string(&Playlist::crd()),
            Self::ProviderConfig => serde_yaml::to_string(&ProviderConfig::crd()),
            Self::ProviderConfigUsage => serde_yaml::to_string(&ProviderConfigUsage::crd()),
        }
        .map_err(Error::Serialize)
    }
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize custom resource definition, {0}")]
    Serialize(serde_yaml::Error),
}

// -----------------------------------------------------------------------------
// CustomResourceDefinition enum

#[derive(Subcommand, Clone, Debug)]
pub enum CustomResourceDefinition {
    /// View custom resource definition
    #[clap(name = "view", aliases = &["v"])]
    View {
        #[clap(name = "custom-resource")]
        custom_resource: Option<CustomResource>,
    },
}

#[async_trait]
impl Executor for CustomResourceDefinition {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::View { custom_resource } => view(config, custom_resource).await,
        }
    }
}

// -----------------------------------------------------------------------------
// view function

#[cfg_attr(feature = "trace", tracing::instrument(skip(_config)))]
pub async fn view(
    _config: Arc<Configuration>,
    custom_resource: &Option<CustomResource>,
) -> Result<(), Error> {
    print!("{}", render(custom_resource)?);
    Ok(())
}

/// returns the yaml documents of the selected definition or every definition
pub fn render(custom_resource: &Option<CustomResource>) -> Result<String, Error> {
    let crds = match custom_resource {
        Some(cr) => vec![cr.to_yaml()?],
        None => CustomResource::all()
            .iter()
            .map(CustomResource::to_yaml)
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(crds.join("---\n"))
}
