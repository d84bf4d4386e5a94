//! # Provider module
//!
//! This module describes the terraform resources exposed by the provider as
//! custom resources. Customizations are collected as an ordered list of
//! configurators and applied in a single explicit pass by
//! [`ProviderBuilder::build`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod playlist;

// -----------------------------------------------------------------------------
// Constants

pub const ROOT_GROUP: &str = "spotify.crossplane.io";
pub const RESOURCE_PREFIX: &str = "spotify";
pub const DEFAULT_VERSION: &str = "v1alpha1";

/// terraform resources exposed by the provider
pub const RESOURCES: &[&str] = &[playlist::RESOURCE];

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("failed to configure resource '{0}', it is not declared by the provider")]
    UnknownResource(String),
}

// -----------------------------------------------------------------------------
// Resource structure

/// generated configuration of a terraform resource
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Resource {
    /// name of the terraform resource (e.g. `spotify_playlist`)
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "shortGroup")]
    pub short_group: String,
    #[serde(rename = "kind")]
    pub kind: String,
    #[serde(rename = "version")]
    pub version: String,
}

impl Resource {
    pub fn new(prefix: &str, name: &str) -> Self {
        let suffix = name
            .strip_prefix(prefix)
            .and_then(|s| s.strip_prefix('_'))
            .unwrap_or(name);

        Self {
            name: name.to_string(),
            short_group: String::new(),
            kind: kind(suffix),
            version: DEFAULT_VERSION.to_string(),
        }
    }

    /// returns the api group of the resource under the given root group
    pub fn group(&self, root: &str) -> String {
        if self.short_group.is_empty() {
            return root.to_string();
        }

        format!("{}.{}", self.short_group, root)
    }
}

/// returns the upper camel case form of a snake case terraform name
fn kind(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

// -----------------------------------------------------------------------------
// ResourceConfigurator type

pub type ResourceConfigurator = Box<dyn Fn(&mut Resource) + Send + Sync>;

// -----------------------------------------------------------------------------
// ProviderBuilder structure

/// collects the resources and their configurators before building the
/// [`Provider`]
pub struct ProviderBuilder {
    root_group: String,
    prefix: String,
    resources: Vec<String>,
    configurators: Vec<(String, ResourceConfigurator)>,
}

impl ProviderBuilder {
    pub fn new(root_group: &str, prefix: &str, resources: &[&str]) -> Self {
        Self {
            root_group: root_group.to_string(),
            prefix: prefix.to_string(),
            resources: resources.iter().map(ToString::to_string).collect(),
            configurators: vec![],
        }
    }

    /// registers a mutation to apply on the configuration of the named
    /// resource, mutations are applied in registration order
    pub fn add_resource_configurator<F>(&mut self, name: &str, configurator: F) -> &mut Self
    where
        F: Fn(&mut Resource) + Send + Sync + 'static,
    {
        self.configurators
            .push((name.to_string(), Box::new(configurator)));
        self
    }

    /// calls the given configure function, usually one per resource module
    pub fn configure<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        f(&mut self);
        self
    }

    pub fn build(self) -> Result<Provider, Error> {
        let mut resources: BTreeMap<String, Resource> = self
            .resources
            .iter()
            .map(|name| (name.to_owned(), Resource::new(&self.prefix, name)))
            .collect();

        for (name, configurator) in &self.configurators {
            let resource = resources
                .get_mut(name)
                .ok_or_else(|| Error::UnknownResource(name.to_owned()))?;

            debug!(resource = name, "Apply resource configurator");
            configurator(resource);
        }

        Ok(Provider {
            root_group: self.root_group,
            resources,
        })
    }
}

// -----------------------------------------------------------------------------
// Provider structure

/// resolved configuration of every resource exposed by the provider
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Provider {
    #[serde(rename = "rootGroup")]
    pub root_group: String,
    #[serde(rename = "resources")]
    pub resources: BTreeMap<String, Resource>,
}

impl Provider {
    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    /// returns the api group of the named resource
    pub fn group(&self, name: &str) -> Option<String> {
        self.get(name).map(|r| r.group(&self.root_group))
    }
}

/// returns the configuration of the spotify provider
pub fn new() -> Result<Provider, Error> {
    ProviderBuilder::new(ROOT_GROUP, RESOURCE_PREFIX, RESOURCES)
        .configure(playlist::configure)
        .build()
}
