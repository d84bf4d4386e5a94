//! # Terraform module
//!
//! This module provide the structures describing how the embedded terraform
//! provider has to be set up for a managed resource.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod workspace;

// -----------------------------------------------------------------------------
// types

/// configuration block given as is to the terraform provider
pub type ProviderConfiguration = BTreeMap<String, String>;

// -----------------------------------------------------------------------------
// ProviderRequirement structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ProviderRequirement {
    #[serde(rename = "source")]
    pub source: String,
    #[serde(rename = "version")]
    pub version: String,
}

impl ProviderRequirement {
    /// returns the local name of the provider, the last segment of its source
    /// address (e.g. `spotify` for `conradludgate/spotify`)
    pub fn name(&self) -> &str {
        self.source.rsplit('/').next().unwrap_or(&self.source)
    }
}

// -----------------------------------------------------------------------------
// Setup structure

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Setup {
    /// version of terraform
    #[serde(rename = "version")]
    pub version: String,
    #[serde(rename = "requirement")]
    pub requirement: ProviderRequirement,
    #[serde(rename = "configuration")]
    pub configuration: ProviderConfiguration,
}
