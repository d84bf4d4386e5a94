//! # Custom resource definition module
//!
//! This module provide custom resource definition managed by the provider,
//! their structures, implementation and reconciliation loop.

use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub mod playlist;
pub mod provider_config;

// -----------------------------------------------------------------------------
// Reference structure

/// reference to a cluster scoped object by name
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Reference {
    #[serde(rename = "name")]
    pub name: String,
}

impl From<&str> for Reference {
    fn from(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

// -----------------------------------------------------------------------------
// TypedReference structure

/// reference to an object of any kind
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct TypedReference {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    #[serde(rename = "kind")]
    pub kind: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "uid", default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

// -----------------------------------------------------------------------------
// Managed trait

/// a custom resource representing an external resource reconciled through the
/// embedded terraform provider
pub trait Managed: Resource<DynamicType = ()> + ResourceExt + Send + Sync {
    fn provider_config_reference(&self) -> Option<&Reference>;

    /// returns a reference to this managed resource
    fn typed_reference(&self) -> TypedReference {
        TypedReference {
            api_version: Self::api_version(&()).to_string(),
            kind: Self::kind(&()).to_string(),
            name: self.name_any(),
            uid: self.uid(),
        }
    }
}
