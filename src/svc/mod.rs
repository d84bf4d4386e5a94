//! # Services module
//!
//! This module provide services to interact with kubernetes, resolve the
//! credentials of the spotify provider and render terraform workspaces.
pub mod cfg;
pub mod controller;
pub mod credentials;
pub mod crd;
pub mod k8s;
pub mod provider;
pub mod spotify;
pub mod telemetry;
pub mod terraform;
