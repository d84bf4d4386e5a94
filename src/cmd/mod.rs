//! # Command module
//!
//! This module provide command line interface structures and helpers
use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};

use crate::svc::{
    self,
    cfg::Configuration,
    controller::{self, Manager, Options},
    k8s::client,
    spotify, telemetry,
    terraform::workspace::Workspace,
};

pub mod crd;
pub mod provider;

// -----------------------------------------------------------------------------
// Executor trait

#[async_trait]
pub trait Executor {
    type Error;

    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error>;
}

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to execute command '{0}', {1}")]
    Execution(String, Arc<Error>),
    #[error("failed to execute command, {0}")]
    CustomResourceDefinition(crd::Error),
    #[error("failed to execute command, {0}")]
    Provider(provider::Error),
    #[error("failed to run daemon, {0}")]
    Daemon(DaemonError),
}

// -----------------------------------------------------------------------------
// Command enum

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Interact with custom resource definition
    #[clap(name = "custom-resource-definition", aliases = &["crd"], subcommand)]
    CustomResourceDefinition(crd::CustomResourceDefinition),
    /// Inspect the resources exposed by the provider
    #[clap(name = "provider", subcommand)]
    Provider(provider::Provider),
}

#[async_trait]
impl Executor for Command {
    type Error = Error;

    #[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
    async fn execute(&self, config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::CustomResourceDefinition(crd) => crd
                .execute(config)
                .await
                .map_err(Error::CustomResourceDefinition)
                .map_err(|err| Error::Execution("custom-resource-definition".into(), Arc::new(err))),
            Self::Provider(p) => p
                .execute(config)
                .await
                .map_err(Error::Provider)
                .map_err(|err| Error::Execution("provider".into(), Arc::new(err))),
        }
    }
}

// -----------------------------------------------------------------------------
// Args struct

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Increase log verbosity
    #[clap(short = 'v', global = true, action = ArgAction::Count)]
    pub verbosity: u8,
    /// Specify location of kubeconfig
    #[clap(short = 'k', long = "kubeconfig", global = true)]
    pub kubeconfig: Option<PathBuf>,
    /// Specify location of configuration
    #[clap(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Check if configuration is healthy
    #[clap(short = 't', long = "check", global = true)]
    pub check: bool,
    #[clap(subcommand)]
    pub command: Option<Command>,
}

// -----------------------------------------------------------------------------
// DaemonError enum

#[derive(thiserror::Error, Debug)]
pub enum DaemonError {
    #[error("failed to create kubernetes client, {0}")]
    Client(client::Error),
    #[error("failed to configure provider, {0}")]
    Provider(svc::provider::Error),
    #[error("failed to set up controllers, {0}")]
    Controller(controller::Error),
}

impl From<DaemonError> for Error {
    fn from(err: DaemonError) -> Self {
        Self::Daemon(err)
    }
}

// -----------------------------------------------------------------------------
// daemon function

#[cfg_attr(feature = "trace", tracing::instrument(skip(config)))]
pub async fn daemon(kubeconfig: Option<PathBuf>, config: Arc<Configuration>) -> Result<(), Error> {
    // -------------------------------------------------------------------------
    // Create a new kubernetes client from path if defined, or via the
    // environment or defaults locations
    let kube = client::try_new(kubeconfig)
        .await
        .map_err(DaemonError::Client)?;

    // -------------------------------------------------------------------------
    // Configure the provider and the terraform setup builder
    let provider = svc::provider::new().map_err(DaemonError::Provider)?;
    let setup = spotify::terraform_setup_builder(
        &config.terraform.version,
        &config.terraform.provider_source,
        &config.terraform.provider_version,
    );

    let o = Options {
        provider: Arc::new(provider),
        setup: Arc::new(setup),
        workspace: Workspace::from(config.terraform.workspace.to_owned()),
        poll_interval: config.operator.poll_interval(),
    };

    // -------------------------------------------------------------------------
    // Register controllers and the telemetry server
    let mut mgr = Manager::from(kube);
    controller::setup(&mut mgr, &o).map_err(DaemonError::Controller)?;

    let addr = config.operator.listen;
    mgr.add("telemetry", async move {
        if let Err(err) = telemetry::serve(addr).await {
            error!(error = err.to_string(), "Could not serve telemetry endpoints");
        }
    })
    .map_err(DaemonError::Controller)?;

    info!(tasks = ?mgr.names(), "Start manager");
    mgr.start().await.map_err(DaemonError::Controller)?;

    Ok(())
}
