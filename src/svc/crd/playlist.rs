//! # Playlist custom resource
//!
//! This module provide the playlist custom resource and its definition, the
//! managed resource backed by the `spotify_playlist` terraform resource.

use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

use async_trait::async_trait;
use futures::TryFutureExt;
use kube::{
    runtime::{controller, watcher, Controller},
    Api, CustomResource, Resource, ResourceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::svc::{
    controller::{self as ctrl, Manager, Options},
    crd::{Managed, Reference},
    k8s::{
        self,
        condition::{self, Condition},
        finalizer, recorder, resource, Context, ControllerBuilder, Watcher,
    },
    provider, spotify,
    terraform::workspace,
};

// -----------------------------------------------------------------------------
// Constants

pub const FINALIZER: &str = "finalizer.managedresource.crossplane.io";

// -----------------------------------------------------------------------------
// Parameters structure

/// desired state of the playlist, given as is to the terraform resource
#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Parameters {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "public", default, skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
    #[serde(rename = "tracks", default)]
    pub tracks: Vec<String>,
}

// -----------------------------------------------------------------------------
// Spec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[kube(group = "playlist.spotify.crossplane.io")]
#[kube(version = "v1alpha1")]
#[kube(kind = "Playlist")]
#[kube(singular = "playlist")]
#[kube(plural = "playlists")]
#[kube(category = "crossplane")]
#[kube(category = "managed")]
#[kube(category = "spotify")]
#[kube(status = "Status")]
#[kube(derive = "PartialEq")]
#[kube(
    printcolumn = r#"{"name":"name", "type":"string", "description":"Playlist name", "jsonPath":".spec.forProvider.name"}"#
)]
#[kube(
    printcolumn = r#"{"name":"synced", "type":"string", "description":"Synced condition", "jsonPath":".status.conditions[?(@.type==\"Synced\")].status"}"#
)]
#[kube(
    printcolumn = r#"{"name":"provider config", "type":"string", "description":"Provider configuration", "jsonPath":".spec.providerConfigRef.name"}"#
)]
pub struct Spec {
    #[serde(rename = "forProvider")]
    pub for_provider: Parameters,
    #[serde(rename = "providerConfigRef", default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<Reference>,
}

// -----------------------------------------------------------------------------
// Status structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct Status {
    #[serde(rename = "conditions", default)]
    pub conditions: Vec<Condition>,
    /// path of the rendered terraform configuration
    #[serde(rename = "workspace", default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

// -----------------------------------------------------------------------------
// Playlist implementation

impl Playlist {
    pub fn set_condition(&mut self, c: Condition) {
        condition::set(
            &mut self.status.get_or_insert_with(Default::default).conditions,
            c,
        );
    }

    pub fn set_workspace(&mut self, workspace: Option<String>) {
        self.status.get_or_insert_with(Default::default).workspace = workspace;
    }

    /// identifier of the terraform workspace of the playlist
    pub fn workspace_id(&self) -> String {
        self.uid().unwrap_or_else(|| self.name_any())
    }
}

impl Managed for Playlist {
    fn provider_config_reference(&self) -> Option<&Reference> {
        self.spec.provider_config_ref.as_ref()
    }
}

// -----------------------------------------------------------------------------
// Action enum

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
pub enum Action {
    UpsertFinalizer,
    UpsertWorkspace,
    SetupFailed,
    DeleteWorkspace,
    DeleteFinalizer,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::UpsertFinalizer => write!(f, "UpsertFinalizer"),
            Self::UpsertWorkspace => write!(f, "UpsertWorkspace"),
            Self::SetupFailed => write!(f, "SetupFailed"),
            Self::DeleteWorkspace => write!(f, "DeleteWorkspace"),
            Self::DeleteFinalizer => write!(f, "DeleteFinalizer"),
        }
    }
}

// -----------------------------------------------------------------------------
// ReconcilerError enum

#[derive(thiserror::Error, Debug)]
pub enum ReconcilerError {
    #[error("failed to reconcile resource, {0}")]
    Reconcile(String),
    #[error("failed to execute request on kubernetes api, {0}")]
    KubeClient(kube::Error),
    #[error("failed to compute diff between the original and modified object, {0}")]
    Diff(serde_json::Error),
    #[error("failed to serialize parameters of the playlist, {0}")]
    Serialize(serde_json::Error),
    #[error("failed to build terraform setup, {0}")]
    Setup(spotify::Error),
    #[error("failed to interact with terraform workspace, {0}")]
    Workspace(workspace::Error),
}

impl From<kube::Error> for ReconcilerError {
    fn from(err: kube::Error) -> Self {
        Self::KubeClient(err)
    }
}

impl From<controller::Error<Self, watcher::Error>> for ReconcilerError {
    fn from(err: controller::Error<ReconcilerError, watcher::Error>) -> Self {
        Self::Reconcile(err.to_string())
    }
}

// -----------------------------------------------------------------------------
// Reconciler structure

#[derive(Clone, Default, Debug)]
pub struct Reconciler {}

impl ControllerBuilder<Playlist> for Reconciler {
    fn build(&self, ctx: Arc<Context>) -> Controller<Playlist> {
        Controller::new(Api::all(ctx.kube.to_owned()), watcher::Config::default())
    }
}

#[async_trait]
impl k8s::Reconciler<Playlist> for Reconciler {
    type Error = ReconcilerError;

    async fn upsert(ctx: Arc<Context>, origin: Arc<Playlist>) -> Result<(), ReconcilerError> {
        let kube = ctx.kube.to_owned();
        let kind = Playlist::kind(&()).to_string();
        let name = origin.name_any();

        // ---------------------------------------------------------------------
        // Step 1: set finalizer

        info!(kind = &kind, name = &name, "Set finalizer on custom resource");

        let modified = finalizer::add((*origin).to_owned(), FINALIZER);
        let patch = resource::diff(&*origin, &modified).map_err(ReconcilerError::Diff)?;
        let mut modified = resource::patch(kube.to_owned(), &modified, patch).await?;

        if !finalizer::contains(&*origin, FINALIZER) {
            let action = &Action::UpsertFinalizer;
            let message = &format!("Create finalizer '{}'", FINALIZER);
            recorder::normal(kube.to_owned(), &modified, action, message).await?;
        }

        // ---------------------------------------------------------------------
        // Step 2: resolve the terraform setup

        info!(kind = &kind, name = &name, "Build terraform setup of custom resource");

        let current = modified.to_owned();
        let setup = match ctx.setup.setup(&kube, &ctx.extractor, &modified).await {
            Ok(setup) => setup,
            Err(err) => {
                let message = err.to_string();
                modified.set_condition(Condition::reconcile_error(message.to_owned()));

                let patch = resource::diff(&current, &modified).map_err(ReconcilerError::Diff)?;
                let modified = resource::patch_status(kube.to_owned(), modified, patch).await?;

                recorder::warning(kube, &modified, &Action::SetupFailed, &message).await?;
                return Err(ReconcilerError::Setup(err));
            }
        };

        // ---------------------------------------------------------------------
        // Step 3: render the terraform workspace

        let parameters =
            serde_json::to_value(&modified.spec.for_provider).map_err(ReconcilerError::Serialize)?;
        let document = workspace::document(
            &setup,
            provider::playlist::RESOURCE,
            &name,
            parameters,
        );

        let path = ctx
            .workspace
            .write(&modified.workspace_id(), &document)
            .await
            .map_err(ReconcilerError::Workspace)?;

        debug!(kind = &kind, name = &name, path = ?path, "Rendered terraform workspace");

        // ---------------------------------------------------------------------
        // Step 4: update status

        modified.set_workspace(Some(path.to_string_lossy().to_string()));
        modified.set_condition(Condition::reconcile_success());

        let patch = resource::diff(&current, &modified).map_err(ReconcilerError::Diff)?;
        if !patch.0.is_empty() {
            let modified = resource::patch_status(kube.to_owned(), modified, patch).await?;

            let action = &Action::UpsertWorkspace;
            let message = &format!("Render terraform workspace at '{}'", path.display());
            recorder::normal(kube, &modified, action, message).await?;
        }

        Ok(())
    }

    async fn delete(ctx: Arc<Context>, origin: Arc<Playlist>) -> Result<(), ReconcilerError> {
        let kube = ctx.kube.to_owned();
        let kind = Playlist::kind(&()).to_string();
        let name = origin.name_any();

        // ---------------------------------------------------------------------
        // Step 1: remove the terraform workspace

        info!(kind = &kind, name = &name, "Remove terraform workspace of custom resource");

        ctx.workspace
            .remove(&origin.workspace_id())
            .await
            .map_err(ReconcilerError::Workspace)?;

        let action = &Action::DeleteWorkspace;
        let message = "Delete terraform workspace";
        recorder::normal(kube.to_owned(), &*origin, action, message).await?;

        // ---------------------------------------------------------------------
        // Step 2: remove the finalizer

        info!(kind = &kind, name = &name, "Remove finalizer on custom resource");

        let action = &Action::DeleteFinalizer;
        let message = "Delete finalizer from custom resource";
        recorder::normal(kube.to_owned(), &*origin, action, message).await?;

        let modified = finalizer::remove((*origin).to_owned(), FINALIZER);
        let patch = resource::diff(&*origin, &modified).map_err(ReconcilerError::Diff)?;
        resource::patch(kube, &modified, patch)
            .map_err(ReconcilerError::from)
            .await?;

        Ok(())
    }
}

// -----------------------------------------------------------------------------
// setup function

/// adds the playlist controller to the manager, the provider must serve the
/// playlist resource in the group of the custom resource
/// returns the group the provider serves the playlist resource in, it must
/// be the group of the [`Playlist`] custom resource
pub fn served_group(provider: &provider::Provider) -> Result<String, ctrl::Error> {
    let expected = Playlist::group(&()).to_string();
    let group = provider
        .group(provider::playlist::RESOURCE)
        .ok_or_else(|| ctrl::Error::UnknownResource(provider::playlist::RESOURCE.to_string()))?;

    if group != expected {
        return Err(ctrl::Error::GroupMismatch(
            provider::playlist::RESOURCE.to_string(),
            group,
            expected,
        ));
    }

    Ok(group)
}

pub fn setup(mgr: &mut Manager, o: &Options) -> Result<(), ctrl::Error> {
    let kind = Playlist::kind(&()).to_string();
    let group = served_group(&o.provider)?;

    debug!(kind = &kind, group = &group, "Set up controller");
    let ctx = mgr.context(o);
    let name = kind.to_owned();

    mgr.add(&name, async move {
        let reconciler = Reconciler::default();

        info!(kind = &kind, "Start to listen for events of custom resource");
        if let Err(err) = Watcher::<Playlist>::watch(&reconciler, ctx).await {
            error!(
                kind = &kind,
                error = err.to_string(),
                "Could not reconcile custom resource"
            );
        }
    })
}
