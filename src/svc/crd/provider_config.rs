//! # ProviderConfig custom resource
//!
//! This module provide the provider configuration and its usage custom
//! resources, their definition and the reconciler keeping configurations alive
//! while managed resources use them.

use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use futures::TryFutureExt;
use kube::{
    api::{ListParams, Patch, PatchParams},
    runtime::{controller, watcher, Controller},
    Api, CustomResource, Resource, ResourceExt,
};
#[cfg(test)]
use mockall::automock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::svc::{
    controller::{self as ctrl, Manager, Options},
    credentials::{Selectors, Source},
    crd::{Managed, Reference, TypedReference},
    k8s::{
        self,
        condition::{self, Condition},
        finalizer, recorder, resource, Context, ControllerBuilder, Watcher,
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const GROUP: &str = "spotify.crossplane.io";
pub const FINALIZER: &str = "in-use.crossplane.io";
pub const LABEL_PROVIDER_CONFIG: &str = "spotify.crossplane.io/provider-config";
pub const FIELD_MANAGER: &str = "provider-spotify";

// -----------------------------------------------------------------------------
// ProviderCredentials structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct ProviderCredentials {
    #[serde(rename = "source")]
    pub source: Source,
    #[serde(flatten)]
    pub selectors: Selectors,
}

// -----------------------------------------------------------------------------
// ProviderConfigSpec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[kube(group = "spotify.crossplane.io")]
#[kube(version = "v1beta1")]
#[kube(kind = "ProviderConfig")]
#[kube(singular = "providerconfig")]
#[kube(plural = "providerconfigs")]
#[kube(category = "crossplane")]
#[kube(category = "provider")]
#[kube(category = "spotify")]
#[kube(status = "ProviderConfigStatus")]
#[kube(derive = "PartialEq")]
#[kube(
    printcolumn = r#"{"name":"source", "type":"string", "description":"Credentials source", "jsonPath":".spec.credentials.source"}"#
)]
#[kube(
    printcolumn = r#"{"name":"users", "type":"integer", "description":"Managed resources using the configuration", "jsonPath":".status.users"}"#
)]
pub struct ProviderConfigSpec {
    #[serde(rename = "credentials")]
    pub credentials: ProviderCredentials,
}

// -----------------------------------------------------------------------------
// ProviderConfigStatus structure

#[derive(JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug, Default)]
pub struct ProviderConfigStatus {
    #[serde(rename = "users", default, skip_serializing_if = "Option::is_none")]
    pub users: Option<i64>,
    #[serde(rename = "conditions", default)]
    pub conditions: Vec<Condition>,
}

impl ProviderConfig {
    pub fn set_users(&mut self, users: i64) {
        self.status.get_or_insert_with(Default::default).users = Some(users);
    }

    pub fn set_condition(&mut self, c: Condition) {
        condition::set(
            &mut self.status.get_or_insert_with(Default::default).conditions,
            c,
        );
    }
}

// -----------------------------------------------------------------------------
// ProviderConfigUsageSpec structure

#[derive(CustomResource, JsonSchema, Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[kube(group = "spotify.crossplane.io")]
#[kube(version = "v1beta1")]
#[kube(kind = "ProviderConfigUsage")]
#[kube(singular = "providerconfigusage")]
#[kube(plural = "providerconfigusages")]
#[kube(category = "crossplane")]
#[kube(category = "provider")]
#[kube(category = "spotify")]
#[kube(derive = "PartialEq")]
#[kube(
    printcolumn = r#"{"name":"config-name", "type":"string", "jsonPath":".spec.providerConfigRef.name"}"#
)]
#[kube(
    printcolumn = r#"{"name":"resource-kind", "type":"string", "jsonPath":".spec.resourceRef.kind"}"#
)]
#[kube(
    printcolumn = r#"{"name":"resource-name", "type":"string", "jsonPath":".spec.resourceRef.name"}"#
)]
pub struct ProviderConfigUsageSpec {
    #[serde(rename = "providerConfigRef")]
    pub provider_config_ref: Reference,
    #[serde(rename = "resourceRef")]
    pub resource_ref: TypedReference,
}

/// returns the usage recording that the managed resource uses the named
/// provider configuration, it is named after the managed resource's unique
/// identifier and owned by it
pub fn usage<M>(mg: &M, provider_config: &str) -> ProviderConfigUsage
where
    M: Managed,
{
    let mut usage = ProviderConfigUsage::new(
        &mg.uid().unwrap_or_else(|| mg.name_any()),
        ProviderConfigUsageSpec {
            provider_config_ref: Reference::from(provider_config),
            resource_ref: mg.typed_reference(),
        },
    );

    usage.metadata.labels = Some(BTreeMap::from([(
        LABEL_PROVIDER_CONFIG.to_string(),
        provider_config.to_string(),
    )]));
    usage.metadata.owner_references = resource::owner_reference(mg).map(|owner| vec![owner]);

    usage
}

// -----------------------------------------------------------------------------
// ProviderConfigClient trait

/// reads provider configurations and records their usages
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderConfigClient: Send + Sync {
    async fn get_provider_config(&self, name: &str) -> Result<ProviderConfig, kube::Error>;

    /// create or update the usage, calling it twice with the same usage is a
    /// no-op
    async fn track_usage(&self, usage: &ProviderConfigUsage) -> Result<(), kube::Error>;
}

#[async_trait]
impl ProviderConfigClient for kube::Client {
    #[cfg_attr(feature = "trace", tracing::instrument(skip(self)))]
    async fn get_provider_config(&self, name: &str) -> Result<ProviderConfig, kube::Error> {
        debug!(kind = "ProviderConfig", name = name, "Execute a request to retrieve resource");
        Api::<ProviderConfig>::all(self.to_owned()).get(name).await
    }

    #[cfg_attr(feature = "trace", tracing::instrument(skip(self, usage)))]
    async fn track_usage(&self, usage: &ProviderConfigUsage) -> Result<(), kube::Error> {
        let name = usage.name_any();

        debug!(
            kind = "ProviderConfigUsage",
            name = &name,
            "Execute a server side apply request on resource"
        );
        Api::<ProviderConfigUsage>::all(self.to_owned())
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(usage),
            )
            .await
            .map(|_| ())
    }
}

/// returns the number of usages of the named provider configuration
pub async fn users(client: kube::Client, name: &str) -> Result<i64, kube::Error> {
    let selector = format!("{}={}", LABEL_PROVIDER_CONFIG, name);
    let usages = Api::<ProviderConfigUsage>::all(client)
        .list(&ListParams::default().labels(&selector))
        .await?;

    Ok(usages.items.len() as i64)
}

// -----------------------------------------------------------------------------
// Action enum

#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
pub enum Action {
    UpsertFinalizer,
    UpdateUsers,
    DeleteFinalizer,
    DeleteBlocked,
}

impl Display for Action {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::UpsertFinalizer => write!(f, "UpsertFinalizer"),
            Self::UpdateUsers => write!(f, "UpdateUsers"),
            Self::DeleteFinalizer => write!(f, "DeleteFinalizer"),
            Self::DeleteBlocked => write!(f, "DeleteBlocked"),
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
    #[error("failed to delete provider configuration, it is still used by {0} resource(s)")]
    InUse(i64),
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

impl ControllerBuilder<ProviderConfig> for Reconciler {
    fn build(&self, ctx: Arc<Context>) -> Controller<ProviderConfig> {
        let client = ctx.kube.to_owned();

        Controller::new(Api::all(client.to_owned()), watcher::Config::default()).watches(
            Api::<ProviderConfigUsage>::all(client),
            watcher::Config::default(),
            |usage| {
                Some(kube::runtime::reflector::ObjectRef::new(
                    &usage.spec.provider_config_ref.name,
                ))
            },
        )
    }
}

#[async_trait]
impl k8s::Reconciler<ProviderConfig> for Reconciler {
    type Error = ReconcilerError;

    fn retry(
        obj: Arc<ProviderConfig>,
        err: &ReconcilerError,
        ctx: Arc<Context>,
    ) -> controller::Action {
        let duration = match err {
            ReconcilerError::InUse(_) => ctx.poll_interval,
            _ => Duration::from_millis(500),
        };

        debug!(
            kind = ProviderConfig::kind(&()).to_string(),
            name = obj.name_any(),
            duration = duration.as_millis() as u64,
            error = err.to_string(),
            "Requeue failed reconciliation"
        );

        controller::Action::requeue(duration)
    }

    async fn upsert(ctx: Arc<Context>, origin: Arc<ProviderConfig>) -> Result<(), ReconcilerError> {
        let kube = ctx.kube.to_owned();
        let kind = ProviderConfig::kind(&()).to_string();
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
        // Step 2: count users

        let count = users(kube.to_owned(), &name).await?;

        debug!(kind = &kind, name = &name, users = count, "Update users of custom resource");

        let current = modified.to_owned();
        modified.set_users(count);
        modified.set_condition(Condition::available());

        let patch = resource::diff(&current, &modified).map_err(ReconcilerError::Diff)?;
        if !patch.0.is_empty() {
            let modified = resource::patch_status(kube.to_owned(), modified, patch).await?;

            let action = &Action::UpdateUsers;
            let message = &format!("Provider configuration is used by {} resource(s)", count);
            recorder::normal(kube, &modified, action, message).await?;
        }

        Ok(())
    }

    async fn delete(ctx: Arc<Context>, origin: Arc<ProviderConfig>) -> Result<(), ReconcilerError> {
        let kube = ctx.kube.to_owned();
        let kind = ProviderConfig::kind(&()).to_string();
        let name = origin.name_any();

        // ---------------------------------------------------------------------
        // Step 1: verify that no managed resource use the configuration

        let count = users(kube.to_owned(), &name).await?;
        if count > 0 {
            info!(
                kind = &kind,
                name = &name,
                users = count,
                "Custom resource is still in use, keep the finalizer"
            );

            let mut modified = (*origin).to_owned();
            modified.set_users(count);
            modified.set_condition(Condition::deleting());

            let patch = resource::diff(&*origin, &modified).map_err(ReconcilerError::Diff)?;
            let modified = resource::patch_status(kube.to_owned(), modified, patch).await?;

            let action = &Action::DeleteBlocked;
            let message = &format!(
                "Provider configuration is still used by {} resource(s)",
                count
            );
            recorder::warning(kube, &modified, action, message).await?;

            return Err(ReconcilerError::InUse(count));
        }

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

/// adds the provider configuration controller to the manager
pub fn setup(mgr: &mut Manager, o: &Options) -> Result<(), ctrl::Error> {
    let ctx = mgr.context(o);
    let kind = ProviderConfig::kind(&()).to_string();
    let name = kind.to_owned();

    mgr.add(&name, async move {
        let reconciler = Reconciler::default();

        info!(kind = &kind, "Start to listen for events of custom resource");
        if let Err(err) = Watcher::<ProviderConfig>::watch(&reconciler, ctx).await {
            error!(
                kind = &kind,
                error = err.to_string(),
                "Could not reconcile custom resource"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use kube::CustomResourceExt;

    use crate::svc::crd::playlist::{Parameters, Playlist, Spec};

    use super::*;

    fn playlist(uid: Option<&str>) -> Playlist {
        let mut playlist = Playlist::new(
            "road-trip",
            Spec {
                for_provider: Parameters {
                    name: "Road trip".into(),
                    description: None,
                    public: None,
                    tracks: vec![],
                },
                provider_config_ref: Some(Reference::from("default")),
            },
        );

        playlist.metadata.uid = uid.map(ToOwned::to_owned);
        playlist
    }

    #[test]
    fn usage_is_named_after_and_owned_by_the_managed_resource() {
        let usage = usage(&playlist(Some("d9c0f2")), "default");

        assert_eq!(usage.name_any(), "d9c0f2");
        assert_eq!(
            usage.labels().get(LABEL_PROVIDER_CONFIG).map(String::as_str),
            Some("default")
        );
        assert_eq!(usage.spec.provider_config_ref, Reference::from("default"));
        assert_eq!(usage.spec.resource_ref.kind, "Playlist");
        assert_eq!(
            usage.spec.resource_ref.api_version,
            "playlist.spotify.crossplane.io/v1alpha1"
        );
        assert_eq!(usage.spec.resource_ref.uid.as_deref(), Some("d9c0f2"));

        let owners = usage.owner_references();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, "d9c0f2");
    }

    #[test]
    fn usage_without_uid_falls_back_to_name() {
        let usage = usage(&playlist(None), "default");

        assert_eq!(usage.name_any(), "road-trip");
        assert!(usage.owner_references().is_empty());
    }

    #[test]
    fn usage_carries_type_information_for_server_side_apply() {
        let usage = serde_json::to_value(usage(&playlist(Some("d9c0f2")), "default"))
            .expect("usage to be serialized");

        assert_eq!(usage["kind"], "ProviderConfigUsage");
        assert_eq!(usage["apiVersion"], "spotify.crossplane.io/v1beta1");
    }

    #[test]
    fn provider_config_is_cluster_scoped_with_crossplane_layout() {
        let pc: ProviderConfig = serde_json::from_value(serde_json::json!({
            "apiVersion": "spotify.crossplane.io/v1beta1",
            "kind": "ProviderConfig",
            "metadata": {"name": "default"},
            "spec": {
                "credentials": {
                    "source": "Secret",
                    "secretRef": {"namespace": "crossplane-system", "name": "spotify", "key": "credentials"}
                }
            }
        }))
        .expect("provider config to be deserialized");

        assert_eq!(pc.spec.credentials.source, Source::Secret);
        assert!(pc.spec.credentials.selectors.secret_ref.is_some());
        assert!(pc.namespace().is_none());

        let crd = ProviderConfig::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, GROUP);
    }

    #[test]
    fn users_and_conditions_are_set_in_status() {
        let mut pc = ProviderConfig::new(
            "default",
            ProviderConfigSpec {
                credentials: ProviderCredentials {
                    source: Source::None,
                    selectors: Selectors::default(),
                },
            },
        );

        pc.set_users(2);
        pc.set_condition(Condition::available());
        pc.set_condition(Condition::available());

        let status = pc.status.expect("status to be set");
        assert_eq!(status.users, Some(2));
        assert_eq!(status.conditions.len(), 1);
    }
}
