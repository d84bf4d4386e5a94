//! # Resource module
//!
//! This module provide helpers on kubernetes [`Resource`]

use std::fmt::Debug;

use k8s_openapi::{
    api::core::v1::ObjectReference, apimachinery::pkg::apis::meta::v1::OwnerReference,
    ClusterResourceScope,
};
use kube::{
    api::{Patch, PatchParams},
    Api, Client, Resource, ResourceExt,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

// -----------------------------------------------------------------------------
// Helpers functions

/// returns if the resource is considered from kubernetes point of view as deleted
pub fn deleted<T>(obj: &T) -> bool
where
    T: Resource,
{
    obj.meta().deletion_timestamp.is_some()
}

/// returns the namespace and name of the kubernetes resource, cluster scoped
/// resources have no namespace.
pub fn namespaced_name<T>(obj: &T) -> (Option<String>, String)
where
    T: ResourceExt,
{
    (obj.namespace(), obj.name_any())
}

/// returns the cluster wide api of a cluster scoped resource
pub fn api<T>(client: Client) -> Api<T>
where
    T: Resource<Scope = ClusterResourceScope>,
    <T as Resource>::DynamicType: Default,
{
    Api::all(client)
}

/// returns differnce between the two given object serialize as json patch
pub fn diff<T>(origin: &T, modified: &T) -> Result<json_patch::Patch, serde_json::Error>
where
    T: Serialize,
{
    Ok(json_patch::diff(
        &serde_json::to_value(origin)?,
        &serde_json::to_value(modified)?,
    ))
}

/// make a patch request on the given resource using the given patch
pub async fn patch<T>(client: Client, obj: &T, patch: json_patch::Patch) -> Result<T, kube::Error>
where
    T: Resource<Scope = ClusterResourceScope> + DeserializeOwned + Serialize + Clone + Debug,
    <T as Resource>::DynamicType: Default,
{
    let (namespace, name) = namespaced_name(obj);

    if patch.0.is_empty() {
        debug!(
            name = &name,
            namespace = ?namespace,
            "Skip patch request on resource, no operation to apply"
        );
        return Ok(obj.to_owned());
    }

    debug!(
        name = &name,
        namespace = ?namespace,
        operations = patch.0.len(),
        "Execute patch request on resource"
    );
    api::<T>(client)
        .patch(&name, &PatchParams::default(), &Patch::Json::<T>(patch))
        .await
}

/// make a patch request on the given resource's status using the given patch
pub async fn patch_status<T>(client: Client, obj: T, patch: json_patch::Patch) -> Result<T, kube::Error>
where
    T: Resource<Scope = ClusterResourceScope> + DeserializeOwned + Serialize + Clone + Debug,
    <T as Resource>::DynamicType: Default,
{
    let (namespace, name) = namespaced_name(&obj);

    if patch.0.is_empty() {
        debug!(
            name = &name,
            namespace = ?namespace,
            "Skip patch request on resource's status, no operation to apply"
        );
        return Ok(obj);
    }

    debug!(
        name = &name,
        namespace = ?namespace,
        operations = patch.0.len(),
        "Execute patch request on resource's status"
    );
    api::<T>(client)
        .patch_status(&name, &PatchParams::default(), &Patch::Json::<T>(patch))
        .await
}

/// returns a owner references object pointing to the given resource, if
/// kubernetes gave it an unique identifier
pub fn owner_reference<T>(obj: &T) -> Option<OwnerReference>
where
    T: Resource<DynamicType = ()> + ResourceExt,
{
    Some(OwnerReference {
        api_version: T::api_version(&()).to_string(),
        block_owner_deletion: Some(true),
        controller: None,
        kind: T::kind(&()).to_string(),
        name: obj.name_any(),
        uid: obj.uid()?,
    })
}

/// returns an object reference pointing to the given resource
pub fn object_reference<T>(obj: &T) -> ObjectReference
where
    T: Resource<DynamicType = ()> + ResourceExt,
{
    ObjectReference {
        api_version: Some(T::api_version(&()).to_string()),
        kind: Some(T::kind(&()).to_string()),
        name: Some(obj.name_any()),
        namespace: obj.namespace(),
        resource_version: obj.resource_version(),
        uid: obj.uid(),
        field_path: None,
    }
}

#[cfg(test)]
mod tests {
    use crate::svc::{
        crd::playlist::{Parameters, Playlist, Spec},
        k8s::{client, finalizer},
    };

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
                provider_config_ref: None,
            },
        );

        playlist.metadata.uid = uid.map(ToOwned::to_owned);
        playlist
    }

    #[test]
    fn diff_of_identical_objects_is_empty() {
        let patch = diff(&playlist(None), &playlist(None)).expect("objects to be serializable");

        assert!(patch.0.is_empty());
    }

    #[test]
    fn diff_detects_finalizer() {
        let origin = playlist(None);
        let modified = finalizer::add(origin.to_owned(), "finalizer.managedresource.crossplane.io");
        let patch = diff(&origin, &modified).expect("objects to be serializable");

        assert_eq!(patch.0.len(), 1);
    }

    #[test]
    fn owner_reference_requires_an_uid() {
        assert!(owner_reference(&playlist(None)).is_none());

        let owner = owner_reference(&playlist(Some("4a0f"))).expect("owner reference");
        assert_eq!(owner.kind, "Playlist");
        assert_eq!(owner.api_version, "playlist.spotify.crossplane.io/v1alpha1");
        assert_eq!(owner.name, "road-trip");
        assert_eq!(owner.uid, "4a0f");
    }

    #[test]
    fn cluster_scoped_resource_has_no_namespace() {
        let (namespace, name) = namespaced_name(&playlist(None));

        assert!(namespace.is_none());
        assert_eq!(name, "road-trip");

        let reference = object_reference(&playlist(Some("4a0f")));
        assert!(reference.namespace.is_none());
        assert_eq!(reference.uid.as_deref(), Some("4a0f"));
    }

    #[tokio::test]
    async fn empty_patches_do_not_reach_the_api_server() {
        let kube = client::offline();
        let origin = playlist(Some("4a0f"));

        let patched = patch(kube.to_owned(), &origin, json_patch::Patch(vec![]))
            .await
            .expect("empty patch to be skipped");
        assert_eq!(patched, origin);

        let patched = patch_status(kube, origin.to_owned(), json_patch::Patch(vec![]))
            .await
            .expect("empty status patch to be skipped");
        assert_eq!(patched, origin);
    }
}
