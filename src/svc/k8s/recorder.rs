//! # Event recorder module
//!
//! This module provide an alternative to the golang EventRecorder structure
//!
//! See following links for more details:
//! - <https://book-v1.book.kubebuilder.io/beyond_basics/creating_events.html>
//! - <https://github.com/kubernetes/client-go/blob/master/tools/record/event.go#L56>

use std::fmt::{self, Debug, Display, Formatter};

use chrono::Utc;
use k8s_openapi::{
    api::core::v1::{Event, EventSource},
    apimachinery::pkg::apis::meta::v1::{MicroTime, Time},
};
use kube::{
    api::{ObjectMeta, PostParams},
    Api, Client, Resource, ResourceExt,
};
use tracing::debug;

use crate::svc::k8s::resource;

// -----------------------------------------------------------------------------
// constants

/// events of cluster scoped resources are recorded in this namespace
pub const DEFAULT_NAMESPACE: &str = "default";

// -----------------------------------------------------------------------------
// Level enumeration

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub enum Level {
    Warning,
    Normal,
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "Warning"),
            Self::Normal => write!(f, "Normal"),
        }
    }
}

// -----------------------------------------------------------------------------
// Helper methods

/// returns the source of this provider
pub fn source() -> EventSource {
    let host = hostname::get()
        .ok()
        .map(|host| host.to_string_lossy().to_string());

    EventSource {
        component: Some(env!("CARGO_PKG_NAME").to_string()),
        host,
    }
}

/// create a new event from the given parameters
pub fn new<T, U>(obj: &T, kind: &Level, action: &U, message: &str) -> Event
where
    T: Resource<DynamicType = ()> + ResourceExt,
    U: ToString,
{
    let now = Utc::now();

    Event {
        metadata: ObjectMeta {
            namespace: Some(
                obj.namespace()
                    .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            ),
            name: Some(format!(
                "{}-{}-{}",
                obj.name_any(),
                action.to_string().to_lowercase(),
                now.timestamp_millis()
            )),
            ..Default::default()
        },
        type_: Some(kind.to_string()),
        action: Some(action.to_string()),
        count: Some(1),
        event_time: Some(MicroTime(now)),
        first_timestamp: Some(Time(now)),
        involved_object: resource::object_reference(obj),
        last_timestamp: Some(Time(now)),
        message: Some(message.to_string()),
        reason: Some(action.to_string()),
        reporting_component: Some(env!("CARGO_PKG_NAME").to_string()),
        reporting_instance: Some(format!(
            "{}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )),
        series: None,
        source: Some(source()),
        ..Default::default()
    }
}

#[cfg_attr(feature = "trace", tracing::instrument(skip(client, obj)))]
/// record an event for the given object
pub async fn record<T, U>(
    client: Client,
    obj: &T,
    kind: &Level,
    action: &U,
    message: &str,
) -> Result<Event, kube::Error>
where
    T: Resource<DynamicType = ()> + ResourceExt,
    U: ToString + Debug,
{
    let event = new(obj, kind, action, message);
    let namespace = event
        .metadata
        .namespace
        .to_owned()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    debug!(
        kind = T::kind(&()).to_string(),
        name = obj.name_any(),
        action = action.to_string(),
        level = kind.to_string(),
        message = message,
        "Create event for resource"
    );

    Api::<Event>::namespaced(client, &namespace)
        .create(&PostParams::default(), &event)
        .await
}

/// shortcut for the [`record`] method with the 'Normal' [`Level`]
pub async fn normal<T, U>(
    client: Client,
    obj: &T,
    action: &U,
    message: &str,
) -> Result<Event, kube::Error>
where
    T: Resource<DynamicType = ()> + ResourceExt,
    U: ToString + Debug,
{
    record(client, obj, &Level::Normal, action, message).await
}

/// shortcut for the [`record`] method with the 'Warning' [`Level`]
pub async fn warning<T, U>(
    client: Client,
    obj: &T,
    action: &U,
    message: &str,
) -> Result<Event, kube::Error>
where
    T: Resource<DynamicType = ()> + ResourceExt,
    U: ToString + Debug,
{
    record(client, obj, &Level::Warning, action, message).await
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Secret;

    use super::*;

    #[test]
    fn level_is_displayed_as_event_type() {
        assert_eq!(Level::Warning.to_string(), "Warning");
        assert_eq!(Level::Normal.to_string(), "Normal");
    }

    #[test]
    fn event_of_cluster_scoped_resource_lands_in_default_namespace() {
        let mut obj = Secret::default();
        obj.metadata.name = Some("playlist".into());

        let event = new(&obj, &Level::Warning, &"ReconcileError", "boom");

        assert_eq!(event.metadata.namespace.as_deref(), Some(DEFAULT_NAMESPACE));
        assert_eq!(event.type_.as_deref(), Some("Warning"));
        assert_eq!(event.reason.as_deref(), Some("ReconcileError"));
        assert_eq!(event.message.as_deref(), Some("boom"));
        assert_eq!(event.involved_object.name.as_deref(), Some("playlist"));
        assert!(event
            .metadata
            .name
            .map(|name| name.starts_with("playlist-reconcileerror-"))
            .unwrap_or(false));
    }
}
