//! # Kubernetes module
//!
//! This module provide kubernetes helpers, the reconciliation context and
//! traits shared by every controller of the provider

use std::{error::Error, fmt::Debug, hash::Hash, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use kube::{
    runtime::{
        controller::{self, Action},
        watcher, Controller,
    },
    Resource, ResourceExt,
};
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use serde::de::DeserializeOwned;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace};
#[cfg(feature = "trace")]
use tracing::Instrument;

use crate::svc::{
    credentials::CommonExtractor, provider::Provider, spotify::SetupBuilder,
    terraform::workspace::Workspace,
};

pub mod client;
pub mod condition;
pub mod finalizer;
pub mod recorder;
pub mod resource;

// -----------------------------------------------------------------------------
// constants

pub const RECONCILIATION_UPSERT_EVENT: &str = "upsert";
pub const RECONCILIATION_DELETE_EVENT: &str = "delete";

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static RECONCILIATION_SUCCESS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "provider_spotify_reconciliation_success",
            "number of successful reconciliation"
        ),
        &["kind"]
    )
    .expect("metrics 'provider_spotify_reconciliation_success' to not be already registered")
});

#[cfg(feature = "metrics")]
static RECONCILIATION_FAILED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "provider_spotify_reconciliation_failed",
            "number of failed reconciliation"
        ),
        &["kind"]
    )
    .expect("metrics 'provider_spotify_reconciliation_failed' to not be already registered")
});

#[cfg(feature = "metrics")]
static RECONCILIATION_EVENT: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "provider_spotify_reconciliation_event",
            "number of reconciliation event",
        ),
        &["kind", "event"]
    )
    .expect("metrics 'provider_spotify_reconciliation_event' to not be already registered")
});

#[cfg(feature = "metrics")]
static RECONCILIATION_DURATION: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "provider_spotify_reconciliation_duration",
            "duration of reconciliation",
        ),
        &["kind", "unit"]
    )
    .expect("metrics 'provider_spotify_reconciliation_duration' to not be already registered")
});

// -----------------------------------------------------------------------------
// Context structure

/// contains clients and settings given to each reconciler
#[derive(Clone)]
pub struct Context {
    pub kube: kube::Client,
    pub extractor: CommonExtractor,
    pub provider: Arc<Provider>,
    pub setup: Arc<SetupBuilder>,
    pub workspace: Workspace,
    pub poll_interval: Duration,
}

// -----------------------------------------------------------------------------
// ControllerBuilder trait

/// provides a common way to create a kubernetes controller [`Controller<T>`]
pub trait ControllerBuilder<T>
where
    T: Resource + Clone + Debug,
    <T as Resource>::DynamicType: Eq + Hash,
{
    /// returns a new created kubernetes controller
    fn build(&self, ctx: Arc<Context>) -> Controller<T>;
}

// -----------------------------------------------------------------------------
// Reconciler trait

/// provides the methods given to a kubernetes controller [`Controller<T>`]
#[async_trait]
pub trait Reconciler<T>
where
    T: Resource<DynamicType = ()> + ResourceExt + Debug + Clone + Send + Sync + 'static,
{
    type Error: Error + Send + Sync + 'static;

    /// create or update the object, this is part of the the reconcile function
    async fn upsert(ctx: Arc<Context>, obj: Arc<T>) -> Result<(), Self::Error>;

    /// delete the object from kubernetes and third parts
    async fn delete(ctx: Arc<Context>, obj: Arc<T>) -> Result<(), Self::Error>;

    /// returns a [`Action`] to perform following the given error
    fn retry(obj: Arc<T>, err: &Self::Error, _ctx: Arc<Context>) -> Action {
        trace!(
            kind = T::kind(&()).to_string(),
            name = obj.name_any(),
            duration = 500,
            error = err.to_string(),
            "Requeue failed reconciliation"
        );

        Action::requeue(Duration::from_millis(500))
    }

    /// process the object and returns a [`Action`] to maybe perform another
    /// reconciliation or an error, if something gets wrong.
    async fn reconcile(obj: Arc<T>, ctx: Arc<Context>) -> Result<Action, Self::Error> {
        let kind = T::kind(&()).to_string();
        let name = obj.name_any();
        let poll_interval = ctx.poll_interval;

        if resource::deleted(&*obj) {
            info!(
                kind = &kind,
                uid = ?obj.uid(),
                name = &name,
                "Received deletion event for custom resource"
            );

            #[cfg(feature = "metrics")]
            RECONCILIATION_EVENT
                .with_label_values(&[&kind, RECONCILIATION_DELETE_EVENT])
                .inc();

            #[cfg(not(feature = "trace"))]
            let result = Self::delete(ctx, obj.to_owned()).await;
            #[cfg(feature = "trace")]
            let result = Self::delete(ctx, obj.to_owned())
                .instrument(tracing::info_span!("Reconciler::delete"))
                .await;

            if let Err(err) = result {
                error!(
                    kind = &kind,
                    uid = ?obj.uid(),
                    name = &name,
                    error = err.to_string(),
                    "Failed to delete custom resource"
                );
                return Err(err);
            }

            return Ok(Action::await_change());
        }

        info!(
            kind = &kind,
            uid = ?obj.uid(),
            name = &name,
            "Received upsertion event for custom resource"
        );

        #[cfg(feature = "metrics")]
        RECONCILIATION_EVENT
            .with_label_values(&[&kind, RECONCILIATION_UPSERT_EVENT])
            .inc();

        #[cfg(not(feature = "trace"))]
        let result = Self::upsert(ctx, obj.to_owned()).await;
        #[cfg(feature = "trace")]
        let result = Self::upsert(ctx, obj.to_owned())
            .instrument(tracing::info_span!("Reconciler::upsert"))
            .await;

        if let Err(err) = result {
            error!(
                kind = &kind,
                uid = ?obj.uid(),
                name = &name,
                error = err.to_string(),
                "Failed to upsert custom resource"
            );
            return Err(err);
        }

        Ok(Action::requeue(poll_interval))
    }
}

// -----------------------------------------------------------------------------
// WatcherError trait

/// group other trait needed to provide a default implementation for
/// [`Watcher<T>`] trait
pub trait WatcherError:
    From<kube::Error> + From<controller::Error<Self, watcher::Error>> + Error
where
    Self: 'static,
{
}

/// Blanklet implementation of [`WatcherError<T>`]
impl<T> WatcherError for T
where
    T: From<kube::Error> + From<controller::Error<Self, watcher::Error>> + Error,
    Self: 'static,
{
}

// -----------------------------------------------------------------------------
// Watcher trait

/// provides a watch method that listen to events of kubernetes custom
/// resource using a [`Controller<T>`]
#[async_trait]
pub trait Watcher<T>: ControllerBuilder<T> + Reconciler<T>
where
    T: DeserializeOwned
        + Resource<DynamicType = ()>
        + ResourceExt
        + Clone
        + Debug
        + Send
        + Sync
        + 'static,
    Self: Send + Sync + 'static,
    <Self as Reconciler<T>>::Error: WatcherError + Send + Sync,
{
    type Error: WatcherError + Send + Sync;

    /// listen for events of the custom resource as generic parameter
    async fn watch(&self, ctx: Arc<Context>) -> Result<(), <Self as Watcher<T>>::Error> {
        let kind = T::kind(&()).to_string();
        let mut stream = self
            .build(ctx.to_owned())
            .run(Self::reconcile, Self::retry, ctx)
            .boxed();

        loop {
            let instant = Instant::now();

            match stream.try_next().await {
                Ok(None) => {
                    debug!(kind = &kind, "We have reached the end of the infinite watch stream");
                    return Ok(());
                }
                Ok(Some((obj, _action))) => {
                    info!(kind = &kind, name = &obj.name, "Successfully reconcile resource");
                    #[cfg(feature = "metrics")]
                    RECONCILIATION_SUCCESS.with_label_values(&[&kind]).inc();
                }
                Err(controller::Error::ObjectNotFound(obj_ref)) => {
                    debug!(
                        kind = &kind,
                        name = &obj_ref.name,
                        "Received an event about an already deleted resource"
                    );
                    #[cfg(feature = "metrics")]
                    RECONCILIATION_SUCCESS.with_label_values(&[&kind]).inc();
                }
                Err(err) => {
                    error!(kind = &kind, error = err.to_string(), "Failed to reconcile resource");
                    #[cfg(feature = "metrics")]
                    RECONCILIATION_FAILED.with_label_values(&[&kind]).inc();
                }
            }

            #[cfg(feature = "metrics")]
            RECONCILIATION_DURATION
                .with_label_values(&[&kind, "us"])
                .inc_by(Instant::now().duration_since(instant).as_micros() as f64);

            sleep_until(instant + Duration::from_millis(100)).await;
        }
    }
}

/// Blanklet implementation for [`Watcher<T>`]
impl<T, U> Watcher<T> for U
where
    T: DeserializeOwned
        + Resource<DynamicType = ()>
        + ResourceExt
        + Clone
        + Debug
        + Send
        + Sync
        + 'static,
    U: Reconciler<T> + ControllerBuilder<T>,
    U::Error: WatcherError + Send + Sync,
    Self: Send + Sync + 'static,
{
    type Error = U::Error;
}
