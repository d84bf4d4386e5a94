//! # Controller module
//!
//! This module registers the controllers of the provider into a [`Manager`]
//! and runs them until the process receives a termination signal.

use std::{future::Future, io, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::svc::{
    credentials::CommonExtractor,
    crd::{playlist, provider_config},
    k8s::Context,
    provider::Provider,
    spotify::SetupBuilder,
    terraform::workspace::Workspace,
};

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to register controller '{0}', a controller with the same name already exists")]
    AlreadyRegistered(String),
    #[error("failed to set up controller, resource '{0}' is not declared by the provider")]
    UnknownResource(String),
    #[error("failed to set up controller, resource '{0}' is served in group '{1}' but configured in group '{2}'")]
    GroupMismatch(String, String, String),
    #[error("failed to handle termination signal, {0}")]
    SigTerm(io::Error),
    #[error("task '{0}' stopped before the termination signal")]
    Stopped(String),
    #[error("failed to run task, {0}")]
    Join(JoinError),
    #[error("failed to set up controllers, {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<Error>),
}

impl From<Vec<Error>> for Error {
    fn from(errs: Vec<Error>) -> Self {
        Self::Multiple(errs)
    }
}

// -----------------------------------------------------------------------------
// Options structure

/// settings shared by every controller
#[derive(Clone)]
pub struct Options {
    pub provider: Arc<Provider>,
    pub setup: Arc<SetupBuilder>,
    pub workspace: Workspace,
    pub poll_interval: Duration,
}

// -----------------------------------------------------------------------------
// Manager structure

/// holds the controllers to run
pub struct Manager {
    kube: kube::Client,
    controllers: Vec<(String, BoxFuture<'static, ()>)>,
}

impl From<kube::Client> for Manager {
    fn from(kube: kube::Client) -> Self {
        Self {
            kube,
            controllers: vec![],
        }
    }
}

impl Manager {
    /// returns the context given to reconcilers
    pub fn context(&self, o: &Options) -> Arc<Context> {
        Arc::new(Context {
            kube: self.kube.to_owned(),
            extractor: CommonExtractor::from(self.kube.to_owned()),
            provider: o.provider.to_owned(),
            setup: o.setup.to_owned(),
            workspace: o.workspace.to_owned(),
            poll_interval: o.poll_interval,
        })
    }

    /// registers a named task, names are unique
    pub fn add<F>(&mut self, name: &str, task: F) -> Result<(), Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.controllers.iter().any(|(n, _)| n == name) {
            return Err(Error::AlreadyRegistered(name.to_string()));
        }

        debug!(name = name, "Register task in manager");
        self.controllers
            .push((name.to_string(), Box::pin(task)));

        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        self.controllers.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// runs every registered task until the termination signal or until one
    /// of them stops, remaining tasks are aborted in both cases
    pub async fn start(self) -> Result<(), Error> {
        let mut tasks = JoinSet::new();
        for (name, task) in self.controllers {
            info!(name = &name, "Start task");
            tasks.spawn(async move {
                task.await;
                name
            });
        }

        let result = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                info!("Received termination signal, stopping tasks");
                signal.map_err(Error::SigTerm)
            }
            Some(joined) = tasks.join_next() => match joined {
                Ok(name) => {
                    error!(name = &name, "Task stopped, stopping remaining tasks");
                    Err(Error::Stopped(name))
                }
                Err(err) => {
                    error!(error = err.to_string(), "Task failed, stopping remaining tasks");
                    Err(Error::Join(err))
                }
            },
        };

        tasks.abort_all();
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                if !err.is_cancelled() {
                    error!(
                        error = err.to_string(),
                        "Could not wait for the task to complete"
                    );
                }
            }
        }

        result
    }
}

// -----------------------------------------------------------------------------
// Policy enum

/// how errors of setup functions are aggregated
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Policy {
    /// stop at the first error and return it
    FailFast,
    /// call every setup function and return all errors
    CollectAll,
}

// -----------------------------------------------------------------------------
// helpers

/// signature of a function registering a controller into a manager
pub type SetupFn<'a, M, O, E> = &'a dyn Fn(&mut M, &O) -> Result<(), E>;

/// calls the setup functions in order, aggregating errors following the given
/// policy. A single error is always returned unchanged.
pub fn register<M, O, E>(
    mgr: &mut M,
    o: &O,
    setups: &[SetupFn<'_, M, O, E>],
    policy: Policy,
) -> Result<(), E>
where
    E: From<Vec<E>>,
{
    let mut errs = vec![];

    for setup in setups {
        if let Err(err) = setup(mgr, o) {
            if policy == Policy::FailFast {
                return Err(err);
            }

            errs.push(err);
        }
    }

    match errs.len() {
        0 => Ok(()),
        1 => Err(errs.remove(0)),
        _ => Err(E::from(errs)),
    }
}

/// creates all controllers with the supplied options and adds them to the
/// supplied manager.
pub fn setup(mgr: &mut Manager, o: &Options) -> Result<(), Error> {
    register(
        mgr,
        o,
        &[&playlist::setup, &provider_config::setup],
        Policy::FailFast,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::svc::{k8s::client, provider, spotify};

    use super::*;

    #[derive(Default)]
    struct Registry(Vec<&'static str>);

    #[test]
    fn fail_fast_stops_at_the_first_error() {
        let calls = AtomicUsize::new(0);
        let first = |_: &mut Registry, _: &()| -> Result<(), Error> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::UnknownResource("spotify_playlist".into()))
        };
        let second = |r: &mut Registry, _: &()| -> Result<(), Error> {
            calls.fetch_add(1, Ordering::SeqCst);
            r.0.push("second");
            Ok(())
        };

        let mut registry = Registry::default();
        let result = register::<_, _, Error>(&mut registry, &(), &[&first, &second], Policy::FailFast);

        assert!(matches!(result, Err(Error::UnknownResource(name)) if name == "spotify_playlist"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.0.is_empty());
    }

    #[test]
    fn every_setup_is_called_in_order() {
        let first = |r: &mut Registry, _: &()| -> Result<(), Error> {
            r.0.push("first");
            Ok(())
        };
        let second = |r: &mut Registry, _: &()| -> Result<(), Error> {
            r.0.push("second");
            Ok(())
        };

        let mut registry = Registry::default();
        register::<_, _, Error>(&mut registry, &(), &[&first, &second], Policy::FailFast)
            .expect("setups to succeed");

        assert_eq!(registry.0, vec!["first", "second"]);
    }

    #[test]
    fn collect_all_returns_every_error() {
        let first = |_: &mut Registry, _: &()| -> Result<(), Error> {
            Err(Error::AlreadyRegistered("Playlist".into()))
        };
        let second = |r: &mut Registry, _: &()| -> Result<(), Error> {
            r.0.push("second");
            Ok(())
        };
        let third = |_: &mut Registry, _: &()| -> Result<(), Error> {
            Err(Error::UnknownResource("spotify_playlist".into()))
        };

        let mut registry = Registry::default();
        let result = register::<_, _, Error>(
            &mut registry,
            &(),
            &[&first, &second, &third],
            Policy::CollectAll,
        );

        assert_eq!(registry.0, vec!["second"]);
        match result {
            Err(Error::Multiple(errs)) => {
                assert_eq!(errs.len(), 2);
                assert!(matches!(errs[0], Error::AlreadyRegistered(_)));
                assert!(matches!(errs[1], Error::UnknownResource(_)));
            }
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn collect_all_returns_a_single_error_unchanged() {
        let first = |_: &mut Registry, _: &()| -> Result<(), Error> {
            Err(Error::AlreadyRegistered("Playlist".into()))
        };
        let second = |_: &mut Registry, _: &()| -> Result<(), Error> { Ok(()) };

        let mut registry = Registry::default();
        let result = register::<_, _, Error>(&mut registry, &(), &[&first, &second], Policy::CollectAll);

        assert!(matches!(result, Err(Error::AlreadyRegistered(name)) if name == "Playlist"));
    }

    fn options() -> Options {
        Options {
            provider: Arc::new(provider::new().expect("provider to be built")),
            setup: Arc::new(spotify::terraform_setup_builder(
                "1.3.9",
                "conradludgate/spotify",
                "0.2.7",
            )),
            workspace: Workspace::from(std::env::temp_dir()),
            poll_interval: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn task_names_are_unique() {
        let mut mgr = Manager::from(client::offline());

        mgr.add("Playlist", async {}).expect("task to be registered");
        let result = mgr.add("Playlist", async {});

        assert!(matches!(result, Err(Error::AlreadyRegistered(name)) if name == "Playlist"));
        assert_eq!(mgr.names(), vec!["Playlist"]);
    }

    #[tokio::test]
    async fn setup_registers_every_controller_once() {
        let mut mgr = Manager::from(client::offline());
        let o = options();

        setup(&mut mgr, &o).expect("controllers to be registered");
        assert_eq!(mgr.names(), vec!["Playlist", "ProviderConfig"]);

        let result = setup(&mut mgr, &o);
        assert!(matches!(result, Err(Error::AlreadyRegistered(name)) if name == "Playlist"));
    }

    #[tokio::test]
    async fn start_fails_when_a_task_stops() {
        let mut mgr = Manager::from(client::offline());

        mgr.add("watcher", futures::future::pending::<()>())
            .expect("task to be registered");
        mgr.add("crashed", async {}).expect("task to be registered");

        let result = tokio::time::timeout(Duration::from_secs(5), mgr.start())
            .await
            .expect("manager to return before the timeout");

        assert!(matches!(result, Err(Error::Stopped(name)) if name == "crashed"));
    }
}
