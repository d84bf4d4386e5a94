//! # Logging module
//!
//! This module provides logging facilities and helpers

use tracing::{level_filters::LevelFilter, Level};
use tracing_subscriber::{fmt, prelude::*};

use crate::svc::cfg::Configuration;

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to set global default subscriber, {0}")]
    GlobalDefaultSubscriber(tracing_subscriber::util::TryInitError),
    #[cfg(feature = "trace")]
    #[error("failed to install jaeger pipeline, {0}")]
    Jaeger(opentelemetry::trace::TraceError),
}

// -----------------------------------------------------------------------------
// Guard structure

/// keeps alive the telemetry clients that flush their buffers on drop
#[derive(Default)]
pub struct Guard {
    #[cfg(feature = "tracker")]
    _sentry: Option<sentry::ClientInitGuard>,
}

impl Drop for Guard {
    fn drop(&mut self) {
        #[cfg(feature = "trace")]
        opentelemetry::global::shutdown_tracer_provider();
    }
}

// -----------------------------------------------------------------------------
// helpers

pub const fn level(verbosity: usize) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn initialize(config: &Configuration, verbosity: usize) -> Result<Guard, Error> {
    #[cfg(not(any(feature = "trace", feature = "tracker")))]
    let _ = config;

    let registry = tracing_subscriber::registry()
        .with(LevelFilter::from_level(level(verbosity)))
        .with(
            fmt::layer()
                .with_thread_names(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(true),
        );

    #[cfg(feature = "tracker")]
    let (registry, sentry) = {
        let guard = config.sentry.as_ref().map(|s| {
            sentry::init((
                s.dsn.to_owned(),
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });

        (registry.with(guard.as_ref().map(|_| sentry_tracing::layer())), guard)
    };

    #[cfg(feature = "trace")]
    let registry = {
        let layer = match &config.jaeger {
            Some(jaeger) => {
                let tracer = opentelemetry_jaeger::new_collector_pipeline()
                    .with_endpoint(jaeger.endpoint.to_owned())
                    .with_service_name(env!("CARGO_PKG_NAME"))
                    .with_reqwest()
                    .install_batch(opentelemetry::runtime::Tokio)
                    .map_err(Error::Jaeger)?;

                Some(tracing_opentelemetry::layer().with_tracer(tracer))
            }
            None => None,
        };

        registry.with(layer)
    };

    registry.try_init().map_err(Error::GlobalDefaultSubscriber)?;

    Ok(Guard {
        #[cfg(feature = "tracker")]
        _sentry: sentry,
    })
}
