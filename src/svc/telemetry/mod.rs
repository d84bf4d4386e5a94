//! # Telemetry module
//!
//! This module expose telemetry measurements mainly metrics and health
//! through an http server, structures, enums and helpers

use std::{collections::BTreeMap, convert::Infallible, net::SocketAddr, time::Instant};

use hyper::{
    header::{self, HeaderValue},
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use tracing::{error, info};

#[cfg(feature = "metrics")]
pub mod metrics;

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static SERVER_REQUEST_SUCCESS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "provider_spotify_http_request_success",
            "number of successful request handled by the server",
        ),
        &["method", "path", "status"]
    )
    .expect("metrics 'provider_spotify_http_request_success' to not be already registered")
});

#[cfg(feature = "metrics")]
static SERVER_REQUEST_FAILURE: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "provider_spotify_http_request_failure",
            "number of failed request handled by the server",
        ),
        &["method", "path", "status"]
    )
    .expect("metrics 'provider_spotify_http_request_failure' to not be already registered")
});

#[cfg(feature = "metrics")]
static SERVER_REQUEST_DURATION: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "provider_spotify_http_request_duration",
            "duration of request handled by the server",
        ),
        &["method", "path", "status", "unit"]
    )
    .expect("metrics 'provider_spotify_http_request_duration' to not be already registered")
});

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[cfg(feature = "metrics")]
    #[error("{0}")]
    Metrics(metrics::Error),
    #[error("failed to serialize payload, {0}")]
    Serialize(serde_json::Error),
    #[error("failed to listen on '{0}', {1}")]
    Serve(SocketAddr, hyper::Error),
}

// -----------------------------------------------------------------------------
// Helper methods

/// serves the telemetry endpoints on the given address until the future is
/// dropped
pub async fn serve(addr: SocketAddr) -> Result<(), Error> {
    let service = make_service_fn(|_conn| async {
        Ok::<_, Infallible>(service_fn(|req| async move {
            router(req).await.or_else(|err| {
                error!(error = err.to_string(), "Could not answer request");

                let mut res = Response::default();
                *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                Ok::<_, Infallible>(res)
            })
        }))
    });

    info!(addr = addr.to_string(), "Begin to listen on address");
    Server::try_bind(&addr)
        .map_err(|err| Error::Serve(addr, err))?
        .serve(service)
        .await
        .map_err(|err| Error::Serve(addr, err))
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn router(req: Request<Body>) -> Result<Response<Body>, Error> {
    let begin = Instant::now();

    let result = match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") => healthz(&req).await,
        #[cfg(feature = "metrics")]
        (&Method::GET, "/metrics") => metrics::handler(&req).await.map_err(Error::Metrics),
        _ => not_found(&req).await,
    };

    let duration = Instant::now().duration_since(begin).as_micros();
    let host = match req.uri().host() {
        Some(host) => host.to_string(),
        None => req
            .headers()
            .get(header::HOST)
            .map(|header| String::from_utf8_lossy(header.as_bytes()).to_string())
            .unwrap_or_else(|| String::from("<none>")),
    };

    let (res, success) = match result {
        Ok(res) => (res, true),
        Err(err) => {
            let map = BTreeMap::from([("error".to_string(), err.to_string())]);
            let mut res = Response::default();

            res.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );

            *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            *res.body_mut() =
                Body::from(serde_json::to_string_pretty(&map).map_err(Error::Serialize)?);

            (res, false)
        }
    };

    info!(
        method = req.method().as_str(),
        host = host,
        path = req.uri().path(),
        status = res.status().as_u16(),
        duration = duration,
        "Receive request"
    );

    #[cfg(feature = "metrics")]
    {
        let status = res.status().as_u16().to_string();
        let labels = [req.method().as_str(), req.uri().path(), &status];

        if success {
            SERVER_REQUEST_SUCCESS.with_label_values(&labels).inc();
        } else {
            SERVER_REQUEST_FAILURE.with_label_values(&labels).inc();
        }

        SERVER_REQUEST_DURATION
            .with_label_values(&[labels[0], labels[1], labels[2], "us"])
            .inc_by(duration as f64);
    }

    #[cfg(not(feature = "metrics"))]
    let _ = success;

    Ok(res)
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn healthz(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::NO_CONTENT;

    Ok(res)
}

#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn not_found(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let mut res = Response::default();

    *res.status_mut() = StatusCode::NOT_FOUND;

    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(header::HOST, "localhost")
            .body(Body::empty())
            .expect("request to be built")
    }

    #[tokio::test]
    async fn healthz_answers_no_content() {
        let res = router(get("/healthz")).await.expect("response");

        assert_eq!(res.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_path_answers_not_found() {
        let res = router(get("/playlists")).await.expect("response");

        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let req = Request::builder()
            .method(Method::POST)
            .uri("/healthz")
            .body(Body::empty())
            .expect("request to be built");

        let res = router(req).await.expect("response");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn metrics_are_exposed_in_text_format() {
        router(get("/healthz")).await.expect("response");

        let res = router(get("/metrics")).await.expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let body = hyper::body::to_bytes(res.into_body())
            .await
            .expect("body to be read");
        let body = String::from_utf8_lossy(&body);

        assert!(body.contains("provider_spotify_http_request_success"));
    }
}
