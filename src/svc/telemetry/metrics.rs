//! # Metrics module
//!
//! This module expose the prometheus registry over http

use hyper::{header, Body, Request, Response, StatusCode};
use prometheus::{gather, Encoder, TextEncoder};

// -----------------------------------------------------------------------------
// Error enum

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to encode metrics, {0}")]
    Encode(prometheus::Error),
    #[error("failed to build metrics response, {0}")]
    Response(hyper::http::Error),
}

// -----------------------------------------------------------------------------
// Helper methods

/// returns the metrics of the default registry in the prometheus text format
#[cfg_attr(feature = "trace", tracing::instrument)]
pub async fn handler(_req: &Request<Body>) -> Result<Response<Body>, Error> {
    let encoder = TextEncoder::new();
    let mut buf = vec![];
    encoder.encode(&gather(), &mut buf).map_err(Error::Encode)?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(Body::from(buf))
        .map_err(Error::Response)
}
