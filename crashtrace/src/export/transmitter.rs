// Copyright 2024-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fire-and-forget delivery of the wire form: one POST, bounded by a connect timeout and an
//! overall timeout, no retries.

use crate::shared::configuration::Endpoint;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Method, Request, StatusCode};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const APPLICATION_JSON: &str = "application/json";

#[derive(Debug, Error)]
pub enum TransmitError {
    #[error("Failed to build the request: {0}")]
    Request(#[from] http::Error),
    #[error("Failed to start the delivery runtime: {0}")]
    Runtime(std::io::Error),
    #[error("Failed to set up TLS: {0}")]
    Tls(#[from] rustls::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),
    #[error("No response within {0:?}")]
    Timeout(Duration),
    #[error("Collector answered with status {0}")]
    Status(StatusCode),
    #[error("Delivery thread panicked")]
    Panicked,
}

/// Sends `wire` to `endpoint`. Returns whether the collector accepted it; any failure is logged.
pub fn send(
    endpoint: &Endpoint,
    wire: &str,
    connect_timeout: Duration,
    total_timeout: Duration,
) -> bool {
    match try_send(endpoint, wire, connect_timeout, total_timeout) {
        Ok(status) => {
            tracing::info!(url = %endpoint.url(), %status, "Crash report delivered");
            true
        }
        Err(e) => {
            tracing::warn!(url = %endpoint.url(), "Unable to deliver crash report: {e}");
            false
        }
    }
}

/// Blocking delivery on a private current-thread runtime.
///
/// A thread that already drives a tokio runtime cannot block on another one, so in that case the
/// delivery runs on a scoped helper thread.
pub fn try_send(
    endpoint: &Endpoint,
    wire: &str,
    connect_timeout: Duration,
    total_timeout: Duration,
) -> Result<StatusCode, TransmitError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        std::thread::scope(|s| {
            s.spawn(|| send_blocking(endpoint, wire, connect_timeout, total_timeout))
                .join()
                .unwrap_or(Err(TransmitError::Panicked))
        })
    } else {
        send_blocking(endpoint, wire, connect_timeout, total_timeout)
    }
}

fn send_blocking(
    endpoint: &Endpoint,
    wire: &str,
    connect_timeout: Duration,
    total_timeout: Duration,
) -> Result<StatusCode, TransmitError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(TransmitError::Runtime)?;
    let result = rt.block_on(async_send(endpoint, wire, connect_timeout, total_timeout));
    // Don't wait on a resolver thread that may still be stuck.
    rt.shutdown_background();
    result
}

pub async fn async_send(
    endpoint: &Endpoint,
    wire: &str,
    connect_timeout: Duration,
    total_timeout: Duration,
) -> Result<StatusCode, TransmitError> {
    let req = Request::builder()
        .method(Method::POST)
        .uri(endpoint.url().clone())
        .header(header::CONTENT_TYPE, APPLICATION_JSON)
        .header(
            header::USER_AGENT,
            concat!("crashtrace/", env!("CARGO_PKG_VERSION")),
        )
        .body(Full::new(Bytes::copy_from_slice(wire.as_bytes())))?;

    let client = Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .build::<_, Full<Bytes>>(connector(connect_timeout)?);

    let response = tokio::time::timeout(total_timeout, client.request(req))
        .await
        .map_err(|_| TransmitError::Timeout(total_timeout))??;
    let status = response.status();
    if !status.is_success() {
        return Err(TransmitError::Status(status));
    }
    Ok(status)
}

/// Plain TCP for `http` collectors, rustls over it for `https` ones.
fn connector(connect_timeout: Duration) -> Result<HttpsConnector<HttpConnector>, TransmitError> {
    let mut http = HttpConnector::new();
    http.set_connect_timeout(Some(connect_timeout));
    // The TLS layer on top decides which schemes are allowed.
    http.enforce_http(false);

    let tls = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_webpki_roots()
    .with_no_client_auth();
    Ok(HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http))
}
