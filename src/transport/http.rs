//! Minimal HTTP seam for the long-polling transport.
//!
//! The transport only needs "POST these bytes, give me the status and body
//! back". Keeping that behind a trait lets tests script a Bayeux server in
//! process and lets applications bring their own configured client.

use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use url::Url;

use crate::utils::error::CometError;

/// A minimal async HTTP client for POST requests.
pub trait HttpClient: Send + Sync {
    /// Send `body` as a JSON POST to `url` and return the response.
    fn post<'a>(&'a self, url: &'a Url, body: Vec<u8>)
    -> BoxFuture<'a, Result<HttpResponse, HttpError>>;
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error)]
#[error("HTTP request failed: {0}")]
pub struct HttpError(pub String);

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        HttpError(err.to_string())
    }
}

impl From<HttpError> for CometError {
    fn from(err: HttpError) -> Self {
        CometError::TransportFailure(err.0)
    }
}

/// A [`reqwest`]-backed implementation of [`HttpClient`].
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    inner: reqwest::Client,
}

impl ReqwestHttpClient {
    /// Create a new reqwest-backed HTTP client with default settings.
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }

    /// The timeout must outlast the server's long-poll hold time.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn post<'a>(
        &'a self,
        url: &'a Url,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<HttpResponse, HttpError>> {
        let builder = self
            .inner
            .post(url.clone())
            .header("Content-Type", "application/json;charset=UTF-8")
            .body(body);

        async move {
            let resp = builder.send().await?;
            let status = resp.status().as_u16();
            let body = resp.bytes().await?.to_vec();
            Ok(HttpResponse { status, body })
        }
        .boxed()
    }
}
