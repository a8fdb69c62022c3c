//! HTTP client for the upstream JSON-RPC node.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use reqwest::{
    Client as HttpClient,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue},
};
use reqwest_middleware::{ClientBuilder as HttpClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::de::DeserializeOwned;

use crate::jsonrpc;

// Retry parameters for transient transport failures.
const EXPONENT_BASE: u32 = 2;
const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(8);
const MAX_RETRIES: u32 = 3;

/// Specialized error types.
#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    /// The message could not be sent to the remote node.
    #[error(transparent)]
    FailedToSend(reqwest_middleware::Error),

    /// The remote node failed to reply with the body of the response.
    #[error("the response text was corrupted: {0}")]
    CorruptedResponse(reqwest::Error),

    /// The server returned an error status code.
    #[error("the HTTP server returned error status code: {0}")]
    HttpStatus(reqwest::Error),

    /// The request cannot be serialized as JSON.
    #[error(transparent)]
    InvalidJsonRequest(serde_json::Error),

    /// The server returned an invalid JSON-RPC response.
    #[error("response `{response}` failed to parse with expected type `{expected_type}`, due to error: `{error}`")]
    InvalidResponse {
        /// The response text.
        response: String,
        /// The expected type of the response.
        expected_type: &'static str,
        /// The parse error.
        error: serde_json::Error,
    },

    /// A numeric quantity was not valid `0x`-prefixed hex.
    #[error("invalid hex quantity `{0}`")]
    InvalidQuantity(String),

    /// Invalid URL format.
    #[error(transparent)]
    InvalidUrl(#[from] url::ParseError),

    /// The JSON-RPC layer returned an error.
    #[error("{error}. Request: {request}")]
    JsonRpcError {
        /// The JSON-RPC error.
        error: jsonrpc::Error,
        /// The request JSON.
        request: String,
    },
}

/// A client for executing RPC methods on a remote Ethereum node, with
/// transient transport failures retried with exponential backoff.
///
/// No client-level timeout is configured: debug traces may legitimately run
/// for a very long time and must not be cut off by the transport.
#[derive(Debug)]
pub struct RpcClient {
    url: url::Url,
    client: ClientWithMiddleware,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a new instance, given a remote node URL. Plain and TLS
    /// upstreams are both supported.
    pub fn new(url: &str) -> Result<Self, RpcClientError> {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(MIN_RETRY_INTERVAL, MAX_RETRY_INTERVAL)
            .base(EXPONENT_BASE)
            .build_with_max_retries(MAX_RETRIES);

        let mut headers = HeaderMap::new();
        headers.append(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = HttpClient::builder()
            .default_headers(headers)
            .build()
            .expect("default construction nor setting default headers can cause an error");

        let client = HttpClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            url: url.parse()?,
            client,
            next_id: AtomicU64::new(0),
        })
    }

    /// Forwards an already-serialized JSON-RPC body byte-identically and
    /// returns the upstream's raw response body.
    pub async fn forward_raw(&self, body: Vec<u8>) -> Result<Vec<u8>, RpcClientError> {
        let response = self
            .client
            .post(self.url.clone())
            .body(body)
            .send()
            .await
            .map_err(RpcClientError::FailedToSend)?
            .error_for_status()
            .map_err(RpcClientError::HttpStatus)?;

        let body = response
            .bytes()
            .await
            .map_err(RpcClientError::CorruptedResponse)?;
        Ok(body.to_vec())
    }

    /// Calls the provided JSON-RPC method and returns the decoded result.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcClientError> {
        let id = jsonrpc::Id::Num(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = serde_json::to_string(&jsonrpc::Request {
            jsonrpc: jsonrpc::Version::V2_0,
            id,
            method,
            params,
        })
        .map_err(RpcClientError::InvalidJsonRequest)?;

        let response = self
            .client
            .post(self.url.clone())
            .body(request.clone())
            .send()
            .await
            .map_err(RpcClientError::FailedToSend)?
            .error_for_status()
            .map_err(RpcClientError::HttpStatus)?
            .text()
            .await
            .map_err(RpcClientError::CorruptedResponse)?;

        let response: jsonrpc::Response<T> =
            serde_json::from_str(&response).map_err(|error| RpcClientError::InvalidResponse {
                response: response.clone(),
                expected_type: std::any::type_name::<T>(),
                error,
            })?;

        response
            .data
            .into_result()
            .map_err(|error| RpcClientError::JsonRpcError { error, request })
    }

    /// The upstream node URL.
    pub fn url(&self) -> &url::Url {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_urls() {
        assert!(matches!(
            RpcClient::new("not a url"),
            Err(RpcClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn accepts_plain_and_tls_urls() {
        assert!(RpcClient::new("http://localhost:8545").is_ok());
        assert!(RpcClient::new("https://rpc.example.com").is_ok());
    }
}
