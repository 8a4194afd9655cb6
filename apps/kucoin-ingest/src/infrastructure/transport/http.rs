//! HTTP Transport
//!
//! [`RestClient`] over `reqwest`. Non-2xx statuses are returned as
//! responses; only transport failures are errors.

use std::time::Duration;

use async_trait::async_trait;

use crate::application::ports::{HttpMethod, RestClient, RestRequest, RestResponse, TransportError};

/// Shared `reqwest` client with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpRestClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpRestClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kucoin-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| TransportError::Io(err.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, err: &reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Io(err.to_string())
        }
    }
}

#[async_trait]
impl RestClient for HttpRestClient {
    async fn execute(&self, request: &RestRequest) -> Result<RestResponse, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|err| self.map_error(&err))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|err| self.map_error(&err))?;
        tracing::trace!(url = %request.url, status, bytes = body.len(), "http response");

        Ok(RestResponse {
            status,
            body: body.to_vec(),
        })
    }
}
