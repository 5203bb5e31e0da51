//! HTTP request channel using `reqwest`.
//!
//! Queries and mutations are POSTed as JSON to the request endpoint; the
//! server answers with a standard `{data, errors}` body.

use async_trait::async_trait;

use crate::error::BeerGameError;
use crate::protocol::{GraphQlRequest, GraphQlResponse};
use crate::transport::RequestChannel;

/// A [`RequestChannel`] that POSTs each operation to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpRequestChannel {
    http: reqwest::Client,
    url: String,
}

impl HttpRequestChannel {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Use a preconfigured `reqwest` client (proxies, timeouts, TLS).
    pub fn with_client(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RequestChannel for HttpRequestChannel {
    async fn execute(&self, request: GraphQlRequest) -> Result<GraphQlResponse, BeerGameError> {
        tracing::debug!(
            url = %self.url,
            operation = request.operation_name.as_deref().unwrap_or("<anonymous>"),
            "posting request"
        );

        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BeerGameError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BeerGameError::Http(format!("unexpected status {status}")));
        }

        response
            .json::<GraphQlResponse>()
            .await
            .map_err(|e| BeerGameError::Http(e.to_string()))
    }
}
