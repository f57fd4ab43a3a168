use crate::error::TransportError;
use reqwest::{Method, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::error;

const DEFAULT_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A REST request that the [`RestClient`] can execute, used for venue
/// snapshot fetches and periodic poller data types.
pub trait RestRequest {
    type Response: DeserializeOwned;
    type QueryParams: Serialize;

    fn path(&self) -> std::borrow::Cow<'static, str>;
    fn method() -> Method {
        Method::GET
    }
    fn query_params(&self) -> Option<&Self::QueryParams> {
        None
    }
    fn timeout() -> Duration {
        DEFAULT_HTTP_REQUEST_TIMEOUT
    }
}

/// Thin `reqwest` wrapper shared by every venue's REST calls (order book
/// snapshots, funding rate, open interest, LSR, volatility index polls).
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: url::Url,
}

impl RestClient {
    pub fn new(base_url: url::Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub async fn execute<Request>(&self, request: Request) -> Result<Request::Response, TransportError>
    where
        Request: RestRequest,
    {
        let url = self
            .base_url
            .join(&request.path())
            .map_err(TransportError::UrlParse)?;

        let mut builder = self.http.request(Request::method(), url);
        if let Some(params) = request.query_params() {
            builder = builder.query(params);
        }

        let response = builder
            .timeout(Request::timeout())
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    TransportError::HttpTimeout(Request::timeout())
                } else {
                    TransportError::Http(error)
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok())
                .map(|seconds| seconds * 1000);
            return Err(TransportError::RateLimited { retry_after_ms });
        }

        let payload = response.bytes().await.map_err(TransportError::Http)?;

        serde_json::from_slice(&payload).map_err(|error| {
            error!(
                ?status,
                response_body = %String::from_utf8_lossy(&payload),
                "failed to deserialise HTTP response"
            );
            TransportError::DeserialiseBinary {
                error,
                payload: payload.to_vec(),
            }
        })
    }
}
