use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response};

use crate::error::KeypomError;

const UNKNOWN_URL: &str = "<unknown>";

/// Thin wrapper over a `reqwest` client for read-only JSON-RPC traffic. Applies a timeout and a
/// user agent, and retries transient failures (429, 5xx, timeouts) with exponential backoff.
pub struct Request {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl Request {
    pub(crate) fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
            max_retries: 3, // total attempts = 4
        }
    }

    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.client
            .request(Method::POST, url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("keypom-core/{}", env!("CARGO_PKG_VERSION")),
            )
    }

    /// Sends a request built by [`Request::post`], retrying transient failures.
    ///
    /// Only idempotent requests go through here. Transactions are never submitted by this client.
    pub(crate) async fn handle(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, KeypomError> {
        let Some(template) = request_builder.try_clone() else {
            return execute(request_builder).await.map_err(Into::into);
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries as usize);

        (|| async {
            let request_builder = template.try_clone().ok_or_else(|| {
                AttemptError::permanent(UNKNOWN_URL.to_string(), None, "request is not cloneable")
            })?;
            execute(request_builder).await
        })
        .retry(backoff)
        .when(|err: &AttemptError| err.retryable)
        .notify(|err: &AttemptError, delay: Duration| {
            tracing::debug!(url = %err.url, status = ?err.status, ?delay, "retrying rpc request");
        })
        .await
        .map_err(Into::into)
    }
}

#[derive(Debug)]
struct AttemptError {
    url: String,
    status: Option<u16>,
    error: String,
    retryable: bool,
}

impl AttemptError {
    fn retryable(url: String, status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            url,
            status,
            error: error.into(),
            retryable: true,
        }
    }

    fn permanent(url: String, status: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            url,
            status,
            error: error.into(),
            retryable: false,
        }
    }
}

impl From<AttemptError> for KeypomError {
    fn from(value: AttemptError) -> Self {
        Self::NetworkError {
            url: value.url,
            status: value.status,
            error: value.error,
        }
    }
}

async fn execute(request_builder: RequestBuilder) -> Result<Response, AttemptError> {
    let (client, request) = request_builder.build_split();
    let request = request.map_err(|err| {
        AttemptError::permanent(
            err.url()
                .map_or_else(|| UNKNOWN_URL.to_string(), ToString::to_string),
            None,
            format!("request build failed: {err}"),
        )
    })?;
    let url = request.url().to_string();

    match client.execute(request).await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status == 429 || (500..600).contains(&status) {
                return Err(AttemptError::retryable(
                    url,
                    Some(status),
                    format!("request error with bad status code {status}"),
                ));
            }
            Ok(resp)
        }
        Err(err) if err.is_timeout() || err.is_connect() => Err(AttemptError::retryable(
            url,
            None,
            format!("request timeout/connect error: {err}"),
        )),
        Err(err) => Err(AttemptError::permanent(
            url,
            None,
            format!("request failed: {err}"),
        )),
    }
}
