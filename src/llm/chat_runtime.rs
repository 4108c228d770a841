use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;
use tokio::time::sleep;

use crate::llm::provider::{Provider, ProviderError, RequestOptions};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub(crate) enum RequestFailure {
    Request(reqwest::Error),
    Api { status: StatusCode, body: String },
}

impl RequestFailure {
    pub(crate) fn into_provider_error(self, provider: Provider) -> ProviderError {
        match self {
            Self::Request(source) => ProviderError::Request { provider, source },
            Self::Api { status, body } => ProviderError::Api {
                provider,
                status,
                body,
            },
        }
    }
}

/// Attempt budget and backoff for one provider call.
#[derive(Debug, Clone, Copy)]
struct RetryBudget {
    attempt: u32,
    max_attempts: u32,
    base_delay_ms: u64,
}

impl RetryBudget {
    fn new(options: &RequestOptions) -> Self {
        Self {
            attempt: 0,
            max_attempts: options.retries.saturating_add(1),
            base_delay_ms: options.retry_delay_ms,
        }
    }

    fn has_next(&self) -> bool {
        self.attempt + 1 < self.max_attempts
    }

    /// Waits before the next attempt; a server `Retry-After` hint wins over backoff.
    async fn wait(&mut self, hint: Option<Duration>) {
        let delay = hint
            .map(|hint| hint.min(MAX_BACKOFF))
            .unwrap_or_else(|| backoff(self.attempt, self.base_delay_ms));
        sleep(delay).await;
        self.attempt += 1;
    }
}

fn build_request<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    payload: &T,
    options: &RequestOptions,
) -> RequestBuilder {
    let mut request = client.post(url).json(payload);
    if let Some(api_key) = api_key {
        request = request.bearer_auth(api_key);
    }
    match options.timeout_secs {
        Some(secs) => request.timeout(Duration::from_secs(secs)),
        None => request,
    }
}

/// POSTs a JSON payload, retrying 429/5xx and transient transport failures.
pub(crate) async fn post_json_with_retry<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    payload: &T,
    options: RequestOptions,
) -> Result<reqwest::Response, RequestFailure> {
    let mut budget = RetryBudget::new(&options);

    loop {
        let failure = match build_request(client, url, api_key, payload, &options).send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                let hint = retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                if should_retry_status(status) && budget.has_next() {
                    tracing::warn!(%status, attempt = budget.attempt, "retrying provider request");
                    budget.wait(hint).await;
                    continue;
                }
                RequestFailure::Api { status, body }
            }
            Err(source) => {
                if is_transient(&source) && budget.has_next() {
                    tracing::warn!(error = %source, attempt = budget.attempt, "retrying provider request");
                    budget.wait(None).await;
                    continue;
                }
                RequestFailure::Request(source)
            }
        };
        return Err(failure);
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// Reads a `Retry-After` header given in whole seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn backoff(attempt: u32, base_ms: u64) -> Duration {
    let multiplier = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(multiplier)).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn backoff_doubles_until_the_cap() {
        assert_eq!(backoff(0, 250), Duration::from_millis(250));
        assert_eq!(backoff(3, 250), Duration::from_millis(2_000));
        assert_eq!(backoff(12, 250), MAX_BACKOFF);
        assert_eq!(backoff(70, 1), MAX_BACKOFF);
    }

    #[test]
    fn only_rate_limits_and_server_errors_retry() {
        assert!(should_retry_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!should_retry_status(StatusCode::BAD_REQUEST));
        assert!(!should_retry_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn retry_after_header_is_parsed_in_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 3 "));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn budget_counts_retries_after_first_attempt() {
        let options = RequestOptions {
            retries: 1,
            ..RequestOptions::default()
        };
        let mut budget = RetryBudget::new(&options);
        assert!(budget.has_next());
        budget.attempt += 1;
        assert!(!budget.has_next());
    }
}
