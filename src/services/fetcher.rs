use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

const USER_AGENT_STRING: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const ACCEPTED_RETRY_DELAY: Duration = Duration::from_millis(750);

pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    /// Fetches the raw body of a URL.
    ///
    /// A 202 Accepted response is retried exactly once after a short delay.
    /// The request, the body read, and the retry delay all observe `cancel`
    /// and abort immediately when the caller cancels. Any other non-2xx
    /// status is terminal with no retry.
    pub async fn fetch_url(&self, url: &str, cancel: &CancellationToken) -> Result<String> {
        for attempt in 0..2 {
            let request = self.client.get(url).headers(browser_headers()).send();
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                response = request => response?,
            };

            let status = response.status();

            if status.is_success() {
                let body = tokio::select! {
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    body = response.text() => body?,
                };
                return Ok(body);
            }

            if status == StatusCode::ACCEPTED && attempt == 0 {
                tracing::debug!("got 202 for {}, retrying once", url);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AppError::Cancelled),
                    _ = tokio::time::sleep(ACCEPTED_RETRY_DELAY) => {}
                }
                continue;
            }

            return Err(AppError::UnexpectedStatus(status));
        }

        Err(AppError::UnexpectedStatus(StatusCode::ACCEPTED))
    }
}

// Emulate a common browser; identity encoding avoids compressed bodies the
// reader side would have to second-guess.
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_STRING));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}
