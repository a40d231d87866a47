//! Shared HTTP plumbing for the upstream sources.

use super::provider::SourceError;
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Build the per-provider client. One client is created at wiring time and shared.
pub fn build_client(timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SourceError::NetworkUnreachable(format!("failed to build HTTP client: {e}")))
}

/// Map non-success statuses onto source errors.
pub fn check_status(resp: Response) -> Result<Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited {
            retry_after_secs: retry_after(&resp).unwrap_or(60),
        },
        StatusCode::UNAUTHORIZED => SourceError::AuthenticationRequired(format!("HTTP {status}")),
        s => SourceError::Http { status: s.as_u16() },
    })
}

fn retry_after(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
}

/// Attach the configured timeout to reqwest timeout errors.
pub fn with_timeout(e: reqwest::Error, timeout: Duration) -> SourceError {
    if e.is_timeout() {
        SourceError::Timeout {
            secs: timeout.as_secs(),
        }
    } else {
        e.into()
    }
}
