//! HTTP plumbing shared by both adapter families.
//!
//! Both families POST a JSON body with bearer authentication and differ
//! only in endpoint path and body shape.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::secrets::ApiCredential;
use super::ProviderError;

/// Longest error body echoed into a [`ProviderError::Status`] message.
const MAX_ERROR_BODY: usize = 300;

pub(super) fn build_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))
}

/// Join a base URL and a path without doubling the slash.
pub(super) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// POST `body` to `url` and decode the JSON reply.
pub(super) async fn post_json<B, R>(
    client: &reqwest::Client,
    url: &str,
    credential: &ApiCredential,
    body: &B,
    timeout: Duration,
) -> Result<R, ProviderError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let response = client
        .post(url)
        .bearer_auth(credential.expose())
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(timeout)
            } else {
                ProviderError::Transport(e.to_string())
            }
        })?;

    let status = response.status();

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(ProviderError::RateLimited { retry_after });
    }

    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            message: error_message(&text),
        });
    }

    response.json::<R>().await.map_err(|e| {
        if e.is_timeout() {
            ProviderError::Timeout(timeout)
        } else {
            ProviderError::Decode(e.to_string())
        }
    })
}

/// Pull `error.message` out of an error body, or fall back to the raw text.
fn error_message(body: &str) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty error body".to_string();
    }
    match trimmed.char_indices().nth(MAX_ERROR_BODY) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
