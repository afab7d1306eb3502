//! Shared HTTP plumbing for platform REST calls.

use std::time::Duration;

use serde_json::Value;

use abylebot_core::ConnectionError;

/// Default timeout for REST calls.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client(timeout: Option<Duration>) -> Result<reqwest::Client, ConnectionError> {
    reqwest::Client::builder()
        .timeout(timeout.unwrap_or(HTTP_TIMEOUT))
        .build()
        .map_err(|e| ConnectionError::Http(e.to_string()))
}

/// Read a handshake response as JSON, turning non-2xx statuses into
/// [`ConnectionError::Rejected`].
pub(crate) async fn handshake_json(
    endpoint: &str,
    resp: Result<reqwest::Response, reqwest::Error>,
) -> Result<Value, ConnectionError> {
    let resp = resp.map_err(|e| ConnectionError::Http(format!("{endpoint}: {e}")))?;
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| ConnectionError::Http(format!("{endpoint}: {e}")))?;

    if !status.is_success() {
        return Err(ConnectionError::Rejected {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| {
        ConnectionError::Handshake(format!("{endpoint} returned invalid json: {e}"))
    })
}

/// Fail with the response body on any non-2xx status.
pub(crate) async fn ensure_success(
    what: &str,
    resp: reqwest::Response,
) -> anyhow::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(anyhow::anyhow!("{what} failed (HTTP {status}): {body}"))
}
