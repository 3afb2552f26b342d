//! Blocking HTTP plumbing shared by the gateway providers.

use super::provider::DataError;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub(crate) fn client(timeout: Duration) -> Result<reqwest::blocking::Client, DataError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))
}

/// GET `url` and decode the JSON body.
///
/// 429 becomes `RateLimited`, any other non-2xx `HttpStatus`, connect and
/// timeout failures `NetworkUnreachable`, an undecodable body
/// `ResponseFormatChanged`.
pub(crate) fn get_json<T: DeserializeOwned>(
    client: &reqwest::blocking::Client,
    url: &str,
    endpoint: &str,
    params: &[(&str, &str)],
) -> Result<T, DataError> {
    tracing::trace!(endpoint, ?params, "provider request");

    let resp = client.get(url).query(params).send().map_err(|e| {
        if e.is_connect() || e.is_timeout() {
            DataError::NetworkUnreachable(format!("{endpoint}: {e}"))
        } else {
            DataError::Other(format!("{endpoint}: {e}"))
        }
    })?;

    let status = resp.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(60);
        return Err(DataError::RateLimited {
            retry_after_secs: retry_after,
        });
    }
    if !status.is_success() {
        return Err(DataError::HttpStatus {
            status: status.as_u16(),
            endpoint: endpoint.to_string(),
        });
    }

    resp.json::<T>().map_err(|e| {
        DataError::ResponseFormatChanged(format!("failed to parse response of {endpoint}: {e}"))
    })
}
