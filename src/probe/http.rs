//! HTTP probe implementation.

use reqwest::{Client, StatusCode};
use std::time::Duration;
use super::ProbeError;

/// Build the client shared by every poller.
///
/// The timeout covers the whole exchange, body included.
pub fn build_client(timeout: Duration) -> Result<Client, ProbeError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("clusterpulse/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProbeError::Config(e.to_string()))
}

/// Run an HTTP probe against the given URL.
///
/// Anything other than `200 OK` is a failure carrying the status code.
pub async fn run_http_probe(client: &Client, url: &str) -> Result<(), ProbeError> {
    let response = client.get(url).send().await.map_err(map_reqwest_error)?;

    let status = response.status();

    // Drain the body so the connection can go back to the pool
    let _body = response.bytes().await.map_err(map_reqwest_error)?;

    if status != StatusCode::OK {
        return Err(ProbeError::Status(status.as_u16()));
    }

    Ok(())
}

fn map_reqwest_error(e: reqwest::Error) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout
    } else {
        ProbeError::Network(e.to_string())
    }
}
