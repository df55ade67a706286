//! Wire delivery of the bundle to running routing servers.
//!
//! Used instead of instance self-download when a target configures internal
//! URLs: the bundle archive is POSTed to each server's
//! `/routers/{routerId}` endpoint, one server at a time so only one router
//! is down at any moment.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::job::Status;

/// Errors surfaced by wire transfer. All are fatal for the deployment; a
/// server that rejected the bundle would reject it for its siblings too.
#[derive(Debug, Error)]
pub enum WireError {
    /// The configured URL could not be used.
    #[error("malformed deployment URL {url}: {message}")]
    BadUrl { url: String, message: String },

    /// Reading the bundle archive failed.
    #[error("could not read bundle archive: {0}")]
    Archive(#[from] std::io::Error),

    /// The request itself failed.
    #[error("unable to transfer bundle to {url}: {message}")]
    Request { url: String, message: String },

    /// The server answered with anything but 201 Created.
    #[error("got response code {code} from {url} due to {body}")]
    Rejected { code: u16, url: String, body: String },
}

/// Graph builds on the receiving server can take a long time, but not more
/// than an hour.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(3600);

/// POST the bundle archive to each internal URL in turn.
///
/// Servers are taken one at a time so the rest of the fleet keeps serving
/// while one rebuilds its graph. The first rejection aborts the remaining
/// transfers.
pub async fn transfer_bundle(
    internal_urls: &[String],
    router_id: &str,
    archive: &Path,
    status: &Status,
) -> Result<usize, WireError> {
    let client = reqwest::Client::builder()
        .timeout(TRANSFER_TIMEOUT)
        .build()
        .map_err(|e| WireError::Request {
            url: String::new(),
            message: e.to_string(),
        })?;

    // Fixed-length body: the whole archive is read up front so the request
    // carries an exact content length.
    let bytes = tokio::fs::read(archive).await?;

    let mut completed = 0;
    for raw_url in internal_urls {
        let url = format!(
            "{}/routers/{}",
            raw_url.trim_end_matches('/'),
            urlencoding::encode(router_id)
        );
        status.set_message(format!("Deploying to {}", raw_url)).await;
        info!("Transferring bundle to {}", url);

        let response = client
            .post(&url)
            .header("Content-Type", "application/zip")
            .body(bytes.clone())
            .send()
            .await
            .map_err(|e| WireError::Request {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let code = response.status();
        if code != reqwest::StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(WireError::Rejected {
                code: code.as_u16(),
                url,
                body,
            });
        }

        completed += 1;
        info!("Bundle accepted by {} ({} of {})", url, completed, internal_urls.len());
    }

    Ok(completed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_error_display() {
        let err = WireError::Rejected {
            code: 500,
            url: "http://otp-1:8080/routers/default".to_string(),
            body: "graph build failed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "got response code 500 from http://otp-1:8080/routers/default due to graph build failed"
        );
    }
}
