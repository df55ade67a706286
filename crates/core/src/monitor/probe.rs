//! Status artifact probes.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::types::{ProbeError, StatusReport};

/// Fetches the status artifact an instance publishes about itself.
///
/// Returning `Ok(None)` means "no report yet": the instance is still
/// booting, or the artifact is not written; the monitor keeps polling.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// Fetch the status report from the given public address.
    async fn fetch(&self, address: &str) -> Result<Option<StatusReport>, ProbeError>;
}

/// HTTP probe polling `http://{address}:{port}{path}`.
pub struct HttpStatusProbe {
    client: reqwest::Client,
    port: u16,
    path: String,
}

impl HttpStatusProbe {
    /// Create a probe for the given artifact port and path.
    pub fn new(port: u16, path: impl Into<String>) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProbeError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            port,
            path: path.into(),
        })
    }
}

#[async_trait]
impl StatusProbe for HttpStatusProbe {
    async fn fetch(&self, address: &str) -> Result<Option<StatusReport>, ProbeError> {
        let url = format!("http://{}:{}{}", address, self.port, self.path);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                // Connection refused / timed out is expected while the
                // instance boots.
                debug!("Status artifact not reachable at {}: {}", url, e);
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            debug!("Status artifact not available at {}: HTTP {}", url, response.status());
            return Ok(None);
        }

        let report = response
            .json::<StatusReport>()
            .await
            .map_err(|e| ProbeError::InvalidReport(e.to_string()))?;
        Ok(Some(report))
    }
}
