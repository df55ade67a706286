//! Mock status probe for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::monitor::{ProbeError, ReportState, StatusProbe, StatusReport};

struct Script {
    nonce: String,
    states: Vec<ReportState>,
    position: usize,
}

impl Script {
    fn next(&mut self) -> StatusReport {
        let state = self
            .states
            .get(self.position)
            .or_else(|| self.states.last())
            .copied()
            .unwrap_or(ReportState::Pending);
        if self.position < self.states.len() {
            self.position += 1;
        }
        StatusReport {
            nonce: self.nonce.clone(),
            state,
            message: None,
        }
    }
}

/// Mock implementation of the StatusProbe trait.
///
/// Scripts a sequence of report states per address; once the sequence is
/// exhausted the last state repeats. Addresses without a script (and without
/// a default script) return no report, like an instance that never writes
/// its artifact.
pub struct MockStatusProbe {
    scripts: Arc<RwLock<HashMap<String, Script>>>,
    default_script: Arc<RwLock<Option<(String, Vec<ReportState>)>>>,
}

impl Default for MockStatusProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_states(states: &[&str]) -> Vec<ReportState> {
    states
        .iter()
        .map(|s| match *s {
            "running" => ReportState::Running,
            "failed" => ReportState::Failed,
            _ => ReportState::Pending,
        })
        .collect()
}

impl MockStatusProbe {
    /// Create a new mock probe.
    pub fn new() -> Self {
        Self {
            scripts: Arc::new(RwLock::new(HashMap::new())),
            default_script: Arc::new(RwLock::new(None)),
        }
    }

    /// Script the reports for one address. States are `"pending"`,
    /// `"running"` or `"failed"`; the last one repeats forever.
    pub async fn script(&self, address: &str, nonce: &str, states: &[&str]) {
        self.scripts.write().await.insert(
            address.to_string(),
            Script {
                nonce: nonce.to_string(),
                states: parse_states(states),
                position: 0,
            },
        );
    }

    /// Script the reports for every address without an explicit script.
    pub async fn script_default(&self, nonce: &str, states: &[&str]) {
        *self.default_script.write().await = Some((nonce.to_string(), parse_states(states)));
    }
}

#[async_trait]
impl StatusProbe for MockStatusProbe {
    async fn fetch(&self, address: &str) -> Result<Option<StatusReport>, ProbeError> {
        let mut scripts = self.scripts.write().await;
        if let Some(script) = scripts.get_mut(address) {
            return Ok(Some(script.next()));
        }
        if let Some((nonce, states)) = self.default_script.read().await.clone() {
            let script = scripts.entry(address.to_string()).or_insert(Script {
                nonce,
                states,
                position: 0,
            });
            return Ok(Some(script.next()));
        }
        Ok(None)
    }
}
