//! Fleet deployment: descriptors, wire delivery and the replacement
//! orchestrator.

mod descriptor;
mod orchestrator;
mod wire;

pub use descriptor::{DeployType, DeployTarget, DeploymentSpec};
pub use orchestrator::{CloudServices, DeployJob};
pub use wire::{transfer_bundle, WireError};
