//! Cloud API seams: compute, object storage, load balancing.
//!
//! The deployment pipeline only ever talks to these traits. Concrete
//! provider backends are external to this crate; `testing` ships full mocks
//! for all three.

mod balancer;
mod compute;
mod error;
mod storage;
mod types;

pub use balancer::LoadBalancer;
pub use compute::ComputeClient;
pub use error::CloudError;
pub use storage::{ObjectStore, UploadProgress};
pub use types::{tag_keys, InstanceRecord, InstanceState, InstanceStateChange, LaunchRequest};
