//! Error type shared by the cloud API seams.

use thiserror::Error;

/// Errors surfaced by compute, object-storage and load-balancer clients.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The provider rejected or failed a request.
    #[error("provider API error: {0}")]
    Api(String),

    /// The referenced machine image does not exist or is unreachable.
    #[error("machine image not found: {0}")]
    ImageNotFound(String),

    /// Credentials lack permission for the attempted operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// A bounded wait elapsed before the provider reached the desired state.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The requested object does not exist.
    #[error("object not found: {0}")]
    ObjectNotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CloudError::ImageNotFound("img-123".to_string());
        assert_eq!(err.to_string(), "machine image not found: img-123");

        let err = CloudError::Timeout("instance status checks".to_string());
        assert_eq!(err.to_string(), "timed out waiting for instance status checks");
    }
}
