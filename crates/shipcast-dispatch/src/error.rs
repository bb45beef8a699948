use shipcast_core::Platform;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// No authenticated browser profile. Fatal for the run; the fix is a
    /// manual login in the driver's profile, never automated credentials.
    #[error("no authenticated session available for {0}")]
    SessionUnavailable(Platform),
    #[error("rate limited by platform")]
    RateLimited,
    #[error("ui element not found: {0}")]
    ElementNotFound(String),
    #[error("network: {0}")]
    Network(String),
    #[error("driver protocol: {0}")]
    DriverProtocol(String),
    #[error("timed out during {0}")]
    Timeout(&'static str),
    #[error("dispatch aborted: {0}")]
    Aborted(String),
}

impl DispatchError {
    /// Errors worth another submit attempt. Session and protocol failures
    /// are excluded; retrying cannot fix them.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::RateLimited
                | DispatchError::ElementNotFound(_)
                | DispatchError::Network(_)
                | DispatchError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(DispatchError::RateLimited.is_retryable());
        assert!(DispatchError::Network("reset".into()).is_retryable());
        assert!(DispatchError::ElementNotFound("div".into()).is_retryable());
        assert!(DispatchError::Timeout("submit").is_retryable());
        assert!(!DispatchError::SessionUnavailable(Platform::Twitter).is_retryable());
        assert!(!DispatchError::DriverProtocol("bad json".into()).is_retryable());
        assert!(!DispatchError::Aborted("user".into()).is_retryable());
    }
}
