use aria_protocol::{ErrorKind, GatewayError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker class {0} is not configured")]
    ClassNotConfigured(&'static str),
    #[error("worker not ready yet")]
    NotReady,
    #[error("worker lost: {0}")]
    WorkerLost(String),
    #[error("gpu queue is at capacity")]
    Backpressure,
    #[error("timed out waiting for worker: {0:?}")]
    Timeout(std::time::Duration),
}

impl From<PoolError> for GatewayError {
    fn from(e: PoolError) -> Self {
        let kind = match &e {
            PoolError::Backpressure => ErrorKind::Backpressure,
            PoolError::WorkerLost(_) => ErrorKind::WorkerLost,
            PoolError::Timeout(_) => ErrorKind::Timeout,
            PoolError::ClassNotConfigured(_) | PoolError::NotReady => ErrorKind::Internal,
        };
        GatewayError::new(kind, e.to_string())
    }
}

impl From<aria_transport::TransportError> for PoolError {
    fn from(e: aria_transport::TransportError) -> Self {
        match e {
            aria_transport::TransportError::Timeout(d) => PoolError::Timeout(d),
            other => PoolError::WorkerLost(other.to_string()),
        }
    }
}
