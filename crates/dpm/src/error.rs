//! Error types for dpm

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DpmError>;

#[derive(Debug, Error)]
pub enum DpmError {
    #[error("Failed to bind plugin socket {path:?}: {source}")]
    SocketBind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to clean up plugin socket {path:?}: {source}")]
    SocketCleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registration with kubelet failed: {0}")]
    Registration(#[from] RegistrationError),

    #[error("Device {0} is already advertised")]
    DuplicateDevice(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure of a start attempt, shared with every caller that waited on it.
    #[error(transparent)]
    Start(Arc<DpmError>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DpmError {
    /// The underlying error, looking through [`DpmError::Start`].
    pub fn root(&self) -> &DpmError {
        match self {
            DpmError::Start(inner) => inner.root(),
            other => other,
        }
    }

    pub fn is_registration(&self) -> bool {
        matches!(self.root(), DpmError::Registration(_))
    }
}

/// Why the registration handshake did not complete.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("could not dial {path:?}: {source}")]
    Dial {
        path: PathBuf,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("dialing {path:?} timed out after {timeout:?}")]
    DialTimeout { path: PathBuf, timeout: Duration },

    #[error("kubelet at {path:?} did not answer within {timeout:?}")]
    Unanswered { path: PathBuf, timeout: Duration },

    #[error("kubelet rejected registration: {0}")]
    Rejected(#[from] tonic::Status),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_looks_through_shared_start_failure() {
        let inner = DpmError::Registration(RegistrationError::Rejected(
            tonic::Status::unavailable("kubelet restarting"),
        ));
        let shared = DpmError::Start(Arc::new(inner));

        assert!(shared.is_registration());
        assert!(matches!(shared.root(), DpmError::Registration(_)));
        assert!(shared.to_string().contains("kubelet restarting"));
    }

    #[test]
    fn test_socket_errors_are_not_registration() {
        let err = DpmError::SocketBind {
            path: PathBuf::from("/tmp/kvm.sock"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(!err.is_registration());
        assert!(err.to_string().contains("kvm.sock"));
    }
}
