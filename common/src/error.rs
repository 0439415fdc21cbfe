//! The error taxonomy shared by every storage gateway in the pipeline.
//!
//! Each gateway (object store, queue, remote store) wraps its underlying
//! client errors into this small, closed set of kinds so that workers can
//! dispatch on *kind* (transient vs. auth vs. not-found) without knowing
//! which concrete client produced the failure.

use thiserror::Error;

/// Classification shared across the Object Store, Queue and Remote Store
/// gateways. Workers branch on these variants, never on the wrapped error's
/// own type.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => GatewayError::NotFound(error.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                GatewayError::Transient(error.to_string())
            }
            other => GatewayError::Other(other.to_string()),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::NotFound => GatewayError::NotFound(error.to_string()),
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                GatewayError::Transient(error.to_string())
            }
            ErrorKind::PermissionDenied => GatewayError::Auth(error.to_string()),
            _ => GatewayError::Other(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn io_not_found_classifies_as_not_found() {
        let err: GatewayError = IoError::from(ErrorKind::NotFound).into();
        assert!(err.is_not_found());
    }

    #[test]
    fn io_timed_out_classifies_as_transient() {
        let err: GatewayError = IoError::from(ErrorKind::TimedOut).into();
        assert!(err.is_transient());
    }

    #[test]
    fn io_permission_denied_classifies_as_auth() {
        let err: GatewayError = IoError::from(ErrorKind::PermissionDenied).into();
        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[test]
    fn sqlx_row_not_found_classifies_as_not_found() {
        let err: GatewayError = sqlx::Error::RowNotFound.into();
        assert!(err.is_not_found());
    }
}
