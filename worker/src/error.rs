use thiserror::Error;

/// Errors that can prevent the process from starting at all. Per-item
/// failures during ingest/validate/transfer/cleanup are handled inline by
/// each worker and never reach this type — they are swallowed at the
/// worker boundary after logging, per the propagation policy.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to connect to database: {0}")]
    DatabaseUnreachable(#[from] sqlx::Error),

    #[error("failed to bind status server: {0}")]
    BindFailed(std::io::Error),
}
