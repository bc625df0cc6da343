use minfo_events::Failure;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The controller task has shut down.
    #[error("session controller is closed")]
    Closed,

    /// A stream-only session could not be started.
    #[error("session refused: {0}")]
    Refused(#[from] Failure),

    #[error("invalid session config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
