use minfo_events::{Failure, FailureKind};
use minfo_session::SessionError;
use serde::{Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error(transparent)]
    Detection(#[from] Failure),

    #[error("Detection service is shut down")]
    Closed,

    #[error("Invalid session config: {0}")]
    InvalidConfig(String),

    #[error("Method not implemented: {0}")]
    NotImplemented(String),
}

impl PluginError {
    /// Wire code for the failure payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Detection(failure) => failure.kind.code(),
            Self::Closed => "CLOSED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::NotImplemented(_) => "NOT_IMPLEMENTED",
        }
    }

    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Detection(failure) => Some(failure.kind),
            _ => None,
        }
    }

    pub(crate) fn message(&self) -> String {
        match self {
            Self::Detection(failure) => failure.message.clone(),
            other => other.to_string(),
        }
    }
}

/// Renders as `{"code": ..., "message": ...}`.
impl Serialize for PluginError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        #[derive(Serialize)]
        struct Payload<'a> {
            code: &'a str,
            message: String,
        }

        Payload {
            code: self.code(),
            message: self.message(),
        }
        .serialize(serializer)
    }
}

impl From<SessionError> for PluginError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Closed => PluginError::Closed,
            SessionError::Refused(failure) => PluginError::Detection(failure),
            SessionError::InvalidConfig(reason) => PluginError::InvalidConfig(reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
