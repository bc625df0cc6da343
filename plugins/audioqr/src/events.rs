use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PluginError;

/// One inbound call on the request channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            arguments: Value::Null,
        }
    }
}

/// Reply to a `MethodCall`, mirroring the success / error / not-implemented
/// triple a method channel reports back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum MethodResponse {
    Success {
        result: Value,
    },
    Error {
        code: String,
        message: String,
    },
    NotImplemented,
}

impl MethodResponse {
    pub fn success(result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(result) => Self::Success { result },
            Err(e) => Self::Error {
                code: "ENCODE_FAILED".into(),
                message: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn result(&self) -> Option<&Value> {
        match self {
            Self::Success { result } => Some(result),
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Error { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<PluginError> for MethodResponse {
    fn from(error: PluginError) -> Self {
        match error {
            PluginError::NotImplemented(_) => Self::NotImplemented,
            other => Self::Error {
                code: other.code().to_string(),
                message: other.message(),
            },
        }
    }
}

impl<T: Serialize> From<crate::Result<T>> for MethodResponse {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(error) => error.into(),
        }
    }
}
