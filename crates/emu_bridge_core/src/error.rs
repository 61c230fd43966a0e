use serde::{Serialize, Serializer};
use thiserror::Error;

/// Wire-level error taxonomy. The numeric values are part of the protocol and a
/// missing code always means success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    InternalFailure = 1,
    MissingParameter = 2,
    InvalidParameterValue = 3,
    UnknownCommand = 4,
    UnavailableInCurrentState = 5,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 5] = [
        ErrorCode::InternalFailure,
        ErrorCode::MissingParameter,
        ErrorCode::InvalidParameterValue,
        ErrorCode::UnknownCommand,
        ErrorCode::UnavailableInCurrentState,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_u8() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::InternalFailure => "InternalFailure",
            ErrorCode::MissingParameter => "MissingParameter",
            ErrorCode::InvalidParameterValue => "InvalidParameterValue",
            ErrorCode::UnknownCommand => "UnknownCommand",
            ErrorCode::UnavailableInCurrentState => "UnavailableInCurrentState",
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            BridgeError::MissingParameter(_) => ErrorCode::MissingParameter,
            BridgeError::InvalidParameter { .. } | BridgeError::NotFound { .. } => {
                ErrorCode::InvalidParameterValue
            }
            BridgeError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            BridgeError::Unavailable(_) => ErrorCode::UnavailableInCurrentState,
            BridgeError::Internal(_) | BridgeError::Io(_) | BridgeError::Json(_) => {
                ErrorCode::InternalFailure
            }
        }
    }
}
