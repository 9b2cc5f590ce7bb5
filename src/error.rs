//! Error types for zkwire-client.

use std::fmt;

use thiserror::Error;

/// Result codes reported by the server in a reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    SystemError,
    RuntimeInconsistency,
    DataInconsistency,
    /// Derived locally when a request was in flight as the connection dropped.
    ConnectionLoss,
    MarshallingError,
    Unimplemented,
    OperationTimeout,
    BadArguments,
    ApiError,
    NoNode,
    NoAuth,
    BadVersion,
    NoChildrenForEphemerals,
    NodeExists,
    NotEmpty,
    SessionExpired,
    InvalidCallback,
    InvalidAcl,
    AuthFailed,
    /// Any code this client does not know about.
    Unknown(i32),
}

impl ErrorCode {
    /// Map a raw wire code to an `ErrorCode`.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            -1 => Self::SystemError,
            -2 => Self::RuntimeInconsistency,
            -3 => Self::DataInconsistency,
            -4 => Self::ConnectionLoss,
            -5 => Self::MarshallingError,
            -6 => Self::Unimplemented,
            -7 => Self::OperationTimeout,
            -8 => Self::BadArguments,
            -100 => Self::ApiError,
            -101 => Self::NoNode,
            -102 => Self::NoAuth,
            -103 => Self::BadVersion,
            -108 => Self::NoChildrenForEphemerals,
            -110 => Self::NodeExists,
            -111 => Self::NotEmpty,
            -112 => Self::SessionExpired,
            -113 => Self::InvalidCallback,
            -114 => Self::InvalidAcl,
            -115 => Self::AuthFailed,
            other => Self::Unknown(other),
        }
    }

    /// The raw wire code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::SystemError => -1,
            Self::RuntimeInconsistency => -2,
            Self::DataInconsistency => -3,
            Self::ConnectionLoss => -4,
            Self::MarshallingError => -5,
            Self::Unimplemented => -6,
            Self::OperationTimeout => -7,
            Self::BadArguments => -8,
            Self::ApiError => -100,
            Self::NoNode => -101,
            Self::NoAuth => -102,
            Self::BadVersion => -103,
            Self::NoChildrenForEphemerals => -108,
            Self::NodeExists => -110,
            Self::NotEmpty => -111,
            Self::SessionExpired => -112,
            Self::InvalidCallback => -113,
            Self::InvalidAcl => -114,
            Self::AuthFailed => -115,
            Self::Unknown(code) => *code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::SystemError => "system error",
            Self::RuntimeInconsistency => "runtime inconsistency",
            Self::DataInconsistency => "data inconsistency",
            Self::ConnectionLoss => "connection loss",
            Self::MarshallingError => "marshalling error",
            Self::Unimplemented => "unimplemented",
            Self::OperationTimeout => "operation timeout",
            Self::BadArguments => "bad arguments",
            Self::ApiError => "api error",
            Self::NoNode => "no node",
            Self::NoAuth => "not authenticated",
            Self::BadVersion => "bad version",
            Self::NoChildrenForEphemerals => "ephemeral nodes may not have children",
            Self::NodeExists => "node exists",
            Self::NotEmpty => "directory not empty",
            Self::SessionExpired => "session expired",
            Self::InvalidCallback => "invalid callback",
            Self::InvalidAcl => "invalid ACL",
            Self::AuthFailed => "authentication failed",
            Self::Unknown(code) => return write!(f, "unknown error code {}", code),
        };
        f.write_str(text)
    }
}

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum ZkError {
    /// Malformed frame or record.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O or socket fault.
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Handshake, ping or caller-supplied deadline elapsed.
    #[error("Operation timed out")]
    Timeout,

    /// The session is gone; terminal.
    #[error("Session expired")]
    SessionExpired,

    /// The client was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The server rejected the supplied credentials; terminal.
    #[error("Authentication failed")]
    AuthFailed,

    /// Server-reported failure for a single request.
    #[error("Operation failed: {0}")]
    Operation(ErrorCode),

    /// Rejected locally before submission.
    #[error("Bad arguments: {0}")]
    BadArguments(String),

    /// Too many requests queued while disconnected, or the writer stalled.
    #[error("Backpressure timeout")]
    Backpressure,
}

impl ZkError {
    /// The server error code carried by this error, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Operation(code) => Some(*code),
            Self::SessionExpired => Some(ErrorCode::SessionExpired),
            Self::AuthFailed => Some(ErrorCode::AuthFailed),
            _ => None,
        }
    }

    /// True for the connection-loss error given to requests that were in flight.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Operation(ErrorCode::ConnectionLoss))
    }
}

impl From<ErrorCode> for ZkError {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::SessionExpired => Self::SessionExpired,
            ErrorCode::AuthFailed => Self::AuthFailed,
            other => Self::Operation(other),
        }
    }
}

/// Result type alias using ZkError.
pub type Result<T> = std::result::Result<T, ZkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip_known_codes() {
        for code in [0, -1, -4, -8, -101, -103, -110, -111, -112, -115] {
            assert_eq!(ErrorCode::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let code = ErrorCode::from_code(-999);
        assert_eq!(code, ErrorCode::Unknown(-999));
        assert_eq!(code.code(), -999);
        assert!(code.to_string().contains("-999"));
    }

    #[test]
    fn test_from_code_maps_terminal_errors() {
        assert!(matches!(
            ZkError::from(ErrorCode::SessionExpired),
            ZkError::SessionExpired
        ));
        assert!(matches!(ZkError::from(ErrorCode::AuthFailed), ZkError::AuthFailed));
        assert!(matches!(
            ZkError::from(ErrorCode::NoNode),
            ZkError::Operation(ErrorCode::NoNode)
        ));
    }

    #[test]
    fn test_connection_loss_helper() {
        let err = ZkError::Operation(ErrorCode::ConnectionLoss);
        assert!(err.is_connection_loss());
        assert_eq!(err.code(), Some(ErrorCode::ConnectionLoss));
        assert!(!ZkError::Timeout.is_connection_loss());
    }
}
