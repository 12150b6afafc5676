//! Error taxonomy for the connection, protocol, and data-flow core.
//!
//! Each variant corresponds to one row of the failure-kind table in the
//! design: callers branch on [`BlackholioError::is_retryable`] rather than
//! on concrete variants where possible, the way the session's reconnect
//! policy and the pool's circuit breaker do.

use std::fmt;

/// Machine-readable error kind, independent of the human-readable message.
///
/// Mirrors the taxonomy the connection core commits to: a fixed, closed set
/// of kinds a caller can match on, retryable or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ServerConfiguration,
    Authentication,
    ProtocolError,
    ConnectionLost,
    ServerUnavailable,
    Timeout,
    DataValidation,
    GameState,
}

impl ErrorKind {
    /// Short machine-readable code, as the original exception classes carried.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::ServerConfiguration => "INVALID_CONFIG",
            ErrorKind::Authentication => "AUTHENTICATION_ERROR",
            ErrorKind::ProtocolError => "PROTOCOL_ERROR",
            ErrorKind::ConnectionLost => "CONNECTION_LOST",
            ErrorKind::ServerUnavailable => "SERVER_UNAVAILABLE",
            ErrorKind::Timeout => "CONNECTION_TIMEOUT",
            ErrorKind::DataValidation => "VALIDATION_ERROR",
            ErrorKind::GameState => "INVALID_GAME_STATE",
        }
    }

    fn category(self) -> &'static str {
        match self {
            ErrorKind::ServerConfiguration => "server_configuration",
            ErrorKind::Authentication => "authentication",
            ErrorKind::ProtocolError => "protocol",
            ErrorKind::ConnectionLost => "connection_lost",
            ErrorKind::ServerUnavailable => "server_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DataValidation => "validation",
            ErrorKind::GameState => "game_state",
        }
    }
}

/// The core's error type. Request-level faults resolve a caller's
/// completion slot with this; connection-level faults drive the session's
/// reconnect policy via [`BlackholioError::is_retryable`].
#[derive(Debug)]
pub struct BlackholioError {
    kind: ErrorKind,
    message: String,
    /// Name of the offending field, for configuration/validation errors.
    pub field: Option<String>,
    /// The operation (e.g. reducer name) associated with a timeout.
    pub operation: Option<String>,
}

impl BlackholioError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        BlackholioError {
            kind,
            message: message.into(),
            field: None,
            operation: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn category(&self) -> &'static str {
        self.kind.category()
    }

    /// Retryable kinds drive the session's backoff policy and the pool's
    /// reconnect-on-acquire-failure path; non-retryable kinds are surfaced
    /// directly to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionLost | ErrorKind::ServerUnavailable | ErrorKind::Timeout
        )
    }

    pub fn server_configuration(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerConfiguration, message).with_field(field)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProtocolError, message)
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionLost, message)
    }

    pub fn server_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerUnavailable, message)
    }

    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        let operation = operation.into();
        Self::new(
            ErrorKind::Timeout,
            format!("timed out after {:.3}s during {operation}", duration.as_secs_f64()),
        )
        .with_operation(operation)
    }

    pub fn data_validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataValidation, message).with_field(field)
    }

    pub fn game_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GameState, message)
    }
}

impl fmt::Display for BlackholioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for BlackholioError {}

pub type Result<T> = std::result::Result<T, BlackholioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_spec_table() {
        assert!(BlackholioError::connection_lost("x").is_retryable());
        assert!(BlackholioError::server_unavailable("x").is_retryable());
        assert!(BlackholioError::timeout("op", std::time::Duration::from_secs(1)).is_retryable());
        assert!(!BlackholioError::authentication("x").is_retryable());
        assert!(!BlackholioError::server_configuration("x", "port").is_retryable());
        assert!(!BlackholioError::protocol("x").is_retryable());
        assert!(!BlackholioError::data_validation("x", "f").is_retryable());
        assert!(!BlackholioError::game_state("x").is_retryable());
    }

    #[test]
    fn timeout_names_the_operation() {
        let e = BlackholioError::timeout("reducer_x", std::time::Duration::from_millis(100));
        assert_eq!(e.operation.as_deref(), Some("reducer_x"));
        assert_eq!(e.code(), "CONNECTION_TIMEOUT");
    }

    #[test]
    fn display_includes_code() {
        let e = BlackholioError::server_configuration("bad port", "port");
        assert_eq!(e.to_string(), "[INVALID_CONFIG] bad port");
    }
}
